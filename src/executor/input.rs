// Physical input simulation on top of enigo.
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::coordinator::PointerPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Click,
    Press,
    Release,
}

/// The single pointer + keyboard pair driving the mirrored device.
///
/// Implementations are owned by exactly one [`ActionExecutor`](super::action::ActionExecutor),
/// which is in turn owned by one engine; the type is intentionally not `Clone`.
pub trait InputDevice {
    fn move_to(&mut self, point: PointerPoint) -> PhoneClawResult<()>;

    fn move_by(&mut self, dx: i32, dy: i32) -> PhoneClawResult<()>;

    /// Where the pointer actually is right now.
    fn location(&self) -> PhoneClawResult<PointerPoint>;

    fn left_button(&mut self, action: ButtonAction) -> PhoneClawResult<()>;

    fn key(&mut self, c: char) -> PhoneClawResult<()>;
}

pub struct EnigoInput {
    enigo: Enigo,
}

impl EnigoInput {
    pub fn connect() -> PhoneClawResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PhoneClawError::Executor(format!("enigo init: {e}")))?;
        tracing::info!("input device connected");
        Ok(Self { enigo })
    }
}

fn input_err(op: &str, e: impl std::fmt::Display) -> PhoneClawError {
    PhoneClawError::Executor(format!("{op}: {e}"))
}

impl InputDevice for EnigoInput {
    fn move_to(&mut self, point: PointerPoint) -> PhoneClawResult<()> {
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .map_err(|e| input_err("move_mouse", e))
    }

    fn move_by(&mut self, dx: i32, dy: i32) -> PhoneClawResult<()> {
        self.enigo
            .move_mouse(dx, dy, Coordinate::Rel)
            .map_err(|e| input_err("move_mouse(rel)", e))
    }

    fn location(&self) -> PhoneClawResult<PointerPoint> {
        let (x, y) = self.enigo.location().map_err(|e| input_err("location", e))?;
        Ok(PointerPoint { x, y })
    }

    fn left_button(&mut self, action: ButtonAction) -> PhoneClawResult<()> {
        let direction = match action {
            ButtonAction::Click => Direction::Click,
            ButtonAction::Press => Direction::Press,
            ButtonAction::Release => Direction::Release,
        };
        self.enigo
            .button(Button::Left, direction)
            .map_err(|e| input_err("button", e))
    }

    fn key(&mut self, c: char) -> PhoneClawResult<()> {
        let key = match c {
            '\n' => Key::Return,
            '\t' => Key::Tab,
            ' ' => Key::Space,
            other => Key::Unicode(other),
        };
        self.enigo
            .key(key, Direction::Click)
            .map_err(|e| input_err("key", e))
    }
}
