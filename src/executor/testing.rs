// In-memory input device for unit tests.
use std::sync::{Arc, Mutex};

use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::coordinator::PointerPoint;
use crate::executor::input::{ButtonAction, InputDevice};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    MoveTo(i32, i32),
    MoveBy(i32, i32),
    Button(ButtonAction),
    Key(char),
}

#[derive(Clone, Default)]
pub struct RecordingDevice {
    pub events: Arc<Mutex<Vec<DeviceEvent>>>,
    pub position: Arc<Mutex<(i32, i32)>>,
    /// Key presses fail once this character is reached.
    pub fail_on_key: Option<char>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, ev: DeviceEvent) {
        self.events.lock().unwrap().push(ev);
    }
}

impl InputDevice for RecordingDevice {
    fn move_to(&mut self, point: PointerPoint) -> PhoneClawResult<()> {
        *self.position.lock().unwrap() = (point.x, point.y);
        self.record(DeviceEvent::MoveTo(point.x, point.y));
        Ok(())
    }

    fn move_by(&mut self, dx: i32, dy: i32) -> PhoneClawResult<()> {
        {
            let mut pos = self.position.lock().unwrap();
            pos.0 += dx;
            pos.1 += dy;
        }
        self.record(DeviceEvent::MoveBy(dx, dy));
        Ok(())
    }

    fn location(&self) -> PhoneClawResult<PointerPoint> {
        let (x, y) = *self.position.lock().unwrap();
        Ok(PointerPoint { x, y })
    }

    fn left_button(&mut self, action: ButtonAction) -> PhoneClawResult<()> {
        self.record(DeviceEvent::Button(action));
        Ok(())
    }

    fn key(&mut self, c: char) -> PhoneClawResult<()> {
        if self.fail_on_key == Some(c) {
            return Err(PhoneClawError::Executor(format!("key injection failed for {c:?}")));
        }
        self.record(DeviceEvent::Key(c));
        Ok(())
    }
}
