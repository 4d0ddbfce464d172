/// Action executor: validates and performs one device action at a time.
///
/// The executor keeps no memory of pointer position or focus between calls.
/// Every operation is bounds-checked before any side effect and reports an
/// [`ActionResult`]; it never returns `Err` to the caller.
use std::time::Duration;

use crate::agent_engine::state::{ActionResult, ScrollDirection};
use crate::config::{DeviceConfig, ExecutorConfig};
use crate::errors::PhoneClawResult;
use crate::executor::coordinator::{CoordinateNormalizer, DeviceBounds, DevicePoint};
use crate::executor::input::{ButtonAction, InputDevice};
use crate::executor::text_input;

const DRAG_STEPS: i32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorTiming {
    pub settle: Duration,
    pub key_delay: Duration,
    pub drag_duration: Duration,
}

impl From<&ExecutorConfig> for ExecutorTiming {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.settle_ms),
            key_delay: Duration::from_millis(cfg.key_delay_ms),
            drag_duration: Duration::from_millis(cfg.drag_duration_ms),
        }
    }
}

pub struct ActionExecutor {
    device: Box<dyn InputDevice>,
    normalizer: CoordinateNormalizer,
    home: DevicePoint,
    scroll_distance: i32,
    timing: ExecutorTiming,
}

impl ActionExecutor {
    pub fn new(device: Box<dyn InputDevice>, device_cfg: &DeviceConfig, exec_cfg: &ExecutorConfig) -> Self {
        Self {
            device,
            normalizer: CoordinateNormalizer::new(DeviceBounds::from(device_cfg)),
            home: DevicePoint {
                x: device_cfg.home_x,
                y: device_cfg.home_y,
            },
            scroll_distance: exec_cfg.scroll_distance,
            timing: ExecutorTiming::from(exec_cfg),
        }
    }

    /// Move the pointer to a device-space position.
    pub async fn move_pointer(&mut self, x: i32, y: i32) -> ActionResult {
        let point = match self.normalizer.check(DevicePoint { x, y }) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(x, y, error = %e, "move rejected");
                return ActionResult::error(e.to_string());
            }
        };
        let outcome = self.place(point).await;
        self.finish("move", outcome)
    }

    /// Move relative to where the pointer actually is, in percent of the device extent.
    pub async fn move_pointer_by(&mut self, dx_pct: f64, dy_pct: f64) -> ActionResult {
        let current = match self.device.location() {
            Ok(p) => self.normalizer.from_pointer(p),
            Err(e) => return self.finish("move_by", Err(e)),
        };
        let target = match self.normalizer.to_device_delta(current, dx_pct, dy_pct) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(dx_pct, dy_pct, ?current, error = %e, "relative move rejected");
                return ActionResult::error(e.to_string());
            }
        };
        let outcome = self.place(target).await;
        self.finish("move_by", outcome)
    }

    /// Click twice at the current pointer position.
    pub async fn click(&mut self) -> ActionResult {
        let outcome = self.double_click().await;
        self.finish("click", outcome)
    }

    /// Drag gesture from the current pointer position.
    ///
    /// Pointer-space offsets: down → (0, +d), up → (0, -d), left → (+d, 0),
    /// right → (-d, 0). Scroll direction names the content movement of a
    /// physical swipe, so these are inverted relative to the finger motion.
    pub async fn scroll(&mut self, direction: ScrollDirection) -> ActionResult {
        let d = self.scroll_distance;
        let (dx, dy) = match direction {
            ScrollDirection::Left => (d, 0),
            ScrollDirection::Right => (-d, 0),
            ScrollDirection::Up => (0, -d),
            ScrollDirection::Down => (0, d),
        };
        let outcome = self.drag(dx, dy).await;
        self.finish("scroll", outcome)
    }

    /// Type `text` one key at a time. Stops at the first refused or failed
    /// key and reports only that entry failed.
    pub async fn enter_text(&mut self, text: &str) -> ActionResult {
        for c in text.chars() {
            if !text_input::is_physical_key(c) {
                tracing::warn!(ch = ?c, "text entry aborted on unsupported character");
                return ActionResult::error(text_input::unsupported_message(c));
            }
            if let Err(e) = self.device.key(c) {
                tracing::warn!(error = %e, "text entry aborted on injection failure");
                return ActionResult::from_error(format!("Text entry aborted: {e}"), &e);
            }
            self.pause(self.timing.key_delay).await;
        }
        tracing::debug!(chars = text.chars().count(), "text entered");
        ActionResult::ok()
    }

    /// Go to the configured home button and press it once.
    pub async fn home(&mut self) -> ActionResult {
        let point = match self.normalizer.check(self.home) {
            Ok(p) => p,
            Err(e) => return ActionResult::error(format!("home button misconfigured: {e}")),
        };
        let outcome = self.press_at(point).await;
        self.finish("home", outcome)
    }

    // ── Internals ──────────────────────────────────────────────────────────

    async fn place(&mut self, point: DevicePoint) -> PhoneClawResult<()> {
        let pointer = self.normalizer.to_pointer(point);
        tracing::debug!(x = point.x, y = point.y, px = pointer.x, py = pointer.y, "pointer → device point");
        self.device.move_to(pointer)?;
        self.pause(self.timing.settle).await;
        Ok(())
    }

    async fn double_click(&mut self) -> PhoneClawResult<()> {
        for _ in 0..2 {
            self.device.left_button(ButtonAction::Click)?;
            self.pause(self.timing.settle).await;
        }
        Ok(())
    }

    async fn press_at(&mut self, point: DevicePoint) -> PhoneClawResult<()> {
        self.place(point).await?;
        self.device.left_button(ButtonAction::Click)?;
        self.pause(self.timing.settle).await;
        Ok(())
    }

    /// Press, move in small steps over the drag duration, release. The button
    /// is released even if a step fails.
    async fn drag(&mut self, dx: i32, dy: i32) -> PhoneClawResult<()> {
        self.device.left_button(ButtonAction::Press)?;
        let step_delay = self.timing.drag_duration / DRAG_STEPS as u32;

        let mut moved = (0, 0);
        let mut step_result = Ok(());
        for i in 1..=DRAG_STEPS {
            let next = (dx * i / DRAG_STEPS, dy * i / DRAG_STEPS);
            step_result = self.device.move_by(next.0 - moved.0, next.1 - moved.1);
            if step_result.is_err() {
                break;
            }
            moved = next;
            self.pause(step_delay).await;
        }

        let release = self.device.left_button(ButtonAction::Release);
        step_result?;
        release?;
        self.pause(self.timing.settle).await;
        Ok(())
    }

    async fn pause(&self, d: Duration) {
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    fn finish(&self, op: &str, outcome: PhoneClawResult<()>) -> ActionResult {
        match outcome {
            Ok(()) => {
                tracing::info!(op, "action ok");
                ActionResult::ok()
            }
            Err(e) => {
                tracing::error!(op, error = %e, "action failed");
                ActionResult::from_error(format!("{op} failed: {e}"), &e)
            }
        }
    }
}
