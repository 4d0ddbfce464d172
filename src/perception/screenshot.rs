// Monitor capture via xcap, cropped to the mirrored device viewport.
use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};

use crate::config::CaptureConfig;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::perception::traits::ScreenCapture;
use crate::perception::types::Screenshot;

pub struct MonitorCapture {
    monitor_index: usize,
    crop_box: Option<[u32; 4]>,
}

impl MonitorCapture {
    pub fn new(cfg: &CaptureConfig) -> Self {
        Self {
            monitor_index: cfg.monitor_index,
            crop_box: cfg.crop_box,
        }
    }
}

#[async_trait]
impl ScreenCapture for MonitorCapture {
    async fn capture(&self) -> PhoneClawResult<Screenshot> {
        let index = self.monitor_index;
        let crop_box = self.crop_box;
        tokio::task::spawn_blocking(move || capture_blocking(index, crop_box))
            .await
            .map_err(|e| PhoneClawError::Capture(format!("capture task: {e}")))?
    }
}

fn capture_blocking(index: usize, crop_box: Option<[u32; 4]>) -> PhoneClawResult<Screenshot> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| PhoneClawError::Capture(format!("enumerate monitors: {e}")))?;
    let monitor = monitors.get(index).ok_or_else(|| {
        PhoneClawError::Capture(format!("monitor {index} not found ({} available)", monitors.len()))
    })?;
    let frame = monitor
        .capture_image()
        .map_err(|e| PhoneClawError::Capture(format!("capture monitor {index}: {e}")))?;

    let viewport = crop_viewport(DynamicImage::ImageRgba8(frame), crop_box)?;
    let shot = encode_png(&viewport)?;
    tracing::debug!(width = shot.width, height = shot.height, "viewport captured");
    Ok(shot)
}

/// Crop `[left, top, right, bottom]` out of the frame. A box that does not
/// fit the frame is an error, never silently clamped.
pub fn crop_viewport(frame: DynamicImage, crop_box: Option<[u32; 4]>) -> PhoneClawResult<DynamicImage> {
    let Some([left, top, right, bottom]) = crop_box else {
        return Ok(frame);
    };
    if right <= left || bottom <= top || right > frame.width() || bottom > frame.height() {
        return Err(PhoneClawError::Capture(format!(
            "crop box [{left}, {top}, {right}, {bottom}] does not fit a {}x{} frame",
            frame.width(),
            frame.height()
        )));
    }
    Ok(frame.crop_imm(left, top, right - left, bottom - top))
}

pub fn encode_png(img: &DynamicImage) -> PhoneClawResult<Screenshot> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| PhoneClawError::Capture(format!("png encode: {e}")))?;
    Ok(Screenshot {
        image_bytes: buf.into_inner(),
        width: img.width(),
        height: img.height(),
        captured_at: chrono::Utc::now(),
    })
}
