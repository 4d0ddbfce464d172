use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PhoneClawResult;
use crate::perception::types::Screenshot;

/// Produces a fresh still of the device viewport.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> PhoneClawResult<Screenshot>;
}

/// Extent (and optional crop offset) of the space a detector reports boxes in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGrid {
    pub width: f32,
    pub height: f32,
    /// Subtracted from box coordinates when boxes refer to an uncropped frame.
    #[serde(default)]
    pub offset_x: f32,
    #[serde(default)]
    pub offset_y: f32,
}

impl DetectorGrid {
    /// Square normalised grid, e.g. `normalized(1000.0)`.
    pub fn normalized(size: f32) -> Self {
        Self {
            width: size,
            height: size,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Boxes expressed in pixels of a `width`×`height` image.
    pub fn pixels(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn with_crop_offset(mut self, offset_x: f32, offset_y: f32) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }
}

/// Unparsed detector output plus the grid its boxes live in.
#[derive(Debug, Clone)]
pub struct RawDetections {
    pub payload: serde_json::Value,
    pub grid: DetectorGrid,
}

/// Object detector collaborator. Returns raw candidates only; the
/// postprocessor owns filtering and deduplication.
pub trait ObjectDetector: Send {
    fn detect(&mut self, screenshot: &Screenshot) -> PhoneClawResult<RawDetections>;
}
