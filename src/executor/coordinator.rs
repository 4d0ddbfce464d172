/// Coordinate mapping between percentage space, detector space and device space.
///
/// Device space is the public convention of the crate: origin bottom-left,
/// `0..=x_max` × `0..=y_max`. Pointer space is what the injection layer
/// understands (origin top-left); the only place that converts into it is
/// [`CoordinateNormalizer::to_pointer`], called by the action executor.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::perception::traits::DetectorGrid;
use crate::perception::types::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBounds {
    pub x_max: u32,
    pub y_max: u32,
    pub y_inversion: i32,
}

impl From<&DeviceConfig> for DeviceBounds {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            x_max: cfg.x_max,
            y_max: cfg.y_max,
            y_inversion: cfg.y_inversion,
        }
    }
}

/// Point in device space (bottom-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePoint {
    pub x: i32,
    pub y: i32,
}

/// Point in pointer-injection space (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPoint {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceSpace {
    /// 0–100 on both axes, y bottom→top.
    Percentage,
    /// Detector grid, y top→down.
    Detector(DetectorGrid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("invalid coordinates: {axis} = {value} is outside the device range 0..={max}")]
    OutOfBounds { axis: Axis, value: f64, max: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinateNormalizer {
    bounds: DeviceBounds,
}

impl CoordinateNormalizer {
    pub fn new(bounds: DeviceBounds) -> Self {
        Self { bounds }
    }

    /// Map a point from `space` into device space, rejecting anything that
    /// lands outside the closed device bounds.
    pub fn to_device(&self, x: f64, y: f64, space: SourceSpace) -> Result<DevicePoint, CoordinateError> {
        let x_max = self.bounds.x_max as f64;
        let y_max = self.bounds.y_max as f64;
        let (dx, dy) = match space {
            SourceSpace::Percentage => (x / 100.0 * x_max, y / 100.0 * y_max),
            SourceSpace::Detector(grid) => {
                let gx = x - grid.offset_x as f64;
                let gy = y - grid.offset_y as f64;
                let gw = grid.width as f64;
                let gh = grid.height as f64;
                // Detector y runs top→down; flip once into bottom-up device space.
                (gx / gw * x_max, (gh - gy) / gh * y_max)
            }
        };
        self.checked(dx, dy)
    }

    /// Midpoint of a detector box in device space. The midpoint is taken in
    /// detector space before any scaling.
    pub fn box_to_device(&self, bbox: &BoundingBox, grid: DetectorGrid) -> Result<DevicePoint, CoordinateError> {
        let (mx, my) = bbox.midpoint();
        self.to_device(mx as f64, my as f64, SourceSpace::Detector(grid))
    }

    /// Inverse of the percentage mapping.
    pub fn to_percentage(&self, point: DevicePoint) -> (f64, f64) {
        (
            point.x as f64 / self.bounds.x_max as f64 * 100.0,
            point.y as f64 / self.bounds.y_max as f64 * 100.0,
        )
    }

    /// Offset `current` by a percentage delta per axis. The resulting absolute
    /// position is bounds-checked on its own.
    pub fn to_device_delta(
        &self,
        current: DevicePoint,
        dx_pct: f64,
        dy_pct: f64,
    ) -> Result<DevicePoint, CoordinateError> {
        let dx = dx_pct / 100.0 * self.bounds.x_max as f64;
        let dy = dy_pct / 100.0 * self.bounds.y_max as f64;
        self.checked(current.x as f64 + dx, current.y as f64 + dy)
    }

    /// Validate an already device-space point.
    pub fn check(&self, point: DevicePoint) -> Result<DevicePoint, CoordinateError> {
        self.checked(point.x as f64, point.y as f64)
    }

    pub fn to_pointer(&self, point: DevicePoint) -> PointerPoint {
        PointerPoint {
            x: point.x,
            y: self.bounds.y_inversion - point.y,
        }
    }

    /// Pointer location reported by the device, back in device space.
    /// Not bounds-checked: the pointer may legitimately sit off the mirror.
    pub fn from_pointer(&self, point: PointerPoint) -> DevicePoint {
        DevicePoint {
            x: point.x,
            y: self.bounds.y_inversion - point.y,
        }
    }

    fn checked(&self, x: f64, y: f64) -> Result<DevicePoint, CoordinateError> {
        if !(0.0..=self.bounds.x_max as f64).contains(&x) {
            return Err(CoordinateError::OutOfBounds {
                axis: Axis::X,
                value: x,
                max: self.bounds.x_max,
            });
        }
        if !(0.0..=self.bounds.y_max as f64).contains(&y) {
            return Err(CoordinateError::OutOfBounds {
                axis: Axis::Y,
                value: y,
                max: self.bounds.y_max,
            });
        }
        Ok(DevicePoint {
            x: x.round() as i32,
            y: y.round() as i32,
        })
    }
}
