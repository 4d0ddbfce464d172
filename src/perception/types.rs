use serde::{Deserialize, Serialize};

/// Axis-aligned box in detector space, `x1 <= x2`, `y1 <= y2`, y running top→down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Builds a box from two arbitrary corners.
    pub fn from_corners(xa: f32, ya: f32, xb: f32, yb: f32) -> Self {
        Self {
            x1: xa.min(xb),
            y1: ya.min(yb),
            x2: xa.max(xb),
            y2: ya.max(yb),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn midpoint(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection-over-Union with another box; 0 for degenerate pairs.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Euclidean distance between top-left corners.
    pub fn corner_distance(&self, other: &BoundingBox) -> f32 {
        let dx = self.x1 - other.x1;
        let dy = self.y1 - other.y1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A raw candidate from the object detector. Never outlives one screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

/// Actionable point in device space (bottom-left origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub x: i32,
    pub y: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A single still of the device display, already cropped to the viewport.
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// PNG bytes.
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// Result of one OBSERVING step. Targets are only valid for this observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Monotonic within a session.
    pub id: u64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub resolution: (u32, u32),
    pub targets: Vec<Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

impl Observation {
    /// Compact text listing handed to text-only decision makers and the console.
    pub fn describe_targets(&self) -> String {
        if self.targets.is_empty() {
            return "no targets detected".to_string();
        }
        self.targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{i}: {} at ({}, {})",
                    t.label.as_deref().unwrap_or("element"),
                    t.x,
                    t.y
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
