/// ONNX YOLO inference producing raw UI element candidates.
///
/// Boxes are reported in a normalised grid (see [`DetectorGrid::normalized`]).
/// No NMS happens here: every proposal above a low score floor is handed to
/// the postprocessor, which owns filtering and deduplication.
use std::path::Path;

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde_json::json;

use crate::config::DetectorConfig;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::perception::traits::{DetectorGrid, ObjectDetector, RawDetections};
use crate::perception::types::Screenshot;

const INPUT_SIZE: u32 = 640;
const MAX_CANDIDATES: usize = 300;
const PAD_GREY: u8 = 114;

/// Letterbox geometry used to map model space back to the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct YoloDetector {
    session: Session,
    class_names: Vec<String>,
    grid_size: f32,
    score_floor: f32,
}

impl YoloDetector {
    /// Returns `None` when no model is configured or the file is missing.
    pub fn try_new(cfg: &DetectorConfig) -> Option<Self> {
        let path = cfg.model_path.as_deref()?;
        if !Path::new(path).exists() {
            tracing::warn!(path = %path, "detector model not found, targets disabled");
            return None;
        }
        match Self::build(path, cfg) {
            Ok(det) => {
                tracing::info!(path = %path, classes = cfg.class_names.len(), "detector loaded");
                Some(det)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load detector model");
                None
            }
        }
    }

    fn build(path: &str, cfg: &DetectorConfig) -> PhoneClawResult<Self> {
        let session = Session::builder()
            .map_err(|e| PhoneClawError::Detection(format!("ort session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PhoneClawError::Detection(format!("ort opt-level: {e}")))?
            .commit_from_file(path)
            .map_err(|e| PhoneClawError::Detection(format!("ort load model: {e}")))?;

        Ok(Self {
            session,
            class_names: cfg.class_names.clone(),
            grid_size: cfg.grid_size,
            score_floor: cfg.score_floor,
        })
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    /// Fit the image into the square model input, grey padding, NCHW in [0, 1].
    fn preprocess(&self, img: &image::DynamicImage) -> (Array4<f32>, Letterbox) {
        let side = INPUT_SIZE;
        let (w, h) = (img.width() as f32, img.height() as f32);
        let scale = (side as f32 / w).min(side as f32 / h);
        let (nw, nh) = ((w * scale).round() as u32, (h * scale).round() as u32);
        let pad_x = (side - nw) as f32 / 2.0;
        let pad_y = (side - nh) as f32 / 2.0;

        let resized = img
            .resize_exact(nw, nh, image::imageops::FilterType::CatmullRom)
            .to_rgb8();
        let mut canvas = image::RgbImage::from_pixel(side, side, image::Rgb([PAD_GREY; 3]));
        image::imageops::overlay(&mut canvas, &resized, pad_x.round() as i64, pad_y.round() as i64);

        let mut tensor = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
        for (x, y, px) in canvas.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
            }
        }
        (tensor, Letterbox { scale, pad_x, pad_y })
    }

    /// Decode `[1, 4 + classes, proposals]` into grid-space candidates.
    fn decode(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        src_w: u32,
        src_h: u32,
        lb: Letterbox,
    ) -> PhoneClawResult<Vec<serde_json::Value>> {
        let shape = output.shape();
        if shape.len() < 3 || shape[1] <= 4 {
            return Err(PhoneClawError::Detection(format!("unexpected model output shape {shape:?}")));
        }
        let classes = shape[1] - 4;
        let proposals = shape[2];

        let mut candidates: Vec<(f32, serde_json::Value)> = Vec::new();
        for i in 0..proposals {
            let (best_class, score) = (0..classes)
                .map(|c| (c, output[[0, 4 + c, i]]))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < self.score_floor {
                continue;
            }

            let (cx, cy) = (output[[0, 0, i]], output[[0, 1, i]]);
            let (bw, bh) = (output[[0, 2, i]], output[[0, 3, i]]);
            let to_grid_x = |v: f32| ((v - lb.pad_x) / lb.scale / src_w as f32).clamp(0.0, 1.0) * self.grid_size;
            let to_grid_y = |v: f32| ((v - lb.pad_y) / lb.scale / src_h as f32).clamp(0.0, 1.0) * self.grid_size;

            candidates.push((
                score,
                json!({
                    "box": {
                        "x1": to_grid_x(cx - bw / 2.0),
                        "y1": to_grid_y(cy - bh / 2.0),
                        "x2": to_grid_x(cx + bw / 2.0),
                        "y2": to_grid_y(cy + bh / 2.0),
                    },
                    "name": self.class_name(best_class),
                    "confidence": score.clamp(0.0, 1.0),
                }),
            ));
        }

        if candidates.len() > MAX_CANDIDATES {
            candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
            candidates.truncate(MAX_CANDIDATES);
        }
        Ok(candidates.into_iter().map(|(_, v)| v).collect())
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, screenshot: &Screenshot) -> PhoneClawResult<RawDetections> {
        let img = image::load_from_memory(&screenshot.image_bytes)
            .map_err(|e| PhoneClawError::Detection(format!("image load: {e}")))?;
        let (tensor, letterbox) = self.preprocess(&img);

        let input = Tensor::from_array(tensor)
            .map_err(|e| PhoneClawError::Detection(format!("ort tensor: {e}")))?;
        let output = {
            let outputs = self
                .session
                .run(ort::inputs![input])
                .map_err(|e| PhoneClawError::Detection(format!("ort run: {e}")))?;
            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| PhoneClawError::Detection(format!("extract tensor: {e}")))?
                .to_owned()
        };

        let candidates = self.decode(&output.view(), img.width(), img.height(), letterbox)?;
        tracing::debug!(candidates = candidates.len(), "detector ran");
        Ok(RawDetections {
            payload: serde_json::Value::Array(candidates),
            grid: DetectorGrid::normalized(self.grid_size),
        })
    }
}
