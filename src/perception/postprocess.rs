/// Detection postprocessing: raw detector candidates → clean, actionable targets.
///
/// Four ordered passes:
/// 1. confidence + category filter,
/// 2. minimum size filter,
/// 3. overlap suppression (greedy, highest confidence first),
/// 4. proximity suppression on top-left corners.
///
/// Passes 3 and 4 visit boxes in rank order: confidence descending, earlier
/// detector index first on ties. Output keeps detector order.
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::DetectionConfig;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::coordinator::CoordinateNormalizer;
use crate::perception::traits::RawDetections;
use crate::perception::types::{BoundingBox, Detection, Target};

#[derive(Debug, Deserialize)]
struct PixelBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

/// The two shapes detectors hand back.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    /// `{"box": {"x1",..}, "name": "Icon", "confidence": 0.8}`
    Boxed {
        #[serde(rename = "box")]
        bbox: PixelBox,
        #[serde(alias = "label")]
        name: String,
        confidence: f32,
    },
    /// `{"box_2d": [y1, x1, y2, x2], "label": "search bar"}`
    Spatial {
        box_2d: [f32; 4],
        label: String,
        confidence: Option<f32>,
    },
}

impl RawRecord {
    fn into_detection(self) -> Detection {
        match self {
            RawRecord::Boxed { bbox, name, confidence } => Detection {
                bbox: BoundingBox::from_corners(bbox.x1, bbox.y1, bbox.x2, bbox.y2),
                label: name,
                confidence,
            },
            RawRecord::Spatial { box_2d: [y1, x1, y2, x2], label, confidence } => Detection {
                bbox: BoundingBox::from_corners(x1, y1, x2, y2),
                label,
                confidence: confidence.unwrap_or(1.0),
            },
        }
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static regex"))
}

/// Parse a textual detector response, unwrapping a markdown ```json fence if present.
pub fn parse_response_text(raw: &str) -> PhoneClawResult<serde_json::Value> {
    let body = match fence_re().captures(raw).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => raw,
    };
    serde_json::from_str(body.trim())
        .map_err(|e| PhoneClawError::Detection(format!("detector response is not JSON: {e}")))
}

/// Parse the full batch. Any malformed entry rejects the whole batch.
pub fn parse_detections(payload: &serde_json::Value) -> PhoneClawResult<Vec<Detection>> {
    let items = payload
        .as_array()
        .ok_or_else(|| PhoneClawError::Detection("detector response must be a JSON array".into()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let record: RawRecord = serde_json::from_value(item.clone()).map_err(|e| {
                PhoneClawError::Detection(format!("detection #{i} is malformed: {e}"))
            })?;
            let det = record.into_detection();
            let b = &det.bbox;
            if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
                return Err(PhoneClawError::Detection(format!("detection #{i} has non-finite coordinates")));
            }
            if !(0.0..=1.0).contains(&det.confidence) {
                return Err(PhoneClawError::Detection(format!(
                    "detection #{i} confidence {} is outside 0..=1",
                    det.confidence
                )));
            }
            Ok(det)
        })
        .collect()
}

/// "Text Button", "text_button" and "text-button" compare equal.
fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub struct DetectionPostprocessor {
    confidence_threshold: f32,
    overlap_threshold: f32,
    proximity_threshold: f32,
    min_box_size: f32,
    categories: Vec<String>,
}

impl DetectionPostprocessor {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: cfg.confidence_threshold,
            overlap_threshold: cfg.overlap_threshold,
            proximity_threshold: cfg.proximity_threshold,
            min_box_size: cfg.min_box_size,
            categories: cfg.categories.iter().map(|c| normalize_label(c)).collect(),
        }
    }

    /// Raw detector output → targets in device space.
    pub fn process(&self, raw: &RawDetections, normalizer: &CoordinateNormalizer) -> PhoneClawResult<Vec<Target>> {
        let detections = parse_detections(&raw.payload)?;
        let total = detections.len();
        let kept = self.filter(detections);

        let targets: Vec<Target> = kept
            .into_iter()
            .filter_map(|det| match normalizer.box_to_device(&det.bbox, raw.grid) {
                Ok(p) => Some(Target {
                    x: p.x,
                    y: p.y,
                    label: (!det.label.is_empty()).then_some(det.label),
                }),
                Err(e) => {
                    tracing::warn!(label = %det.label, error = %e, "detection centre outside device bounds, dropped");
                    None
                }
            })
            .collect();

        tracing::debug!(raw = total, targets = targets.len(), "detections postprocessed");
        Ok(targets)
    }

    /// All four passes in order.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let d = self.filter_categories(detections);
        let d = self.filter_small(d);
        let d = self.suppress_overlaps(d);
        self.suppress_proximity(d)
    }

    pub fn filter_categories(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| {
                d.confidence >= self.confidence_threshold
                    && self.categories.contains(&normalize_label(&d.label))
            })
            .collect()
    }

    pub fn filter_small(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| d.bbox.width() >= self.min_box_size && d.bbox.height() >= self.min_box_size)
            .collect()
    }

    /// Pairwise IoU suppression: a box is dropped when any other box in the
    /// input overlaps it by more than the threshold and outranks it. Higher
    /// confidence outranks; on equal confidence the earlier index does. A box
    /// that is itself dropped still suppresses the boxes it outranks.
    pub fn suppress_overlaps(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let outranks = |i: usize, j: usize| {
            let (ci, cj) = (detections[i].confidence, detections[j].confidence);
            ci > cj || (ci == cj && i < j)
        };
        let suppressed: Vec<bool> = (0..detections.len())
            .map(|j| {
                (0..detections.len()).any(|i| {
                    i != j
                        && outranks(i, j)
                        && detections[i].bbox.iou(&detections[j].bbox) > self.overlap_threshold
                })
            })
            .collect();
        retain_unsuppressed(detections, &suppressed)
    }

    /// Walks boxes in detector order and drops any whose top-left corner is
    /// closer than the proximity threshold to a box already kept.
    pub fn suppress_proximity(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut suppressed = vec![false; detections.len()];
        let mut kept: Vec<usize> = Vec::with_capacity(detections.len());

        for i in 0..detections.len() {
            let too_close = kept
                .iter()
                .any(|&k| detections[k].bbox.corner_distance(&detections[i].bbox) < self.proximity_threshold);
            if too_close {
                suppressed[i] = true;
            } else {
                kept.push(i);
            }
        }
        retain_unsuppressed(detections, &suppressed)
    }
}

fn retain_unsuppressed(detections: Vec<Detection>, suppressed: &[bool]) -> Vec<Detection> {
    detections
        .into_iter()
        .zip(suppressed)
        .filter(|(_, s)| !**s)
        .map(|(d, _)| d)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::coordinator::DeviceBounds;
    use crate::perception::traits::DetectorGrid;
    use serde_json::json;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, label: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::from_corners(x1, y1, x2, y2),
            label: label.to_string(),
            confidence,
        }
    }

    fn processor() -> DetectionPostprocessor {
        DetectionPostprocessor::new(&DetectionConfig::default())
    }

    #[test]
    fn overlapping_pair_keeps_the_confident_box() {
        let p = processor();
        let out = p.suppress_overlaps(vec![
            det(12.0, 12.0, 48.0, 48.0, "icon", 0.6),
            det(10.0, 10.0, 50.0, 50.0, "icon", 0.9),
        ]);
        assert_eq!(out, vec![det(10.0, 10.0, 50.0, 50.0, "icon", 0.9)]);
    }

    #[test]
    fn equal_confidence_keeps_earlier_box() {
        let p = processor();
        let first = det(10.0, 10.0, 50.0, 50.0, "icon", 0.7);
        let second = det(12.0, 12.0, 48.0, 48.0, "input", 0.7);
        assert_eq!(p.suppress_overlaps(vec![first.clone(), second.clone()]), vec![first.clone()]);
        assert_eq!(p.suppress_overlaps(vec![second.clone(), first]), vec![second]);
    }

    #[test]
    fn overlap_suppression_is_idempotent() {
        let p = processor();
        let raw = vec![
            det(0.0, 0.0, 100.0, 100.0, "image", 0.8),
            det(10.0, 10.0, 105.0, 105.0, "image", 0.9),
            det(60.0, 60.0, 170.0, 170.0, "icon", 0.7),
            det(300.0, 300.0, 360.0, 340.0, "icon", 0.6),
            det(305.0, 298.0, 362.0, 338.0, "icon", 0.6),
            det(500.0, 10.0, 540.0, 40.0, "input", 0.95),
        ];
        let once = p.suppress_overlaps(raw);
        let twice = p.suppress_overlaps(once.clone());
        assert_eq!(once, twice);
        for (i, a) in once.iter().enumerate() {
            for b in &once[i + 1..] {
                assert!(a.bbox.iou(&b.bbox) <= 0.5);
            }
        }
    }

    #[test]
    fn suppressed_box_still_suppresses_weaker_neighbours() {
        let p = processor();
        // a overlaps b, b overlaps c, a does not overlap c: only a survives.
        let a = det(0.0, 0.0, 100.0, 100.0, "icon", 0.9);
        let b = det(20.0, 0.0, 120.0, 100.0, "icon", 0.8);
        let c = det(45.0, 0.0, 145.0, 100.0, "icon", 0.7);
        assert!(a.bbox.iou(&b.bbox) > 0.5 && b.bbox.iou(&c.bbox) > 0.5 && a.bbox.iou(&c.bbox) <= 0.5);
        assert_eq!(p.suppress_overlaps(vec![c, b, a.clone()]), vec![a]);
    }

    #[test]
    fn category_and_confidence_filter() {
        let p = processor();
        let out = p.filter_categories(vec![
            det(0.0, 0.0, 50.0, 50.0, "Text Button", 0.8),
            det(0.0, 0.0, 50.0, 50.0, "Text", 0.99),
            det(0.0, 0.0, 50.0, 50.0, "List Item", 0.5),
            det(0.0, 0.0, 50.0, 50.0, "icon", 0.49),
            det(0.0, 0.0, 50.0, 50.0, "slider", 0.9),
        ]);
        let labels: Vec<_> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Text Button", "List Item"]);
    }

    #[test]
    fn small_boxes_are_dropped() {
        let p = processor();
        let out = p.filter_small(vec![
            det(0.0, 0.0, 9.0, 50.0, "icon", 0.9),
            det(0.0, 0.0, 50.0, 9.5, "icon", 0.9),
            det(0.0, 0.0, 10.0, 10.0, "icon", 0.9),
        ]);
        assert_eq!(out, vec![det(0.0, 0.0, 10.0, 10.0, "icon", 0.9)]);
    }

    #[test]
    fn proximity_drops_second_seen_of_close_pair() {
        let p = processor();
        let container = det(100.0, 100.0, 400.0, 200.0, "list-item", 0.8);
        let nested = det(104.0, 103.0, 160.0, 150.0, "icon", 0.8);
        let far = det(100.0, 300.0, 400.0, 400.0, "list-item", 0.8);
        let out = p.suppress_proximity(vec![container.clone(), nested, far.clone()]);
        assert_eq!(out, vec![container, far]);
    }

    #[test]
    fn proximity_keeps_first_seen_container_over_confident_child() {
        let p = processor();
        let container = det(100.0, 100.0, 400.0, 200.0, "list-item", 0.6);
        let icon = det(103.0, 104.0, 150.0, 150.0, "icon", 0.9);
        let out = p.suppress_proximity(vec![container.clone(), icon.clone()]);
        assert_eq!(out, vec![container.clone()]);
        // Order decides, not confidence.
        assert_eq!(p.suppress_proximity(vec![icon.clone(), container]), vec![icon]);
    }

    #[test]
    fn duplicate_labels_at_distinct_positions_survive_in_order() {
        let p = processor();
        let raw = vec![
            det(500.0, 500.0, 600.0, 560.0, "icon", 0.7),
            det(100.0, 100.0, 200.0, 160.0, "icon", 0.9),
            det(300.0, 100.0, 400.0, 160.0, "icon", 0.8),
        ];
        assert_eq!(p.filter(raw.clone()), raw);
    }

    #[test]
    fn raising_confidence_never_adds_survivors() {
        // Chained overlaps: the 0.9 box suppresses 0.8, which suppresses 0.7.
        let raw = vec![
            det(0.0, 0.0, 100.0, 100.0, "icon", 0.9),
            det(20.0, 0.0, 120.0, 100.0, "icon", 0.8),
            det(45.0, 0.0, 145.0, 100.0, "icon", 0.7),
            det(600.0, 600.0, 700.0, 700.0, "input", 0.65),
            det(605.0, 605.0, 705.0, 705.0, "input", 0.9),
            det(800.0, 50.0, 900.0, 90.0, "image", 0.55),
            det(300.0, 300.0, 305.0, 400.0, "icon", 0.99),
        ];
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let cfg = DetectionConfig {
                confidence_threshold: step as f32 * 0.05,
                ..DetectionConfig::default()
            };
            let p = DetectionPostprocessor::new(&cfg);
            let n = p.suppress_overlaps(p.filter_small(p.filter_categories(raw.clone()))).len();
            assert!(n <= previous, "threshold {} produced {n} > {previous}", cfg.confidence_threshold);
            previous = n;
        }
    }

    #[test]
    fn parses_both_detector_shapes() {
        let payload = json!([
            {"box": {"x1": 10.0, "y1": 20.0, "x2": 60.0, "y2": 80.0}, "name": "Icon", "class": 4, "confidence": 0.8},
            {"box_2d": [200, 100, 300, 150], "label": "search bar"},
            {"box": {"x1": 5, "y1": 5, "x2": 1, "y2": 1}, "label": "Input", "confidence": 1.0}
        ]);
        let dets = parse_detections(&payload).unwrap();
        assert_eq!(dets[0], det(10.0, 20.0, 60.0, 80.0, "Icon", 0.8));
        assert_eq!(dets[1], det(100.0, 200.0, 150.0, 300.0, "search bar", 1.0));
        assert_eq!(dets[2].bbox, BoundingBox::from_corners(1.0, 1.0, 5.0, 5.0));
    }

    #[test]
    fn malformed_batch_fails_as_a_whole() {
        let missing_conf = json!([
            {"box": {"x1": 0, "y1": 0, "x2": 50, "y2": 50}, "name": "icon", "confidence": 0.9},
            {"box": {"x1": 0, "y1": 0, "x2": 50, "y2": 50}, "name": "icon"}
        ]);
        let err = parse_detections(&missing_conf).unwrap_err();
        assert!(err.to_string().contains("#1"), "{err}");

        assert!(parse_detections(&json!({"detections": []})).is_err());
        assert!(parse_detections(&json!([{"box_2d": [1, 2, 3], "label": "x"}])).is_err());
        assert!(parse_detections(&json!([
            {"box": {"x1": 0, "y1": 0, "x2": 50, "y2": 50}, "name": "icon", "confidence": 1.5}
        ]))
        .is_err());
        assert!(parse_detections(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn fenced_responses_are_unwrapped() {
        let text = "Here you go:\n```json\n[{\"box_2d\": [0, 0, 10, 10], \"label\": \"a\"}]\n```\nanything else";
        let value = parse_response_text(text).unwrap();
        assert_eq!(parse_detections(&value).unwrap().len(), 1);
        assert!(parse_response_text("not json at all").is_err());
        assert!(parse_response_text("[]").unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn process_emits_device_targets() {
        let p = processor();
        let normalizer = CoordinateNormalizer::new(DeviceBounds { x_max: 1000, y_max: 2000, y_inversion: 2000 });
        let raw = RawDetections {
            payload: json!([
                {"box": {"x1": 100, "y1": 100, "x2": 200, "y2": 300}, "name": "Icon", "confidence": 0.9},
                {"box": {"x1": 110, "y1": 110, "x2": 190, "y2": 290}, "name": "Icon", "confidence": 0.6},
                {"box": {"x1": 400, "y1": 400, "x2": 600, "y2": 500}, "name": "Text", "confidence": 0.9}
            ]),
            grid: DetectorGrid::normalized(1000.0),
        };
        let targets = p.process(&raw, &normalizer).unwrap();
        assert_eq!(targets, vec![Target { x: 150, y: 1600, label: Some("Icon".into()) }]);

        let broken = RawDetections { payload: json!("oops"), grid: DetectorGrid::normalized(1000.0) };
        assert!(matches!(p.process(&broken, &normalizer), Err(PhoneClawError::Detection(_))));
    }

    #[test]
    fn target_outside_device_bounds_is_dropped_not_fatal() {
        let p = processor();
        let normalizer = CoordinateNormalizer::new(DeviceBounds { x_max: 1000, y_max: 2000, y_inversion: 2000 });
        let raw = RawDetections {
            payload: json!([
                {"box": {"x1": 1100, "y1": 100, "x2": 1300, "y2": 300}, "name": "Icon", "confidence": 0.9},
                {"box": {"x1": 100, "y1": 100, "x2": 200, "y2": 300}, "name": "Icon", "confidence": 0.8}
            ]),
            grid: DetectorGrid::normalized(1000.0),
        };
        let targets = p.process(&raw, &normalizer).unwrap();
        assert_eq!(targets, vec![Target { x: 150, y: 1600, label: Some("Icon".into()) }]);
    }
}
