/// Perception pipeline: one OBSERVING step.
///
/// 1. Capture the viewport.
/// 2. Run the detector, if one is configured.
/// 3. Postprocess raw candidates into device-space targets.
///
/// Every call produces a new observation id; targets from an earlier
/// observation are never carried over.
use base64::Engine as _;

use crate::errors::PhoneClawResult;
use crate::executor::coordinator::CoordinateNormalizer;
use crate::perception::postprocess::DetectionPostprocessor;
use crate::perception::traits::{ObjectDetector, ScreenCapture};
use crate::perception::types::Observation;

pub struct Perceiver {
    capture: Box<dyn ScreenCapture>,
    detector: Option<Box<dyn ObjectDetector>>,
    postprocessor: DetectionPostprocessor,
    normalizer: CoordinateNormalizer,
    attach_image: bool,
    next_id: u64,
}

impl Perceiver {
    pub fn new(
        capture: Box<dyn ScreenCapture>,
        detector: Option<Box<dyn ObjectDetector>>,
        postprocessor: DetectionPostprocessor,
        normalizer: CoordinateNormalizer,
    ) -> Self {
        Self {
            capture,
            detector,
            postprocessor,
            normalizer,
            attach_image: true,
            next_id: 1,
        }
    }

    /// Skip base64-encoding the screenshot into each observation.
    pub fn without_image(mut self) -> Self {
        self.attach_image = false;
        self
    }

    pub async fn observe(&mut self) -> PhoneClawResult<Observation> {
        let shot = self.capture.capture().await?;

        let targets = match self.detector.as_mut() {
            Some(detector) => {
                let raw = detector.detect(&shot)?;
                self.postprocessor.process(&raw, &self.normalizer)?
            }
            None => Vec::new(),
        };

        let id = self.next_id;
        self.next_id += 1;
        tracing::info!(observation = id, targets = targets.len(), w = shot.width, h = shot.height, "observed");

        Ok(Observation {
            id,
            captured_at: shot.captured_at,
            resolution: (shot.width, shot.height),
            targets,
            image_base64: self
                .attach_image
                .then(|| base64::engine::general_purpose::STANDARD.encode(&shot.image_bytes)),
        })
    }
}
