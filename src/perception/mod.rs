pub mod pipeline;
pub mod postprocess;
pub mod screenshot;
pub mod traits;
pub mod types;
pub mod yolo_detector;
