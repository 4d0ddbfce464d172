use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PhoneClawError, PhoneClawResult};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PHONECLAW_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Geometry of the mirrored device as seen by the pointer-injection path.
/// `home_x`/`home_y` are in device space (bottom-left origin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub x_max: u32,
    pub y_max: u32,
    /// Pointer y = `y_inversion - y`. Usually the top edge of the mirror
    /// window in screen pixels.
    pub y_inversion: i32,
    pub home_x: i32,
    pub home_y: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            x_max: 1000,
            y_max: 2000,
            y_inversion: 2000,
            home_x: 500,
            home_y: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    /// IoU above which the less confident of two boxes is dropped.
    #[serde(default = "default_overlap")]
    pub overlap_threshold: f32,
    /// Top-left corner distance (detector units) below which the lower-ranked box is dropped.
    #[serde(default = "default_proximity")]
    pub proximity_threshold: f32,
    #[serde(default = "default_min_size")]
    pub min_box_size: f32,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence(),
            overlap_threshold: default_overlap(),
            proximity_threshold: default_proximity(),
            min_box_size: default_min_size(),
            categories: default_categories(),
        }
    }
}

fn default_confidence() -> f32 {
    0.5
}

fn default_overlap() -> f32 {
    0.5
}

fn default_proximity() -> f32 {
    10.0
}

fn default_min_size() -> f32 {
    10.0
}

/// Interactive categories. Plain "text" is deliberately absent.
pub fn default_categories() -> Vec<String> {
    vec!["image", "text-button", "input", "icon", "list-item"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// ONNX model path. Detection is disabled when unset or missing.
    pub model_path: Option<String>,
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    /// Extent of the normalised grid the detector reports boxes in.
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    /// Scores below this never leave the detector; real filtering happens later.
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            class_names: default_class_names(),
            grid_size: default_grid_size(),
            score_floor: default_score_floor(),
        }
    }
}

/// Class order of the UI component detector the defaults are tuned for.
pub fn default_class_names() -> Vec<String> {
    vec!["Image", "Text Button", "Text", "Input", "Icon", "List Item"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_grid_size() -> f32 {
    1000.0
}

fn default_score_floor() -> f32 {
    0.05
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub monitor_index: usize,
    /// `[left, top, right, bottom]` in monitor pixels.
    pub crop_box: Option<[u32; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,
    #[serde(default = "default_scroll_distance")]
    pub scroll_distance: i32,
    #[serde(default = "default_drag_ms")]
    pub drag_duration_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            key_delay_ms: default_key_delay_ms(),
            scroll_distance: default_scroll_distance(),
            drag_duration_ms: default_drag_ms(),
        }
    }
}

fn default_settle_ms() -> u64 {
    100
}

fn default_key_delay_ms() -> u64 {
    100
}

fn default_scroll_distance() -> i32 {
    100
}

fn default_drag_ms() -> u64 {
    150
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub max_cycles: Option<u32>,
    pub max_duration_minutes: Option<u32>,
    #[serde(default = "default_max_pause_secs")]
    pub max_pause_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_cycles: None,
            max_duration_minutes: None,
            max_pause_secs: default_max_pause_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_pause_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn validate(&self) -> PhoneClawResult<()> {
        let d = &self.device;
        if d.x_max == 0 || d.y_max == 0 {
            return Err(PhoneClawError::Config("device bounds must be non-zero".into()));
        }
        if d.home_x < 0 || d.home_x > d.x_max as i32 || d.home_y < 0 || d.home_y > d.y_max as i32 {
            return Err(PhoneClawError::Config(format!(
                "home button ({}, {}) lies outside device bounds 0..={} x 0..={}",
                d.home_x, d.home_y, d.x_max, d.y_max
            )));
        }

        let det = &self.detection;
        for (name, value) in [
            ("confidence_threshold", det.confidence_threshold),
            ("overlap_threshold", det.overlap_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PhoneClawError::Config(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        if det.proximity_threshold < 0.0 || det.min_box_size < 0.0 {
            return Err(PhoneClawError::Config("size and proximity thresholds must be non-negative".into()));
        }
        if self.detector.grid_size <= 0.0 {
            return Err(PhoneClawError::Config("detector grid_size must be positive".into()));
        }
        if let Some([l, t, r, b]) = self.capture.crop_box {
            if r <= l || b <= t {
                return Err(PhoneClawError::Config(format!("empty crop box [{l}, {t}, {r}, {b}]")));
            }
        }
        if self.session.max_retries == 0 {
            return Err(PhoneClawError::Config("session max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

fn resolve_config_path() -> PhoneClawResult<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(explicit));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("phoneclaw").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(PhoneClawError::Config(
        "config.toml not found (set PHONECLAW_CONFIG or place it next to the executable)".into(),
    ))
}

/// Load from an explicit path, or search the usual locations.
pub fn load_config(path: Option<&Path>) -> PhoneClawResult<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => resolve_config_path()?,
    };
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        x_max = config.device.x_max,
        y_max = config.device.y_max,
        "config loaded"
    );
    Ok(config)
}
