use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::errors::PhoneClawError;
use crate::perception::types::Observation;

/// Lifecycle states of a control-loop session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Observing,
    Deciding { observation_id: u64 },
    Acting { action: AgentAction, observation_id: u64 },
    Paused { until: chrono::DateTime<chrono::Utc> },
    Escalated { explanation: String },
    Done { success: bool, summary: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("unknown scroll direction '{other}', expected up/down/left/right")),
        }
    }
}

/// One device action. Absolute coordinates are device space (bottom-left origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    MovePointer { x: i32, y: i32 },
    /// Relative move, percentages of the device extent per axis (positive y is up).
    MovePointerBy { dx: f64, dy: f64 },
    Click,
    Scroll { direction: ScrollDirection },
    EnterText { text: String },
    Home,
}

impl AgentAction {
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::MovePointer { .. } => "move_pointer",
            AgentAction::MovePointerBy { .. } => "move_pointer_by",
            AgentAction::Click => "click_pointer",
            AgentAction::Scroll { .. } => "scroll_screen",
            AgentAction::EnterText { .. } => "enter_keys",
            AgentAction::Home => "home_screen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Ok,
    Error,
}

/// Outcome of an executor operation. Carries status only; whether the action
/// achieved anything is learned from the next observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The failure came from the input device itself, not from validation.
    #[serde(skip)]
    pub environment: bool,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            status: ActionStatus::Ok,
            message: None,
            environment: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            message: Some(message.into()),
            environment: false,
        }
    }

    /// An error result classified by the error that caused it.
    pub fn from_error(message: impl Into<String>, cause: &PhoneClawError) -> Self {
        Self {
            environment: cause.is_environment(),
            ..Self::error(message)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ActionStatus::Ok
    }
}

/// What the decision maker wants next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Act { action: AgentAction },
    /// Wait out an expected delay; never counts as a failure.
    Pause { seconds: u64, explanation: String },
    /// The last action did not move the task forward.
    NoProgress { reason: String },
    Escalate { explanation: String },
    Finish { success: bool, summary: String },
}

/// Mutable per-task state, owned by the engine and reset per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub retry_count: u32,
    pub escalated: bool,
    pub paused_until: Option<chrono::DateTime<chrono::Utc>>,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_retries: u32,
    pub max_cycles: Option<u32>,
    pub max_duration_minutes: Option<u32>,
    pub max_pause_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for LoopConfig {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            max_cycles: cfg.max_cycles,
            max_duration_minutes: cfg.max_duration_minutes,
            max_pause_secs: cfg.max_pause_secs,
        }
    }
}

/// Handed to the operator when automatic retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationReport {
    pub explanation: String,
    pub retry_count: u32,
    pub last_observation: Option<Observation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ActionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Done { success: bool, summary: String },
    Escalated(EscalationReport),
    Cancelled,
}
