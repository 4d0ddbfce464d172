use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent_engine::state::{ActionResult, AgentAction, Decision};
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::perception::types::Observation;

/// Tool names a decision maker may answer with.
pub const TOOL_NAMES: &[&str] = &[
    "move_pointer",
    "move_pointer_by",
    "click_pointer",
    "scroll_screen",
    "enter_keys",
    "home_screen",
    "pause_loop",
    "human_intervention",
    "report_no_progress",
    "finish_task",
];

/// Everything a decision maker gets to see for one DECIDING step.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub goal: &'a str,
    pub observation: &'a Observation,
    pub last_result: Option<&'a ActionResult>,
    pub retry_count: u32,
    pub tools: &'a [&'a str],
}

/// The external oracle choosing the next step. Opaque to the engine: only the
/// returned [`Decision`] is consumed.
#[async_trait]
pub trait DecisionMaker: Send {
    async fn decide(&mut self, ctx: DecisionContext<'_>) -> PhoneClawResult<Decision>;
}

/// Convert a tool call (name + JSON arguments) into a [`Decision`].
/// Missing or mistyped arguments are errors, never defaulted.
pub fn parse_tool_call(name: &str, args: &Value) -> PhoneClawResult<Decision> {
    let act = |action| Ok(Decision::Act { action });
    match name {
        "move_pointer" => act(AgentAction::MovePointer {
            x: int_arg(name, args, "x")?,
            y: int_arg(name, args, "y")?,
        }),
        "move_pointer_by" => act(AgentAction::MovePointerBy {
            dx: num_arg(name, args, "dx")?,
            dy: num_arg(name, args, "dy")?,
        }),
        "click_pointer" => act(AgentAction::Click),
        "scroll_screen" => act(AgentAction::Scroll {
            direction: str_arg(name, args, "direction")?
                .parse()
                .map_err(PhoneClawError::Decision)?,
        }),
        "enter_keys" => act(AgentAction::EnterText {
            text: str_arg(name, args, "text")?,
        }),
        "home_screen" => act(AgentAction::Home),
        "pause_loop" => Ok(Decision::Pause {
            seconds: args
                .get("seconds")
                .and_then(Value::as_u64)
                .ok_or_else(|| missing(name, "seconds"))?,
            explanation: opt_str(args, "explanation"),
        }),
        "human_intervention" => Ok(Decision::Escalate {
            explanation: str_arg(name, args, "explanation")?,
        }),
        "report_no_progress" => Ok(Decision::NoProgress {
            reason: opt_str(args, "reason"),
        }),
        "finish_task" => Ok(Decision::Finish {
            success: args.get("success").and_then(Value::as_bool).unwrap_or(true),
            summary: opt_str(args, "summary"),
        }),
        other => Err(PhoneClawError::Decision(format!("unknown tool: {other}"))),
    }
}

fn missing(tool: &str, field: &str) -> PhoneClawError {
    PhoneClawError::Decision(format!("{tool}: missing or invalid argument '{field}'"))
}

fn int_arg(tool: &str, args: &Value, field: &str) -> PhoneClawResult<i32> {
    args.get(field)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| missing(tool, field))
}

fn num_arg(tool: &str, args: &Value, field: &str) -> PhoneClawResult<f64> {
    args.get(field).and_then(Value::as_f64).ok_or_else(|| missing(tool, field))
}

fn str_arg(tool: &str, args: &Value, field: &str) -> PhoneClawResult<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| missing(tool, field))
}

fn opt_str(args: &Value, field: &str) -> String {
    args.get(field).and_then(Value::as_str).unwrap_or_default().to_owned()
}

/// Replays a fixed list of decisions, then finishes. Used for dry runs and
/// for driving the control loop deterministically.
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    script: VecDeque<PhoneClawResult<Decision>>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            script: decisions.into_iter().map(Ok).collect(),
            seen: Arc::default(),
        }
    }

    /// Queue a decision-layer failure.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(PhoneClawError::Decision(message.into())));
    }

    /// Shared log of the observation ids handed to `decide`, in call order.
    /// Stays readable after the script is boxed into an engine.
    pub fn observation_log(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisions {
    async fn decide(&mut self, ctx: DecisionContext<'_>) -> PhoneClawResult<Decision> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(ctx.observation.id);
        }
        self.script.pop_front().unwrap_or_else(|| {
            Ok(Decision::Finish {
                success: false,
                summary: "script exhausted".into(),
            })
        })
    }
}
