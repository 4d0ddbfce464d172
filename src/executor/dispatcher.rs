// Routes a decided action to the matching executor operation.
use crate::agent_engine::state::{ActionResult, AgentAction};
use crate::executor::action::ActionExecutor;

pub async fn dispatch(executor: &mut ActionExecutor, action: &AgentAction) -> ActionResult {
    tracing::info!(action = action.name(), "dispatching");
    match action {
        AgentAction::MovePointer { x, y } => executor.move_pointer(*x, *y).await,
        AgentAction::MovePointerBy { dx, dy } => executor.move_pointer_by(*dx, *dy).await,
        AgentAction::Click => executor.click().await,
        AgentAction::Scroll { direction } => executor.scroll(*direction).await,
        AgentAction::EnterText { text } => executor.enter_text(text).await,
        AgentAction::Home => executor.home().await,
    }
}
