use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::SendError;
use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::state::{ActionResult, AgentAction, AgentState, EscalationReport};

/// Broadcast to observers while a session runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: AgentState,
    },
    Observed {
        observation_id: u64,
        targets: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    ActionCompleted {
        action: AgentAction,
        observation_id: u64,
        result: ActionResult,
    },
    Escalated {
        report: EscalationReport,
    },
}

/// Sent into a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    Stop,
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    command_tx: mpsc::Sender<SessionCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
}

/// Cloneable handle for code outside the engine: subscribe and send commands.
#[derive(Clone)]
pub struct SessionHandle {
    tx: broadcast::Sender<SessionEvent>,
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Request cancellation. Honoured at the next cycle or pause boundary,
    /// so it is safe to call while an action is running.
    pub fn stop(&self) {
        if let Err(e) = self.command_tx.try_send(SessionCommand::Stop) {
            tracing::debug!(error = %e, "stop not queued");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            tx,
            command_tx,
            command_rx,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn send(&self, event: SessionEvent) -> Result<(), SendError<SessionEvent>> {
        self.tx.send(event).map(|_| ())
    }

    /// Publish, ignoring the no-subscriber case.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }

    /// Non-blocking check used between cycles.
    pub fn poll_command(&mut self) -> Option<SessionCommand> {
        self.command_rx.try_recv().ok()
    }

    /// Waits for the next command. Pending forever once every sender is gone,
    /// so it is safe to race against a timer in `select!`.
    pub async fn recv_command(&mut self) -> SessionCommand {
        match self.command_rx.recv().await {
            Some(cmd) => cmd,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.handle().subscribe();
        bus.emit(SessionEvent::StateChanged { state: AgentState::Observing });
        match rx.recv().await.unwrap() {
            SessionEvent::StateChanged { state } => assert_eq!(state, AgentState::Observing),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_is_polled_once() {
        let mut bus = EventBus::new();
        assert!(bus.poll_command().is_none());
        bus.handle().stop();
        assert_eq!(bus.poll_command(), Some(SessionCommand::Stop));
        assert!(bus.poll_command().is_none());
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        assert!(bus.send(SessionEvent::StateChanged { state: AgentState::Idle }).is_err());
        bus.emit(SessionEvent::StateChanged { state: AgentState::Idle });
    }
}
