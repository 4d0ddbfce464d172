/// Control loop: OBSERVING → DECIDING → ACTING → OBSERVING.
///
/// Exits are `Escalated` (human takeover) and `Done`. Every action is backed
/// by an [`ActionPermit`] minted from the observation of the same cycle, and
/// a permit is consumed by exactly one action, so an action can neither run
/// on a stale observation nor follow another action without re-observing.
use uuid::Uuid;

use crate::agent_engine::decision::{DecisionContext, DecisionMaker, TOOL_NAMES};
use crate::agent_engine::event_bus::{EventBus, SessionCommand, SessionEvent, SessionHandle};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::state::{
    ActionResult, AgentAction, AgentState, Decision, EscalationReport, LoopConfig, SessionState, TaskOutcome,
};
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::action::ActionExecutor;
use crate::executor::dispatcher::dispatch;
use crate::perception::pipeline::Perceiver;
use crate::perception::types::Observation;

/// Proof that an observation completed in the current cycle.
#[derive(Debug)]
struct ActionPermit {
    observation_id: u64,
}

enum Step {
    Continue,
    Exit(TaskOutcome),
}

pub struct AgentEngine {
    id: Uuid,
    state: AgentState,
    session: SessionState,
    loop_ctrl: LoopController,
    perceiver: Perceiver,
    executor: ActionExecutor,
    decider: Box<dyn DecisionMaker>,
    bus: EventBus,

    goal: String,
    permit: Option<ActionPermit>,
    last_observation: Option<Observation>,
    last_result: Option<ActionResult>,
}

impl AgentEngine {
    /// The engine owns the executor and with it the input device: one
    /// session per device holds by construction.
    pub fn new(
        perceiver: Perceiver,
        executor: ActionExecutor,
        decider: Box<dyn DecisionMaker>,
        loop_config: LoopConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: AgentState::Idle,
            session: SessionState::default(),
            loop_ctrl: LoopController::new(loop_config),
            perceiver,
            executor,
            decider,
            bus: EventBus::new(),
            goal: String::new(),
            permit: None,
            last_observation: None,
            last_result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn handle(&self) -> SessionHandle {
        self.bus.handle()
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }

    /// Run a new task to completion, escalation or cancellation.
    pub async fn run_task(&mut self, goal: impl Into<String>) -> TaskOutcome {
        self.goal = goal.into();
        self.session.reset();
        self.loop_ctrl.reset();
        self.permit = None;
        self.last_observation = None;
        self.last_result = None;
        tracing::info!(session = %self.id, goal = %self.goal, "task started");
        self.drive().await
    }

    /// Continue an escalated task. Retries start from zero again.
    pub async fn resume(&mut self) -> PhoneClawResult<TaskOutcome> {
        if !self.session.escalated {
            return Err(PhoneClawError::Agent("no escalated task to resume".into()));
        }
        self.session.escalated = false;
        self.session.retry_count = 0;
        self.loop_ctrl.clear_failures();
        tracing::info!(session = %self.id, goal = %self.goal, "task resumed by operator");
        Ok(self.drive().await)
    }

    async fn drive(&mut self) -> TaskOutcome {
        loop {
            if self.bus.poll_command() == Some(SessionCommand::Stop) {
                return self.cancelled();
            }
            if self.loop_ctrl.should_stop() {
                tracing::info!(cycles = self.loop_ctrl.cycles(), "loop controller triggered stop");
                return self.done(false, "loop limit reached".into());
            }
            if let Step::Exit(outcome) = self.cycle().await {
                return outcome;
            }
        }
    }

    async fn cycle(&mut self) -> Step {
        self.loop_ctrl.record_cycle();

        // ── Observing ─────────────────────────────────────────────────────
        self.set_state(AgentState::Observing);
        let observation = match self.perceiver.observe().await {
            Ok(obs) => obs,
            Err(e) => return self.perception_failed(e),
        };
        let observation_id = observation.id;
        self.bus.emit(SessionEvent::Observed {
            observation_id,
            targets: observation.targets.len(),
            timestamp: observation.captured_at,
        });
        self.permit = Some(ActionPermit { observation_id });

        // ── Deciding ──────────────────────────────────────────────────────
        self.set_state(AgentState::Deciding { observation_id });
        let ctx = DecisionContext {
            goal: &self.goal,
            observation: &observation,
            last_result: self.last_result.as_ref(),
            retry_count: self.session.retry_count,
            tools: TOOL_NAMES,
        };
        let decision = self.decider.decide(ctx).await;
        self.last_observation = Some(observation);

        let decision = match decision {
            Ok(d) => d,
            Err(PhoneClawError::Cancelled) => return Step::Exit(self.cancelled()),
            Err(e) => {
                tracing::error!(error = %e, "decision maker failed");
                return self.escalate(format!("decision maker failed: {e}"));
            }
        };
        tracing::info!(observation = observation_id, decision = ?decision, "decided");

        match decision {
            Decision::Act { action } => self.act(action).await,
            Decision::Pause { seconds, explanation } => self.pause(seconds, &explanation).await,
            Decision::NoProgress { reason } => self.failed(format!("no progress: {reason}")),
            Decision::Escalate { explanation } => self.escalate(explanation),
            Decision::Finish { success, summary } => Step::Exit(self.done(success, summary)),
        }
    }

    // ── Acting ────────────────────────────────────────────────────────────
    async fn act(&mut self, action: AgentAction) -> Step {
        let Some(permit) = self.permit.take() else {
            return self.escalate(format!("refusing {} without a fresh observation", action.name()));
        };
        self.set_state(AgentState::Acting {
            action: action.clone(),
            observation_id: permit.observation_id,
        });

        let result = dispatch(&mut self.executor, &action).await;
        self.bus.emit(SessionEvent::ActionCompleted {
            action: action.clone(),
            observation_id: permit.observation_id,
            result: result.clone(),
        });
        self.last_result = Some(result.clone());

        if result.is_ok() {
            Step::Continue
        } else if result.environment {
            tracing::error!(action = action.name(), "input device failure");
            self.escalate(format!(
                "input device failed during {}: {}",
                action.name(),
                result.message.as_deref().unwrap_or("unknown error")
            ))
        } else {
            self.failed(format!(
                "{} failed: {}",
                action.name(),
                result.message.as_deref().unwrap_or("unknown error")
            ))
        }
    }

    async fn pause(&mut self, seconds: u64, explanation: &str) -> Step {
        self.permit = None;
        let duration = self.loop_ctrl.pause_for(seconds);
        let until = chrono::Utc::now() + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        self.session.paused_until = Some(until);
        tracing::info!(secs = duration.as_secs(), reason = %explanation, "pausing");
        self.set_state(AgentState::Paused { until });

        let stopped = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            cmd = self.bus.recv_command() => cmd == SessionCommand::Stop,
        };
        self.session.paused_until = None;
        if stopped {
            return Step::Exit(self.cancelled());
        }
        Step::Continue
    }

    fn perception_failed(&mut self, err: PhoneClawError) -> Step {
        self.permit = None;
        if err.is_environment() {
            tracing::error!(error = %err, "environment failure while observing");
            return self.escalate(format!("observation failed: {err}"));
        }
        tracing::warn!(error = %err, "observation rejected");
        self.failed(format!("observation failed: {err}"))
    }

    /// Count one failure; escalate once the retry budget is spent.
    fn failed(&mut self, reason: String) -> Step {
        let retries = self.loop_ctrl.record_failure();
        self.session.retry_count = retries;
        tracing::warn!(retries, max = self.loop_ctrl.config().max_retries, reason = %reason, "attempt failed");
        if self.loop_ctrl.exhausted() {
            return self.escalate(format!("giving up after {retries} failed attempts; last: {reason}"));
        }
        Step::Continue
    }

    fn escalate(&mut self, explanation: String) -> Step {
        self.permit = None;
        self.session.escalated = true;
        self.set_state(AgentState::Escalated {
            explanation: explanation.clone(),
        });
        let report = EscalationReport {
            explanation,
            retry_count: self.session.retry_count,
            last_observation: self.last_observation.clone(),
            last_result: self.last_result.clone(),
        };
        tracing::warn!(session = %self.id, explanation = %report.explanation, "escalating to operator");
        self.bus.emit(SessionEvent::Escalated { report: report.clone() });
        Step::Exit(TaskOutcome::Escalated(report))
    }

    fn done(&mut self, success: bool, summary: String) -> TaskOutcome {
        self.permit = None;
        tracing::info!(session = %self.id, success, summary = %summary, "task done");
        self.set_state(AgentState::Done {
            success,
            summary: summary.clone(),
        });
        TaskOutcome::Done { success, summary }
    }

    fn cancelled(&mut self) -> TaskOutcome {
        self.permit = None;
        tracing::info!(session = %self.id, "session cancelled");
        self.set_state(AgentState::Idle);
        TaskOutcome::Cancelled
    }

    fn set_state(&mut self, state: AgentState) {
        tracing::debug!(state = ?state, "state transition");
        self.state = state.clone();
        self.bus.emit(SessionEvent::StateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::agent_engine::decision::ScriptedDecisions;
    use crate::config::{DetectionConfig, DeviceConfig, ExecutorConfig};
    use crate::executor::coordinator::{CoordinateNormalizer, DeviceBounds, PointerPoint};
    use crate::executor::input::{ButtonAction, InputDevice};
    use crate::executor::testing::{DeviceEvent, RecordingDevice};
    use crate::perception::postprocess::DetectionPostprocessor;
    use crate::perception::traits::{DetectorGrid, ObjectDetector, RawDetections, ScreenCapture};
    use crate::perception::types::Screenshot;

    /// Capture that can be switched to fail like a missing capture tool.
    #[derive(Clone, Default)]
    struct FakeCapture {
        broken: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ScreenCapture for FakeCapture {
        async fn capture(&self) -> PhoneClawResult<Screenshot> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(PhoneClawError::Capture("capture tool not found".into()));
            }
            Ok(Screenshot {
                image_bytes: Vec::new(),
                width: 500,
                height: 1000,
                captured_at: chrono::Utc::now(),
            })
        }
    }

    struct GarbageDetector;

    impl ObjectDetector for GarbageDetector {
        fn detect(&mut self, _shot: &Screenshot) -> PhoneClawResult<RawDetections> {
            Ok(RawDetections {
                payload: serde_json::json!({"not": "a list"}),
                grid: DetectorGrid::normalized(1000.0),
            })
        }
    }

    /// Every injection fails, like a display server that went away.
    struct DeadDevice;

    impl InputDevice for DeadDevice {
        fn move_to(&mut self, _point: PointerPoint) -> PhoneClawResult<()> {
            Err(PhoneClawError::Executor("gone".into()))
        }

        fn move_by(&mut self, _dx: i32, _dy: i32) -> PhoneClawResult<()> {
            Err(PhoneClawError::Executor("gone".into()))
        }

        fn location(&self) -> PhoneClawResult<PointerPoint> {
            Err(PhoneClawError::Executor("gone".into()))
        }

        fn left_button(&mut self, _action: ButtonAction) -> PhoneClawResult<()> {
            Err(PhoneClawError::Executor("gone".into()))
        }

        fn key(&mut self, _c: char) -> PhoneClawResult<()> {
            Err(PhoneClawError::Executor("gone".into()))
        }
    }

    /// Records like `RecordingDevice` and asks the session to stop on the
    /// first button event.
    struct StoppingDevice {
        inner: RecordingDevice,
        handle: Arc<Mutex<Option<SessionHandle>>>,
    }

    impl InputDevice for StoppingDevice {
        fn move_to(&mut self, point: PointerPoint) -> PhoneClawResult<()> {
            self.inner.move_to(point)
        }

        fn move_by(&mut self, dx: i32, dy: i32) -> PhoneClawResult<()> {
            self.inner.move_by(dx, dy)
        }

        fn location(&self) -> PhoneClawResult<PointerPoint> {
            self.inner.location()
        }

        fn left_button(&mut self, action: ButtonAction) -> PhoneClawResult<()> {
            if let Some(handle) = self.handle.lock().unwrap().take() {
                handle.stop();
            }
            self.inner.left_button(action)
        }

        fn key(&mut self, c: char) -> PhoneClawResult<()> {
            self.inner.key(c)
        }
    }

    fn quiet_executor(device: impl InputDevice + 'static) -> ActionExecutor {
        let timing = ExecutorConfig {
            settle_ms: 0,
            key_delay_ms: 0,
            scroll_distance: 20,
            drag_duration_ms: 0,
        };
        ActionExecutor::new(Box::new(device), &DeviceConfig::default(), &timing)
    }

    fn engine_with(
        capture: FakeCapture,
        detector: Option<Box<dyn ObjectDetector>>,
        device: impl InputDevice + 'static,
        decider: ScriptedDecisions,
    ) -> AgentEngine {
        let device_cfg = DeviceConfig::default();
        let perceiver = Perceiver::new(
            Box::new(capture),
            detector,
            DetectionPostprocessor::new(&DetectionConfig::default()),
            CoordinateNormalizer::new(DeviceBounds::from(&device_cfg)),
        )
        .without_image();
        AgentEngine::new(perceiver, quiet_executor(device), Box::new(decider), LoopConfig::default())
    }

    fn engine(device: RecordingDevice, decider: ScriptedDecisions) -> AgentEngine {
        engine_with(FakeCapture::default(), None, device, decider)
    }

    fn act(action: AgentAction) -> Decision {
        Decision::Act { action }
    }

    #[tokio::test]
    async fn persistent_failure_escalates_after_exactly_max_retries() {
        let device = RecordingDevice::new();
        // Out-of-range moves fail validation every time.
        let script = ScriptedDecisions::new((0..10).map(|_| act(AgentAction::MovePointer { x: 5000, y: 0 })));
        let seen = script.observation_log();
        let mut engine = engine(device.clone(), script);

        match engine.run_task("open settings").await {
            TaskOutcome::Escalated(report) => {
                assert_eq!(report.retry_count, 3);
                assert_eq!(report.last_observation.map(|o| o.id), Some(3));
                assert!(report.last_result.is_some_and(|r| !r.is_ok()));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(engine.session().escalated);
        assert!(matches!(engine.state(), AgentState::Escalated { .. }));
        assert!(device.events().is_empty());
    }

    #[tokio::test]
    async fn every_action_follows_its_own_observation() {
        let device = RecordingDevice::new();
        let script = ScriptedDecisions::new([
            act(AgentAction::MovePointer { x: 100, y: 100 }),
            act(AgentAction::Click),
            act(AgentAction::Home),
            Decision::Finish { success: true, summary: "done".into() },
        ]);
        let mut engine = engine(device, script);
        let mut events = engine.handle().subscribe();

        let outcome = engine.run_task("tap").await;
        assert!(matches!(outcome, TaskOutcome::Done { success: true, .. }));

        let mut last_observed = None;
        let mut acted = Vec::new();
        while let Ok(ev) = events.try_recv() {
            match ev {
                SessionEvent::Observed { observation_id, .. } => last_observed = Some(observation_id),
                SessionEvent::ActionCompleted { observation_id, .. } => {
                    assert_eq!(last_observed.take(), Some(observation_id), "action without a fresh observation");
                    acted.push(observation_id);
                }
                _ => {}
            }
        }
        assert_eq!(acted, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn pauses_and_successes_do_not_consume_retries() {
        let device = RecordingDevice::new();
        let script = ScriptedDecisions::new([
            Decision::NoProgress { reason: "nothing changed".into() },
            Decision::Pause { seconds: 0, explanation: "page loading".into() },
            Decision::Pause { seconds: 0, explanation: "still loading".into() },
            act(AgentAction::Click),
            Decision::NoProgress { reason: "still nothing".into() },
            Decision::Finish { success: true, summary: "loaded".into() },
        ]);
        let mut engine = engine(device.clone(), script);

        let outcome = engine.run_task("wait for page").await;
        assert!(matches!(outcome, TaskOutcome::Done { success: true, .. }));
        assert_eq!(engine.session().retry_count, 2);
        assert!(engine.session().paused_until.is_none());
        assert_eq!(device.events().len(), 2);
    }

    #[tokio::test]
    async fn stop_during_pause_cancels_the_session() {
        let script = ScriptedDecisions::new([
            Decision::Pause { seconds: 30, explanation: "long wait".into() },
            act(AgentAction::Click),
        ]);
        let device = RecordingDevice::new();
        let mut engine = engine(device.clone(), script);
        let handle = engine.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.stop();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), engine.run_task("wait")).await;
        assert!(matches!(outcome, Ok(TaskOutcome::Cancelled)));
        assert!(device.events().is_empty());
    }

    #[tokio::test]
    async fn stop_during_an_action_lets_it_finish_then_cancels() {
        let recorder = RecordingDevice::new();
        let slot = Arc::new(Mutex::new(None));
        let device = StoppingDevice {
            inner: recorder.clone(),
            handle: slot.clone(),
        };
        let script = ScriptedDecisions::new([act(AgentAction::Click), act(AgentAction::Click)]);
        let seen = script.observation_log();
        let mut engine = engine_with(FakeCapture::default(), None, device, script);
        *slot.lock().unwrap() = Some(engine.handle());
        let mut events = engine.handle().subscribe();

        let outcome = tokio::time::timeout(Duration::from_secs(5), engine.run_task("tap once")).await;
        assert!(matches!(outcome, Ok(TaskOutcome::Cancelled)));

        let buttons = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, DeviceEvent::Button(_)))
            .count();
        assert_eq!(buttons, 2, "the double click completes");
        assert_eq!(seen.lock().unwrap().len(), 1);

        let mut observed = 0;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, SessionEvent::Observed { .. }) {
                observed += 1;
            }
        }
        assert_eq!(observed, 1, "no observation after the stop");
    }

    #[tokio::test]
    async fn input_device_failure_escalates_without_retrying() {
        let script = ScriptedDecisions::new((0..5).map(|_| act(AgentAction::Click)));
        let seen = script.observation_log();
        let mut engine = engine_with(FakeCapture::default(), None, DeadDevice, script);

        match engine.run_task("tap").await {
            TaskOutcome::Escalated(report) => {
                assert_eq!(report.retry_count, 0);
                assert!(report.explanation.contains("gone"), "{}", report.explanation);
                assert!(report.last_result.is_some_and(|r| r.environment));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capture_failure_escalates_immediately() {
        let capture = FakeCapture::default();
        capture.broken.store(true, Ordering::SeqCst);
        let mut engine = engine_with(capture, None, RecordingDevice::new(), ScriptedDecisions::default());

        match engine.run_task("anything").await {
            TaskOutcome::Escalated(report) => {
                assert_eq!(report.retry_count, 0);
                assert!(report.explanation.contains("capture tool not found"));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_detections_count_as_failures() {
        let script = ScriptedDecisions::default();
        let seen = script.observation_log();
        let mut engine = engine_with(
            FakeCapture::default(),
            Some(Box::new(GarbageDetector)),
            RecordingDevice::new(),
            script,
        );

        match engine.run_task("anything").await {
            TaskOutcome::Escalated(report) => assert_eq!(report.retry_count, 3),
            other => panic!("expected escalation, got {other:?}"),
        }
        assert!(seen.lock().unwrap().is_empty(), "nothing to decide on without an observation");
    }

    #[tokio::test]
    async fn resume_continues_with_cleared_retries() {
        let mut script = ScriptedDecisions::new([Decision::Escalate { explanation: "captcha".into() }]);
        script.push_error("model unavailable");
        let mut engine = engine(RecordingDevice::new(), script);

        assert!(engine.resume().await.is_err());
        assert!(matches!(engine.run_task("log in").await, TaskOutcome::Escalated(_)));

        match engine.resume().await.unwrap() {
            TaskOutcome::Escalated(report) => assert!(report.explanation.contains("model unavailable")),
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn loop_limit_ends_the_task() {
        let device = RecordingDevice::new();
        let script = ScriptedDecisions::new((0..5).map(|_| act(AgentAction::Click)));
        let device_cfg = DeviceConfig::default();
        let perceiver = Perceiver::new(
            Box::new(FakeCapture::default()),
            None,
            DetectionPostprocessor::new(&DetectionConfig::default()),
            CoordinateNormalizer::new(DeviceBounds::from(&device_cfg)),
        );
        let limits = LoopConfig {
            max_cycles: Some(2),
            ..LoopConfig::default()
        };
        let mut engine = AgentEngine::new(perceiver, quiet_executor(device.clone()), Box::new(script), limits);

        let outcome = engine.run_task("click forever").await;
        assert!(matches!(outcome, TaskOutcome::Done { success: false, .. }));
        let clicks = device
            .events()
            .into_iter()
            .filter(|e| matches!(e, DeviceEvent::Button(_)))
            .count();
        assert_eq!(clicks, 4);
    }
}
