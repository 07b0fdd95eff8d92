//! Execution controller for a single sequence.
//!
//! [`SequenceEngine`] turns operator commands (start, pause, resume, stop,
//! halt, reset) into state transitions and owns the execution task that walks
//! the step list. Each command does a cheap check against the current state
//! for an early, logged rejection and then asks the [`StateMachine`], which is
//! the only authority on whether the change actually happens.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::definition::{SequenceDefinition, StepDescriptor};
use super::event_bus::{EventBus, SequenceEvent};
use super::runner::StepRunner;
use super::state_machine::StateMachine;
use super::types::{SequenceState, SequenceStatus};
use crate::config::EngineConfig;
use crate::error::StepError;
use crate::telemetry::create_sequence_span;

use SequenceState::*;

/// Handle to the in-flight execution task
struct ExecutionTask {
    run_id: u64,
    handle: JoinHandle<()>,
    /// Reports `Err` from `changed()` once the task's future has been dropped
    finished: watch::Receiver<()>,
}

pub struct SequenceEngine {
    sequence_id: String,
    machine: Arc<StateMachine>,
    bus: Arc<EventBus>,
    runner: Arc<dyn StepRunner>,
    config: EngineConfig,
    /// Filled by `start`, emptied by the task itself when it returns, or by `halt`
    task: Arc<Mutex<Option<ExecutionTask>>>,
    next_run_id: AtomicU64,
}

impl std::fmt::Debug for SequenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceEngine")
            .field("sequence_id", &self.sequence_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl SequenceEngine {
    /// Create an engine in `Idle`. A UUID is generated when no id is given.
    pub fn new(
        sequence_id: Option<String>,
        runner: Arc<dyn StepRunner>,
        config: EngineConfig,
    ) -> Self {
        let sequence_id = sequence_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let machine = Arc::new(StateMachine::new());
        let bus = Arc::new(EventBus::new());

        // Republish every transition on the bus
        let state_bus = Arc::clone(&bus);
        machine.subscribe_to_transitions(move |event| {
            state_bus.publish(&SequenceEvent::StateChanged {
                from_state: event.from_state,
                to_state: event.to_state,
                reason: event.reason.clone(),
            });
            Ok(())
        });

        info!(sequence_id = %sequence_id, "Sequence engine initialized");

        Self {
            sequence_id,
            machine,
            bus,
            runner,
            config,
            task: Arc::new(Mutex::new(None)),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn sequence_id(&self) -> &str {
        &self.sequence_id
    }

    pub fn state(&self) -> SequenceState {
        self.machine.state()
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn status(&self) -> SequenceStatus {
        SequenceStatus::new(self.sequence_id.clone(), self.state())
    }

    /// Register for `state_changed`, `step_started`, `step_completed` or `step_failed`
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&SequenceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(event_type, callback);
    }

    pub async fn wait_for_state(&self, target: SequenceState, timeout: Option<Duration>) -> bool {
        self.machine.wait_for_state(target, timeout).await
    }

    /// Wait until the sequence is `Stopped` or `Halted`
    pub async fn wait_until_finished(&self, timeout: Option<Duration>) -> Option<SequenceState> {
        self.machine.wait_for_any(&[Stopped, Halted], timeout).await
    }

    /// Whether an execution task exists and has not yet terminated
    pub async fn has_active_task(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Start executing `definition`. Only valid from `Idle`.
    pub async fn start(&self, definition: SequenceDefinition) -> bool {
        let state = self.state();
        if state != Idle {
            warn!(sequence_id = %self.sequence_id, state = %state, "Cannot start");
            return false;
        }

        // Hold the slot across transition and spawn so a concurrent halt
        // always finds the handle once the sequence is Running.
        let mut slot = self.task.lock().await;
        if !self.machine.transition(Running, Some("start() called")).await {
            return false;
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (finished_tx, finished) = watch::channel(());
        let execution = Execution {
            run_id,
            slot: Arc::clone(&self.task),
            sequence_id: self.sequence_id.clone(),
            machine: Arc::clone(&self.machine),
            bus: Arc::clone(&self.bus),
            runner: Arc::clone(&self.runner),
            pause_poll_interval: self.config.pause_poll_interval(),
            step_timeout: self.config.step_timeout(),
            _finished: finished_tx,
        };
        let span = create_sequence_span("execute", &self.sequence_id);
        let handle = tokio::spawn(execution.run(definition).instrument(span));

        *slot = Some(ExecutionTask {
            run_id,
            handle,
            finished,
        });
        true
    }

    pub async fn pause(&self) -> bool {
        let state = self.state();
        if state != Running {
            warn!(sequence_id = %self.sequence_id, state = %state, "Cannot pause");
            return false;
        }
        self.machine.transition(Paused, Some("pause() called")).await
    }

    pub async fn resume(&self) -> bool {
        let state = self.state();
        if state != Paused {
            warn!(sequence_id = %self.sequence_id, state = %state, "Cannot resume");
            return false;
        }
        self.machine.transition(Running, Some("resume() called")).await
    }

    /// Request a graceful stop.
    ///
    /// Waits up to the configured stop timeout for the execution task to
    /// finish its current step, then completes the stop. If the task does not
    /// finish in time the stop escalates to [`SequenceEngine::halt`].
    pub async fn stop(&self) -> bool {
        match self.state() {
            Stopped => return true,
            Stopping => {
                debug!(sequence_id = %self.sequence_id, "Stop already in progress");
                return true;
            }
            Running | Paused => {}
            state => {
                warn!(sequence_id = %self.sequence_id, state = %state, "Cannot stop");
                return false;
            }
        }

        if !self.machine.transition(Stopping, Some("stop() called")).await {
            // Natural completion may have won the race
            return self.state() == Stopped;
        }

        let finished = self
            .task
            .lock()
            .await
            .as_ref()
            .map(|task| task.finished.clone());

        if let Some(mut finished) = finished {
            let timeout = self.config.stop_timeout();
            if tokio::time::timeout(timeout, finished.changed()).await.is_err() {
                warn!(
                    sequence_id = %self.sequence_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Stop timed out, force halting"
                );
                return self.halt().await;
            }
        }

        if self.machine.transition(Stopped, Some("stop completed")).await {
            info!(sequence_id = %self.sequence_id, "Sequence stopped");
            return true;
        }
        // A step fault or an operator halt during the stop owns the final transition
        self.machine
            .wait_for_any(&[Stopped, Halted], Some(self.config.stop_timeout()))
            .await
            .is_some()
    }

    /// Force an immediate halt, cancelling the execution task.
    ///
    /// Returns once the task has actually terminated and the sequence is `Halted`.
    pub async fn halt(&self) -> bool {
        if self.state() == Halted {
            return true;
        }

        if !self.machine.transition(Halting, Some("halt() called")).await {
            // Another halt, or the loop's fault path, is already under way
            return match self.state() {
                Halting | Halted => self
                    .machine
                    .wait_for_state(Halted, Some(self.config.stop_timeout()))
                    .await,
                _ => false,
            };
        }

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.handle.abort();
            match task.handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    debug!(sequence_id = %self.sequence_id, "Execution task cancelled");
                }
                Err(e) => {
                    error!(sequence_id = %self.sequence_id, error = %e, "Execution task panicked");
                }
            }
        }

        self.machine
            .transition_from(Halting, Halted, "Halt completed", None)
            .await
            || self.state() == Halted
    }

    /// Return a `Stopped` or `Halted` sequence to `Idle` so it can be started again.
    pub async fn reset(&self) -> bool {
        let state = self.state();
        if !state.is_terminal() {
            warn!(sequence_id = %self.sequence_id, state = %state, "Cannot reset");
            return false;
        }

        let previous = {
            let mut slot = self.task.lock().await;
            if !self.machine.transition(Idle, Some("reset() called")).await {
                return false;
            }
            slot.take()
        };

        // The task has already made its final transition; let it return.
        if let Some(task) = previous {
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    error!(sequence_id = %self.sequence_id, error = %e, "Execution task panicked");
                }
            }
        }
        true
    }
}

impl Drop for SequenceEngine {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.task.try_lock() {
            if let Some(task) = slot.take() {
                task.handle.abort();
            }
        }
    }
}

/// State moved into the spawned execution task
struct Execution {
    run_id: u64,
    slot: Arc<Mutex<Option<ExecutionTask>>>,
    sequence_id: String,
    machine: Arc<StateMachine>,
    bus: Arc<EventBus>,
    runner: Arc<dyn StepRunner>,
    pause_poll_interval: Duration,
    step_timeout: Option<Duration>,
    _finished: watch::Sender<()>,
}

impl Execution {
    async fn run(self, definition: SequenceDefinition) {
        self.execute(definition).await;
        self.release_slot().await;
    }

    /// Clear this run's handle unless a command has already taken it
    async fn release_slot(&self) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|task| task.run_id == self.run_id) {
            slot.take();
        }
    }

    async fn execute(&self, definition: SequenceDefinition) {
        let steps = definition.steps;
        info!(sequence_id = %self.sequence_id, step_count = steps.len(), "Starting execution");
        let mut changes = self.machine.changes();

        for (index, step) in steps.iter().enumerate() {
            self.wait_while_paused(&mut changes).await;

            if !self.machine.state().is_active() {
                info!(
                    sequence_id = %self.sequence_id,
                    step_index = index,
                    state = %self.machine.state(),
                    "Execution interrupted by state change"
                );
                return;
            }

            let step_name = step.display_name(index);
            self.bus.publish(&SequenceEvent::StepStarted {
                step_index: index,
                step_name: step_name.clone(),
            });

            if let Err(error) = self.run_step(index, step, &step_name).await {
                error!(
                    sequence_id = %self.sequence_id,
                    step_index = index,
                    step_name = %step_name,
                    error = %error,
                    "Execution error"
                );
                self.bus.publish(&SequenceEvent::StepFailed {
                    step_index: index,
                    step_name,
                    error: error.to_string(),
                });
                self.halt_on_fault(error).await;
                return;
            }

            self.bus.publish(&SequenceEvent::StepCompleted {
                step_index: index,
                step_name,
            });
        }

        // A pause requested during the final step holds completion until resumed
        self.wait_while_paused(&mut changes).await;

        info!(sequence_id = %self.sequence_id, "Sequence execution completed");
        self.machine
            .transition_from(Running, Stopped, "Execution completed", None)
            .await;
    }

    async fn wait_while_paused(&self, changes: &mut watch::Receiver<u64>) {
        while self.machine.state() == Paused {
            let _ = tokio::time::timeout(self.pause_poll_interval, changes.changed()).await;
        }
    }

    async fn run_step(
        &self,
        index: usize,
        step: &StepDescriptor,
        step_name: &str,
    ) -> Result<(), StepError> {
        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, self.runner.run_step(index, step))
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::Timeout {
                        step: step_name.to_string(),
                        timeout: limit,
                    })
                }),
            None => self.runner.run_step(index, step).await,
        }
    }

    /// Route a step fault to `Halted`, going through `Halting` when a pause
    /// or stop was requested while the step ran. An operator halt already in
    /// progress owns the final transition.
    async fn halt_on_fault(&self, error: StepError) {
        const REASON: &str = "Execution error";

        match self.machine.state() {
            Running => {
                if self
                    .machine
                    .transition_from(Running, Halted, REASON, Some(error.clone()))
                    .await
                {
                    return;
                }
            }
            Paused | Stopping => {}
            _ => return,
        }

        // Re-read: a pause, stop or halt may have landed since
        let from = self.machine.state();
        if matches!(from, Paused | Stopping)
            && self
                .machine
                .transition_from(from, Halting, REASON, Some(error.clone()))
                .await
        {
            self.machine
                .transition_from(Halting, Halted, REASON, Some(error))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::event_bus::{STEP_COMPLETED, STEP_FAILED, STEP_STARTED};
    use crate::sequence::runner::{DelayStepRunner, MockStepRunner};
    use crate::sequence::TransitionEvent;
    use std::sync::Mutex as StdMutex;

    fn definition(count: usize) -> SequenceDefinition {
        SequenceDefinition::new(
            (0..count)
                .map(|i| StepDescriptor::named(format!("step_{}", i + 1)))
                .collect(),
        )
    }

    fn engine_with(runner: impl StepRunner + 'static, config: EngineConfig) -> SequenceEngine {
        SequenceEngine::new(Some("test-seq".to_string()), Arc::new(runner), config)
    }

    fn record_transitions(engine: &SequenceEngine) -> Arc<StdMutex<Vec<TransitionEvent>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        engine.state_machine().subscribe_to_transitions(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        log
    }

    fn record_events(engine: &SequenceEngine) -> Arc<StdMutex<Vec<SequenceEvent>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        for event_type in [STEP_STARTED, STEP_COMPLETED, STEP_FAILED] {
            let sink = Arc::clone(&log);
            engine.subscribe(event_type, move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        log
    }

    fn slow_runner() -> DelayStepRunner {
        DelayStepRunner::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_runs_every_step_then_stops() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().times(3).returning(|_, _| Ok(()));
        let engine = engine_with(runner, EngineConfig::default());
        let events = record_events(&engine);

        assert!(engine.start(definition(3)).await);
        assert_eq!(
            engine.wait_until_finished(Some(Duration::from_secs(5))).await,
            Some(Stopped)
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 6);
        for (i, pair) in events.chunks(2).enumerate() {
            assert_eq!(
                pair[0],
                SequenceEvent::StepStarted {
                    step_index: i,
                    step_name: format!("step_{}", i + 1)
                }
            );
            assert_eq!(
                pair[1],
                SequenceEvent::StepCompleted {
                    step_index: i,
                    step_name: format!("step_{}", i + 1)
                }
            );
        }
    }

    #[tokio::test]
    async fn test_start_rejected_unless_idle() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().returning(|_, _| Ok(()));
        let engine = engine_with(runner, EngineConfig::default());

        assert!(engine.start(definition(1)).await);
        assert!(!engine.start(definition(1)).await);
        engine.wait_until_finished(Some(Duration::from_secs(5))).await;
        assert!(!engine.start(definition(1)).await);
        assert_eq!(engine.state(), Stopped);
    }

    #[tokio::test]
    async fn test_step_fault_halts_with_error_attached() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().times(2).returning(|index, step| {
            if index == 1 {
                Err(StepError::failed(step.display_name(index), "detector saturated"))
            } else {
                Ok(())
            }
        });
        let engine = engine_with(runner, EngineConfig::default());
        let transitions = record_transitions(&engine);
        let events = record_events(&engine);

        assert!(engine.start(definition(4)).await);
        assert_eq!(
            engine.wait_until_finished(Some(Duration::from_secs(5))).await,
            Some(Halted)
        );

        let last = transitions.lock().unwrap().last().cloned().unwrap();
        assert_eq!((last.from_state, last.to_state), (Running, Halted));
        assert_eq!(last.error, Some(StepError::failed("step_2", "detector saturated")));

        let events = events.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(SequenceEvent::StepFailed { step_index: 1, .. })
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SequenceEvent::StepStarted { step_index: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_a_fault() {
        let config = EngineConfig {
            step_timeout_ms: Some(100),
            ..EngineConfig::default()
        };
        let engine = engine_with(slow_runner(), config);
        let transitions = record_transitions(&engine);

        assert!(engine.start(definition(2)).await);
        assert_eq!(engine.wait_until_finished(None).await, Some(Halted));

        let last = transitions.lock().unwrap().last().cloned().unwrap();
        assert!(matches!(last.error, Some(StepError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_halt_after_timeout() {
        let engine = engine_with(slow_runner(), EngineConfig::default());
        let transitions = record_transitions(&engine);

        assert!(engine.start(definition(1)).await);
        tokio::task::yield_now().await;

        let began = tokio::time::Instant::now();
        assert!(engine.stop().await);
        assert!(began.elapsed() >= Duration::from_millis(5000));
        assert_eq!(engine.state(), Halted);
        assert!(!engine.has_active_task().await);

        let path: Vec<_> = transitions
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_state)
            .collect();
        assert_eq!(path, vec![Running, Stopping, Halting, Halted]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop_finishes_current_step() {
        let runner = DelayStepRunner::new(Duration::from_millis(200));
        let engine = engine_with(runner, EngineConfig::default());
        let events = record_events(&engine);

        assert!(engine.start(definition(5)).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(engine.stop().await);
        assert_eq!(engine.state(), Stopped);

        let events = events.lock().unwrap();
        let started = events
            .iter()
            .filter(|e| matches!(e, SequenceEvent::StepStarted { .. }))
            .count();
        let completed = events
            .iter()
            .filter(|e| matches!(e, SequenceEvent::StepCompleted { .. }))
            .count();
        assert_eq!(started, 2);
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn test_halt_is_idempotent() {
        let engine = engine_with(slow_runner(), EngineConfig::default());
        let transitions = record_transitions(&engine);

        assert!(engine.start(definition(3)).await);
        assert!(engine.halt().await);
        assert_eq!(engine.state(), Halted);
        let count = transitions.lock().unwrap().len();

        assert!(engine.halt().await);
        assert_eq!(transitions.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_concurrent_halts_share_one_halt_cycle() {
        let engine = engine_with(slow_runner(), EngineConfig::default());
        let transitions = record_transitions(&engine);

        assert!(engine.start(definition(2)).await);
        let (first, second) = tokio::join!(engine.halt(), engine.halt());
        assert!(first && second);
        assert_eq!(engine.state(), Halted);

        let path: Vec<_> = transitions
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.to_state)
            .collect();
        assert_eq!(path, vec![Running, Halting, Halted]);
    }

    fn execution_for(machine: Arc<StateMachine>) -> Execution {
        let (finished, _) = watch::channel(());
        Execution {
            run_id: 1,
            slot: Arc::new(Mutex::new(None)),
            sequence_id: "test-seq".to_string(),
            machine,
            bus: Arc::new(EventBus::new()),
            runner: Arc::new(MockStepRunner::new()),
            pause_poll_interval: Duration::from_millis(10),
            step_timeout: None,
            _finished: finished,
        }
    }

    #[tokio::test]
    async fn test_fault_after_operator_halt_leaves_final_transition_to_halt() {
        let machine = Arc::new(StateMachine::new());
        machine.transition(Running, Some("start() called")).await;
        machine.transition(Halting, Some("halt() called")).await;
        let generation = machine.generation();

        execution_for(Arc::clone(&machine))
            .halt_on_fault(StepError::failed("expose", "late fault"))
            .await;

        assert_eq!(machine.state(), Halting);
        assert_eq!(machine.generation(), generation);
    }

    #[tokio::test]
    async fn test_fault_while_paused_goes_through_halting() {
        let machine = Arc::new(StateMachine::new());
        let transitions = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        machine.subscribe_to_transitions(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        machine.transition(Running, None).await;
        machine.transition(Paused, None).await;

        let fault = StepError::failed("expose", "shutter jammed");
        execution_for(Arc::clone(&machine))
            .halt_on_fault(fault.clone())
            .await;

        let transitions = transitions.lock().unwrap();
        let tail: Vec<_> = transitions[2..]
            .iter()
            .map(|e| (e.from_state, e.to_state, e.error.clone()))
            .collect();
        assert_eq!(
            tail,
            vec![
                (Paused, Halting, Some(fault.clone())),
                (Halting, Halted, Some(fault)),
            ]
        );
    }

    #[tokio::test]
    async fn test_finished_task_clears_its_slot() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().returning(|_, _| Ok(()));
        let engine = engine_with(runner, EngineConfig::default());

        assert!(engine.start(definition(2)).await);
        assert_eq!(
            engine.wait_until_finished(Some(Duration::from_secs(5))).await,
            Some(Stopped)
        );

        let mut cleared = false;
        for _ in 0..100 {
            if engine.task.lock().await.is_none() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cleared, "finished task still holds the slot");
        assert!(!engine.has_active_task().await);
    }

    #[tokio::test]
    async fn test_halt_from_idle() {
        let engine = engine_with(MockStepRunner::new(), EngineConfig::default());
        assert!(engine.halt().await);
        assert_eq!(engine.state(), Halted);
        assert!(engine.reset().await);
        assert_eq!(engine.state(), Idle);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_emits_nothing() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().returning(|_, _| Ok(()));
        let engine = engine_with(runner, EngineConfig::default());
        let transitions = record_transitions(&engine);

        engine.start(definition(1)).await;
        engine.wait_until_finished(Some(Duration::from_secs(5))).await;
        let count = transitions.lock().unwrap().len();

        assert!(engine.stop().await);
        assert_eq!(transitions.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_pause_and_resume_rejected_in_wrong_state() {
        let engine = engine_with(MockStepRunner::new(), EngineConfig::default());
        assert!(!engine.pause().await);
        assert!(!engine.resume().await);
        assert!(!engine.stop().await);
        assert!(!engine.reset().await);
        assert_eq!(engine.state(), Idle);
    }

    #[tokio::test]
    async fn test_reset_allows_reuse() {
        let mut runner = MockStepRunner::new();
        runner.expect_run_step().times(4).returning(|_, _| Ok(()));
        let engine = engine_with(runner, EngineConfig::default());

        for _ in 0..2 {
            assert!(engine.start(definition(2)).await);
            assert_eq!(
                engine.wait_until_finished(Some(Duration::from_secs(5))).await,
                Some(Stopped)
            );
            assert!(engine.reset().await);
            assert!(!engine.has_active_task().await);
        }
    }

    #[tokio::test]
    async fn test_state_changed_republished_on_bus() {
        let engine = engine_with(MockStepRunner::new(), EngineConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(crate::sequence::event_bus::STATE_CHANGED, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        engine.start(SequenceDefinition::default()).await;
        engine.wait_until_finished(Some(Duration::from_secs(5))).await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            SequenceEvent::StateChanged {
                from_state: Idle,
                to_state: Running,
                reason: Some("start() called".to_string()),
            }
        );
        assert_eq!(
            seen[1],
            SequenceEvent::StateChanged {
                from_state: Running,
                to_state: Stopped,
                reason: Some("Execution completed".to_string()),
            }
        );
    }
}
