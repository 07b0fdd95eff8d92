// Shared helpers for sequencer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sequencer::sequence::EVENT_TYPES;
use sequencer::{
    EngineConfig, SequenceDefinition, SequenceEngine, SequenceEvent, SequenceState, StepDescriptor,
    StepError, StepRunner, TransitionEvent,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

pub fn definition(count: usize) -> SequenceDefinition {
    SequenceDefinition::new(
        (0..count)
            .map(|i| StepDescriptor::named(format!("step_{}", i + 1)))
            .collect(),
    )
}

/// Collects every bus event and every state transition of one engine
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<SequenceEvent>>>,
    transitions: Arc<Mutex<Vec<TransitionEvent>>>,
}

impl Recorder {
    pub fn attach(engine: &SequenceEngine) -> Self {
        let recorder = Self::default();
        for event_type in EVENT_TYPES {
            let events = Arc::clone(&recorder.events);
            engine.subscribe(event_type, move |event| {
                events.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        let transitions = Arc::clone(&recorder.transitions);
        engine.state_machine().subscribe_to_transitions(move |event| {
            transitions.lock().unwrap().push(event.clone());
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<SequenceEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Step events only, as (event type, step index)
    pub fn step_events(&self) -> Vec<(&'static str, usize)> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                SequenceEvent::StepStarted { step_index, .. }
                | SequenceEvent::StepCompleted { step_index, .. }
                | SequenceEvent::StepFailed { step_index, .. } => {
                    Some((event.event_type(), *step_index))
                }
                SequenceEvent::StateChanged { .. } => None,
            })
            .collect()
    }

    pub fn transitions(&self) -> Vec<TransitionEvent> {
        self.transitions.lock().unwrap().clone()
    }

    /// Target states in transition order
    pub fn path(&self) -> Vec<SequenceState> {
        self.transitions().iter().map(|t| t.to_state).collect()
    }
}

/// Runner whose steps block until the test releases them.
///
/// Each step records its index, then waits for one permit. A step index in
/// `fail_at` returns a fault once released.
#[derive(Clone)]
pub struct GatedRunner {
    gate: Arc<Semaphore>,
    started: Arc<watch::Sender<usize>>,
    runs: Arc<Mutex<Vec<usize>>>,
    fail_at: Option<usize>,
}

impl GatedRunner {
    pub fn new() -> Self {
        let (started, _) = watch::channel(0);
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(started),
            runs: Arc::new(Mutex::new(Vec::new())),
            fail_at: None,
        }
    }

    pub fn failing_at(step_index: usize) -> Self {
        Self {
            fail_at: Some(step_index),
            ..Self::new()
        }
    }

    /// Let `count` more steps finish
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Wait until at least `count` steps have begun running
    pub async fn wait_started(&self, count: usize) {
        let mut started = self.started.subscribe();
        tokio::time::timeout(Duration::from_secs(5), started.wait_for(|n| *n >= count))
            .await
            .expect("steps did not start in time")
            .expect("runner dropped");
    }

    pub fn runs(&self) -> Vec<usize> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for GatedRunner {
    async fn run_step(&self, step_index: usize, step: &StepDescriptor) -> Result<(), StepError> {
        self.runs.lock().unwrap().push(step_index);
        self.started.send_modify(|n| *n += 1);

        let permit = self.gate.acquire().await.map_err(|e| {
            StepError::failed(step.display_name(step_index), e.to_string())
        })?;
        permit.forget();

        if self.fail_at == Some(step_index) {
            return Err(StepError::failed(
                step.display_name(step_index),
                "injected fault",
            ));
        }
        Ok(())
    }
}

pub fn engine(runner: impl StepRunner + 'static) -> SequenceEngine {
    engine_with_config(runner, EngineConfig::default())
}

pub fn engine_with_config(
    runner: impl StepRunner + 'static,
    config: EngineConfig,
) -> SequenceEngine {
    SequenceEngine::new(None, Arc::new(runner), config)
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
