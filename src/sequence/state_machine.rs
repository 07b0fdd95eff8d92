use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::event_bus::call_isolated;
use super::transitions::TransitionTable;
use super::types::{SequenceState, TransitionEvent};
use crate::error::StepError;

/// Callback invoked once per successful transition
pub type TransitionObserver = Arc<dyn Fn(&TransitionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle state machine for one sequence.
///
/// All state changes go through [`StateMachine::transition`]. Attempts are
/// serialized by `guard`; observers are notified after the guard is released
/// but under `delivery`, which is taken before the guard is dropped, so events
/// reach observers in transition order. Waiters are woken through a
/// generation counter bumped after delivery, which unlike a momentary pulse
/// cannot be missed by a waiter that subscribed before checking the state.
pub struct StateMachine {
    current: AtomicU8,
    /// Serializes transition attempts; holds the last issued event sequence number
    guard: Mutex<u64>,
    delivery: Mutex<()>,
    observers: RwLock<Vec<TransitionObserver>>,
    generation: watch::Sender<u64>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state())
            .field("generation", &*self.generation.borrow())
            .finish()
    }
}

impl StateMachine {
    /// New machine in `Idle`, the only valid creation state
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            current: AtomicU8::new(SequenceState::Idle.ordinal()),
            guard: Mutex::new(0),
            delivery: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            generation,
        }
    }

    pub fn state(&self) -> SequenceState {
        SequenceState::from_ordinal(self.current.load(Ordering::Acquire))
            .unwrap_or(SequenceState::Halted)
    }

    /// Register a transition observer. Observers are called in registration order.
    pub fn subscribe_to_transitions<F>(&self, observer: F)
    where
        F: Fn(&TransitionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Receiver that observes a new value after every completed transition
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Number of completed transitions
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Attempt a transition to `target`.
    ///
    /// Returns `false` without changing state or notifying anyone when the
    /// edge is not in the [`TransitionTable`].
    pub async fn transition(&self, target: SequenceState, reason: Option<&str>) -> bool {
        self.apply(None, target, reason.map(str::to_string), None).await
    }

    /// Transition caused by a step fault; the error travels on the event.
    pub async fn transition_with_error(
        &self,
        target: SequenceState,
        reason: &str,
        error: StepError,
    ) -> bool {
        self.apply(None, target, Some(reason.to_string()), Some(error))
            .await
    }

    /// Like [`StateMachine::transition_with_error`], but only from `expected`.
    ///
    /// The current state is compared under the transition guard, so a
    /// transition made by another task in the meantime makes this one fail
    /// even when `current -> target` would be a legal edge.
    pub async fn transition_from(
        &self,
        expected: SequenceState,
        target: SequenceState,
        reason: &str,
        error: Option<StepError>,
    ) -> bool {
        self.apply(Some(expected), target, Some(reason.to_string()), error)
            .await
    }

    async fn apply(
        &self,
        expected: Option<SequenceState>,
        target: SequenceState,
        reason: Option<String>,
        error: Option<StepError>,
    ) -> bool {
        let mut last_sequence = self.guard.lock().await;

        let from = self.state();
        if expected.is_some_and(|expected| expected != from) {
            debug!(
                from_state = %from,
                to_state = %target,
                expected = ?expected,
                "Transition skipped, state already changed"
            );
            return false;
        }
        if !TransitionTable::allows(from, target) {
            warn!(from_state = %from, to_state = %target, "Invalid transition rejected");
            return false;
        }

        // No await between the state write and delivery: a cancelled caller
        // cannot leave a transition undelivered.
        let _delivery = self.delivery.lock().await;

        self.current.store(target.ordinal(), Ordering::Release);
        *last_sequence += 1;
        let event = TransitionEvent::new(from, target, *last_sequence, reason, error);
        drop(last_sequence);

        info!(
            from_state = %event.from_state,
            to_state = %event.to_state,
            reason = event.reason.as_deref().unwrap_or(""),
            sequence = event.sequence,
            "State transition"
        );

        self.notify_observers(&event);
        self.generation.send_modify(|generation| *generation += 1);
        true
    }

    fn notify_observers(&self, event: &TransitionEvent) {
        let observers: Vec<TransitionObserver> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            if let Err(e) = call_isolated(|| observer(event)) {
                tracing::error!(
                    from_state = %event.from_state,
                    to_state = %event.to_state,
                    error = %e,
                    "Error in transition observer"
                );
            }
        }
    }

    /// Wait until the machine is in `target`.
    ///
    /// Returns `true` immediately when already there, `false` only when
    /// `timeout` elapses first. Any number of tasks may wait concurrently.
    pub async fn wait_for_state(&self, target: SequenceState, timeout: Option<Duration>) -> bool {
        self.wait_for_any(&[target], timeout).await.is_some()
    }

    /// Wait until the machine is in any of `targets`, returning the state reached.
    pub async fn wait_for_any(
        &self,
        targets: &[SequenceState],
        timeout: Option<Duration>,
    ) -> Option<SequenceState> {
        // Subscribe before the first check so a transition in between is not lost.
        let mut changes = self.changes();
        let deadline = timeout.map(|t| Instant::now() + t);
        let reached = |state: SequenceState| targets.contains(&state).then_some(state);

        loop {
            if let Some(state) = reached(self.state()) {
                return Some(state);
            }

            let changed = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, changes.changed()).await {
                    Ok(changed) => changed,
                    Err(_) => return reached(self.state()),
                },
                None => changes.changed().await,
            };

            if changed.is_err() {
                return reached(self.state());
            }
        }
    }
}
