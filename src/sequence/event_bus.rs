//! Per-sequence publish/subscribe of lifecycle and step events.
//!
//! Each engine owns one [`EventBus`]. Subscribers register under an event-type
//! name and are invoked in registration order. A subscriber that returns an
//! error or panics is logged and skipped; the publisher and the remaining
//! subscribers are unaffected.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::types::SequenceState;

pub const STATE_CHANGED: &str = "state_changed";
pub const STEP_STARTED: &str = "step_started";
pub const STEP_COMPLETED: &str = "step_completed";
pub const STEP_FAILED: &str = "step_failed";

/// Event types published by an engine
pub const EVENT_TYPES: [&str; 4] = [STATE_CHANGED, STEP_STARTED, STEP_COMPLETED, STEP_FAILED];

/// Events published on a sequence's bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SequenceEvent {
    StateChanged {
        from_state: SequenceState,
        to_state: SequenceState,
        reason: Option<String>,
    },
    StepStarted {
        step_index: usize,
        step_name: String,
    },
    StepCompleted {
        step_index: usize,
        step_name: String,
    },
    StepFailed {
        step_index: usize,
        step_name: String,
        error: String,
    },
}

impl SequenceEvent {
    /// Name subscribers register under to receive this event
    pub fn event_type(&self) -> &'static str {
        match self {
            SequenceEvent::StateChanged { .. } => STATE_CHANGED,
            SequenceEvent::StepStarted { .. } => STEP_STARTED,
            SequenceEvent::StepCompleted { .. } => STEP_COMPLETED,
            SequenceEvent::StepFailed { .. } => STEP_FAILED,
        }
    }
}

pub type EventSubscriber = Arc<dyn Fn(&SequenceEvent) -> anyhow::Result<()> + Send + Sync>;

/// Instance-scoped table of event type -> ordered subscriber list
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<EventSubscriber>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = subscribers
            .iter()
            .map(|(event_type, list)| (event_type.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&SequenceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Deliver `event` to every subscriber of its event type.
    /// Publishing with no subscribers is a no-op.
    pub fn publish(&self, event: &SequenceEvent) {
        let event_type = event.event_type();
        let subscribers = match self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
        {
            Some(list) => list.clone(),
            None => return,
        };

        for subscriber in subscribers {
            if let Err(e) = call_isolated(|| subscriber(event)) {
                error!(event_type, error = %e, "Error in event callback");
            }
        }
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

/// Run a callback, converting both returned errors and panics into a message.
pub(crate) fn call_isolated<F>(callback: F) -> Result<(), String>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => format!("callback panicked: {message}"),
        None => "callback panicked".to_string(),
    }
}

/// Default subscriber that mirrors every event into the log
#[derive(Debug, Clone)]
pub struct LoggingSubscriber {
    sequence_id: String,
}

impl LoggingSubscriber {
    pub fn new(sequence_id: impl Into<String>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
        }
    }

    /// Subscribe this logger to every event type on `bus`
    pub fn attach(self, bus: &EventBus) {
        for event_type in EVENT_TYPES {
            let logger = self.clone();
            bus.subscribe(event_type, move |event| {
                logger.handle_event(event);
                Ok(())
            });
        }
    }

    pub fn handle_event(&self, event: &SequenceEvent) {
        match event {
            SequenceEvent::StateChanged {
                from_state,
                to_state,
                reason,
            } => {
                info!(
                    sequence_id = %self.sequence_id,
                    from_state = %from_state,
                    to_state = %to_state,
                    reason = reason.as_deref().unwrap_or(""),
                    "Sequence state changed"
                );
            }
            SequenceEvent::StepStarted {
                step_index,
                step_name,
            } => {
                debug!(
                    sequence_id = %self.sequence_id,
                    step_index,
                    step_name = %step_name,
                    "Step started"
                );
            }
            SequenceEvent::StepCompleted {
                step_index,
                step_name,
            } => {
                debug!(
                    sequence_id = %self.sequence_id,
                    step_index,
                    step_name = %step_name,
                    "Step completed"
                );
            }
            SequenceEvent::StepFailed {
                step_index,
                step_name,
                error,
            } => {
                warn!(
                    sequence_id = %self.sequence_id,
                    step_index,
                    step_name = %step_name,
                    error = %error,
                    "Step failed"
                );
            }
        }
    }
}
