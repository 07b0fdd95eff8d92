// Sequence lifecycle: states, transition rules, event fan-out and execution

pub mod definition;
pub mod engine;
pub mod event_bus;
pub mod runner;
pub mod state_machine;
pub mod transitions;
pub mod types;

pub use definition::{SequenceDefinition, StepDescriptor};
pub use engine::SequenceEngine;
pub use event_bus::{
    EventBus, EventSubscriber, LoggingSubscriber, SequenceEvent, EVENT_TYPES, STATE_CHANGED,
    STEP_COMPLETED, STEP_FAILED, STEP_STARTED,
};
pub use runner::{DelayStepRunner, FnStepRunner, StepRunner};
#[cfg(feature = "testing")]
pub use runner::MockStepRunner;
pub use state_machine::{StateMachine, TransitionObserver};
pub use transitions::TransitionTable;
pub use types::{SequenceState, SequenceStatus, TransitionEvent};
