// Sequencer Library - lifecycle control for step sequences
// This exposes the core components for embedding and testing

pub mod config;
pub mod error;
pub mod registry;
pub mod sequence;
pub mod telemetry;

// Re-export key types for easy access
pub use crate::config::{EngineConfig, ObservabilityConfig, SequencerConfig};
pub use error::{SequencerError, StepError};
pub use registry::SequenceRegistry;
pub use sequence::{
    DelayStepRunner, EventBus, FnStepRunner, LoggingSubscriber, SequenceDefinition,
    SequenceEngine, SequenceEvent, SequenceState, SequenceStatus, StateMachine, StepDescriptor,
    StepRunner, TransitionEvent, TransitionTable,
};
pub use telemetry::{create_sequence_span, generate_correlation_id, init_telemetry};
