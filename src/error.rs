use std::time::Duration;
use thiserror::Error;

/// Fault raised by a [`StepRunner`](crate::sequence::StepRunner) while executing a step.
///
/// Any `StepError` is fatal to the run: the execution loop halts the sequence
/// and attaches the error to the resulting transition event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("step '{step}' failed: {message}")]
    Failed { step: String, message: String },
    #[error("step '{step}' exceeded its {}ms deadline", timeout.as_millis())]
    Timeout { step: String, timeout: Duration },
}

impl StepError {
    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Failed {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the registry, definition loading and configuration.
///
/// Lifecycle commands never return these: a rejected command is a plain `false`.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("sequence not found: {0}")]
    UnknownSequence(String),
    #[error("sequence already exists: {0}")]
    DuplicateSequence(String),
    #[error("invalid sequence definition: {0}")]
    Definition(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
