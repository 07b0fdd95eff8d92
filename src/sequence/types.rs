// Core types for the sequence lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StepError;

/// Lifecycle states of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SequenceState {
    /// Created or reset, nothing running
    Idle = 1,
    /// Execution task is processing steps
    Running = 2,
    /// Execution task is parked between steps
    Paused = 3,
    /// Graceful stop requested, waiting for the task to wind down
    Stopping = 4,
    /// Finished, either by completing all steps or by a graceful stop
    Stopped = 5,
    /// Forced halt requested, task being cancelled
    Halting = 6,
    /// Halted by operator or by a step fault
    Halted = 7,
}

impl SequenceState {
    pub const ALL: [SequenceState; 7] = [
        SequenceState::Idle,
        SequenceState::Running,
        SequenceState::Paused,
        SequenceState::Stopping,
        SequenceState::Stopped,
        SequenceState::Halting,
        SequenceState::Halted,
    ];

    /// Upper-case state name as reported in status queries
    pub fn name(self) -> &'static str {
        match self {
            SequenceState::Idle => "IDLE",
            SequenceState::Running => "RUNNING",
            SequenceState::Paused => "PAUSED",
            SequenceState::Stopping => "STOPPING",
            SequenceState::Stopped => "STOPPED",
            SequenceState::Halting => "HALTING",
            SequenceState::Halted => "HALTED",
        }
    }

    /// 1-based ordinal
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value).checked_sub(1)?).copied()
    }

    /// States in which the execution loop keeps processing steps
    pub fn is_active(self) -> bool {
        matches!(self, SequenceState::Running | SequenceState::Paused)
    }

    /// States from which a reset back to `Idle` is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, SequenceState::Stopped | SequenceState::Halted)
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record of one successful transition, delivered to every transition observer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub from_state: SequenceState,
    pub to_state: SequenceState,
    /// Per-machine counter, strictly increasing in transition order
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    /// Set only when the transition was caused by a step fault
    pub error: Option<StepError>,
}

impl TransitionEvent {
    pub(crate) fn new(
        from_state: SequenceState,
        to_state: SequenceState,
        sequence: u64,
        reason: Option<String>,
        error: Option<StepError>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            sequence,
            timestamp: Utc::now(),
            reason,
            error,
        }
    }
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStatus {
    pub sequence_id: String,
    pub state: String,
    pub state_value: u8,
}

impl SequenceStatus {
    pub fn new(sequence_id: impl Into<String>, state: SequenceState) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            state: state.name().to_string(),
            state_value: state.ordinal(),
        }
    }
}
