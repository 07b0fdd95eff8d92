// Validated sequence definitions handed to the engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::SequencerError;

/// One step of a sequence. Fields other than `name` are opaque to the
/// engine and passed through to the step runner untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl StepDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Step name, falling back to `step_{index}` for unnamed steps
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("step_{index}"))
    }
}

/// Ordered list of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

impl SequenceDefinition {
    pub fn new(steps: Vec<StepDescriptor>) -> Self {
        Self { steps }
    }

    pub fn from_json(text: &str) -> Result<Self, SequencerError> {
        serde_json::from_str(text).map_err(|e| SequencerError::Definition(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, SequencerError> {
        toml::from_str(text).map_err(|e| SequencerError::Definition(e.to_string()))
    }

    /// Load a definition file, choosing the format by extension (`.json` or `.toml`)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SequencerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("toml") => Self::from_toml(&text),
            other => Err(SequencerError::Definition(format!(
                "unsupported definition format {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
