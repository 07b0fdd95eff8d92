//! Id-addressed collection of sequence engines.
//!
//! Every command looks up the engine, clones its `Arc` and releases the map
//! lock before awaiting, so a long stop on one sequence never blocks commands
//! on another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::SequencerError;
use crate::sequence::{
    DelayStepRunner, LoggingSubscriber, SequenceDefinition, SequenceEngine, SequenceEvent,
    SequenceStatus, StepRunner,
};

pub struct SequenceRegistry {
    sequences: RwLock<HashMap<String, Arc<SequenceEngine>>>,
    runner: Arc<dyn StepRunner>,
    config: EngineConfig,
}

impl Default for SequenceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DelayStepRunner::default()), EngineConfig::default())
    }
}

impl SequenceRegistry {
    /// `runner` is shared by every sequence created without its own runner
    pub fn new(runner: Arc<dyn StepRunner>, config: EngineConfig) -> Self {
        Self {
            sequences: RwLock::new(HashMap::new()),
            runner,
            config,
        }
    }

    /// Create an `Idle` sequence, generating an id when none is given
    pub async fn create_sequence(
        &self,
        sequence_id: Option<String>,
    ) -> Result<String, SequencerError> {
        let runner = Arc::clone(&self.runner);
        self.create_sequence_with_runner(sequence_id, runner).await
    }

    pub async fn create_sequence_with_runner(
        &self,
        sequence_id: Option<String>,
        runner: Arc<dyn StepRunner>,
    ) -> Result<String, SequencerError> {
        let sequence_id = sequence_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut sequences = self.sequences.write().await;
        if sequences.contains_key(&sequence_id) {
            return Err(SequencerError::DuplicateSequence(sequence_id));
        }

        let engine = SequenceEngine::new(Some(sequence_id.clone()), runner, self.config.clone());
        LoggingSubscriber::new(sequence_id.clone()).attach(engine.event_bus());
        sequences.insert(sequence_id.clone(), Arc::new(engine));

        info!(sequence_id = %sequence_id, "Created sequence");
        Ok(sequence_id)
    }

    pub async fn get_sequence(&self, sequence_id: &str) -> Option<Arc<SequenceEngine>> {
        self.sequences.read().await.get(sequence_id).cloned()
    }

    async fn lookup(&self, sequence_id: &str, command: &str) -> Option<Arc<SequenceEngine>> {
        let engine = self.get_sequence(sequence_id).await;
        if engine.is_none() {
            error!(sequence_id, command, "Sequence not found");
        }
        engine
    }

    pub async fn start_sequence(&self, sequence_id: &str, definition: SequenceDefinition) -> bool {
        match self.lookup(sequence_id, "start").await {
            Some(engine) => engine.start(definition).await,
            None => false,
        }
    }

    pub async fn pause_sequence(&self, sequence_id: &str) -> bool {
        match self.lookup(sequence_id, "pause").await {
            Some(engine) => engine.pause().await,
            None => false,
        }
    }

    pub async fn resume_sequence(&self, sequence_id: &str) -> bool {
        match self.lookup(sequence_id, "resume").await {
            Some(engine) => engine.resume().await,
            None => false,
        }
    }

    pub async fn stop_sequence(&self, sequence_id: &str) -> bool {
        match self.lookup(sequence_id, "stop").await {
            Some(engine) => engine.stop().await,
            None => false,
        }
    }

    pub async fn halt_sequence(&self, sequence_id: &str) -> bool {
        match self.lookup(sequence_id, "halt").await {
            Some(engine) => engine.halt().await,
            None => false,
        }
    }

    pub async fn reset_sequence(&self, sequence_id: &str) -> bool {
        match self.lookup(sequence_id, "reset").await {
            Some(engine) => engine.reset().await,
            None => false,
        }
    }

    pub async fn get_status(&self, sequence_id: &str) -> Option<SequenceStatus> {
        self.get_sequence(sequence_id)
            .await
            .map(|engine| engine.status())
    }

    /// Register `callback` for `event_type` on one sequence; `false` if the id is unknown
    pub async fn subscribe<F>(&self, sequence_id: &str, event_type: &str, callback: F) -> bool
    where
        F: Fn(&SequenceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.lookup(sequence_id, "subscribe").await {
            Some(engine) => {
                engine.subscribe(event_type, callback);
                true
            }
            None => false,
        }
    }

    /// Discard a sequence, halting it first if its execution task is still alive
    pub async fn remove_sequence(&self, sequence_id: &str) -> bool {
        let Some(engine) = self.sequences.write().await.remove(sequence_id) else {
            error!(sequence_id, command = "remove", "Sequence not found");
            return false;
        };

        if engine.has_active_task().await {
            engine.halt().await;
        }
        info!(sequence_id, "Removed sequence");
        true
    }

    pub async fn sequence_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sequences.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
