// Step execution capability - the work a step performs is supplied by the caller

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::definition::StepDescriptor;
use crate::error::StepError;

/// Performs the actual work of one step.
///
/// The engine treats the runner as a black box: `Ok(())` means the step is
/// done, any `Err` halts the sequence. Implementations must tolerate being
/// dropped at any `.await` point, which is how a halt cancels a running step.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step_index: usize, step: &StepDescriptor) -> Result<(), StepError>;
}

/// Simulated runner that sleeps for a fixed duration per step.
///
/// A numeric `delay_ms` field on the step overrides the default delay.
#[derive(Debug, Clone)]
pub struct DelayStepRunner {
    delay: Duration,
}

impl Default for DelayStepRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl DelayStepRunner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn delay_for(&self, step: &StepDescriptor) -> Duration {
        step.params
            .get("delay_ms")
            .and_then(|v| v.as_u64())
            .map_or(self.delay, Duration::from_millis)
    }
}

#[async_trait]
impl StepRunner for DelayStepRunner {
    async fn run_step(&self, step_index: usize, step: &StepDescriptor) -> Result<(), StepError> {
        let delay = self.delay_for(step);
        debug!(
            step_index,
            step_name = %step.display_name(step_index),
            delay_ms = delay.as_millis() as u64,
            "Simulating step"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Adapts an async closure into a [`StepRunner`]
pub struct FnStepRunner<F> {
    run: F,
}

impl<F> FnStepRunner<F> {
    pub fn new(run: F) -> Self {
        Self { run }
    }
}

#[async_trait]
impl<F, Fut> StepRunner for FnStepRunner<F>
where
    F: Fn(usize, StepDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn run_step(&self, step_index: usize, step: &StepDescriptor) -> Result<(), StepError> {
        (self.run)(step_index, step.clone()).await
    }
}
