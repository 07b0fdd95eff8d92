use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr so
/// stdout stays free for event output.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::debug!(json = config.json_logs, "Sequencer telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span for one lifecycle operation on a sequence
pub fn create_sequence_span(operation: &str, sequence_id: &str) -> tracing::Span {
    tracing::info_span!(
        "sequence",
        operation = operation,
        sequence.id = sequence_id,
        correlation.id = %generate_correlation_id(),
    )
}
