use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use sequencer::{
    init_telemetry, DelayStepRunner, SequenceDefinition, SequenceEngine, SequenceEvent,
    SequencerConfig,
};
use sequencer::sequence::EVENT_TYPES;

#[derive(Parser)]
#[command(name = "sequencer")]
#[command(about = "Run step sequences under a start/pause/resume/stop/halt lifecycle")]
#[command(long_about = "Sequencer drives an ordered list of steps through a validated lifecycle \
                       state machine. Use 'sequencer run' to execute a definition file with \
                       simulated steps and watch every lifecycle event.")]
struct Cli {
    /// Configuration file (defaults to sequencer.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a sequence definition with simulated steps
    Run {
        /// Sequence definition file (.json or .toml)
        file: PathBuf,
        /// Simulated duration of each step
        #[arg(long, default_value = "100", help = "Milliseconds each simulated step takes")]
        step_delay_ms: u64,
        /// Pause once this step index has completed
        #[arg(long, help = "Pause after the step with this index completes")]
        pause_after_step: Option<usize>,
        /// How long to stay paused
        #[arg(long, default_value = "500", requires = "pause_after_step")]
        resume_after_ms: u64,
        /// Request a graceful stop after this many milliseconds
        #[arg(long, conflicts_with = "halt_after_ms")]
        stop_after_ms: Option<u64>,
        /// Force a halt after this many milliseconds
        #[arg(long)]
        halt_after_ms: Option<u64>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Check that a definition file parses and list its steps
    Validate {
        /// Sequence definition file (.json or .toml)
        file: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

struct RunOptions {
    step_delay: Duration,
    pause_after_step: Option<usize>,
    resume_after: Duration,
    stop_after: Option<Duration>,
    halt_after: Option<Duration>,
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    SequencerConfig::load_env_file()?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            step_delay_ms,
            pause_after_step,
            resume_after_ms,
            stop_after_ms,
            halt_after_ms,
            json,
        } => {
            init_telemetry(&config.observability)?;
            let options = RunOptions {
                step_delay: Duration::from_millis(step_delay_ms),
                pause_after_step,
                resume_after: Duration::from_millis(resume_after_ms),
                stop_after: stop_after_ms.map(Duration::from_millis),
                halt_after: halt_after_ms.map(Duration::from_millis),
                json,
            };
            tokio::runtime::Runtime::new()?.block_on(async {
                run_command(&file, config, options).await
            })
        }
        Commands::Validate { file } => validate_command(&file),
        Commands::Config => config_command(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<SequencerConfig> {
    match path {
        Some(path) => SequencerConfig::load_from(Some(path))
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => SequencerConfig::load().context("Failed to load configuration"),
    }
}

fn load_definition(file: &Path) -> Result<SequenceDefinition> {
    SequenceDefinition::from_path(file)
        .with_context(|| format!("Failed to load sequence definition {}", file.display()))
}

async fn run_command(file: &Path, config: SequencerConfig, options: RunOptions) -> Result<()> {
    let definition = load_definition(file)?;
    let runner = Arc::new(DelayStepRunner::new(options.step_delay));
    let engine = Arc::new(SequenceEngine::new(None, runner, config.engine));

    // Completed step indexes only matter when a pause is scheduled
    let (completed_tx, completed_rx) = match options.pause_after_step {
        Some(_) => {
            let (tx, rx) = mpsc::unbounded_channel::<usize>();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    for event_type in EVENT_TYPES {
        let json = options.json;
        let completed_tx = completed_tx.clone();
        engine.subscribe(event_type, move |event| {
            print_event(event, json)?;
            if let (Some(tx), SequenceEvent::StepCompleted { step_index, .. }) =
                (&completed_tx, event)
            {
                let _ = tx.send(*step_index);
            }
            Ok(())
        });
    }
    drop(completed_tx);

    let mut controls = Vec::new();

    if let (Some(pause_after), Some(mut completed_rx)) = (options.pause_after_step, completed_rx) {
        let engine = Arc::clone(&engine);
        let resume_after = options.resume_after;
        controls.push(tokio::spawn(async move {
            while let Some(step_index) = completed_rx.recv().await {
                if step_index == pause_after {
                    if engine.pause().await {
                        tokio::time::sleep(resume_after).await;
                        engine.resume().await;
                    }
                    break;
                }
            }
        }));
    }

    if let Some(delay) = options.stop_after {
        let engine = Arc::clone(&engine);
        controls.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.stop().await;
        }));
    }

    if let Some(delay) = options.halt_after {
        let engine = Arc::clone(&engine);
        controls.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.halt().await;
        }));
    }

    if !engine.start(definition).await {
        anyhow::bail!("Sequence {} could not be started", engine.sequence_id());
    }

    let final_state = engine.wait_until_finished(None).await;
    for control in controls {
        control.abort();
    }
    tracing::info!(
        sequence_id = %engine.sequence_id(),
        state = ?final_state,
        "Sequence finished"
    );

    let status = engine.status();
    if options.json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!("Final state: {} ({})", status.state, status.state_value);
    }
    Ok(())
}

fn print_event(event: &SequenceEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        SequenceEvent::StateChanged {
            from_state,
            to_state,
            reason,
        } => match reason {
            Some(reason) => println!("{from_state} -> {to_state} ({reason})"),
            None => println!("{from_state} -> {to_state}"),
        },
        SequenceEvent::StepStarted {
            step_index,
            step_name,
        } => println!("  step {step_index} '{step_name}' started"),
        SequenceEvent::StepCompleted {
            step_index,
            step_name,
        } => println!("  step {step_index} '{step_name}' completed"),
        SequenceEvent::StepFailed {
            step_index,
            step_name,
            error,
        } => println!("  step {step_index} '{step_name}' failed: {error}"),
    }
    Ok(())
}

fn validate_command(file: &Path) -> Result<()> {
    let definition = load_definition(file)?;
    println!(
        "{} is valid: {} step(s)",
        file.display(),
        definition.len()
    );
    for (index, step) in definition.steps.iter().enumerate() {
        println!("  {index}: {}", step.display_name(index));
    }
    Ok(())
}

fn config_command(config: &SequencerConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
