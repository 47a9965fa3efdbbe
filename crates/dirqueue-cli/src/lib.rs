//! # Dirqueue CLI
//!
//! Command-line access to dirqueue queues.
//!
//! This module provides CLI commands for:
//! - Pushing messages
//! - Consuming (pull, print, delete) messages
//! - Changing a queue's visibility timeout
//! - Inspecting a file-backed queue
//!
//! The CLI never closes queues: closing discards the backing store, which
//! would destroy messages other processes are still using.

use chrono::Duration;
use clap::{Parser, Subcommand};
use dirqueue::{
    ConfigurationError, FileQueue, FileQueueConfig, MessageQueue, ProviderConfig, QueueError,
    QueueName, QueueRegistry, RuntimeConfig, ValidationError,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// dirqueue - filesystem-coordinated message queues
#[derive(Parser, Debug)]
#[command(name = "dirqueue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Push and consume messages on dirqueue queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DIRQUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use the file provider rooted at this directory
    #[arg(short, long, env = "DIRQUEUE_ROOT")]
    pub root: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push messages and print their handles
    Push {
        /// Queue name
        queue: String,

        /// Message bodies, one message each
        #[arg(required = true)]
        bodies: Vec<String>,
    },

    /// Pull, print and delete messages until the queue is empty
    Consume {
        /// Queue name
        queue: String,

        /// Stop after this many messages
        #[arg(short, long)]
        max: Option<usize>,
    },

    /// Change the visibility timeout of a queue
    SetTimeout {
        /// Queue name
        queue: String,

        /// Timeout in whole seconds
        #[arg(allow_negative_numbers = true)]
        seconds: i64,
    },

    /// Show the state of a file-backed queue
    Status {
        /// Queue name
        queue: String,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

impl From<QueueError> for CliError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::ConfigurationError(e) => Self::Configuration(e),
            QueueError::ValidationError(e) => e.into(),
            other => Self::Queue(other),
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(err: ValidationError) -> Self {
        let arg = match &err {
            ValidationError::Required { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::OutOfRange { field, .. } => field.clone(),
        };
        Self::InvalidArgument {
            arg,
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            return Err(CliError::InvalidArgument {
                arg: "command line".to_string(),
                message: e.to_string(),
            })
        }
        // --help and --version
        Err(e) => e.exit(),
    };

    initialize_logging(&cli)?;

    let mut stdout = std::io::stdout();
    execute(cli, &mut stdout).await
}

/// Run a parsed command, writing its output to `out`
pub async fn execute<W: Write>(cli: Cli, out: &mut W) -> Result<(), CliError> {
    let config = load_configuration(&cli)?;

    match cli.command {
        Commands::Push { queue, bodies } => execute_push_command(&config, &queue, &bodies, out).await,
        Commands::Consume { queue, max } => execute_consume_command(&config, &queue, max, out).await,
        Commands::SetTimeout { queue, seconds } => {
            execute_set_timeout_command(&config, &queue, seconds).await
        }
        Commands::Status { queue } => execute_status_command(&config, &queue, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// `RUST_LOG`, when set, overrides `--log-level`.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dirqueue={level},dirqueue_cli={level}",
            level = cli.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })
}

/// Load configuration from the file and environment, then apply `--root`
pub fn load_configuration(cli: &Cli) -> Result<RuntimeConfig, CliError> {
    let mut config = RuntimeConfig::load(cli.config.as_deref())?;

    if let Some(root) = &cli.root {
        config.provider = match config.provider {
            ProviderConfig::File(file) => ProviderConfig::File(FileQueueConfig {
                root_dir: root.clone(),
                ..file
            }),
            _ => ProviderConfig::File(FileQueueConfig::new(root)),
        };
    }

    debug!(provider = ?config.provider.provider_type(), "Configuration loaded");
    Ok(config)
}

async fn open_queue(
    config: &RuntimeConfig,
    queue: &str,
) -> Result<Arc<dyn MessageQueue>, CliError> {
    let name = QueueName::new(queue.to_string())?;
    let registry = QueueRegistry::from_config(&config.provider);
    Ok(registry.get_queue(&name).await?)
}

/// Execute push command
async fn execute_push_command<W: Write>(
    config: &RuntimeConfig,
    queue: &str,
    bodies: &[String],
    out: &mut W,
) -> Result<(), CliError> {
    let queue = open_queue(config, queue).await?;

    for body in bodies {
        let handle = queue.push(body).await?;
        writeln!(out, "{}", handle)?;
    }

    info!(queue = %queue.queue_name(), count = bodies.len(), "Messages pushed");
    Ok(())
}

/// Execute consume command
async fn execute_consume_command<W: Write>(
    config: &RuntimeConfig,
    queue: &str,
    max: Option<usize>,
    out: &mut W,
) -> Result<(), CliError> {
    let queue = open_queue(config, queue).await?;

    let mut consumed = 0;
    while max.map_or(true, |max| consumed < max) {
        let Some(message) = queue.pull().await? else {
            break;
        };

        writeln!(out, "{}\t{}", message.handle, message.body)?;
        queue.delete(&message.handle).await?;
        consumed += 1;
    }

    info!(queue = %queue.queue_name(), consumed, "Messages consumed");
    Ok(())
}

/// Execute set-timeout command
async fn execute_set_timeout_command(
    config: &RuntimeConfig,
    queue: &str,
    seconds: i64,
) -> Result<(), CliError> {
    let timeout = Duration::try_seconds(seconds).ok_or_else(|| CliError::InvalidArgument {
        arg: "seconds".to_string(),
        message: format!("{} seconds is out of range", seconds),
    })?;

    let queue = open_queue(config, queue).await?;
    queue.set_visibility_timeout(timeout).await?;

    info!(queue = %queue.queue_name(), seconds, "Visibility timeout set");
    Ok(())
}

/// Execute status command
async fn execute_status_command<W: Write>(
    config: &RuntimeConfig,
    queue: &str,
    out: &mut W,
) -> Result<(), CliError> {
    let ProviderConfig::File(file_config) = &config.provider else {
        return Err(CliError::InvalidArgument {
            arg: "status".to_string(),
            message: "status is only available for the file provider".to_string(),
        });
    };

    let name = QueueName::new(queue.to_string())?;
    let queue = FileQueue::open(name, file_config).await?;

    writeln!(out, "queue: {}", queue.queue_name())?;
    writeln!(out, "directory: {}", queue.directory().display())?;
    writeln!(out, "available: {}", queue.available().await?)?;
    writeln!(
        out,
        "visibility_timeout_secs: {}",
        queue.visibility_timeout().num_seconds()
    )?;
    writeln!(out, "instance_id: {}", queue.instance_id())?;

    Ok(())
}
