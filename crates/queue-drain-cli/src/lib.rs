//! # Queue-Drain CLI
//!
//! Command-line interface over the queue engine.
//!
//! This module provides CLI commands for:
//! - Creating queues
//! - Filling queues from arguments, files or stdin
//! - Draining queues to stdout until they are observed empty
//! - Inspecting and deleting queues
//!
//! Logs go to stderr; stdout only carries command output such as drained
//! message bodies.

use clap::{Args, CommandFactory, Parser, Subcommand};
use queue_drain::providers::AwsSqsTransport;
use queue_drain::{
    AwsSqsConfig, DrainOutcome, HandlerError, Payload, QueueConfig, QueueEngine, QueueError,
    QueueTransport, TransportError,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Drain CLI - fill and drain SQS queues
#[derive(Parser)]
#[command(name = "queue-drain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fill and drain SQS queues")]
#[command(
    long_about = "Queue-Drain creates SQS queues, fills them in batches and drains them with a long-polling consumer that stops once the queue is empty"
)]
pub struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "QUEUE_DRAIN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive; RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// AWS region
    #[arg(long, env = "AWS_REGION", global = true)]
    pub region: Option<String>,

    /// SQS endpoint override, e.g. a local emulator
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a queue (no-op if it already exists with the same attributes)
    Create {
        #[command(flatten)]
        queue: QueueArgs,

        /// Seconds a received message stays hidden
        #[arg(long)]
        visibility_timeout: Option<u32>,

        /// Seconds each receive call waits for messages
        #[arg(long)]
        long_polling_interval: Option<u32>,
    },

    /// Send messages to an existing queue
    Fill {
        #[command(flatten)]
        queue: QueueArgs,

        /// Message bodies
        messages: Vec<String>,

        /// Read one message per non-empty line from a file ('-' for stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Consume a queue until it is observed empty, printing each message
    Drain {
        #[command(flatten)]
        queue: QueueArgs,

        /// Messages requested per receive call
        #[arg(short, long)]
        batch_size: Option<u32>,

        /// Delete messages before printing them
        #[arg(long)]
        delete_immediately: bool,

        /// Seconds each receive call waits for messages
        #[arg(long)]
        long_polling_interval: Option<u32>,

        /// Output format. Text prints one body per line, so a multi-line body
        /// looks like several messages; use json for those
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the approximate message count and ARN of a queue
    Stats {
        #[command(flatten)]
        queue: QueueArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a queue and all its messages
    Delete {
        #[command(flatten)]
        queue: QueueArgs,
    },

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Queue selection shared by the queue commands
#[derive(Args, Debug, Clone, Default)]
pub struct QueueArgs {
    /// Queue name; overrides the configured one
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Use a FIFO queue (the `.fifo` suffix is added when missing)
    #[arg(long)]
    pub fifo: bool,
}

impl QueueArgs {
    fn apply(&self, config: &mut QueueConfig) {
        if let Some(name) = &self.queue {
            config.queue_name = name.clone();
        }
        if self.fifo {
            config.fifo = true;
        }
    }
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output, one document per line
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Resolved CLI configuration
///
/// Layered from built-in defaults, an optional TOML file and `QUEUE_DRAIN__`
/// environment variables, e.g. `QUEUE_DRAIN__QUEUE__BATCH_SIZE=5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct CliConfig {
    pub aws: AwsSqsConfig,
    pub queue: QueueConfig,
}

impl CliConfig {
    /// Apply the global command-line overrides
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(region) = &cli.region {
            self.aws.region = region.clone();
        }
        if let Some(endpoint) = &cli.endpoint {
            self.aws.endpoint = Some(endpoint.clone());
        }
        self
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "<redacted>".to_string());
        let mut copy = self.clone();
        copy.aws.secret_access_key = mask(&self.aws.secret_access_key);
        copy.aws.session_token = mask(&self.aws.session_token);
        copy
    }
}

/// Load configuration from an optional file and the environment
pub fn load_configuration(config_path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        builder = builder.add_source(
            config::File::from(path)
                .required(true)
                .format(config::FileFormat::Toml),
        );
        info!(path = %path.display(), "Loading configuration file");
    }

    let settings = builder
        .add_source(config::Environment::with_prefix("QUEUE_DRAIN").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

// ============================================================================
// Output
// ============================================================================

/// Destination for command output, shared with the drain handler
pub type SharedOutput = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_output() -> SharedOutput {
    Arc::new(Mutex::new(std::io::stdout()))
}

fn write_line(output: &SharedOutput, line: &str) -> std::io::Result<()> {
    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{}", line)?;
    out.flush()
}

fn write_payload(
    output: &SharedOutput,
    payload: Payload,
    format: OutputFormat,
) -> Result<(), HandlerError> {
    match format {
        OutputFormat::Json => write_line(output, &serde_json::to_string(&payload)?)?,
        OutputFormat::Text => {
            for body in payload.into_bodies() {
                write_line(output, &body)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        return execute_completions_command(*shell);
    }

    initialize_logging(&cli.log_level, cli.json_logs)?;

    let config = load_configuration(cli.config.as_deref())?.with_overrides(&cli);
    let transport: Arc<dyn QueueTransport> = Arc::new(AwsSqsTransport::new(config.aws.clone())?);

    execute_command(
        cli.command,
        &config,
        transport,
        stdout_output(),
        shutdown_signal(),
    )
    .await
}

/// Initialize logging to stderr
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
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

    result.map_err(|e| CliError::CommandFailed {
        message: format!("Failed to initialize logging: {}", e),
    })
}

/// Raise the returned flag on Ctrl+C or SIGTERM
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C signal handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping after the current iteration");
            },
            _ = terminate => {
                info!("Received SIGTERM, stopping after the current iteration");
            },
        }

        let _ = tx.send(true);
    });

    rx
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Run one command against the given transport
pub async fn execute_command(
    command: Commands,
    config: &CliConfig,
    transport: Arc<dyn QueueTransport>,
    output: SharedOutput,
    shutdown: watch::Receiver<bool>,
) -> Result<(), CliError> {
    match command {
        Commands::Create {
            queue,
            visibility_timeout,
            long_polling_interval,
        } => {
            let mut queue_config = resolve_queue_config(config, &queue)?;
            if let Some(seconds) = visibility_timeout {
                queue_config.visibility_timeout = seconds;
            }
            if let Some(seconds) = long_polling_interval {
                queue_config.long_polling_interval = seconds;
            }
            execute_create_command(queue_config, transport, &output).await
        }
        Commands::Fill {
            queue,
            messages,
            file,
        } => {
            let queue_config = resolve_queue_config(config, &queue)?;
            let mut messages = messages;
            if let Some(path) = file {
                messages.extend(read_messages(&path)?);
            }
            execute_fill_command(queue_config, transport, messages, &output).await
        }
        Commands::Drain {
            queue,
            batch_size,
            delete_immediately,
            long_polling_interval,
            format,
        } => {
            let mut queue_config = resolve_queue_config(config, &queue)?;
            if let Some(size) = batch_size {
                queue_config.batch_size = size;
            }
            if delete_immediately {
                queue_config.delete_immediately = true;
            }
            if let Some(seconds) = long_polling_interval {
                queue_config.long_polling_interval = seconds;
            }
            execute_drain_command(queue_config, transport, output, format, shutdown).await
        }
        Commands::Stats { queue, format } => {
            let queue_config = resolve_queue_config(config, &queue)?;
            execute_stats_command(queue_config, transport, format, &output).await
        }
        Commands::Delete { queue } => {
            let queue_config = resolve_queue_config(config, &queue)?;
            execute_delete_command(queue_config, transport).await
        }
        Commands::Config { format } => execute_config_command(config, format, &output),
        Commands::Completions { shell } => execute_completions_command(shell),
    }
}

/// Merge the configured queue options with the command-line selection
fn resolve_queue_config(config: &CliConfig, args: &QueueArgs) -> Result<QueueConfig, CliError> {
    let mut queue_config = config.queue.clone();
    args.apply(&mut queue_config);

    if queue_config.queue_name.is_empty() {
        return Err(ConfigError::MissingRequired {
            key: "queue.queue_name (or --queue)".to_string(),
        }
        .into());
    }
    Ok(queue_config)
}

/// Messages from a file or stdin, one per non-empty line
fn read_messages(path: &Path) -> Result<Vec<String>, CliError> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path).map_err(|e| CliError::InvalidArgument {
            arg: "file".to_string(),
            message: format!("{}: {}", path.display(), e),
        })?
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Build an engine attached to an existing queue
async fn connected_engine(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
) -> Result<QueueEngine, CliError> {
    let mut engine = QueueEngine::new(queue_config, transport)?;
    engine.connect().await?;
    Ok(engine)
}

async fn execute_create_command(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    output: &SharedOutput,
) -> Result<(), CliError> {
    let mut engine = QueueEngine::new(queue_config, transport)?;
    engine.create().await?;

    let queue_url = engine.queue_url().unwrap_or_default();
    write_line(output, queue_url)?;
    Ok(())
}

async fn execute_fill_command(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    messages: Vec<String>,
    output: &SharedOutput,
) -> Result<(), CliError> {
    if messages.is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "messages".to_string(),
            message: "no messages given; pass bodies or --file".to_string(),
        });
    }

    let engine = connected_engine(queue_config, transport).await?;
    let sent = engine.fill(messages).await?;

    write_line(output, &format!("Enqueued {} messages", sent))?;
    Ok(())
}

async fn execute_drain_command(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    output: SharedOutput,
    format: OutputFormat,
    shutdown: watch::Receiver<bool>,
) -> Result<(), CliError> {
    let sink = Arc::clone(&output);
    let engine = connected_engine(queue_config, transport)
        .await?
        .with_handler(queue_drain::handler::handler_fn(move |payload: Payload| {
            let sink = Arc::clone(&sink);
            async move { write_payload(&sink, payload, format) }
        }));

    let summary = engine.process_until(shutdown).await?;

    info!(
        iterations = summary.iterations,
        messages = summary.messages_processed,
        outcome = ?summary.outcome,
        "Drain finished"
    );
    if summary.outcome == DrainOutcome::Cancelled {
        warn!("Drain was interrupted before the queue emptied");
    }
    Ok(())
}

async fn execute_stats_command(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
    format: OutputFormat,
    output: &SharedOutput,
) -> Result<(), CliError> {
    let engine = connected_engine(queue_config, transport).await?;
    let stats = engine.get_stats().await?;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(&stats).map_err(|e| {
            CliError::CommandFailed {
                message: format!("Failed to render stats: {}", e),
            }
        })?,
        OutputFormat::Text => format!(
            "queue: {}\nmessages: {}\narn: {}",
            engine.queue_name(),
            stats.message_count,
            stats.queue_arn
        ),
    };
    write_line(output, &rendered)?;
    Ok(())
}

async fn execute_delete_command(
    queue_config: QueueConfig,
    transport: Arc<dyn QueueTransport>,
) -> Result<(), CliError> {
    let engine = connected_engine(queue_config, transport).await?;
    engine.delete().await?;
    Ok(())
}

fn execute_config_command(
    config: &CliConfig,
    format: ConfigFormat,
    output: &SharedOutput,
) -> Result<(), CliError> {
    let shown = config.redacted();
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(&shown).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(&shown).map_err(|e| e.to_string()),
    }
    .map_err(|message| CliError::CommandFailed {
        message: format!("Failed to render configuration: {}", message),
    })?;

    write_line(output, rendered.trim_end())?;
    Ok(())
}

/// Execute completions command
fn execute_completions_command(shell: clap_complete::Shell) -> Result<(), CliError> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "queue-drain", &mut std::io::stdout());
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
