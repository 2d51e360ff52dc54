use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use queuectl_infra::{ExecutorMode, PoolOptions, Queue, ShutdownSignal};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "queuectl", version, about = "File-backed job queue with retrying workers")]
struct Cli {
    /// Directory holding the queue, config and signal files
    #[arg(long, global = true, env = "QUEUECTL_HOME", default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a job to the queue
    Enqueue {
        /// Job as a JSON object; read from stdin when omitted
        #[arg(long)]
        json: Option<String>,
    },

    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },

    /// Show a summary of job states and worker activity
    Status,

    /// List jobs by state
    List {
        /// pending, processed or failed
        #[arg(long)]
        state: String,
    },

    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Run workers in the foreground until stopped
    Start(StartArgs),
    /// Ask running workers to stop
    Stop,
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Number of workers
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Simulate jobs instead of running their commands
    #[arg(long)]
    simulate: bool,

    /// Idle poll interval in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// One backoff time unit in milliseconds
    #[arg(long, default_value_t = 1000)]
    backoff_unit_ms: u64,
}

impl StartArgs {
    fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            executor: if self.simulate {
                ExecutorMode::Simulated
            } else {
                ExecutorMode::Shell
            },
            ..PoolOptions::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// List dead-lettered jobs
    List,
    /// Move a dead-lettered job back to pending
    Retry { job_id: String },
    /// Permanently delete a dead-lettered job
    Discard { job_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the current configuration
    Show,
    /// Print one value
    Get { key: String },
    /// Update one value
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    queuectl_observability::init();
    let cli = Cli::parse();

    let queue = Queue::open(&cli.data_dir)
        .with_context(|| format!("failed to open queue in {}", cli.data_dir.display()))?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Enqueue { json } => {
            let input = match json {
                Some(json) => json,
                None => read_stdin()?,
            };
            commands::enqueue(&queue, &input, &mut out)
        }
        Command::Worker { command } => match command {
            WorkerCommand::Start(args) => {
                let pool = queue.pool(args.pool_options());
                setup_ctrlc_handler(pool.signal().clone())?;
                commands::worker_start(&pool, args.count, &mut out)
            }
            WorkerCommand::Stop => commands::worker_stop(&queue, &mut out),
        },
        Command::Status => commands::status(&queue, &mut out),
        Command::List { state } => commands::list(&queue, &state, &mut out),
        Command::Dlq { command } => match command {
            DlqCommand::List => commands::dlq_list(&queue, &mut out),
            DlqCommand::Retry { job_id } => commands::dlq_retry(&queue, &job_id, &mut out),
            DlqCommand::Discard { job_id } => commands::dlq_discard(&queue, &job_id, &mut out),
        },
        Command::Config { command } => match command {
            ConfigCommand::Show => commands::config_show(&queue, &mut out),
            ConfigCommand::Get { key } => commands::config_get(&queue, &key, &mut out),
            ConfigCommand::Set { key, value } => {
                commands::config_set(&queue, &key, &value, &mut out)
            }
        },
    }
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read job JSON from stdin")?;
    Ok(input)
}

/// Ctrl+C drains the pool exactly like `worker stop`.
fn setup_ctrlc_handler(signal: ShutdownSignal) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("received Ctrl+C, requesting shutdown");
        signal.interrupt();
        eprintln!();
    })
    .context("failed to set Ctrl+C handler")?;

    Ok(())
}
