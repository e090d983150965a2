//! Quillwire command line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Print a new identity record
//! quillwire keygen
//!
//! # Serve the JSON command interface on stdin/stdout
//! quillwire serve --timeout-ms 5000
//!
//! # Two peers talking through an in-process relay
//! quillwire demo --messages 10
//! ```

use std::{
    io::{self, Write},
    time::Duration,
};

use clap::{Parser, Subcommand};
use quillwire_cli::{CliError, DemoConfig, RelayConfig, keygen, run_demo, serve_commands};
use quillwire_core::{EngineConfig, RatchetEngine};
use quillwire_worker::{SystemEnv, WorkerConfig, spawn_engine};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Quillwire end-to-end encrypted messaging engine
#[derive(Parser, Debug)]
#[command(name = "quillwire")]
#[command(about = "Quillwire ratchet engine tools")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an identity record and print it as JSON
    Keygen,

    /// Serve line-delimited JSON engine commands on stdin/stdout
    Serve {
        /// Per-command deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run two peers through an in-process relay
    Demo {
        /// Messages to exchange
        #[arg(short, long, default_value_t = 6)]
        messages: usize,

        /// Upper bound of the random send delay in milliseconds
        #[arg(long, default_value_t = 300)]
        jitter_ms: u64,

        /// Frames each connection may send per 10 second window
        #[arg(long, default_value_t = 50)]
        rate_limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout carries command output, so logs go to stderr
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    match args.command {
        Command::Keygen => {
            let record = keygen(SystemEnv::new())?;
            let json = serde_json::to_string_pretty(&record)?;
            writeln!(io::stdout().lock(), "{json}")?;
        },
        Command::Serve { timeout_ms } => {
            let engine = RatchetEngine::new(SystemEnv::new(), EngineConfig::default())?;
            let config = WorkerConfig {
                call_timeout: timeout_ms.map(Duration::from_millis),
                ..Default::default()
            };
            let (handle, _tasks) = spawn_engine(engine, config);

            tracing::info!("serving engine commands on stdio");
            let input = BufReader::new(tokio::io::stdin());
            serve_commands(&handle, input, tokio::io::stdout()).await?;
        },
        Command::Demo { messages, jitter_ms, rate_limit } => {
            let config = DemoConfig {
                messages,
                max_send_jitter: Duration::from_millis(jitter_ms),
                relay: RelayConfig { max_frames_per_window: rate_limit, ..Default::default() },
            };
            run_demo(SystemEnv::new(), config, &mut io::stdout().lock()).await?;
        },
    }

    Ok(())
}
