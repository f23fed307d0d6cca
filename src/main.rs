#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use retrace::commands;
use retrace::commands::daemon::DaemonCommands;
use retrace::commands::record::RecordCommands;
use retrace::commands::tab::TabCommands;
use retrace::commands::tests::TestsCommands;
use retrace::commands::utils::DEFAULT_TAB;
use retrace::errors::ReplayError;
use retrace::types::OutputFormat;

const EXIT_SUCCESS: i32 = 0;

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Record and replay end-to-end UI tests with visual regression checks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Record a test in a browser tab
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },

    /// Replay a saved test
    Replay {
        /// Test name
        name: String,

        #[arg(long, default_value = DEFAULT_TAB)]
        tab: String,

        /// Execution id to report under; generated when omitted
        #[arg(long)]
        execution_id: Option<String>,

        /// Print the execution id and return without waiting for the result
        #[arg(long)]
        no_wait: bool,

        #[arg(short, long, default_value = "simple")]
        format: OutputFormat,
    },

    /// Print buffered notifications for an execution
    Events { execution_id: String },

    /// Stop a running execution before its next step
    Stop { execution_id: String },

    /// Forget every run and persisted execution state
    Reset,

    /// Manage saved tests
    Tests {
        #[command(subcommand)]
        command: TestsCommands,
    },

    /// Show or change recording and replay delays
    Settings {
        /// Settle time after a page load while recording, in ms
        #[arg(long)]
        recording_delay: Option<u64>,

        /// Settle time before each replayed step, in ms
        #[arg(long)]
        replay_delay: Option<u64>,

        #[arg(short, long, default_value = "simple")]
        format: OutputFormat,
    },

    /// Check that the daemon answers
    Ping,

    /// Compare two PNG screenshots
    Diff {
        baseline: PathBuf,
        current: PathBuf,

        /// Write the diff visualization here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Percentage of differing pixels tolerated
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Manage daemon tabs
    Tab {
        #[command(subcommand)]
        command: TabCommands,
    },
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            let replay_err: ReplayError = err.into();

            // Output JSON error to stdout for programmatic consumption
            let error_json = json!({
                "error": replay_err.kind(),
                "message": replay_err.to_string(),
                "exit_code": replay_err.exit_code()
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            eprintln!("Error: {}", replay_err);
            std::process::exit(replay_err.exit_code());
        }
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr so JSON on stdout stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retrace=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { command } => commands::daemon::handle_daemon(command).await?,
        Commands::Record { command } => commands::record::handle_record(command).await?,
        Commands::Replay {
            name,
            tab,
            execution_id,
            no_wait,
            format,
        } => commands::replay::handle_replay(name, tab, execution_id, no_wait, format).await?,
        Commands::Events { execution_id } => commands::events::handle_events(execution_id).await?,
        Commands::Stop { execution_id } => commands::stop::handle_stop(execution_id).await?,
        Commands::Reset => commands::stop::handle_reset().await?,
        Commands::Tests { command } => commands::tests::handle_tests(command).await?,
        Commands::Settings {
            recording_delay,
            replay_delay,
            format,
        } => commands::settings::handle_settings(recording_delay, replay_delay, format).await?,
        Commands::Ping => commands::ping::handle_ping().await?,
        Commands::Diff {
            baseline,
            current,
            output,
            threshold,
            format,
        } => commands::diff::handle_diff(baseline, current, output, threshold, format).await?,
        Commands::Tab { command } => commands::tab::handle_tab(command).await?,
    }

    Ok(())
}
