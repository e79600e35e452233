mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kata-cli")]
#[command(about = "Kata CLI - Judge JavaScript submissions locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a submission against a test file and print the report
    Run {
        /// Source file of the submission
        #[arg(short, long)]
        code: PathBuf,

        /// Test file: a JSON array of {input, expected} or a suite object
        #[arg(short, long)]
        tests: PathBuf,

        /// Name of the function or class to invoke
        #[arg(short, long)]
        entry: Option<String>,

        /// Task identifier echoed in the report
        #[arg(long)]
        task_id: Option<String>,

        /// Sandbox configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Never run outside the Docker sandbox
        #[arg(long, default_value = "false")]
        no_fallback: bool,
    },

    /// Show which entry point would be invoked
    Resolve {
        /// Source file of the submission
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Check that the sandbox and the fallback executor are reachable
    Probe {
        /// Sandbox configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries the report
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            code,
            tests,
            entry,
            task_id,
            config,
            no_fallback,
        } => {
            let all_passed = commands::run_submission(
                &code,
                &tests,
                entry,
                task_id,
                config.as_deref(),
                no_fallback,
            )
            .await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Resolve { code } => {
            commands::resolve_entry(&code)?;
        }
        Commands::Probe { config } => {
            if !commands::probe_executors(config.as_deref()).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
