mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codetest-cli")]
#[command(about = "codetest CLI - Run submissions locally and manage configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run code against test cases without starting the server
    Run {
        /// Source file to execute
        #[arg(short, long)]
        code: PathBuf,

        /// JSON file with an array of {"input": ..., "output": ...} test cases
        #[arg(short = 't', long)]
        cases: PathBuf,

        /// Config file (defaults to $CODETEST_CONFIG, then config/codetest.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exit with an error unless every test case passes
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// Write a default config/codetest.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Engine diagnostics go to stderr so stdout stays a clean JSON report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            code,
            cases,
            config,
            strict,
        } => {
            commands::run_submission(&code, &cases, config.as_deref(), strict).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
    }

    Ok(())
}
