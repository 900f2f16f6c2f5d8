//! Gauntlet CLI - Main Entry Point
//!
//! Runs YAML test suites across the configured project matrix and reports
//! the outcome through exit codes: 0 success, 1 test failures, 2 config or
//! engine errors.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{list, run};
use gauntlet_engine::report::EXIT_ENGINE_ERROR;

/// Gauntlet - cross-environment end-to-end test orchestration
#[derive(Parser)]
#[command(name = "gauntlet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        env = "GAUNTLET_CONFIG",
        default_value = gauntlet_common::DEFAULT_CONFIG_FILE,
        global = true
    )]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites
    Run(run::RunArgs),

    /// List the work items a run would schedule
    List(list::ListArgs),

    /// Show the configured project matrix
    Projects,

    /// Show built-in device presets
    Devices,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &cli.config, cli.format).await,
        Commands::List(args) => list::execute(args, &cli.config, cli.format),
        Commands::Projects => list::projects(&cli.config, cli.format),
        Commands::Devices => list::devices(cli.format),
        Commands::Version => {
            println!("Gauntlet v{}", gauntlet_common::VERSION);
            Ok(0)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            EXIT_ENGINE_ERROR
        }
    };
    std::process::exit(code);
}
