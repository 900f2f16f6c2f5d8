//! Run command

use anyhow::Result;
use clap::Args;
use gauntlet_engine::events::{self, EventReceiver, RunEvent};
use gauntlet_engine::report::EXIT_ENGINE_ERROR;
use gauntlet_engine::{PlaywrightConfig, PlaywrightProvider, TestRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{load_config, SelectionArgs};
use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Concurrent workers
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Retries for failing tests
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Deadline for the whole run in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Base URL for relative navigation
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Directory for results.json and artifacts
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Fail if any test is focused with `only`
    #[arg(long)]
    pub forbid_only: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Node executable used to drive Playwright
    #[arg(long, default_value = "node")]
    pub node: PathBuf,

    /// Directory whose node_modules provides playwright
    #[arg(long, default_value = ".")]
    pub node_project_dir: PathBuf,
}

pub async fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> Result<i32> {
    let mut config = load_config(config_path, &args.selection)?;
    if let Some(workers) = args.workers {
        config.parallelism = workers;
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if let Some(timeout) = args.timeout_ms {
        config.per_attempt_timeout_ms = timeout;
    }
    if args.deadline_ms.is_some() {
        config.run_deadline_ms = args.deadline_ms;
    }
    if args.base_url.is_some() {
        config.base_url = args.base_url.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    config.forbid_only |= args.forbid_only;

    let provider = PlaywrightProvider::new(PlaywrightConfig {
        node: args.node.clone(),
        project_dir: args.node_project_dir.clone(),
        headless: !args.headed,
        script_timeout: Duration::from_millis(config.per_attempt_timeout_ms),
    });

    let mut runner = TestRunner::new(config, Arc::new(provider))
        .only_projects(args.selection.projects.clone());
    let loaded = match runner.load_specs(&args.selection.specs) {
        Ok(n) => n,
        Err(e) if e.is_config_error() => {
            output::print_error(&format!("Invalid test suites: {}", e));
            return Ok(EXIT_ENGINE_ERROR);
        }
        Err(e) => return Err(e.into()),
    };
    info!("Loaded {} tests from {}", loaded, args.selection.specs.display());

    let (tx, rx) = events::channel();
    let runner = runner.with_events(tx);
    let live = tokio::spawn(print_events(rx, format == OutputFormat::Table));

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            // Planning failed, nothing ran and no events will follow
            live.abort();
            if e.is_config_error() {
                output::print_error(&format!("Invalid configuration: {}", e));
                return Ok(EXIT_ENGINE_ERROR);
            }
            return Err(e.into());
        }
    };
    let _ = live.await;

    let path = runner.write_results(&report)?;
    output::print_report(&report, format);
    if format == OutputFormat::Table {
        println!("  Results written to {}", path.display());
    }

    Ok(report.exit_code())
}

async fn print_events(mut rx: EventReceiver, enabled: bool) {
    while let Some(event) = rx.recv().await {
        if matches!(event, RunEvent::RunFinished { .. }) {
            break;
        }
        if enabled {
            if let Some(line) = output::event_line(&event) {
                println!("{}", line);
            }
        }
    }
}
