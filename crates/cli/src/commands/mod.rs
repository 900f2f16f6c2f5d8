//! CLI Commands

use anyhow::{Context, Result};
use clap::Args;
use gauntlet_common::RunConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod list;
pub mod run;

/// Options shared by every command that plans a run
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Directory of YAML suites
    #[arg(short, long, env = "GAUNTLET_SPECS", default_value = "specs")]
    pub specs: PathBuf,

    /// Tag expression, e.g. "@smoke and not slow"
    #[arg(short, long = "grep", value_name = "EXPR")]
    pub tags: Option<String>,

    /// Only run these projects (repeatable)
    #[arg(short, long = "project", value_name = "NAME")]
    pub projects: Vec<String>,
}

/// Load the config file, then the environment, then the command line
pub fn load_config(path: &Path, selection: &SelectionArgs) -> Result<RunConfig> {
    let mut config = RunConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env();
    if let Some(tags) = &selection.tags {
        config.tag_expression = Some(tags.clone());
    }
    debug!(
        "Config: {} projects, parallelism {}, retries {}",
        config.projects.len(),
        config.parallelism,
        config.max_retries
    );
    Ok(config)
}
