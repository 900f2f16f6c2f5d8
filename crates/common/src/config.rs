//! Run configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{default_projects, Project};

/// Configuration for a single run. Immutable once handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of concurrent workers (>= 1)
    pub parallelism: usize,

    /// Retries granted to a failing work item
    pub max_retries: u32,

    /// Hard timeout for one attempt
    pub per_attempt_timeout_ms: u64,

    /// Deadline for the whole run (None = unbounded)
    pub run_deadline_ms: Option<u64>,

    /// Tag expression selecting tests (None = all tests)
    pub tag_expression: Option<String>,

    /// Target environments, in matrix order
    pub projects: Vec<Project>,

    /// Default timeout for expectations inside test bodies
    pub expect_timeout_ms: u64,

    /// Poll cadence for expectations
    pub expect_poll_interval_ms: u64,

    /// Base URL relative navigations resolve against
    pub base_url: Option<String>,

    /// Where reports and artifacts are written
    pub output_dir: PathBuf,

    /// Which diagnostics are captured per attempt
    pub artifacts: ArtifactPolicy,

    /// Reject focused (`only`) tests
    pub forbid_only: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retries: 0,
            per_attempt_timeout_ms: 30_000,
            run_deadline_ms: None,
            tag_expression: None,
            projects: default_projects(),
            expect_timeout_ms: 5_000,
            expect_poll_interval_ms: 100,
            base_url: None,
            output_dir: PathBuf::from("test-results"),
            artifacts: ArtifactPolicy::default(),
            forbid_only: false,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RunConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.resolve_devices()
    }

    fn resolve_devices(mut self) -> Result<Self> {
        self.projects = self
            .projects
            .into_iter()
            .map(Project::resolve_device)
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Apply process environment overrides (`CI`, `BASE_URL`)
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from an arbitrary lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("CI").map(|v| !v.is_empty() && v != "0" && v != "false").unwrap_or(false) {
            debug!("CI environment detected, applying CI profile");
            self.apply_ci_profile();
        }
        if let Some(base_url) = lookup("BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = Some(base_url);
        }
    }

    /// Unattended runs retry twice, run serially and reject focused tests
    pub fn apply_ci_profile(&mut self) {
        self.max_retries = 2;
        self.parallelism = 1;
        self.forbid_only = true;
    }

    /// Check every invariant the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::InvalidConfig("parallelism must be at least 1".into()));
        }
        if self.per_attempt_timeout_ms == 0 {
            return Err(Error::InvalidConfig("per-attempt timeout must be positive".into()));
        }
        if self.expect_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("expect poll interval must be positive".into()));
        }
        if self.run_deadline_ms == Some(0) {
            return Err(Error::InvalidConfig("run deadline must be positive".into()));
        }
        if self.projects.is_empty() {
            return Err(Error::InvalidConfig("at least one project is required".into()));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            project.validate()?;
            if !seen.insert(project.name.as_str()) {
                return Err(Error::DuplicateProject(project.name.clone()));
            }
        }
        Ok(())
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_ms.map(Duration::from_millis)
    }

    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    pub fn expect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.expect_poll_interval_ms)
    }
}

// ============================================================================
// Artifact policy
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotMode {
    Off,
    On,
    #[default]
    OnlyOnFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingMode {
    Off,
    On,
    RetainOnFailure,
    #[default]
    OnFirstRetry,
}

/// Which diagnostics are requested from the execution context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPolicy {
    pub screenshot: ScreenshotMode,
    pub trace: RecordingMode,
    pub video: RecordingMode,
}

impl ArtifactPolicy {
    /// Capture nothing
    pub fn off() -> Self {
        Self {
            screenshot: ScreenshotMode::Off,
            trace: RecordingMode::Off,
            video: RecordingMode::Off,
        }
    }
}
