//! Error types for the orchestration engine

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Duplicate test: {0}")]
    DuplicateTest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid tag expression '{expression}': {reason}")]
    TagExpression { expression: String, reason: String },

    #[error("Expectation timed out after {}ms: {description} (last observed: {last_observed})", .timeout.as_millis())]
    ExpectationTimeout {
        description: String,
        last_observed: String,
        timeout: Duration,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Failed to provision execution context for project '{project}': {reason}")]
    Provision { project: String, reason: String },

    #[error("Execution context error: {0}")]
    Context(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error(transparent)]
    Config(#[from] gauntlet_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    /// Errors that abort the whole run rather than a single attempt
    pub fn is_engine_error(&self) -> bool {
        matches!(
            self,
            E2eError::Provision { .. }
                | E2eError::WorkerCrashed(_)
                | E2eError::PlaywrightNotFound
                | E2eError::Io(_)
        )
    }

    /// Errors detected during setup, before any attempt starts
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            E2eError::DuplicateTest(_)
                | E2eError::InvalidConfig(_)
                | E2eError::TagExpression { .. }
                | E2eError::SpecParse(_)
                | E2eError::Config(_)
                | E2eError::Yaml(_)
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
