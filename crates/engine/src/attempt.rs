//! Attempt records: one sealed execution of a work item

use chrono::{DateTime, Utc};
use gauntlet_common::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl AttemptStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, AttemptStatus::Failed | AttemptStatus::TimedOut)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStatus::Passed => "passed",
            AttemptStatus::Failed => "failed",
            AttemptStatus::TimedOut => "timedOut",
            AttemptStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Where an attempt's error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// An assertion in the test body failed
    Assertion,
    /// An expectation did not settle within its timeout
    Expectation,
    /// The body returned some other error (navigation, interaction, ...)
    Error,
    /// The body panicked
    Panic,
    /// The per-attempt timeout elapsed
    AttemptTimeout,
    /// The run-level deadline elapsed
    RunDeadline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn attempt_timeout(timeout: Duration) -> Self {
        Self::new(
            ErrorKind::AttemptTimeout,
            format!("Test timeout of {}ms exceeded", timeout.as_millis()),
        )
    }

    pub fn run_deadline() -> Self {
        Self::new(ErrorKind::RunDeadline, "Run deadline exceeded")
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Reference to a captured diagnostic; the bytes stay on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// One sealed execution of a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based, contiguous within a work item
    pub number: u32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AttemptError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
}

impl Attempt {
    /// Seal an attempt that started at `started_at` and ends now
    pub fn seal(
        number: u32,
        status: AttemptStatus,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: Option<AttemptError>,
    ) -> Self {
        Self {
            number,
            status,
            started_at,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            error,
            artifacts: Vec::new(),
        }
    }

    /// An attempt that never ran because the run deadline had already passed
    pub fn interrupted_before_start(number: u32) -> Self {
        let now = Utc::now();
        Self {
            number,
            status: AttemptStatus::TimedOut,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            error: Some(AttemptError::run_deadline()),
            artifacts: Vec::new(),
        }
    }

    /// Whether the run deadline (not the attempt's own timeout) ended this attempt
    pub fn hit_run_deadline(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.kind == ErrorKind::RunDeadline)
            .unwrap_or(false)
    }
}
