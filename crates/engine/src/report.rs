//! Run report: per work item outcomes plus run-level totals
//!
//! The JSON shape written by [`Report::write_json`] is what CI consumers
//! parse; fields are only ever added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::attempt::{Attempt, AttemptStatus};
use crate::error::E2eResult;
use crate::matrix::WorkItem;

/// Report format version
pub const REPORT_VERSION: u32 = 1;

/// Exit code when every work item passed (or was skipped / flaky)
pub const EXIT_OK: i32 = 0;
/// Exit code when at least one work item failed or timed out
pub const EXIT_TEST_FAILURES: i32 = 1;
/// Exit code for configuration or engine failures
pub const EXIT_ENGINE_ERROR: i32 = 2;

/// Authoritative outcome of a work item, decided by its final attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Passed,
    /// Final attempt passed after at least one failed attempt
    Flaky,
    Failed,
    TimedOut,
    Skipped,
}

impl Outcome {
    /// Passed on the last attempt (including flaky)
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed | Outcome::Flaky)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::TimedOut)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "passed",
            Outcome::Flaky => "flaky",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timedOut",
            Outcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of an attempt sequence, `None` when there are no attempts
pub fn authoritative_outcome(attempts: &[Attempt]) -> Option<Outcome> {
    let last = attempts.last()?;
    let outcome = match last.status {
        AttemptStatus::Passed => {
            if attempts.iter().any(|a| a.status.is_failure()) {
                Outcome::Flaky
            } else {
                Outcome::Passed
            }
        }
        AttemptStatus::Failed => Outcome::Failed,
        AttemptStatus::TimedOut => Outcome::TimedOut,
        AttemptStatus::Skipped => Outcome::Skipped,
    };
    Some(outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub test_id: String,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub outcome: Outcome,
    pub attempts: Vec<Attempt>,
}

impl ItemReport {
    pub fn final_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    /// Final attempt passed; includes flaky items
    pub passed: usize,
    pub failed: usize,
    pub flaky: usize,
    pub skipped: usize,
    pub timed_out: usize,
    /// Work items the engine never settled (engine failure only)
    pub not_run: usize,
    pub duration_ms: u64,
}

impl Summary {
    pub fn failures(&self) -> usize {
        self.failed + self.timed_out
    }
}

/// Run parameters echoed into the report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    pub parallelism: usize,
    pub max_retries: u32,
    pub per_attempt_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_deadline_ms: Option<u64>,
    pub tag_expression: String,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub settings: ReportSettings,
    pub summary: Summary,
    /// Set when the engine itself failed; items then cover only settled work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_error: Option<String>,
    pub items: Vec<ItemReport>,
}

impl Report {
    /// 0 when nothing failed, 1 on test failures, 2 on engine failure
    pub fn exit_code(&self) -> i32 {
        if self.engine_error.is_some() {
            EXIT_ENGINE_ERROR
        } else if self.summary.failures() > 0 {
            EXIT_TEST_FAILURES
        } else {
            EXIT_OK
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    pub fn item(&self, test_id: &str, project_name: &str) -> Option<&ItemReport> {
        self.items
            .iter()
            .find(|i| i.test_id == test_id && i.project_name == project_name)
    }

    pub fn with_outcome(&self, outcome: Outcome) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(move |i| i.outcome == outcome)
    }

    pub fn to_json(&self) -> E2eResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `results.json` into `output_dir`
    pub fn write_json(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("results.json");
        std::fs::write(&path, self.to_json()?)?;
        info!("Results written to: {}", path.display());
        Ok(path)
    }

    pub fn from_json(json: &str) -> E2eResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Accumulates sealed attempts per work item, then freezes into a [`Report`]
#[derive(Debug, Default)]
pub struct ReportBuilder {
    started_at: DateTime<Utc>,
    settings: ReportSettings,
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    item: WorkItem,
    attempts: Vec<Attempt>,
    settled: bool,
}

impl ReportBuilder {
    pub fn new(items: &[WorkItem], settings: ReportSettings) -> Self {
        Self {
            started_at: Utc::now(),
            settings,
            slots: items
                .iter()
                .cloned()
                .map(|item| Slot {
                    item,
                    attempts: Vec::new(),
                    settled: false,
                })
                .collect(),
        }
    }

    /// Append a sealed attempt. Returns the item's attempt history.
    pub fn record(&mut self, index: usize, attempt: Attempt) -> &[Attempt] {
        let slot = &mut self.slots[index];
        debug_assert_eq!(attempt.number as usize, slot.attempts.len() + 1);
        slot.attempts.push(attempt);
        &slot.attempts
    }

    /// Mark the item's outcome as final
    pub fn settle(&mut self, index: usize) {
        self.slots[index].settled = true;
    }

    pub fn attempts(&self, index: usize) -> &[Attempt] {
        &self.slots[index].attempts
    }

    pub fn next_attempt_number(&self, index: usize) -> u32 {
        self.slots[index].attempts.len() as u32 + 1
    }

    /// Freeze. Unsettled items (possible only after an engine failure) are
    /// left out of `items` and counted as `not_run`.
    pub fn finish(self, duration: Duration, engine_error: Option<String>) -> Report {
        let mut summary = Summary {
            duration_ms: duration.as_millis() as u64,
            ..Summary::default()
        };
        let mut items = Vec::with_capacity(self.slots.len());

        for slot in self.slots {
            summary.total += 1;
            let outcome = match authoritative_outcome(&slot.attempts) {
                Some(outcome) if slot.settled => outcome,
                _ => {
                    summary.not_run += 1;
                    continue;
                }
            };
            match outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Flaky => {
                    summary.passed += 1;
                    summary.flaky += 1;
                }
                Outcome::Failed => summary.failed += 1,
                Outcome::TimedOut => summary.timed_out += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
            items.push(ItemReport {
                test_id: slot.item.test.id().to_string(),
                project_name: slot.item.project.name.clone(),
                tags: slot.item.test.tags().to_vec(),
                location: slot.item.test.location().map(String::from),
                outcome,
                attempts: slot.attempts,
            });
        }

        Report {
            version: REPORT_VERSION,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: summary.duration_ms,
            settings: self.settings,
            summary,
            engine_error,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{AttemptError, ErrorKind};
    use crate::matrix::ProjectMatrix;
    use crate::registry::{body_fn, TestCase, TestId};
    use gauntlet_common::{Browser, Project};
    use std::sync::Arc;

    fn attempt(number: u32, status: AttemptStatus) -> Attempt {
        let error = status
            .is_failure()
            .then(|| AttemptError::new(ErrorKind::Assertion, "expected 1, got 0"));
        Attempt::seal(number, status, Utc::now(), Duration::from_millis(12), error)
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        let tests: Vec<_> = names
            .iter()
            .map(|n| {
                Arc::new(TestCase::new(
                    TestId::new(["suite"], *n),
                    body_fn(|_| Box::pin(async { Ok(()) })),
                ))
            })
            .collect();
        ProjectMatrix::new(vec![Project::new("chromium", Browser::Chromium)])
            .unwrap()
            .expand(&tests)
    }

    #[test]
    fn test_authoritative_outcome() {
        use AttemptStatus::*;
        assert_eq!(authoritative_outcome(&[]), None);
        assert_eq!(authoritative_outcome(&[attempt(1, Passed)]), Some(Outcome::Passed));
        assert_eq!(
            authoritative_outcome(&[attempt(1, Failed), attempt(2, Passed)]),
            Some(Outcome::Flaky)
        );
        assert_eq!(
            authoritative_outcome(&[attempt(1, Passed), attempt(2, Failed)]),
            Some(Outcome::Failed)
        );
        assert_eq!(
            authoritative_outcome(&[attempt(1, Failed), attempt(2, TimedOut)]),
            Some(Outcome::TimedOut)
        );
        assert_eq!(authoritative_outcome(&[attempt(1, Skipped)]), Some(Outcome::Skipped));
    }

    #[test]
    fn test_builder_summary_and_exit_code() {
        use AttemptStatus::*;
        let work = items(&["a", "b", "c", "d"]);
        let mut builder = ReportBuilder::new(&work, ReportSettings::default());

        builder.record(0, attempt(1, Passed));
        builder.record(1, attempt(1, Failed));
        builder.record(1, attempt(2, Passed));
        builder.record(2, attempt(1, Failed));
        builder.record(2, attempt(2, Failed));
        builder.record(3, attempt(1, Skipped));
        for i in 0..4 {
            builder.settle(i);
        }

        let report = builder.finish(Duration::from_millis(250), None);
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.flaky, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.duration_ms, 250);
        assert_eq!(report.exit_code(), EXIT_TEST_FAILURES);

        let b = report.item("suite > b", "chromium").unwrap();
        assert_eq!(b.outcome, Outcome::Flaky);
        assert_eq!(b.attempts.len(), 2);
    }

    #[test]
    fn test_engine_error_yields_partial_report() {
        let work = items(&["a", "b"]);
        let mut builder = ReportBuilder::new(&work, ReportSettings::default());
        builder.record(0, attempt(1, AttemptStatus::Passed));
        builder.settle(0);
        builder.record(1, attempt(1, AttemptStatus::Failed));

        let report = builder.finish(Duration::ZERO, Some("provisioning failed".into()));
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.summary.not_run, 1);
        assert_eq!(report.exit_code(), EXIT_ENGINE_ERROR);
    }

    #[test]
    fn test_json_shape() {
        let work = items(&["a"]);
        let settings = ReportSettings {
            parallelism: 3,
            max_retries: 1,
            per_attempt_timeout_ms: 30_000,
            projects: vec!["chromium".into()],
            ..ReportSettings::default()
        };
        let mut builder = ReportBuilder::new(&work, settings);
        builder.record(0, attempt(1, AttemptStatus::TimedOut));
        builder.settle(0);
        let report = builder.finish(Duration::from_millis(5), None);

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let item = &value["items"][0];
        assert_eq!(item["test_id"], "suite > a");
        assert_eq!(item["project_name"], "chromium");
        assert_eq!(item["outcome"], "timedOut");
        assert_eq!(item["attempts"][0]["status"], "timedOut");
        assert_eq!(item["attempts"][0]["number"], 1);
        assert_eq!(value["summary"]["timed_out"], 1);
        assert_eq!(value["summary"]["not_run"], 0);
        assert_eq!(value["version"], REPORT_VERSION);
        assert_eq!(value["settings"]["parallelism"], 3);
        assert_eq!(value["settings"]["per_attempt_timeout_ms"], 30_000);
        assert_eq!(value["settings"]["projects"][0], "chromium");
        assert!(value["settings"].get("run_deadline_ms").is_none());
        assert!(value.get("config").is_none());

        let back = Report::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(back.exit_code(), EXIT_TEST_FAILURES);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportBuilder::new(&[], ReportSettings::default()).finish(Duration::ZERO, None);
        let path = report.write_json(&dir.path().join("out")).unwrap();
        assert!(path.ends_with("results.json"));
        assert_eq!(report.exit_code(), EXIT_OK);
    }
}
