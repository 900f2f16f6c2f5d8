//! Gauntlet test orchestration engine
//!
//! Discovers tagged test cases, fans them out across a matrix of projects,
//! runs them on a bounded worker pool with retries and polling expectations,
//! and aggregates every attempt into one deterministic report.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TestRegistry ── select(TagExpression) ──┐                  │
//! │                                          ▼                  │
//! │  ProjectMatrix ───────── expand ──► [WorkItem]              │
//! │                                          │                  │
//! │  Scheduler (N workers, FIFO queue) ◄─────┘                  │
//! │    ├── ContextProvider::provision() -> ExecutionContext     │
//! │    ├── TestBody::run(&mut TestContext)                      │
//! │    │     └── expect / wait_for (polling, cancellable)       │
//! │    ├── per-attempt timeout, run deadline                    │
//! │    ├── RetryPolicy::should_retry()                          │
//! │    └── artifacts::capture_all()                             │
//! │                                          │                  │
//! │  ReportBuilder ◄──── sealed Attempts ────┘                  │
//! │    └── Report { summary, items, exit_code() }               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod attempt;
pub mod context;
pub mod error;
pub mod events;
pub mod expect;
pub mod matrix;
pub mod playwright;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod spec;
pub mod tags;

pub use attempt::{ArtifactRef, Attempt, AttemptError, AttemptStatus, ErrorKind};
pub use context::{
    AttemptInfo, ContextProvider, ExecutionContext, Interaction, Observation, Query, TestContext,
    TestFailure,
};
pub use error::{E2eError, E2eResult};
pub use events::RunEvent;
pub use expect::{wait_for, Check, Matcher, WaitOptions};
pub use matrix::{ProjectMatrix, WorkItem, WorkItemId};
pub use playwright::{PlaywrightConfig, PlaywrightProvider};
pub use registry::{body_fn, TestBody, TestCase, TestId, TestRegistry};
pub use report::{ItemReport, Outcome, Report, Summary};
pub use retry::RetryPolicy;
pub use runner::TestRunner;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use spec::SuiteSpec;
pub use tags::TagExpression;
