//! Execution contexts and the handle test bodies receive
//!
//! The engine never drives a browser itself. A [`ContextProvider`] yields one
//! isolated [`ExecutionContext`] per attempt; test bodies reach it through a
//! [`TestContext`], which also carries the attempt's cancellation token and
//! expectation defaults.

use async_trait::async_trait;
use gauntlet_common::{ArtifactKind, Project};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::attempt::{ArtifactRef, AttemptError, ErrorKind};
use crate::error::{E2eError, E2eResult};
use crate::expect::{self, Check, Matcher, WaitOptions};
use crate::matrix::WorkItemId;

// ============================================================================
// Capability interface
// ============================================================================

/// A user action against the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Interaction {
    Click { selector: String },
    Fill { selector: String, value: String },
    Press { selector: Option<String>, key: String },
    Hover { selector: String },
    Check { selector: String },
    Uncheck { selector: String },
    Select { selector: String, value: String },
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Click { selector } => write!(f, "click:{}", selector),
            Interaction::Fill { selector, .. } => write!(f, "fill:{}", selector),
            Interaction::Press { key, .. } => write!(f, "press:{}", key),
            Interaction::Hover { selector } => write!(f, "hover:{}", selector),
            Interaction::Check { selector } => write!(f, "check:{}", selector),
            Interaction::Uncheck { selector } => write!(f, "uncheck:{}", selector),
            Interaction::Select { selector, .. } => write!(f, "select:{}", selector),
        }
    }
}

/// A question about the current state of the environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Query {
    Url,
    Title,
    Count { selector: String },
    Text { selector: String },
    Visible { selector: String },
    Attribute { selector: String, name: String },
    Value { selector: String },
    Class { selector: String },
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Url => f.write_str("page url"),
            Query::Title => f.write_str("page title"),
            Query::Count { selector } => write!(f, "count of {}", selector),
            Query::Text { selector } => write!(f, "text of {}", selector),
            Query::Visible { selector } => write!(f, "visibility of {}", selector),
            Query::Attribute { selector, name } => write!(f, "[{}] of {}", name, selector),
            Query::Value { selector } => write!(f, "value of {}", selector),
            Query::Class { selector } => write!(f, "class of {}", selector),
        }
    }
}

/// Answer to a [`Query`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// Textual value; `None` when the element or attribute is absent
    Text(Option<String>),
    Count(usize),
    Flag(bool),
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Text(Some(s)) => write!(f, "{:?}", s),
            Observation::Text(None) => f.write_str("<absent>"),
            Observation::Count(n) => write!(f, "{}", n),
            Observation::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// Isolated environment handle for one attempt
#[async_trait]
pub trait ExecutionContext: Send {
    async fn navigate(&mut self, url: &str) -> E2eResult<()>;

    async fn interact(&mut self, interaction: &Interaction) -> E2eResult<()>;

    async fn observe(&mut self, query: &Query) -> E2eResult<Observation>;

    /// Write a diagnostic of `kind` to `path`
    async fn capture(&mut self, kind: ArtifactKind, path: &Path) -> E2eResult<ArtifactRef>;

    async fn close(&mut self) -> E2eResult<()>;
}

/// Facts about the attempt a context is provisioned for
#[derive(Debug, Clone)]
pub struct AttemptInfo {
    pub work_item: WorkItemId,
    /// 1-based attempt number
    pub number: u32,
    /// Recordings (trace, video) that must run for the whole attempt
    pub recordings: Vec<ArtifactKind>,
    /// Directory reserved for this attempt's artifacts
    pub output_dir: PathBuf,
}

impl AttemptInfo {
    /// 0 on the first attempt, 1 on the first retry, ...
    pub fn retry(&self) -> u32 {
        self.number.saturating_sub(1)
    }
}

/// Yields fresh, isolated execution contexts
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Failures here are infrastructure failures and abort the run
    async fn provision(
        &self,
        project: &Project,
        attempt: &AttemptInfo,
    ) -> E2eResult<Box<dyn ExecutionContext>>;
}

pub(crate) type SharedContext = Arc<Mutex<Box<dyn ExecutionContext>>>;

// ============================================================================
// Test failures
// ============================================================================

/// Why a test body did not pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    Assertion(String),
    Expectation(String),
    /// The body asked to be skipped at runtime
    Skipped(String),
    Cancelled(String),
    Error(String),
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFailure::Assertion(message.into())
    }

    pub(crate) fn into_attempt_error(self) -> Option<AttemptError> {
        match self {
            TestFailure::Assertion(m) => Some(AttemptError::new(ErrorKind::Assertion, m)),
            TestFailure::Expectation(m) => Some(AttemptError::new(ErrorKind::Expectation, m)),
            TestFailure::Error(m) | TestFailure::Cancelled(m) => {
                Some(AttemptError::new(ErrorKind::Error, m))
            }
            TestFailure::Skipped(_) => None,
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFailure::Assertion(m) => write!(f, "assertion failed: {}", m),
            TestFailure::Expectation(m) => f.write_str(m),
            TestFailure::Skipped(m) => write!(f, "skipped: {}", m),
            TestFailure::Cancelled(m) => write!(f, "cancelled: {}", m),
            TestFailure::Error(m) => f.write_str(m),
        }
    }
}

impl std::error::Error for TestFailure {}

impl From<E2eError> for TestFailure {
    fn from(e: E2eError) -> Self {
        match e {
            E2eError::ExpectationTimeout { .. } => TestFailure::Expectation(e.to_string()),
            E2eError::Cancelled(m) => TestFailure::Cancelled(m),
            other => TestFailure::Error(other.to_string()),
        }
    }
}

/// Fail the body with an assertion error unless `cond` holds
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::context::TestFailure::assertion(format!($($arg)+)));
        }
    };
}

// ============================================================================
// TestContext
// ============================================================================

/// What a running test body sees
pub struct TestContext {
    project: Arc<Project>,
    info: AttemptInfo,
    page: SharedContext,
    cancel: CancellationToken,
    expect: WaitOptions,
    base_url: Option<String>,
    captures: Vec<ArtifactRef>,
}

impl TestContext {
    pub(crate) fn new(
        project: Arc<Project>,
        info: AttemptInfo,
        page: SharedContext,
        cancel: CancellationToken,
        expect: WaitOptions,
        base_url: Option<String>,
    ) -> Self {
        Self {
            project,
            info,
            page,
            cancel,
            expect,
            base_url,
            captures: Vec::new(),
        }
    }

    /// Artifacts the body captured itself
    pub(crate) fn into_captures(self) -> Vec<ArtifactRef> {
        self.captures
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn attempt(&self) -> &AttemptInfo {
        &self.info
    }

    pub fn retry(&self) -> u32 {
        self.info.retry()
    }

    /// Fires when the attempt is aborted (attempt timeout or run deadline)
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Expectation defaults for this attempt
    pub fn expect_options(&self) -> WaitOptions {
        self.expect
    }

    /// Skip the rest of this test; the attempt seals `skipped`
    pub fn skip(&self, reason: impl Into<String>) -> TestFailure {
        TestFailure::Skipped(reason.into())
    }

    /// Navigate, resolving relative URLs against the project's base URL
    pub async fn navigate(&mut self, url: &str) -> Result<(), TestFailure> {
        let url = self.project.resolve_url(self.base_url.as_deref(), url);
        let page = Arc::clone(&self.page);
        self.guard(async move { page.lock().await.navigate(&url).await })
            .await
    }

    pub async fn interact(&mut self, interaction: Interaction) -> Result<(), TestFailure> {
        let page = Arc::clone(&self.page);
        self.guard(async move { page.lock().await.interact(&interaction).await })
            .await
    }

    pub async fn click(&mut self, selector: &str) -> Result<(), TestFailure> {
        self.interact(Interaction::Click {
            selector: selector.to_string(),
        })
        .await
    }

    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<(), TestFailure> {
        self.interact(Interaction::Fill {
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn press(&mut self, selector: Option<&str>, key: &str) -> Result<(), TestFailure> {
        self.interact(Interaction::Press {
            selector: selector.map(String::from),
            key: key.to_string(),
        })
        .await
    }

    pub async fn observe(&mut self, query: &Query) -> Result<Observation, TestFailure> {
        let page = Arc::clone(&self.page);
        let query = query.clone();
        self.guard(async move { page.lock().await.observe(&query).await })
            .await
    }

    /// Save a named screenshot next to the attempt's other artifacts
    pub async fn screenshot(&mut self, name: &str) -> Result<ArtifactRef, TestFailure> {
        let dir = self.info.output_dir.clone();
        let path = dir.join(format!("{}.png", name));
        let page = Arc::clone(&self.page);
        let artifact = self
            .guard(async move {
                tokio::fs::create_dir_all(&dir).await?;
                page.lock().await.capture(ArtifactKind::Screenshot, &path).await
            })
            .await?;
        self.captures.push(artifact.clone());
        Ok(artifact)
    }

    /// Poll `query` until `matcher` accepts it, using the attempt's expect defaults
    pub async fn expect(&mut self, query: Query, matcher: Matcher) -> Result<(), TestFailure> {
        let options = self.expect;
        self.expect_within(query, matcher, options).await
    }

    pub async fn expect_within(
        &mut self,
        query: Query,
        matcher: Matcher,
        options: WaitOptions,
    ) -> Result<(), TestFailure> {
        let description = format!("expect {} {}", query, matcher);
        let page = Arc::clone(&self.page);
        expect::wait_for(
            &description,
            || {
                let page = Arc::clone(&page);
                let query = query.clone();
                let matcher = &matcher;
                async move {
                    let observed = page.lock().await.observe(&query).await?;
                    Ok(matcher.check(&observed))
                }
            },
            options,
            &self.cancel,
        )
        .await
        .map_err(TestFailure::from)
    }

    /// Generic `wait_for` bound to this attempt's cancellation token
    pub async fn wait_for<F, Fut>(
        &self,
        description: &str,
        predicate: F,
        options: WaitOptions,
    ) -> Result<(), TestFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<Check>>,
    {
        expect::wait_for(description, predicate, options, &self.cancel)
            .await
            .map_err(TestFailure::from)
    }

    /// Sleep that ends early if the attempt is aborted
    pub async fn sleep(&self, duration: Duration) -> Result<(), TestFailure> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TestFailure::Cancelled("attempt aborted".into())),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run a context call, giving up as soon as the attempt is aborted
    async fn guard<T, Fut>(&self, fut: Fut) -> Result<T, TestFailure>
    where
        Fut: Future<Output = E2eResult<T>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TestFailure::Cancelled("attempt aborted".into())),
            res = fut => res.map_err(TestFailure::from),
        }
    }
}
