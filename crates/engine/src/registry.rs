//! Test registry and tag-based selection

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::context::{TestContext, TestFailure};
use crate::error::{E2eError, E2eResult};
use crate::tags::{normalize_tag, TagExpression};

/// Identity of a test: its suite path plus its name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId {
    pub suite: Vec<String>,
    pub name: String,
}

impl TestId {
    pub fn new<I, S>(suite: I, name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suite: suite.into_iter().map(Into::into).collect(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.suite {
            write!(f, "{} > ", part)?;
        }
        f.write_str(&self.name)
    }
}

/// An opaque unit of work run once per attempt
#[async_trait]
pub trait TestBody: Send + Sync {
    async fn run(&self, t: &mut TestContext) -> Result<(), TestFailure>;
}

type BodyFn =
    dyn for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), TestFailure>> + Send + Sync;

struct FnBody(Box<BodyFn>);

#[async_trait]
impl TestBody for FnBody {
    async fn run(&self, t: &mut TestContext) -> Result<(), TestFailure> {
        (self.0)(t).await
    }
}

/// Wrap a closure returning a boxed future as a test body
///
/// ```ignore
/// let body = body_fn(|t| Box::pin(async move {
///     t.navigate("/").await?;
///     Ok(())
/// }));
/// ```
pub fn body_fn<F>(f: F) -> Arc<dyn TestBody>
where
    F: for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), TestFailure>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnBody(Box::new(f)))
}

/// A registered test. Immutable once registered.
#[derive(Clone)]
pub struct TestCase {
    id: TestId,
    tags: Vec<String>,
    skip: Option<String>,
    only: bool,
    location: Option<String>,
    body: Arc<dyn TestBody>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    /// Create a test; `@tag` tokens in the name become tags
    pub fn new(id: TestId, body: Arc<dyn TestBody>) -> Self {
        let mut case = Self {
            tags: Vec::new(),
            skip: None,
            only: false,
            location: None,
            body,
            id,
        };
        let inline: Vec<String> = extract_title_tags(&case.id.name);
        case.add_tags(inline);
        case
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_tags(tags);
        self
    }

    /// Mark the test as skipped; its work items seal `skipped` without running
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    /// Focus this test
    pub fn only(mut self) -> Self {
        self.only = true;
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = normalize_tag(tag.as_ref());
            if !tag.is_empty() && !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }

    pub fn id(&self) -> &TestId {
        &self.id
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip.as_deref()
    }

    pub fn is_only(&self) -> bool {
        self.only
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn body(&self) -> Arc<dyn TestBody> {
        Arc::clone(&self.body)
    }
}

/// `@word` tokens inside a test title
pub fn extract_title_tags(title: &str) -> Vec<String> {
    title
        .split_whitespace()
        .filter_map(|word| word.strip_prefix('@'))
        .map(|tag| tag.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')))
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ordered collection of registered tests
#[derive(Debug, Default)]
pub struct TestRegistry {
    cases: Vec<Arc<TestCase>>,
    ids: HashSet<TestId>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test, rejecting a duplicate `(suite path, name)`
    pub fn register(&mut self, case: TestCase) -> E2eResult<()> {
        if !self.ids.insert(case.id.clone()) {
            return Err(E2eError::DuplicateTest(case.id.to_string()));
        }
        debug!("Registered test: {}", case.id);
        self.cases.push(Arc::new(case));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn cases(&self) -> &[Arc<TestCase>] {
        &self.cases
    }

    pub fn has_focused(&self) -> bool {
        self.cases.iter().any(|c| c.only)
    }

    /// Fail if focused tests exist while they are forbidden
    pub fn check_focus(&self, forbid_only: bool) -> E2eResult<()> {
        if !forbid_only {
            return Ok(());
        }
        let focused: Vec<String> = self
            .cases
            .iter()
            .filter(|c| c.only)
            .map(|c| c.id.to_string())
            .collect();
        if focused.is_empty() {
            Ok(())
        } else {
            Err(E2eError::InvalidConfig(format!(
                "focused tests are forbidden: {}",
                focused.join(", ")
            )))
        }
    }

    /// Tests whose tags satisfy `expr`, in registration order. When any test
    /// is focused, only focused tests are candidates.
    pub fn select(&self, expr: &TagExpression) -> Vec<Arc<TestCase>> {
        let focused = self.has_focused();
        self.cases
            .iter()
            .filter(|c| !focused || c.only)
            .filter(|c| expr.matches(&c.tags))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn TestBody> {
        body_fn(|_| Box::pin(async { Ok(()) }))
    }

    fn case(name: &str) -> TestCase {
        TestCase::new(TestId::new(["Todo"], name), noop())
    }

    #[test]
    fn test_title_tags_are_extracted() {
        let c = case("should add a new todo item @smoke @crud").with_tags(["@regression", "smoke"]);
        assert_eq!(c.tags(), &["smoke", "crud", "regression"]);
        assert_eq!(extract_title_tags("plain title"), Vec::<String>::new());
        assert_eq!(extract_title_tags("edge @smoke, done"), vec!["smoke"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = TestRegistry::new();
        registry.register(case("adds")).unwrap();
        registry
            .register(TestCase::new(TestId::new(["Other"], "adds"), noop()))
            .unwrap();
        let err = registry.register(case("adds")).unwrap_err();
        assert!(matches!(err, E2eError::DuplicateTest(id) if id == "Todo > adds"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_select_preserves_registration_order() {
        let mut registry = TestRegistry::new();
        for name in ["zeta @smoke", "alpha @smoke @regression", "mid", "beta @smoke"] {
            registry.register(case(name)).unwrap();
        }

        let expr = TagExpression::include_exclude(["smoke"], ["regression"]);
        let names: Vec<_> = registry
            .select(&expr)
            .iter()
            .map(|c| c.id().name.clone())
            .collect();
        assert_eq!(names, vec!["zeta @smoke", "beta @smoke"]);

        // Pure: same input, same output
        let again: Vec<_> = registry.select(&expr).iter().map(|c| c.id().clone()).collect();
        assert_eq!(again.len(), 2);
        assert_eq!(registry.select(&TagExpression::all()).len(), 4);
    }

    #[test]
    fn test_focus() {
        let mut registry = TestRegistry::new();
        registry.register(case("one")).unwrap();
        registry.register(case("two").only()).unwrap();

        let selected = registry.select(&TagExpression::all());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id().name, "two");

        assert!(registry.check_focus(false).is_ok());
        assert!(matches!(registry.check_focus(true), Err(E2eError::InvalidConfig(_))));
    }

    #[test]
    fn test_id_display() {
        let id = TestId::new(["login.yaml", "Login Flow"], "accepts input");
        assert_eq!(id.to_string(), "login.yaml > Login Flow > accepts input");
        assert_eq!(TestId::new(Vec::<String>::new(), "bare").to_string(), "bare");
    }
}
