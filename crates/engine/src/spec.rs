//! Declarative YAML test suites
//!
//! A suite file holds shared `before_each` steps and a list of tests. Each test
//! becomes a [`TestCase`] whose body replays its steps against the attempt's
//! execution context; `expect` steps poll through [`crate::expect::wait_for`].

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::context::{Interaction, Query, TestContext, TestFailure};
use crate::error::{E2eError, E2eResult};
use crate::expect::Matcher;
use crate::registry::{TestBody, TestCase, TestId, TestRegistry};

/// One suite file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSpec {
    /// Suite title; follows the file name in every test id
    pub suite: String,

    #[serde(default)]
    pub description: String,

    /// Tags applied to every test in the suite
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps run before each test's own steps
    #[serde(default)]
    pub before_each: Vec<Step>,

    pub tests: Vec<TestSpec>,

    /// File the suite was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// File name relative to the spec directory, `/`-separated. Leads the
    /// test ids so equal titles in different files stay distinct.
    #[serde(skip)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub skip_reason: Option<String>,

    #[serde(default)]
    pub only: bool,

    /// Projects on which the test skips itself at runtime
    #[serde(default)]
    pub skip_projects: Vec<String>,

    pub steps: Vec<Step>,
}

/// A single step in a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate to a URL (relative to the project's base URL)
    Navigate { url: String },

    Click { selector: String },

    Fill { selector: String, value: String },

    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    Hover { selector: String },

    Check { selector: String },

    Uncheck { selector: String },

    Select { selector: String, value: String },

    /// Poll until every given condition holds
    Expect(Box<ExpectStep>),

    /// Save a named screenshot into the attempt's artifact directory
    Screenshot { name: String },

    /// Fixed wait (use sparingly)
    Sleep { ms: u64 },

    Log { message: String },
}

/// Conditions of an `expect` step. Either `selector` or `url_matches` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectStep {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub url_matches: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_contains: Option<String>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub attribute: Option<AttributeExpectation>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub class_matches: Option<String>,
    /// Overrides the project's expect timeout for this step
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeExpectation {
    pub name: String,
    pub value: String,
}

impl ExpectStep {
    /// Lower to (query, matcher) pairs, checked in order
    pub fn checks(&self) -> E2eResult<Vec<(Query, Matcher)>> {
        let mut checks = Vec::new();

        if let Some(pattern) = &self.url_matches {
            checks.push((Query::Url, Matcher::Matches(Regex::new(pattern)?)));
        }

        if let Some(selector) = &self.selector {
            let sel = || selector.clone();
            if let Some(n) = self.count {
                checks.push((Query::Count { selector: sel() }, Matcher::Count(n)));
            }
            if let Some(visible) = self.visible {
                checks.push((Query::Visible { selector: sel() }, Matcher::Visible(visible)));
            }
            if let Some(text) = &self.text {
                checks.push((Query::Text { selector: sel() }, Matcher::Text(text.clone())));
            }
            if let Some(text) = &self.text_contains {
                checks.push((
                    Query::Text { selector: sel() },
                    Matcher::ContainsText(text.clone()),
                ));
            }
            if let Some(attr) = &self.attribute {
                checks.push((
                    Query::Attribute {
                        selector: sel(),
                        name: attr.name.clone(),
                    },
                    Matcher::Text(attr.value.clone()),
                ));
            }
            if let Some(value) = &self.value {
                checks.push((Query::Value { selector: sel() }, Matcher::Text(value.clone())));
            }
            if let Some(pattern) = &self.class_matches {
                checks.push((
                    Query::Class { selector: sel() },
                    Matcher::Matches(Regex::new(pattern)?),
                ));
            }
            if checks.is_empty() {
                // Bare selector: wait for it to show up
                checks.push((Query::Visible { selector: sel() }, Matcher::Visible(true)));
            }
        }

        if checks.is_empty() {
            return Err(E2eError::SpecParse(
                "expect step needs a selector or url_matches".into(),
            ));
        }
        Ok(checks)
    }
}

impl Step {
    fn validate(&self) -> E2eResult<()> {
        if let Step::Expect(expect) = self {
            expect.checks()?;
        }
        Ok(())
    }

    /// Short label for logs
    pub fn label(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate:{}", url),
            Step::Click { selector } => format!("click:{}", selector),
            Step::Fill { selector, .. } => format!("fill:{}", selector),
            Step::Press { key, .. } => format!("press:{}", key),
            Step::Hover { selector } => format!("hover:{}", selector),
            Step::Check { selector } => format!("check:{}", selector),
            Step::Uncheck { selector } => format!("uncheck:{}", selector),
            Step::Select { selector, .. } => format!("select:{}", selector),
            Step::Expect(e) => match (&e.selector, &e.url_matches) {
                (Some(s), _) => format!("expect:{}", s),
                (None, Some(u)) => format!("expect:url~{}", u),
                (None, None) => "expect".to_string(),
            },
            Step::Screenshot { name } => format!("screenshot:{}", name),
            Step::Sleep { ms } => format!("sleep:{}ms", ms),
            Step::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
        }
    }

    async fn execute(&self, t: &mut TestContext) -> Result<(), TestFailure> {
        match self {
            Step::Navigate { url } => t.navigate(url).await,
            Step::Click { selector } => t.click(selector).await,
            Step::Fill { selector, value } => t.fill(selector, value).await,
            Step::Press { selector, key } => t.press(selector.as_deref(), key).await,
            Step::Hover { selector } => {
                t.interact(Interaction::Hover {
                    selector: selector.clone(),
                })
                .await
            }
            Step::Check { selector } => {
                t.interact(Interaction::Check {
                    selector: selector.clone(),
                })
                .await
            }
            Step::Uncheck { selector } => {
                t.interact(Interaction::Uncheck {
                    selector: selector.clone(),
                })
                .await
            }
            Step::Select { selector, value } => {
                t.interact(Interaction::Select {
                    selector: selector.clone(),
                    value: value.clone(),
                })
                .await
            }
            Step::Expect(expect) => {
                let options = match expect.timeout_ms {
                    Some(ms) => t.expect_options().with_timeout(Duration::from_millis(ms)),
                    None => t.expect_options(),
                };
                for (query, matcher) in expect.checks().map_err(TestFailure::from)? {
                    t.expect_within(query, matcher, options).await?;
                }
                Ok(())
            }
            Step::Screenshot { name } => t.screenshot(name).await.map(|_| ()),
            Step::Sleep { ms } => t.sleep(Duration::from_millis(*ms)).await,
            Step::Log { message } => {
                info!("[TEST LOG] {}", message);
                Ok(())
            }
        }
    }
}

/// Body of a YAML test: `before_each` followed by the test's own steps
struct StepsBody {
    steps: Vec<Step>,
    skip_projects: Vec<String>,
}

#[async_trait]
impl TestBody for StepsBody {
    async fn run(&self, t: &mut TestContext) -> Result<(), TestFailure> {
        if self.skip_projects.iter().any(|p| p == &t.project().name) {
            return Err(t.skip(format!("not run on {}", t.project().name)));
        }
        for (i, step) in self.steps.iter().enumerate() {
            debug!("Step {}: {}", i + 1, step.label());
            step.execute(t).await?;
        }
        Ok(())
    }
}

impl SuiteSpec {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let suite: Self = serde_yaml::from_str(yaml)?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut suite = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        suite.source = Some(path.to_path_buf());
        suite.file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(suite)
    }

    /// Load every `.yaml`/`.yml` suite under `dir`, in sorted path order
    pub fn load_dir(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "spec directory not found: {}",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                let mut suite = Self::from_file(path)?;
                if let Ok(relative) = path.strip_prefix(dir) {
                    let parts: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    suite.file = Some(parts.join("/"));
                }
                Ok(suite)
            })
            .collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.suite.trim().is_empty() {
            return Err(E2eError::SpecParse("suite title must not be empty".into()));
        }
        for step in &self.before_each {
            step.validate()?;
        }
        for test in &self.tests {
            if test.name.trim().is_empty() {
                return Err(E2eError::SpecParse(format!(
                    "test without a name in suite '{}'",
                    self.suite
                )));
            }
            for step in &test.steps {
                step.validate()?;
            }
        }
        Ok(())
    }

    /// Build the suite's test cases in file order
    pub fn test_cases(&self) -> Vec<TestCase> {
        self.tests
            .iter()
            .map(|spec| {
                let steps = self
                    .before_each
                    .iter()
                    .chain(spec.steps.iter())
                    .cloned()
                    .collect();
                let body = Arc::new(StepsBody {
                    steps,
                    skip_projects: spec.skip_projects.clone(),
                });

                let suite_path = self.file.iter().chain([&self.suite]).cloned();
                let mut case = TestCase::new(TestId::new(suite_path, spec.name.clone()), body)
                    .with_tags(self.tags.iter().chain(spec.tags.iter()).cloned());
                if spec.skip {
                    case = case.skip(spec.skip_reason.clone().unwrap_or_else(|| "skipped".into()));
                }
                if spec.only {
                    case = case.only();
                }
                if let Some(source) = &self.source {
                    case = case.at(source.display().to_string());
                }
                case
            })
            .collect()
    }

    pub fn register_into(&self, registry: &mut TestRegistry) -> E2eResult<usize> {
        let cases = self.test_cases();
        let count = cases.len();
        for case in cases {
            registry.register(case)?;
        }
        Ok(count)
    }
}

/// Load and register every suite under `dir`. Returns the number of tests.
pub fn register_dir(dir: &Path, registry: &mut TestRegistry) -> E2eResult<usize> {
    let mut total = 0;
    for suite in SuiteSpec::load_dir(dir)? {
        total += suite.register_into(registry)?;
    }
    info!("Loaded {} tests from {}", total, dir.display());
    Ok(total)
}
