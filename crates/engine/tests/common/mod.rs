//! In-memory execution contexts for driving the scheduler in tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use gauntlet_common::{ArtifactKind, ArtifactPolicy, Browser, Project};
use gauntlet_engine::context::{
    AttemptInfo, ContextProvider, ExecutionContext, Interaction, Observation, Query,
};
use gauntlet_engine::{
    body_fn, ArtifactRef, E2eError, E2eResult, ProjectMatrix, SchedulerConfig, TestCase,
    TestContext, TestFailure, TestId, WorkItem,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const INPUT: &str = r#"[data-testid="todo-input"]"#;
pub const ITEM: &str = r#"[data-testid="todo-item"]"#;

/// Hands out [`TodoPage`]s and counts their lifecycle
#[derive(Default)]
pub struct FakeProvider {
    pub provisioned: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    /// 1-based provisioning call that fails
    pub fail_on: Option<usize>,
    /// 1-based provisioning call that never completes
    pub hang_on: Option<usize>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(call),
            ..Self::default()
        })
    }

    pub fn hanging_on(call: usize) -> Arc<Self> {
        Arc::new(Self {
            hang_on: Some(call),
            ..Self::default()
        })
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextProvider for FakeProvider {
    async fn provision(
        &self,
        project: &Project,
        attempt: &AttemptInfo,
    ) -> E2eResult<Box<dyn ExecutionContext>> {
        let call = self.provisioned.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on == Some(call) {
            std::future::pending::<()>().await;
        }
        if self.fail_on == Some(call) {
            return Err(E2eError::Provision {
                project: project.name.clone(),
                reason: "browser crashed on launch".into(),
            });
        }
        Ok(Box::new(TodoPage {
            recordings: attempt.recordings.clone(),
            closed: Arc::clone(&self.closed),
            ..TodoPage::default()
        }))
    }
}

/// Minimal todo list: an input that adds an item on Enter
#[derive(Default)]
pub struct TodoPage {
    url: Option<String>,
    input: String,
    items: Vec<String>,
    recordings: Vec<ArtifactKind>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ExecutionContext for TodoPage {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn interact(&mut self, interaction: &Interaction) -> E2eResult<()> {
        match interaction {
            Interaction::Fill { selector, value } if selector == INPUT => {
                self.input = value.clone();
                Ok(())
            }
            Interaction::Press {
                selector: Some(selector),
                key,
            } if selector == INPUT && key == "Enter" => {
                let text = self.input.trim().to_string();
                if !text.is_empty() {
                    self.items.push(text);
                }
                self.input.clear();
                Ok(())
            }
            other => Err(E2eError::Context(format!("no element for {}", other))),
        }
    }

    async fn observe(&mut self, query: &Query) -> E2eResult<Observation> {
        Ok(match query {
            Query::Url => Observation::Text(self.url.clone()),
            Query::Title => Observation::Text(Some("Todo".into())),
            Query::Count { selector } if selector == ITEM => Observation::Count(self.items.len()),
            Query::Count { .. } => Observation::Count(0),
            Query::Text { selector } if selector == ITEM => Observation::Text(self.items.first().cloned()),
            Query::Visible { selector } if selector == INPUT => Observation::Flag(self.url.is_some()),
            Query::Visible { selector } if selector == ITEM => Observation::Flag(!self.items.is_empty()),
            Query::Value { selector } if selector == INPUT => Observation::Text(Some(self.input.clone())),
            Query::Visible { .. } => Observation::Flag(false),
            _ => Observation::Text(None),
        })
    }

    async fn capture(&mut self, kind: ArtifactKind, path: &Path) -> E2eResult<ArtifactRef> {
        if kind != ArtifactKind::Screenshot && !self.recordings.contains(&kind) {
            return Err(E2eError::Context(format!("{} was not recorded", kind)));
        }
        std::fs::write(path, kind.to_string())?;
        Ok(ArtifactRef {
            kind,
            path: path.to_path_buf(),
        })
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn case<F>(name: &str, f: F) -> TestCase
where
    F: for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), TestFailure>>
        + Send
        + Sync
        + 'static,
{
    TestCase::new(TestId::new(["scheduler"], name), body_fn(f))
}

pub fn passing(name: &str) -> TestCase {
    case(name, |_| Box::pin(async { Ok(()) }))
}

pub fn failing(name: &str) -> TestCase {
    case(name, |_| {
        Box::pin(async { Err(TestFailure::assertion("expected 1 item, found 0")) })
    })
}

/// Fails until attempt `passes_on`, then passes
pub fn flaky(name: &str, passes_on: u32) -> TestCase {
    case(name, move |t| {
        Box::pin(async move {
            if t.attempt().number < passes_on {
                Err(TestFailure::assertion("not yet"))
            } else {
                Ok(())
            }
        })
    })
}

pub fn expand(cases: Vec<TestCase>, projects: &[&str]) -> Vec<WorkItem> {
    let projects = projects
        .iter()
        .map(|n| Project::new(*n, Browser::Chromium))
        .collect();
    let cases: Vec<_> = cases.into_iter().map(Arc::new).collect();
    ProjectMatrix::new(projects).unwrap().expand(&cases)
}

/// Serial scheduler with artifacts off, writing under `dir`
pub fn config(dir: &Path) -> SchedulerConfig {
    SchedulerConfig {
        parallelism: 1,
        output_dir: dir.to_path_buf(),
        artifacts: ArtifactPolicy::off(),
        ..SchedulerConfig::default()
    }
}
