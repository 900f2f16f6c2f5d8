//! Top-level runner: configuration, registry and provider in, report out

use gauntlet_common::RunConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::ContextProvider;
use crate::error::E2eResult;
use crate::events::EventSender;
use crate::matrix::{ProjectMatrix, WorkItem};
use crate::registry::{TestCase, TestRegistry};
use crate::report::Report;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::spec;
use crate::tags::TagExpression;

/// Main test runner
pub struct TestRunner {
    config: RunConfig,
    registry: TestRegistry,
    provider: Arc<dyn ContextProvider>,
    /// Restrict the matrix to these projects (all when empty)
    project_filter: Vec<String>,
    events: Option<EventSender>,
}

impl TestRunner {
    pub fn new(config: RunConfig, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            config,
            registry: TestRegistry::new(),
            provider,
            project_filter: Vec::new(),
            events: None,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    pub fn register(&mut self, case: TestCase) -> E2eResult<()> {
        self.registry.register(case)
    }

    /// Register every YAML suite under `dir`
    pub fn load_specs(&mut self, dir: &Path) -> E2eResult<usize> {
        spec::register_dir(dir, &mut self.registry)
    }

    pub fn only_projects(mut self, names: Vec<String>) -> Self {
        self.project_filter = names;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate configuration and expand the selected tests into work items.
    ///
    /// Every error here is a configuration error; nothing has run yet.
    pub fn plan(&self) -> E2eResult<Vec<WorkItem>> {
        self.config.validate()?;
        let expr = TagExpression::parse(self.config.tag_expression.as_deref().unwrap_or(""))?;
        self.registry.check_focus(self.config.forbid_only)?;

        let matrix = ProjectMatrix::from_config(&self.config)?.retain_named(&self.project_filter)?;
        let tests = self.registry.select(&expr);
        debug!(
            "Selected {} of {} tests with '{}'",
            tests.len(),
            self.registry.len(),
            expr
        );

        let items = matrix.expand(&tests);
        info!(
            "Planned {} work items ({} tests x {} projects)",
            items.len(),
            tests.len(),
            matrix.len()
        );
        Ok(items)
    }

    /// Plan and run. Configuration errors are returned before anything runs;
    /// engine failures during the run are carried in the report.
    pub async fn run(&self) -> E2eResult<Report> {
        let items = self.plan()?;
        let mut scheduler = Scheduler::new(
            SchedulerConfig::from_run_config(&self.config)?,
            Arc::clone(&self.provider),
        );
        if let Some(events) = &self.events {
            scheduler = scheduler.with_events(events.clone());
        }
        Ok(scheduler.run(items).await)
    }

    /// Write the report as `results.json` under the configured output directory
    pub fn write_results(&self, report: &Report) -> E2eResult<PathBuf> {
        report.write_json(&self.config.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AttemptInfo, ExecutionContext};
    use crate::error::E2eError;
    use crate::registry::{body_fn, TestId};
    use async_trait::async_trait;
    use gauntlet_common::{Browser, Project};

    struct NoProvider;

    #[async_trait]
    impl ContextProvider for NoProvider {
        async fn provision(
            &self,
            project: &Project,
            _attempt: &AttemptInfo,
        ) -> E2eResult<Box<dyn ExecutionContext>> {
            Err(E2eError::Provision {
                project: project.name.clone(),
                reason: "not available in unit tests".into(),
            })
        }
    }

    fn runner(config: RunConfig) -> TestRunner {
        let mut runner = TestRunner::new(config, Arc::new(NoProvider));
        for (name, tags) in [("login @smoke", vec![]), ("cleanup", vec!["regression"])] {
            runner
                .register(
                    TestCase::new(TestId::new(["app"], name), body_fn(|_| Box::pin(async { Ok(()) })))
                        .with_tags(tags),
                )
                .unwrap();
        }
        runner
    }

    fn config() -> RunConfig {
        RunConfig {
            projects: vec![
                Project::new("chromium", Browser::Chromium),
                Project::new("firefox", Browser::Firefox),
            ],
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_plan_applies_tags_and_project_filter() {
        let mut cfg = config();
        cfg.tag_expression = Some("@smoke".into());
        let items = runner(cfg).only_projects(vec!["firefox".into()]).plan().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].project.name, "firefox");
        assert_eq!(items[0].test.id().name, "login @smoke");
    }

    #[test]
    fn test_plan_rejects_bad_configuration() {
        let mut cfg = config();
        cfg.tag_expression = Some("smoke and (".into());
        assert!(matches!(runner(cfg).plan(), Err(E2eError::TagExpression { .. })));

        let mut cfg = config();
        cfg.projects.push(Project::new("chromium", Browser::Webkit));
        assert!(runner(cfg).plan().unwrap_err().is_config_error());
    }

    #[test]
    fn test_forbid_only() {
        let mut cfg = config();
        cfg.forbid_only = true;
        let mut r = runner(cfg);
        r.register(
            TestCase::new(TestId::new(["app"], "focused"), body_fn(|_| Box::pin(async { Ok(()) })))
                .only(),
        )
        .unwrap();
        assert!(matches!(r.plan(), Err(E2eError::InvalidConfig(_))));
    }
}
