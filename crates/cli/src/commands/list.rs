//! Listing commands: planned work items, projects and device presets

use anyhow::Result;
use clap::Args;
use gauntlet_common::{DevicePreset, Project, RunConfig};
use gauntlet_engine::report::EXIT_ENGINE_ERROR;
use gauntlet_engine::{E2eError, E2eResult, ExecutionContext, TestRunner, WorkItem};
use gauntlet_engine::{AttemptInfo, ContextProvider};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::{load_config, SelectionArgs};
use crate::output::{self, print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Listing never provisions anything
struct NoProvider;

#[async_trait::async_trait]
impl ContextProvider for NoProvider {
    async fn provision(
        &self,
        project: &Project,
        _attempt: &AttemptInfo,
    ) -> E2eResult<Box<dyn ExecutionContext>> {
        Err(E2eError::Provision {
            project: project.name.clone(),
            reason: "listing only".into(),
        })
    }
}

#[derive(Serialize)]
struct WorkItemRow {
    index: usize,
    project: String,
    test: String,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip: Option<String>,
}

impl From<&WorkItem> for WorkItemRow {
    fn from(item: &WorkItem) -> Self {
        Self {
            index: item.index,
            project: item.project.name.clone(),
            test: item.test.id().to_string(),
            tags: item.test.tags().to_vec(),
            skip: item.test.skip_reason().map(str::to_string),
        }
    }
}

impl TableDisplay for WorkItemRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Project", "Test", "Tags", "Skip"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.project.clone(),
            self.test.clone(),
            self.tags.join(", "),
            self.skip.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Serialize)]
struct ProjectRow {
    name: String,
    browser: String,
    viewport: String,
    device: Option<String>,
    mobile: bool,
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

impl From<&Project> for ProjectRow {
    fn from(p: &Project) -> Self {
        Self {
            name: p.name.clone(),
            browser: p.browser.to_string(),
            viewport: format!("{}x{}", p.viewport.width, p.viewport.height),
            device: p.device.clone(),
            mobile: p.is_mobile,
            base_url: p.base_url.clone(),
            timeout_ms: p.timeout_ms,
        }
    }
}

impl TableDisplay for ProjectRow {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Browser", "Viewport", "Device", "Mobile", "Base URL", "Timeout"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.browser.clone(),
            self.viewport.clone(),
            self.device.clone().unwrap_or_else(|| "-".into()),
            if self.mobile { "yes" } else { "no" }.into(),
            self.base_url.clone().unwrap_or_else(|| "-".into()),
            self.timeout_ms
                .map(|t| format!("{}ms", t))
                .unwrap_or_else(|| "-".into()),
        ]
    }
}

#[derive(Serialize)]
struct DeviceRow {
    name: &'static str,
    browser: String,
    viewport: String,
    scale: f32,
    mobile: bool,
    touch: bool,
}

impl From<&DevicePreset> for DeviceRow {
    fn from(d: &DevicePreset) -> Self {
        Self {
            name: d.name,
            browser: d.browser.to_string(),
            viewport: format!("{}x{}", d.viewport.width, d.viewport.height),
            scale: d.device_scale_factor,
            mobile: d.is_mobile,
            touch: d.has_touch,
        }
    }
}

impl TableDisplay for DeviceRow {
    fn headers() -> Vec<&'static str> {
        vec!["Device", "Browser", "Viewport", "Scale", "Mobile", "Touch"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.to_string(),
            self.browser.clone(),
            self.viewport.clone(),
            self.scale.to_string(),
            self.mobile.to_string(),
            self.touch.to_string(),
        ]
    }
}

pub fn execute(args: ListArgs, config_path: &Path, format: OutputFormat) -> Result<i32> {
    let config = load_config(config_path, &args.selection)?;
    let mut runner =
        TestRunner::new(config, Arc::new(NoProvider)).only_projects(args.selection.projects);

    let planned = runner
        .load_specs(&args.selection.specs)
        .and_then(|_| runner.plan());
    let items = match planned {
        Ok(items) => items,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(EXIT_ENGINE_ERROR);
        }
    };

    let rows: Vec<WorkItemRow> = items.iter().map(WorkItemRow::from).collect();
    print_list(&rows, format);
    if format == OutputFormat::Table {
        println!("Total: {} work items", rows.len());
    }
    Ok(0)
}

pub fn projects(config_path: &Path, format: OutputFormat) -> Result<i32> {
    let config = RunConfig::load(config_path)?;
    if let Err(e) = config.validate() {
        output::print_warning(&e.to_string());
    }
    let rows: Vec<ProjectRow> = config.projects.iter().map(ProjectRow::from).collect();
    print_list(&rows, format);
    Ok(0)
}

pub fn devices(format: OutputFormat) -> Result<i32> {
    let rows: Vec<DeviceRow> = DevicePreset::all().iter().map(DeviceRow::from).collect();
    print_list(&rows, format);
    Ok(0)
}
