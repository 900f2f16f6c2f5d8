//! Playwright-backed execution contexts
//!
//! A [`PlaywrightSession`] records navigation and interactions and replays them
//! in a freshly generated Node script whenever the test observes the page or an
//! artifact is captured. Every script launches its own browser context, so
//! sessions never share state.

use async_trait::async_trait;
use gauntlet_common::{ArtifactKind, Project};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::attempt::ArtifactRef;
use crate::context::{
    AttemptInfo, ContextProvider, ExecutionContext, Interaction, Observation, Query,
};
use crate::error::{E2eError, E2eResult};

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node executable
    pub node: PathBuf,
    /// Directory whose `node_modules` provides `playwright`
    pub project_dir: PathBuf,
    pub headless: bool,
    /// Upper bound on a single replay script
    pub script_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            headless: true,
            script_timeout: Duration::from_secs(60),
        }
    }
}

pub struct PlaywrightProvider {
    config: PlaywrightConfig,
    installed: OnceCell<()>,
}

impl PlaywrightProvider {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self {
            config,
            installed: OnceCell::new(),
        }
    }

    /// Verify once per provider that node can load playwright
    async fn ensure_installed(&self) -> E2eResult<()> {
        self.installed
            .get_or_try_init(|| async {
                let status = Command::new(&self.config.node)
                    .args(["-e", "require(require.resolve('playwright', { paths: [process.cwd()] }))"])
                    .current_dir(&self.config.project_dir)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                match status {
                    Ok(s) if s.success() => {
                        info!("Playwright available via {}", self.config.node.display());
                        Ok(())
                    }
                    _ => Err(E2eError::PlaywrightNotFound),
                }
            })
            .await
            .map(|_| ())
    }
}

impl Default for PlaywrightProvider {
    fn default() -> Self {
        Self::new(PlaywrightConfig::default())
    }
}

#[async_trait]
impl ContextProvider for PlaywrightProvider {
    async fn provision(
        &self,
        project: &Project,
        attempt: &AttemptInfo,
    ) -> E2eResult<Box<dyn ExecutionContext>> {
        self.ensure_installed()
            .await
            .map_err(|e| E2eError::Provision {
                project: project.name.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Provisioning {} context for {} (attempt {})",
            project.browser, attempt.work_item, attempt.number
        );
        Ok(Box::new(PlaywrightSession {
            config: self.config.clone(),
            project: project.clone(),
            recordings: attempt.recordings.clone(),
            actions: Vec::new(),
        }))
    }
}

/// A recorded page action
#[derive(Debug, Clone)]
enum Action {
    Goto(String),
    Interact(Interaction),
}

pub struct PlaywrightSession {
    config: PlaywrightConfig,
    project: Project,
    recordings: Vec<ArtifactKind>,
    actions: Vec<Action>,
}

/// Last line a replay script prints
#[derive(Debug, Deserialize)]
struct ScriptOutput {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// JSON-quote a string for embedding in generated JavaScript
fn js(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn locator(selector: &str) -> String {
    format!("page.locator({})", js(selector))
}

impl PlaywrightSession {
    fn context_options(&self, video_dir: Option<&Path>) -> Value {
        let mut options = json!({
            "viewport": {
                "width": self.project.viewport.width,
                "height": self.project.viewport.height,
            },
            "deviceScaleFactor": self.project.device_scale_factor,
            "isMobile": self.project.is_mobile,
            "hasTouch": self.project.has_touch,
            "ignoreHTTPSErrors": self.project.ignore_https_errors,
        });
        if let Some(ua) = &self.project.user_agent {
            options["userAgent"] = json!(ua);
        }
        if let Some(dir) = video_dir {
            options["recordVideo"] = json!({ "dir": dir.to_string_lossy() });
        }
        options
    }

    fn action_to_js(action: &Action) -> String {
        match action {
            Action::Goto(url) => format!("    await page.goto({});", js(url)),
            Action::Interact(i) => match i {
                Interaction::Click { selector } => format!("    await {}.click();", locator(selector)),
                Interaction::Fill { selector, value } => {
                    format!("    await {}.fill({});", locator(selector), js(value))
                }
                Interaction::Press {
                    selector: Some(selector),
                    key,
                } => format!("    await {}.press({});", locator(selector), js(key)),
                Interaction::Press { selector: None, key } => {
                    format!("    await page.keyboard.press({});", js(key))
                }
                Interaction::Hover { selector } => format!("    await {}.hover();", locator(selector)),
                Interaction::Check { selector } => format!("    await {}.check();", locator(selector)),
                Interaction::Uncheck { selector } => {
                    format!("    await {}.uncheck();", locator(selector))
                }
                Interaction::Select { selector, value } => {
                    format!("    await {}.selectOption({});", locator(selector), js(value))
                }
            },
        }
    }

    /// JavaScript expression answering `query`; absent elements yield `null`
    fn query_to_js(query: &Query) -> String {
        let first_or_null = |selector: &str, call: &str| {
            format!(
                "((await {l}.count()) > 0 ? await {l}.first().{call} : null)",
                l = locator(selector),
                call = call
            )
        };
        match query {
            Query::Url => "page.url()".to_string(),
            Query::Title => "await page.title()".to_string(),
            Query::Count { selector } => format!("await {}.count()", locator(selector)),
            Query::Text { selector } => first_or_null(selector, "textContent()"),
            Query::Visible { selector } => format!("await {}.first().isVisible()", locator(selector)),
            Query::Attribute { selector, name } => {
                first_or_null(selector, &format!("getAttribute({})", js(name)))
            }
            Query::Value { selector } => first_or_null(selector, "inputValue()"),
            Query::Class { selector } => first_or_null(selector, "getAttribute('class')"),
        }
    }

    /// Replay every recorded action, then evaluate `result` (a JS expression)
    /// or write the requested artifact.
    pub fn build_script(
        &self,
        result: Option<&str>,
        capture: Option<(ArtifactKind, &Path)>,
        video_dir: Option<&Path>,
    ) -> String {
        let tracing = matches!(capture, Some((ArtifactKind::Trace, _)));
        let mut script = format!(
            r#"const pw = require(require.resolve('playwright', {{ paths: [process.cwd()] }}));

(async () => {{
  const browser = await pw.{browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({options});
  const page = await context.newPage();
"#,
            browser = self.project.browser.as_str(),
            headless = self.config.headless,
            options = self.context_options(video_dir),
        );
        if tracing {
            script.push_str("  await context.tracing.start({ screenshots: true, snapshots: true });\n");
        }

        script.push_str("  let out = { ok: true, result: null };\n  try {\n");
        for (i, action) in self.actions.iter().enumerate() {
            script.push_str(&format!("    // {}\n", i + 1));
            script.push_str(&Self::action_to_js(action));
            script.push('\n');
        }
        if let Some(expr) = result {
            script.push_str(&format!("    out.result = {};\n", expr));
        }
        script.push_str(
            "  } catch (error) {\n    out = { ok: false, error: error.message };\n  } finally {\n",
        );

        // Artifacts are written even when the replay itself fails
        match capture {
            Some((ArtifactKind::Screenshot, path)) => script.push_str(&format!(
                "    await page.screenshot({{ path: {}, fullPage: true }}).catch(() => {{}});\n",
                js(&path.to_string_lossy())
            )),
            Some((ArtifactKind::Trace, path)) => script.push_str(&format!(
                "    await context.tracing.stop({{ path: {} }});\n",
                js(&path.to_string_lossy())
            )),
            _ => {}
        }
        script.push_str("    await context.close();\n");
        if let Some((ArtifactKind::Video, path)) = capture {
            script.push_str(&format!(
                "    if (page.video()) await page.video().saveAs({});\n",
                js(&path.to_string_lossy())
            ));
        }
        script.push_str(
            "    await browser.close();\n  }\n  console.log(JSON.stringify(out));\n})();\n",
        );
        script
    }

    async fn run_script(&self, script: &str) -> E2eResult<ScriptOutput> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("replay.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script: {}", script_path.display());

        let child = Command::new(&self.config.node)
            .arg(&script_path)
            .current_dir(&self.config.project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.config.script_timeout, child)
            .await
            .map_err(|_| {
                E2eError::Playwright(format!(
                    "script exceeded {}ms",
                    self.config.script_timeout.as_millis()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout.lines().rev().find(|l| !l.trim().is_empty());
        match last.map(serde_json::from_str::<ScriptOutput>) {
            Some(Ok(out)) => Ok(out),
            _ => Err(E2eError::Playwright(format!(
                "Script failed:\nstdout: {}\nstderr: {}",
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ))),
        }
    }
}

/// Convert a script result into the observation a query expects
fn to_observation(query: &Query, value: Value) -> E2eResult<Observation> {
    let unexpected = || E2eError::Playwright(format!("unexpected result for {}: {}", query, value));
    match query {
        Query::Count { .. } => value
            .as_u64()
            .map(|n| Observation::Count(n as usize))
            .ok_or_else(unexpected),
        Query::Visible { .. } => value.as_bool().map(Observation::Flag).ok_or_else(unexpected),
        _ => match &value {
            Value::Null => Ok(Observation::Text(None)),
            Value::String(s) => Ok(Observation::Text(Some(s.clone()))),
            _ => Err(unexpected()),
        },
    }
}

#[async_trait]
impl ExecutionContext for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.actions.push(Action::Goto(url.to_string()));
        Ok(())
    }

    async fn interact(&mut self, interaction: &Interaction) -> E2eResult<()> {
        self.actions.push(Action::Interact(interaction.clone()));
        Ok(())
    }

    async fn observe(&mut self, query: &Query) -> E2eResult<Observation> {
        let script = self.build_script(Some(&Self::query_to_js(query)), None, None);
        let out = self.run_script(&script).await?;
        if !out.ok {
            return Err(E2eError::Context(out.error.unwrap_or_else(|| "replay failed".into())));
        }
        to_observation(query, out.result)
    }

    async fn capture(&mut self, kind: ArtifactKind, path: &Path) -> E2eResult<ArtifactRef> {
        if kind != ArtifactKind::Screenshot && !self.recordings.contains(&kind) {
            return Err(E2eError::Context(format!("{} was not recorded for this attempt", kind)));
        }
        let video_dir = match kind {
            ArtifactKind::Video => Some(tempfile::tempdir()?),
            _ => None,
        };
        let script = self.build_script(
            None,
            Some((kind, path)),
            video_dir.as_ref().map(|d| d.path()),
        );
        self.run_script(&script).await?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(E2eError::Context(format!("{} not written to {}", kind, path.display())));
        }
        Ok(ArtifactRef {
            kind,
            path: path.to_path_buf(),
        })
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.actions.clear();
        Ok(())
    }
}
