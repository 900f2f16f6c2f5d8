//! Core types for Gauntlet projects and devices

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Browser and viewport
// ============================================================================

/// Browser engine a project runs against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Browser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(Error::InvalidConfig(format!("unknown browser: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport { width: 1280, height: 720 }
    }
}

// ============================================================================
// Device presets
// ============================================================================

/// Emulation profile for a named device
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePreset {
    pub name: &'static str,
    pub browser: Browser,
    pub viewport: Viewport,
    pub user_agent: &'static str,
    pub device_scale_factor: f32,
    pub is_mobile: bool,
    pub has_touch: bool,
}

const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DESKTOP_FIREFOX_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";
const DESKTOP_SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";
const PIXEL_5_UA: &str = "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
const IPHONE_12_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Mobile/15E148 Safari/604.1";

const DEVICE_PRESETS: &[DevicePreset] = &[
    DevicePreset {
        name: "Desktop Chrome",
        browser: Browser::Chromium,
        viewport: Viewport { width: 1280, height: 720 },
        user_agent: DESKTOP_CHROME_UA,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    },
    DevicePreset {
        name: "Desktop Firefox",
        browser: Browser::Firefox,
        viewport: Viewport { width: 1280, height: 720 },
        user_agent: DESKTOP_FIREFOX_UA,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    },
    DevicePreset {
        name: "Desktop Safari",
        browser: Browser::Webkit,
        viewport: Viewport { width: 1280, height: 720 },
        user_agent: DESKTOP_SAFARI_UA,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    },
    DevicePreset {
        name: "Pixel 5",
        browser: Browser::Chromium,
        viewport: Viewport { width: 393, height: 851 },
        user_agent: PIXEL_5_UA,
        device_scale_factor: 2.75,
        is_mobile: true,
        has_touch: true,
    },
    DevicePreset {
        name: "iPhone 12",
        browser: Browser::Webkit,
        viewport: Viewport { width: 390, height: 844 },
        user_agent: IPHONE_12_UA,
        device_scale_factor: 3.0,
        is_mobile: true,
        has_touch: true,
    },
];

impl DevicePreset {
    /// Look up a preset by its display name (case-insensitive)
    pub fn lookup(name: &str) -> Result<&'static DevicePreset> {
        DEVICE_PRESETS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))
    }

    pub fn all() -> &'static [DevicePreset] {
        DEVICE_PRESETS
    }
}

// ============================================================================
// Projects
// ============================================================================

/// A named target environment: browser engine, viewport, device emulation and
/// environment-level overrides of the run defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,

    #[serde(default)]
    pub browser: Browser,

    #[serde(default)]
    pub viewport: Viewport,

    /// Device preset this project was derived from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f32,

    #[serde(default)]
    pub is_mobile: bool,

    #[serde(default)]
    pub has_touch: bool,

    /// Overrides the run-level base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Overrides the run-level per-attempt timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Overrides the run-level expectation timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_timeout_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub ignore_https_errors: bool,
}

fn default_scale_factor() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Project {
    /// Plain desktop project for the given browser
    pub fn new(name: impl Into<String>, browser: Browser) -> Self {
        Self {
            name: name.into(),
            browser,
            viewport: Viewport::default(),
            device: None,
            user_agent: None,
            device_scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
            base_url: None,
            timeout_ms: None,
            expect_timeout_ms: None,
            ignore_https_errors: true,
        }
    }

    /// Project emulating a named device preset
    pub fn from_device(name: impl Into<String>, device: &str) -> Result<Self> {
        let preset = DevicePreset::lookup(device)?;
        Ok(Self {
            device: Some(preset.name.to_string()),
            viewport: preset.viewport,
            user_agent: Some(preset.user_agent.to_string()),
            device_scale_factor: preset.device_scale_factor,
            is_mobile: preset.is_mobile,
            has_touch: preset.has_touch,
            ..Self::new(name, preset.browser)
        })
    }

    /// Fill device fields from the named preset, keeping explicit overrides.
    /// Used for projects loaded from config that only name a device.
    pub fn resolve_device(mut self) -> Result<Self> {
        let Some(device) = self.device.clone() else {
            return Ok(self);
        };
        let preset = DevicePreset::lookup(&device)?;
        self.browser = preset.browser;
        if self.viewport == Viewport::default() {
            self.viewport = preset.viewport;
        }
        if self.user_agent.is_none() {
            self.user_agent = Some(preset.user_agent.to_string());
        }
        self.device_scale_factor = preset.device_scale_factor;
        self.is_mobile = preset.is_mobile;
        self.has_touch = preset.has_touch;
        Ok(self)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("project name must not be empty".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "project '{}' has an empty viewport",
                self.name
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(format!(
                "project '{}' has a zero timeout",
                self.name
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn expect_timeout(&self) -> Option<Duration> {
        self.expect_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve a possibly relative URL against the project (or fallback) base URL
    pub fn resolve_url(&self, fallback_base: Option<&str>, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("about:") {
            return url.to_string();
        }
        match self.base_url.as_deref().or(fallback_base) {
            Some(base) => {
                let base = base.trim_end_matches('/');
                if url.is_empty() || url == "/" {
                    format!("{}/", base)
                } else if url.starts_with('/') || url.starts_with('#') || url.starts_with('?') {
                    format!("{}{}", base, url)
                } else {
                    format!("{}/{}", base, url)
                }
            }
            None => url.to_string(),
        }
    }
}

/// The desktop + mobile matrix used when no projects are configured
pub fn default_projects() -> Vec<Project> {
    vec![
        Project::from_device("chromium", "Desktop Chrome"),
        Project::from_device("firefox", "Desktop Firefox"),
        Project::from_device("webkit", "Desktop Safari"),
        Project::from_device("mobile-chrome", "Pixel 5"),
        Project::from_device("mobile-safari", "iPhone 12"),
    ]
    .into_iter()
    .collect::<Result<Vec<_>>>()
    .unwrap_or_default()
}

// ============================================================================
// Artifacts
// ============================================================================

/// Kind of diagnostic artifact an execution context can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Screenshot,
    Trace,
    Video,
}

impl ArtifactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshot.png",
            ArtifactKind::Trace => "trace.zip",
            ArtifactKind::Video => "video.webm",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Screenshot => f.write_str("screenshot"),
            ArtifactKind::Trace => f.write_str("trace"),
            ArtifactKind::Video => f.write_str("video"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lookup_is_case_insensitive() {
        let preset = DevicePreset::lookup("iphone 12").unwrap();
        assert_eq!(preset.browser, Browser::Webkit);
        assert!(preset.is_mobile);
        assert!(DevicePreset::lookup("Nokia 3310").is_err());
    }

    #[test]
    fn test_default_projects() {
        let projects = default_projects();
        let names: Vec<_> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["chromium", "firefox", "webkit", "mobile-chrome", "mobile-safari"]
        );
        assert_eq!(projects[3].viewport, Viewport { width: 393, height: 851 });
    }

    #[test]
    fn test_resolve_device_keeps_overrides() {
        let mut project = Project::new("tablet", Browser::Firefox);
        project.device = Some("Pixel 5".into());
        project.user_agent = Some("custom".into());
        let project = project.resolve_device().unwrap();
        assert_eq!(project.browser, Browser::Chromium);
        assert_eq!(project.user_agent.as_deref(), Some("custom"));
        assert!(project.has_touch);
    }

    #[test]
    fn test_resolve_url() {
        let project = Project::new("chromium", Browser::Chromium);
        let base = Some("https://demo.playwright.dev/todomvc");
        assert_eq!(project.resolve_url(base, "/"), "https://demo.playwright.dev/todomvc/");
        assert_eq!(project.resolve_url(base, "#/active"), "https://demo.playwright.dev/todomvc#/active");
        assert_eq!(project.resolve_url(base, "https://example.com"), "https://example.com");

        let project = project.with_base_url("http://localhost:3000/");
        assert_eq!(project.resolve_url(base, "/login"), "http://localhost:3000/login");
    }

    #[test]
    fn test_project_validate() {
        assert!(Project::new("", Browser::Chromium).validate().is_err());
        assert!(Project::new("ok", Browser::Chromium).validate().is_ok());
        let zero = Project::new("zero", Browser::Chromium).with_timeout(Duration::ZERO);
        assert!(zero.validate().is_err());
    }
}
