//! Gauntlet Common Library
//!
//! Shared project types, device presets and run configuration used by the
//! engine and the command-line runner.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{ArtifactPolicy, RecordingMode, RunConfig, ScreenshotMode};
pub use error::{Error, Result};
pub use types::*;

/// Gauntlet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "gauntlet.toml";
