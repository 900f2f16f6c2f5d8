//! Error types for Gauntlet configuration

use thiserror::Error;

/// Result type alias using the common configuration Error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and setup errors. All of these are fatal to a run and are
/// reported before any attempt starts.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Duplicate project: {0}")]
    DuplicateProject(String),

    #[error("Unknown device preset: {0}")]
    UnknownDevice(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
