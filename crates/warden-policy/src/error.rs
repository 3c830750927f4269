// error.rs — Error types for the policy subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading policies or configuration.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A policy document is not valid JSON or does not match the policy shape.
    #[error("invalid policy document: {source}")]
    InvalidPolicy { source: serde_json::Error },

    /// A configuration file is not valid TOML or has a wrongly-typed field.
    #[error("invalid configuration at {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Reading a policy or configuration file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
