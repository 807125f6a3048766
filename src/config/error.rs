//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("cannot read '{path}': {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file could not be written.
    #[error("cannot write '{path}': {source}")]
    Write {
        /// File being written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML or an unknown enum value.
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Well-formed settings that fail validation.
    #[error("invalid settings: {0}")]
    Invalid(String),

    /// No file at the given path.
    #[error("settings file not found: {0}")]
    NotFound(PathBuf),

    /// The rule store named by `rules.path` could not be loaded.
    #[error("cannot load rules from '{path}': {message}")]
    Rules {
        /// Rule store path, resolved.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// Settings could not be rendered back to TOML.
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
