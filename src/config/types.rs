//! Configuration type definitions.

use crate::modules::waf::WafConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root of `tollgate.toml`. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Diagnostic log output.
    pub logging: LoggingConfig,

    /// Deadline, failure policy, bypass list and audit queue.
    pub waf: WafConfig,

    /// Where targets, payloads and firewall rules come from.
    pub rules: RulesConfig,
}

/// Diagnostic log output of the binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: LogLevel,

    /// Line format.
    pub format: LogFormat,
}

/// Minimum level of emitted diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including dependency crates' trace output.
    Trace,
    /// Per-request detail: bypasses, matches, state changes.
    Debug,
    /// Verdicts and startup.
    #[default]
    Info,
    /// Malformed bodies, dropped audit records.
    Warn,
    /// Fatal startup errors only.
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Line format of diagnostics. Audit records are JSON regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line, colored.
    #[default]
    Pretty,
    /// Single line.
    Compact,
}

/// Rule store location.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RulesConfig {
    /// TOML file with targets, payloads and firewall rules. Relative paths
    /// resolve against the configuration file's directory.
    pub path: Option<PathBuf>,
}
