//! WAF configuration types

use super::error::{WafError, WafResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main WAF configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafConfig {
    /// Global deadline covering both inspection phases, in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// How a timed-out or failed inspection is resolved
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Path suffixes of static resources that skip inspection on GET
    #[serde(default = "default_static_suffixes")]
    pub static_suffixes: Vec<String>,

    /// Audit logging configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_true() -> bool {
    true
}

fn default_deadline_ms() -> u64 {
    3 * 60 * 1000
}

fn default_static_suffixes() -> Vec<String> {
    [".js", ".css", ".png", ".jpg", ".gif", ".bmp", ".svg", ".ico"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            failure_policy: FailurePolicy::default(),
            static_suffixes: default_static_suffixes(),
            audit: AuditConfig::default(),
        }
    }
}

impl WafConfig {
    /// Deadline as a `Duration`
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Builder: set the deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = deadline.as_millis() as u64;
        self
    }

    /// Builder: set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Builder: add a static resource suffix
    pub fn with_static_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.static_suffixes.push(suffix.into());
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> WafResult<()> {
        if let Some(bad) = self.static_suffixes.iter().find(|s| !s.starts_with('.')) {
            return Err(WafError::InvalidConfig(format!(
                "static suffix '{}' must start with '.'",
                bad
            )));
        }

        if self.audit.queue_capacity == 0 {
            return Err(WafError::InvalidConfig(
                "audit.queue_capacity must be greater than zero".to_string(),
            ));
        }

        if self.audit.backpressure == Backpressure::BlockWithTimeout
            && self.audit.block_timeout_ms == 0
        {
            return Err(WafError::InvalidConfig(
                "audit.block_timeout_ms must be greater than zero with block_with_timeout"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolution of a timed-out or internally failed inspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through
    #[default]
    FailOpen,
    /// Block the request
    FailClosed,
}

impl FailurePolicy {
    /// Whether a failure under this policy blocks the request
    pub fn blocks(&self) -> bool {
        matches!(self, Self::FailClosed)
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum entries waiting to be written
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What to do when the queue is full
    #[serde(default)]
    pub backpressure: Backpressure,

    /// Maximum wait for queue space with `block_with_timeout`
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Append JSON lines to this file instead of the tracing sink
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_block_timeout_ms() -> u64 {
    50
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
            backpressure: Backpressure::default(),
            block_timeout_ms: default_block_timeout_ms(),
            file_path: None,
        }
    }
}

impl AuditConfig {
    /// Block timeout as a `Duration`
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

/// Backpressure policy of the audit queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Evict the oldest queued entry to make room
    #[default]
    DropOldest,
    /// Wait up to `block_timeout_ms` for room, then drop the new entry
    BlockWithTimeout,
}
