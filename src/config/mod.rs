//! # Configuration System
//!
//! TOML-based configuration for tollgate: logging, the inspection deadline
//! and failure policy, audit queue sizing, and the location of the rule
//! store.
//!
//! ## Example Configuration
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "compact"
//!
//! [waf]
//! deadline_ms = 180000
//! failure_policy = "fail_open"
//! static_suffixes = [".js", ".css", ".png", ".jpg", ".gif", ".bmp", ".svg", ".ico"]
//!
//! [waf.audit]
//! enabled = true
//! queue_capacity = 1024
//! backpressure = "drop_oldest"
//!
//! [rules]
//! path = "rules.toml"
//! ```

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{LogFormat, LogLevel, LoggingConfig, RulesConfig, Settings};
