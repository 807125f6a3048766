//! WAF error types

use std::time::Duration;
use thiserror::Error;

/// WAF-specific errors
#[derive(Debug, Error)]
pub enum WafError {
    /// The request body could not be drained into a snapshot
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// Declared content type could not be parsed
    #[error("invalid content type '{content_type}': {message}")]
    InvalidContentType {
        /// Raw header value.
        content_type: String,
        /// Parser message.
        message: String,
    },

    /// Multipart body could not be read
    #[error("multipart body error: {0}")]
    Multipart(String),

    /// JSON body could not be parsed
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// URL-encoded body could not be parsed
    #[error("invalid form body: {0}")]
    InvalidForm(String),

    /// Pattern could not be compiled by the matcher
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// Global inspection deadline elapsed
    #[error("inspection deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// A worker task panicked or was aborted
    #[error("inspection worker failed: {0}")]
    Worker(String),

    /// Rule repository failure
    #[error("rule repository error: {0}")]
    Repository(String),

    /// Audit queue had no room within the configured wait
    #[error("audit queue full, entry dropped")]
    AuditQueueFull,

    /// Audit sink failed to persist an entry
    #[error("audit sink error: {0}")]
    AuditSink(String),

    /// Invalid configuration
    #[error("invalid WAF config: {0}")]
    InvalidConfig(String),
}

/// Result type for WAF operations
pub type WafResult<T> = Result<T, WafError>;
