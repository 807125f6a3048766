//! Web Application Firewall Module
//!
//! Inspects requests in two phases under one deadline:
//! - Payload matching: ordered patterns per checkpoint (query, path, form,
//!   upload), one worker per checkpoint
//! - Firewall rules: target-scoped boolean expressions over request facts
//!
//! A match in either phase blocks the request with a 400 response and an
//! audit record. Timeouts and worker failures resolve through the configured
//! fail-open or fail-closed policy.

mod config;
mod engine;
mod error;
mod form;
mod handler;
mod logging;
mod matcher;
mod payload;
mod repository;
mod snapshot;

pub use config::{AuditConfig, Backpressure, FailurePolicy, WafConfig};
pub use engine::{MatchResult, PayloadEngine, WorkerOutcome};
pub use error::{WafError, WafResult};
pub use handler::{
    block_response, BlockCause, Decision, Inspection, InspectionState, Verdict, WafHandler,
    WafStats,
};
pub use logging::{
    AuditCause, AuditEntry, AuditLogger, AuditSink, FileAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use matcher::{PatternMatcher, RegexMatcher};
pub use payload::{Checkpoint, PayloadCollection, PayloadData};
pub use repository::{RuleRepository, RuleStore, Target};
pub use snapshot::{InspectedRequest, RequestSnapshot};
