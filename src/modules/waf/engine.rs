//! Payload matching engine
//!
//! One worker per checkpoint. Every worker walks its payload list in declared
//! order against one request facet and stops at the first match, so a
//! payload is never evaluated once an earlier one has matched.

use super::form::FormInspector;
use super::matcher::PatternMatcher;
use super::payload::{Checkpoint, PayloadCollection, PayloadData};
use super::snapshot::{unescape_value, InspectedRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a single inspection worker
pub trait WorkerOutcome: Send + 'static {
    /// Whether the worker found a match
    fn is_matched(&self) -> bool;
}

/// Result of one checkpoint worker
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Worker that produced this result
    pub checkpoint: Checkpoint,

    /// Matching payload, present only when matched
    pub payload: Option<PayloadData>,

    /// Whether a payload matched
    pub matched: bool,

    /// Start of the inspection that produced the match
    pub timestamp: DateTime<Utc>,
}

impl MatchResult {
    /// A positive result
    pub fn matched(checkpoint: Checkpoint, payload: PayloadData, timestamp: DateTime<Utc>) -> Self {
        Self {
            checkpoint,
            payload: Some(payload),
            matched: true,
            timestamp,
        }
    }

    /// A negative result
    pub fn no_match(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            payload: None,
            matched: false,
            timestamp: Utc::now(),
        }
    }
}

impl WorkerOutcome for MatchResult {
    fn is_matched(&self) -> bool {
        self.matched
    }
}

/// First-match scan over an ordered payload list
pub(crate) struct Scan<'a> {
    matcher: &'a dyn PatternMatcher,
    cancel: &'a CancellationToken,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(matcher: &'a dyn PatternMatcher, cancel: &'a CancellationToken) -> Self {
        Self { matcher, cancel }
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// First payload whose pattern matches `input`. Matcher errors count as
    /// no match for that payload.
    pub(crate) fn first_match<'p>(
        &self,
        payloads: &'p [PayloadData],
        input: &str,
    ) -> Option<&'p PayloadData> {
        for payload in payloads {
            if self.cancelled() {
                return None;
            }
            match self.matcher.is_match(&payload.pattern, input) {
                Ok(true) => return Some(payload),
                Ok(false) => {},
                Err(e) => debug!(pattern = %payload.pattern, error = %e, "pattern skipped"),
            }
        }
        None
    }
}

/// Checkpoint-based payload matching engine
#[derive(Clone)]
pub struct PayloadEngine {
    payloads: Arc<PayloadCollection>,
    matcher: Arc<dyn PatternMatcher>,
}

impl std::fmt::Debug for PayloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadEngine")
            .field("payloads", &self.payloads.len())
            .field("workers", &self.payloads.workers())
            .finish()
    }
}

impl PayloadEngine {
    /// Create an engine over a shared payload collection
    pub fn new(payloads: Arc<PayloadCollection>, matcher: Arc<dyn PatternMatcher>) -> Self {
        Self { payloads, matcher }
    }

    /// The payload collection
    pub fn payloads(&self) -> &PayloadCollection {
        &self.payloads
    }

    /// Workers this engine spawns, in registration order
    pub fn workers(&self) -> Vec<Checkpoint> {
        self.payloads.workers()
    }

    /// Spawn one blocking worker per checkpoint.
    ///
    /// Handles are returned in registration order.
    pub fn spawn(
        &self,
        request: &Arc<InspectedRequest>,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<(Checkpoint, JoinHandle<MatchResult>)> {
        self.workers()
            .into_iter()
            .map(|worker| {
                let engine = self.clone();
                let request = Arc::clone(request);
                let cancel = cancel.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    engine.evaluate(worker, &request, started_at, &cancel)
                });
                (worker, handle)
            })
            .collect()
    }

    /// Run a single checkpoint worker on the current thread
    pub fn evaluate(
        &self,
        worker: Checkpoint,
        request: &InspectedRequest,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> MatchResult {
        let scan = Scan::new(self.matcher.as_ref(), cancel);

        let found = match worker {
            Checkpoint::Query => {
                let query = unescape_value(request.raw_query());
                scan.first_match(self.payloads.for_checkpoint(Checkpoint::Query), &query)
            },
            Checkpoint::Path => {
                scan.first_match(self.payloads.for_checkpoint(Checkpoint::Path), &request.path())
            },
            Checkpoint::Form => FormInspector::new(
                self.payloads.for_checkpoint(Checkpoint::Form),
                self.payloads.for_checkpoint(Checkpoint::Upload),
                &scan,
            )
            .inspect(request),
            Checkpoint::Upload => None,
        };

        match found {
            Some(payload) => {
                debug!(
                    checkpoint = %worker,
                    pattern = %payload.pattern,
                    "payload matched"
                );
                MatchResult::matched(worker, payload.clone(), started_at)
            },
            None => MatchResult::no_match(worker),
        }
    }
}
