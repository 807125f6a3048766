//! WAF handler: per-request orchestration of both inspection phases

use super::config::WafConfig;
use super::engine::{MatchResult, PayloadEngine, WorkerOutcome};
use super::error::{WafError, WafResult};
use super::logging::{AuditEntry, AuditLogger};
use super::matcher::PatternMatcher;
use super::payload::PayloadCollection;
use super::repository::{RuleRepository, Target};
use super::snapshot::InspectedRequest;
use crate::modules::firewall::{
    FirewallEngine, FirewallMatchResult, FirewallRule, OperatorRegistry, RequestFacts,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{Either, Full};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statistics for the WAF handler
#[derive(Debug, Default)]
pub struct WafStats {
    /// Requests that reached the handler
    pub requests_inspected: AtomicU64,
    /// Requests passed through
    pub requests_passed: AtomicU64,
    /// Requests blocked
    pub requests_blocked: AtomicU64,
    /// Requests skipped by the eligibility check
    pub requests_bypassed: AtomicU64,
    /// Inspections that hit the deadline
    pub deadline_exceeded: AtomicU64,
    /// Inspections that failed internally
    pub internal_failures: AtomicU64,
    /// Blocks caused by a payload match
    pub payload_blocks: AtomicU64,
    /// Blocks caused by a firewall rule
    pub firewall_blocks: AtomicU64,
    /// Blocks decided by the failure policy
    pub policy_blocks: AtomicU64,
    /// Total inspection time in microseconds
    pub total_inspection_time_us: AtomicU64,
}

impl WafStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished inspection
    pub fn record(&self, inspection: &Inspection) {
        self.requests_inspected.fetch_add(1, Ordering::Relaxed);
        self.total_inspection_time_us
            .fetch_add(inspection.duration_us, Ordering::Relaxed);

        match inspection.state {
            InspectionState::TimedOut => {
                self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            },
            InspectionState::Failed => {
                self.internal_failures.fetch_add(1, Ordering::Relaxed);
            },
            _ => {},
        }

        match &inspection.verdict {
            Verdict::Pass => {
                self.requests_passed.fetch_add(1, Ordering::Relaxed);
                if inspection.bypassed {
                    self.requests_bypassed.fetch_add(1, Ordering::Relaxed);
                }
            },
            Verdict::Block(cause) => {
                self.requests_blocked.fetch_add(1, Ordering::Relaxed);
                let counter = match cause {
                    BlockCause::Payload(_) => &self.payload_blocks,
                    BlockCause::Firewall(_) => &self.firewall_blocks,
                    BlockCause::Policy => &self.policy_blocks,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            },
        }
    }

    /// Get average inspection time in microseconds
    pub fn avg_inspection_time_us(&self) -> u64 {
        let inspected = self.requests_inspected.load(Ordering::Relaxed);
        if inspected == 0 {
            0
        } else {
            self.total_inspection_time_us.load(Ordering::Relaxed) / inspected
        }
    }

    /// Get block rate as percentage
    pub fn block_rate(&self) -> f64 {
        let inspected = self.requests_inspected.load(Ordering::Relaxed);
        if inspected == 0 {
            0.0
        } else {
            (self.requests_blocked.load(Ordering::Relaxed) as f64 / inspected as f64) * 100.0
        }
    }
}

/// Where an inspection is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionState {
    /// Not started
    Idle,
    /// Deciding whether the request needs inspection
    EligibilityCheck,
    /// Payload workers running
    PayloadPhase,
    /// Firewall workers running
    FirewallPhase,
    /// A worker matched
    Blocked,
    /// Nothing matched, or the request was not eligible
    Passed,
    /// The deadline elapsed
    TimedOut,
    /// A worker failed
    Failed,
}

/// What blocked a request
#[derive(Debug, Clone)]
pub enum BlockCause {
    /// A payload matched
    Payload(MatchResult),
    /// A firewall rule matched
    Firewall(FirewallMatchResult),
    /// The failure policy is fail-closed
    Policy,
}

/// Final decision on a request
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Forward the request
    Pass,
    /// Answer with the block response
    Block(BlockCause),
}

/// Outcome of [`WafHandler::inspect`]
#[derive(Debug)]
pub struct Inspection {
    /// Final decision
    pub verdict: Verdict,
    /// Terminal state
    pub state: InspectionState,
    /// Error resolved by the failure policy, if any
    pub error: Option<WafError>,
    /// Whether the eligibility check skipped inspection
    pub bypassed: bool,
    /// Workers spawned across both phases
    pub workers_spawned: usize,
    /// Wall time in microseconds
    pub duration_us: u64,
}

impl Inspection {
    /// Whether the request is blocked
    pub fn is_blocked(&self) -> bool {
        matches!(self.verdict, Verdict::Block(_))
    }
}

/// Result of [`WafHandler::handle`]
#[derive(Debug)]
pub enum Decision<B> {
    /// Send this response instead of forwarding
    Block(Response<Full<Bytes>>),
    /// Forward this request. Inspected bodies are replayed from the snapshot.
    Pass(Request<Either<B, Full<Bytes>>>),
}

/// The 400 response sent for blocked requests
pub fn block_response(path: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("Bad Request. {}", path))));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Request-inspection orchestrator
pub struct WafHandler {
    /// Configuration
    config: WafConfig,

    /// Payload matching engine
    payloads: PayloadEngine,

    /// Firewall rule engine
    firewall: FirewallEngine,

    /// Source of firewall rules
    repository: Arc<dyn RuleRepository>,

    /// Audit logger, if enabled
    audit: Option<AuditLogger>,

    /// Statistics
    stats: Arc<WafStats>,
}

impl std::fmt::Debug for WafHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WafHandler")
            .field("config", &self.config)
            .field("payloads", &self.payloads)
            .field("firewall", &self.firewall)
            .field("audit", &self.audit.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl WafHandler {
    /// Create a handler from prepared engines
    pub fn new(
        config: WafConfig,
        payloads: PayloadEngine,
        firewall: FirewallEngine,
        repository: Arc<dyn RuleRepository>,
    ) -> Self {
        Self {
            config,
            payloads,
            firewall,
            repository,
            audit: None,
            stats: Arc::new(WafStats::new()),
        }
    }

    /// Build both engines from a repository. Payloads are loaded once here.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the repository
    /// cannot list payloads.
    pub fn from_repository(
        config: WafConfig,
        repository: Arc<dyn RuleRepository>,
        matcher: Arc<dyn PatternMatcher>,
        operators: Arc<OperatorRegistry>,
    ) -> WafResult<Self> {
        config.validate()?;
        let payloads = PayloadCollection::new(repository.payloads()?);
        info!(
            payloads = payloads.len(),
            workers = ?payloads.workers(),
            "WAF payloads loaded"
        );
        Ok(Self::new(
            config,
            PayloadEngine::new(Arc::new(payloads), matcher),
            FirewallEngine::new(operators),
            repository,
        ))
    }

    /// Builder: attach an audit logger
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configuration
    pub fn config(&self) -> &WafConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> &WafStats {
        &self.stats
    }

    /// Audit logger, if attached
    pub fn audit(&self) -> Option<&AuditLogger> {
        self.audit.as_ref()
    }

    /// Payload engine
    pub fn payload_engine(&self) -> &PayloadEngine {
        &self.payloads
    }

    /// Whether a request skips inspection: WAF disabled on the target, or a
    /// GET without query string for a static resource
    pub fn bypasses(&self, target: &Target, method: &Method, uri: &Uri) -> bool {
        if !target.waf_enabled {
            return true;
        }
        *method == Method::GET
            && uri.query().is_none()
            && self
                .config
                .static_suffixes
                .iter()
                .any(|suffix| uri.path().ends_with(suffix.as_str()))
    }

    /// Inspect a streaming request and decide its fate.
    ///
    /// Ineligible requests are passed without reading the body. Otherwise the
    /// body is captured, inspected, and replayed on pass.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::BodyRead`] if the body cannot be read.
    pub async fn handle<B>(
        &self,
        request: Request<B>,
        remote_addr: Option<SocketAddr>,
        target: &Target,
    ) -> WafResult<Decision<B>>
    where
        B: Body,
        B::Error: Display,
    {
        if self.bypasses(target, request.method(), request.uri()) {
            debug!(target_id = %target.id, path = %request.uri().path(), "inspection bypassed");
            self.stats.record(&Inspection {
                verdict: Verdict::Pass,
                state: InspectionState::Passed,
                error: None,
                bypassed: true,
                workers_spawned: 0,
                duration_us: 0,
            });
            return Ok(Decision::Pass(request.map(Either::Left)));
        }

        let (inspected, replay) = InspectedRequest::capture(request, remote_addr).await?;
        let path = inspected.path().into_owned();

        let inspection = self.inspect(target, inspected).await;
        if inspection.is_blocked() {
            Ok(Decision::Block(block_response(&path)))
        } else {
            Ok(Decision::Pass(replay.map(Either::Right)))
        }
    }

    /// Run both inspection phases over an already captured request
    pub async fn inspect(&self, target: &Target, request: InspectedRequest) -> Inspection {
        let started = std::time::Instant::now();
        let mut checker = Checker {
            handler: self,
            target,
            request: Arc::new(request),
            cancel: CancellationToken::new(),
            deadline: Instant::now() + self.config.deadline(),
            started_at: Utc::now(),
            state: InspectionState::Idle,
            workers_spawned: 0,
        };

        let mut inspection = checker.run().await;
        inspection.duration_us = started.elapsed().as_micros() as u64;
        self.stats.record(&inspection);

        if let Verdict::Block(cause) = &inspection.verdict {
            info!(
                target_id = %target.id,
                path = %checker.request.raw_path(),
                state = ?inspection.state,
                "request blocked"
            );
            self.record_block(target, &checker.request, cause, inspection.error.as_ref())
                .await;
        }

        inspection
    }

    async fn record_block(
        &self,
        target: &Target,
        request: &InspectedRequest,
        cause: &BlockCause,
        error: Option<&WafError>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let entry = match (cause, error) {
            (BlockCause::Payload(result), _) => AuditEntry::from_payload(&target.id, request, result),
            (BlockCause::Firewall(result), _) => {
                AuditEntry::from_firewall(&target.id, request, result)
            },
            (BlockCause::Policy, Some(error)) => AuditEntry::from_policy(&target.id, request, error),
            (BlockCause::Policy, None) => return,
        };
        if let Err(e) = audit.submit(entry).await {
            debug!(target_id = %target.id, error = %e, "audit entry dropped");
        }
    }
}

/// State of one inspection, scoped to one request and one target
struct Checker<'a> {
    handler: &'a WafHandler,
    target: &'a Target,
    request: Arc<InspectedRequest>,
    cancel: CancellationToken,
    deadline: Instant,
    started_at: DateTime<Utc>,
    state: InspectionState,
    workers_spawned: usize,
}

impl Checker<'_> {
    fn transition(&mut self, state: InspectionState) {
        debug!(target_id = %self.target.id, from = ?self.state, to = ?state, "inspection state");
        self.state = state;
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    async fn run(&mut self) -> Inspection {
        self.transition(InspectionState::EligibilityCheck);
        let handler = self.handler;
        if handler.bypasses(self.target, self.request.method(), self.request.uri()) {
            self.transition(InspectionState::Passed);
            let mut inspection = self.finish(Verdict::Pass, None);
            inspection.bypassed = true;
            return inspection;
        }

        self.transition(InspectionState::PayloadPhase);
        if self.expired() {
            return self.fail(WafError::DeadlineExceeded(handler.config.deadline()));
        }
        let handles = handler
            .payloads
            .spawn(&self.request, self.started_at, &self.cancel);
        match self.aggregate(handles).await {
            Ok(Some(result)) => {
                self.transition(InspectionState::Blocked);
                return self.finish(Verdict::Block(BlockCause::Payload(result)), None);
            },
            Ok(None) => {},
            Err(e) => return self.fail(e),
        }

        self.transition(InspectionState::FirewallPhase);
        let rules = match self.fetch_rules().await {
            Ok(rules) => rules,
            Err(e) => return self.fail(e),
        };
        if self.expired() {
            return self.fail(WafError::DeadlineExceeded(handler.config.deadline()));
        }
        let facts = Arc::new(RequestFacts::from_request(&self.request));
        let handles = handler
            .firewall
            .spawn(&rules, &facts, self.started_at, &self.cancel);
        match self.aggregate(handles).await {
            Ok(Some(result)) => {
                self.transition(InspectionState::Blocked);
                self.finish(Verdict::Block(BlockCause::Firewall(result)), None)
            },
            Ok(None) => {
                self.transition(InspectionState::Passed);
                self.finish(Verdict::Pass, None)
            },
            Err(e) => self.fail(e),
        }
    }

    /// Firewall rules of the target. Repository failures leave the phase
    /// with no rules; only the deadline is fatal.
    async fn fetch_rules(&self) -> WafResult<Vec<FirewallRule>> {
        let repository = Arc::clone(&self.handler.repository);
        let target_id = self.target.id.clone();
        let fetch = tokio::task::spawn_blocking(move || repository.firewall_rules(&target_id));

        match tokio::time::timeout_at(self.deadline, fetch).await {
            Ok(Ok(Ok(rules))) => Ok(rules),
            Ok(Ok(Err(e))) => {
                warn!(target_id = %self.target.id, error = %e, "firewall rules unavailable");
                Ok(Vec::new())
            },
            Ok(Err(e)) => {
                warn!(target_id = %self.target.id, error = %e, "firewall rule fetch failed");
                Ok(Vec::new())
            },
            Err(_) => Err(WafError::DeadlineExceeded(self.handler.config.deadline())),
        }
    }

    /// Await workers in registration order until the first match.
    ///
    /// A match, a failed worker or the deadline cancels the remaining
    /// workers.
    async fn aggregate<K, T>(&mut self, handles: Vec<(K, JoinHandle<T>)>) -> WafResult<Option<T>>
    where
        K: Display,
        T: WorkerOutcome,
    {
        self.workers_spawned += handles.len();

        let collect = async {
            for (worker, handle) in handles {
                match handle.await {
                    Ok(outcome) if outcome.is_matched() => return Ok(Some(outcome)),
                    Ok(_) => {},
                    Err(e) => return Err(WafError::Worker(format!("{}: {}", worker, e))),
                }
            }
            Ok(None)
        };

        let result = match tokio::time::timeout_at(self.deadline, collect).await {
            Ok(result) => result,
            Err(_) => Err(WafError::DeadlineExceeded(self.handler.config.deadline())),
        };
        if !matches!(result, Ok(None)) {
            self.cancel.cancel();
        }
        result
    }

    fn fail(&mut self, error: WafError) -> Inspection {
        self.cancel.cancel();
        let policy = self.handler.config.failure_policy;
        warn!(
            target_id = %self.target.id,
            error = %error,
            policy = ?policy,
            "inspection failed"
        );

        self.transition(match error {
            WafError::DeadlineExceeded(_) => InspectionState::TimedOut,
            _ => InspectionState::Failed,
        });
        let verdict = if policy.blocks() {
            Verdict::Block(BlockCause::Policy)
        } else {
            Verdict::Pass
        };
        self.finish(verdict, Some(error))
    }

    fn finish(&self, verdict: Verdict, error: Option<WafError>) -> Inspection {
        Inspection {
            verdict,
            state: self.state,
            error,
            bypassed: false,
            workers_spawned: self.workers_spawned,
            duration_us: 0,
        }
    }
}
