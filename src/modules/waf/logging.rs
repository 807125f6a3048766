//! Audit logging of blocked requests
//!
//! Blocks are recorded through a bounded queue drained by one background
//! task, so the response path never waits on a sink. When the queue is full
//! the configured [`Backpressure`] decides between evicting the oldest entry
//! and waiting a bounded time for room.

use super::config::{AuditConfig, Backpressure};
use super::engine::MatchResult;
use super::error::{WafError, WafResult};
use super::payload::Checkpoint;
use super::snapshot::InspectedRequest;
use crate::modules::firewall::FirewallMatchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the triggering inspection started
    pub timestamp: DateTime<Utc>,

    /// Target the request was addressed to
    pub target_id: String,

    /// Remote peer address
    pub source_ip: Option<IpAddr>,

    /// HTTP method
    pub method: String,

    /// Request path as sent
    pub path: String,

    /// What triggered the block
    #[serde(flatten)]
    pub cause: AuditCause,
}

/// Trigger of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum AuditCause {
    /// A payload matched
    Payload {
        /// Checkpoint of the matching payload
        checkpoint: Checkpoint,
        /// Payload identifier
        payload_id: Option<String>,
        /// Matching pattern
        pattern: String,
    },
    /// A firewall rule matched
    Firewall {
        /// Rule identifier
        rule_id: String,
        /// Rule expression
        expression: String,
    },
    /// The failure policy blocked the request
    Policy {
        /// Error that triggered the policy
        error: String,
    },
}

impl AuditEntry {
    fn new(target_id: &str, request: &InspectedRequest, timestamp: DateTime<Utc>, cause: AuditCause) -> Self {
        Self {
            timestamp,
            target_id: target_id.to_string(),
            source_ip: request.remote_addr().map(|addr| addr.ip()),
            method: request.method().as_str().to_string(),
            path: request.raw_path().to_string(),
            cause,
        }
    }

    /// Entry for a payload match
    pub fn from_payload(target_id: &str, request: &InspectedRequest, result: &MatchResult) -> Self {
        let (payload_id, pattern) = result
            .payload
            .as_ref()
            .map(|p| (p.id.clone(), p.pattern.clone()))
            .unwrap_or_default();
        Self::new(
            target_id,
            request,
            result.timestamp,
            AuditCause::Payload {
                checkpoint: result.checkpoint,
                payload_id,
                pattern,
            },
        )
    }

    /// Entry for a firewall rule match
    pub fn from_firewall(
        target_id: &str,
        request: &InspectedRequest,
        result: &FirewallMatchResult,
    ) -> Self {
        let (rule_id, expression) = result
            .rule
            .as_ref()
            .map(|r| (r.id.clone(), r.expression.clone()))
            .unwrap_or_default();
        Self::new(
            target_id,
            request,
            result.timestamp,
            AuditCause::Firewall { rule_id, expression },
        )
    }

    /// Entry for a block decided by the failure policy
    pub fn from_policy(target_id: &str, request: &InspectedRequest, error: &WafError) -> Self {
        Self::new(
            target_id,
            request,
            Utc::now(),
            AuditCause::Policy {
                error: error.to_string(),
            },
        )
    }

    /// Single-line JSON form
    pub fn to_json(&self) -> WafResult<String> {
        serde_json::to_string(self).map_err(|e| WafError::AuditSink(e.to_string()))
    }
}

/// Destination of audit entries
pub trait AuditSink: Send + Sync {
    /// Persist one entry
    fn write(&self, entry: &AuditEntry) -> WafResult<()>;
}

/// Emits each entry as a JSON line on the `tollgate::audit` tracing target
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, entry: &AuditEntry) -> WafResult<()> {
        let line = entry.to_json()?;
        warn!(target: "tollgate::audit", "{}", line);
        Ok(())
    }
}

/// Appends JSON lines to a file
#[derive(Debug)]
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::AuditSink`] if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> WafResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WafError::AuditSink(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn write(&self, entry: &AuditEntry) -> WafResult<()> {
        let line = entry.to_json()?;
        let mut file = self
            .file
            .lock()
            .map_err(|e| WafError::AuditSink(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| WafError::AuditSink(e.to_string()))
    }
}

/// Keeps the most recent entries in memory
#[derive(Debug)]
pub struct MemoryAuditSink {
    max_entries: usize,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryAuditSink {
    /// Create a sink holding at most `max_entries`
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Most recent entries, newest first
    pub fn recent_entries(&self, count: usize) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|entries| entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Entry count
    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Clear all entries
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, entry: &AuditEntry) -> WafResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| WafError::AuditSink(e.to_string()))?;
        while entries.len() >= self.max_entries.max(1) {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        Ok(())
    }
}

#[derive(Debug)]
struct Queue {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    written: AtomicU64,
}

/// Bounded, asynchronous audit logger
#[derive(Clone)]
pub struct AuditLogger {
    config: AuditConfig,
    queue: Arc<Queue>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("capacity", &self.queue.capacity)
            .field("backpressure", &self.config.backpressure)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl AuditLogger {
    /// Build the logger described by `config`: `None` when disabled, a file
    /// sink when `file_path` is set, the tracing sink otherwise.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::AuditSink`] if the audit file cannot be opened.
    pub fn from_config(config: &AuditConfig) -> WafResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let sink: Arc<dyn AuditSink> = match &config.file_path {
            Some(path) => Arc::new(FileAuditSink::open(path)?),
            None => Arc::new(TracingAuditSink),
        };
        Ok(Some(Self::spawn(config.clone(), sink)))
    }

    /// Start the drain task over `sink`. Must be called within a tokio
    /// runtime.
    pub fn spawn(config: AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        let queue = Arc::new(Queue {
            entries: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
            capacity: config.queue_capacity.max(1),
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            written: AtomicU64::new(0),
        });
        let worker = tokio::spawn(drain(Arc::clone(&queue), sink));

        Self {
            config,
            queue,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue an entry.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::AuditQueueFull`] when `block_with_timeout` gives up
    /// waiting for room.
    pub async fn submit(&self, entry: AuditEntry) -> WafResult<()> {
        match self.config.backpressure {
            Backpressure::DropOldest => {
                {
                    let mut entries = self.lock()?;
                    if entries.len() >= self.queue.capacity {
                        entries.pop_front();
                        self.queue.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    entries.push_back(entry);
                }
                self.queue.items.notify_one();
                Ok(())
            },
            Backpressure::BlockWithTimeout => {
                let deadline = Instant::now() + self.config.block_timeout();
                let mut entry = Some(entry);
                loop {
                    let mut space = pin!(self.queue.space.notified());
                    space.as_mut().enable();

                    {
                        let mut entries = self.lock()?;
                        if entries.len() < self.queue.capacity {
                            if let Some(entry) = entry.take() {
                                entries.push_back(entry);
                            }
                            drop(entries);
                            self.queue.items.notify_one();
                            return Ok(());
                        }
                    }

                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        self.queue.dropped.fetch_add(1, Ordering::Relaxed);
                        return Err(WafError::AuditQueueFull);
                    }
                }
            },
        }
    }

    /// Entries discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Entries handed to the sink successfully
    pub fn written(&self) -> u64 {
        self.queue.written.load(Ordering::Relaxed)
    }

    /// Entries waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Flush queued entries and stop the drain task
    pub async fn shutdown(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.items.notify_one();

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "audit drain task failed");
            }
        }
    }

    fn lock(&self) -> WafResult<std::sync::MutexGuard<'_, VecDeque<AuditEntry>>> {
        self.queue
            .entries
            .lock()
            .map_err(|e| WafError::AuditSink(e.to_string()))
    }
}

async fn drain(queue: Arc<Queue>, sink: Arc<dyn AuditSink>) {
    loop {
        let mut items = pin!(queue.items.notified());
        items.as_mut().enable();

        let batch: Vec<AuditEntry> = match queue.entries.lock() {
            Ok(mut entries) => entries.drain(..).collect(),
            Err(e) => {
                warn!(error = %e, "audit queue poisoned");
                return;
            },
        };

        if !batch.is_empty() {
            queue.space.notify_waiters();

            let sink = Arc::clone(&sink);
            let written = tokio::task::spawn_blocking(move || {
                let mut written: u64 = 0;
                for entry in &batch {
                    match sink.write(entry) {
                        Ok(()) => written += 1,
                        Err(e) => warn!(error = %e, "audit entry lost"),
                    }
                }
                written
            })
            .await
            .unwrap_or(0);

            queue.written.fetch_add(written, Ordering::Relaxed);
            continue;
        }

        if queue.closed.load(Ordering::Acquire) {
            debug!("audit drain task stopped");
            return;
        }

        items.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::firewall::FirewallRule;
    use crate::modules::waf::payload::PayloadData;
    use bytes::Bytes;
    use http::Request;
    use std::time::Duration;
    use tempfile::tempdir;

    fn request() -> InspectedRequest {
        InspectedRequest::from_request(
            Request::get("/search?q=1").body(Bytes::new()).unwrap(),
            Some("198.51.100.4:443".parse().unwrap()),
        )
    }

    fn entry(n: usize) -> AuditEntry {
        let result = MatchResult::matched(
            Checkpoint::Query,
            PayloadData::new(Checkpoint::Query, format!("p{}", n)),
            Utc::now(),
        );
        AuditEntry::from_payload("shop", &request(), &result)
    }

    fn config(capacity: usize, backpressure: Backpressure) -> AuditConfig {
        AuditConfig {
            queue_capacity: capacity,
            backpressure,
            block_timeout_ms: 10,
            ..AuditConfig::default()
        }
    }

    #[test]
    fn test_entry_json() {
        let entry = entry(1);
        let json = entry.to_json().unwrap();
        assert!(json.contains(r#""cause":"payload""#));
        assert!(json.contains(r#""checkpoint":"query""#));
        assert!(json.contains(r#""source_ip":"198.51.100.4""#));

        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_firewall_and_policy_entries() {
        let result = FirewallMatchResult::matched(
            FirewallRule::new("fw-1", "shop", "true"),
            Utc::now(),
        );
        let entry = AuditEntry::from_firewall("shop", &request(), &result);
        assert_eq!(
            entry.cause,
            AuditCause::Firewall {
                rule_id: "fw-1".to_string(),
                expression: "true".to_string()
            }
        );

        let entry =
            AuditEntry::from_policy("shop", &request(), &WafError::DeadlineExceeded(Duration::ZERO));
        assert!(matches!(entry.cause, AuditCause::Policy { .. }));
        assert_eq!(entry.path, "/search");
    }

    #[test]
    fn test_memory_sink_limit() {
        let sink = MemoryAuditSink::new(2);
        for n in 0..3 {
            sink.write(&entry(n)).unwrap();
        }
        assert_eq!(sink.count(), 2);
        let recent = sink.recent_entries(1);
        assert!(matches!(&recent[0].cause, AuditCause::Payload { pattern, .. } if pattern == "p2"));
        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_file_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::open(&path).unwrap();
        sink.write(&entry(1)).unwrap();
        sink.write(&entry(2)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_logger_delivers_entries() {
        let sink = Arc::new(MemoryAuditSink::default());
        let logger = AuditLogger::spawn(config(8, Backpressure::DropOldest), sink.clone());

        for n in 0..3 {
            logger.submit(entry(n)).await.unwrap();
        }
        logger.shutdown().await;

        assert_eq!(sink.count(), 3);
        assert_eq!(logger.written(), 3);
        assert_eq!(logger.dropped(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest() {
        let sink = Arc::new(MemoryAuditSink::default());
        let logger = AuditLogger::spawn(config(2, Backpressure::DropOldest), sink.clone());

        // No await point between submits, so the drain task cannot run.
        for n in 0..5 {
            logger.submit(entry(n)).await.unwrap();
        }
        assert_eq!(logger.pending(), 2);
        assert_eq!(logger.dropped(), 3);

        logger.shutdown().await;
        let patterns: Vec<_> = sink
            .recent_entries(10)
            .into_iter()
            .filter_map(|e| match e.cause {
                AuditCause::Payload { pattern, .. } => Some(pattern),
                _ => None,
            })
            .collect();
        assert_eq!(patterns, vec!["p4", "p3"]);
    }

    struct SlowSink;

    impl AuditSink for SlowSink {
        fn write(&self, _entry: &AuditEntry) -> WafResult<()> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_block_with_timeout() {
        let logger = AuditLogger::spawn(config(1, Backpressure::BlockWithTimeout), Arc::new(SlowSink));

        // First entry is drained into the slow sink, second waits in the queue.
        logger.submit(entry(0)).await.unwrap();
        logger.submit(entry(1)).await.unwrap();

        let err = logger.submit(entry(2)).await.unwrap_err();
        assert!(matches!(err, WafError::AuditQueueFull));
        assert_eq!(logger.dropped(), 1);
    }

    #[tokio::test]
    async fn test_from_config() {
        let disabled = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        assert!(AuditLogger::from_config(&disabled).unwrap().is_none());

        let dir = tempdir().unwrap();
        let to_file = AuditConfig {
            file_path: Some(dir.path().join("audit.log").display().to_string()),
            ..AuditConfig::default()
        };
        let logger = AuditLogger::from_config(&to_file).unwrap().unwrap();
        logger.submit(entry(1)).await.unwrap();
        logger.shutdown().await;
        assert_eq!(logger.written(), 1);
    }
}
