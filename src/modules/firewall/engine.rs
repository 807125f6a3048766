//! Firewall rule engine

use super::expression::Expression;
use super::facts::RequestFacts;
use super::operators::OperatorRegistry;
use crate::modules::waf::WorkerOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A boolean expression scoped to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Rule identifier
    pub id: String,

    /// Target this rule applies to
    pub target_id: String,

    /// Expression source text
    pub expression: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl FirewallRule {
    /// Create a rule
    pub fn new(
        id: impl Into<String>,
        target_id: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target_id: target_id.into(),
            expression: expression.into(),
            description: None,
        }
    }

    /// Builder: set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of one firewall rule worker
#[derive(Debug, Clone, Serialize)]
pub struct FirewallMatchResult {
    /// Matching rule, present only when matched
    pub rule: Option<FirewallRule>,

    /// Whether the rule matched
    pub matched: bool,

    /// Start of the inspection that produced the match
    pub timestamp: DateTime<Utc>,
}

impl FirewallMatchResult {
    /// A positive result
    pub fn matched(rule: FirewallRule, timestamp: DateTime<Utc>) -> Self {
        Self {
            rule: Some(rule),
            matched: true,
            timestamp,
        }
    }

    /// A negative result
    pub fn no_match() -> Self {
        Self {
            rule: None,
            matched: false,
            timestamp: Utc::now(),
        }
    }
}

impl WorkerOutcome for FirewallMatchResult {
    fn is_matched(&self) -> bool {
        self.matched
    }
}

/// Evaluates firewall rules against request facts, one worker per rule
#[derive(Debug, Clone)]
pub struct FirewallEngine {
    operators: Arc<OperatorRegistry>,
}

impl FirewallEngine {
    /// Create an engine over a shared operator registry
    pub fn new(operators: Arc<OperatorRegistry>) -> Self {
        Self { operators }
    }

    /// The operator registry
    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// Spawn one blocking worker per rule, in rule order
    pub fn spawn(
        &self,
        rules: &[FirewallRule],
        facts: &Arc<RequestFacts>,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<(String, JoinHandle<FirewallMatchResult>)> {
        rules
            .iter()
            .map(|rule| {
                let engine = self.clone();
                let rule = rule.clone();
                let id = rule.id.clone();
                let facts = Arc::clone(facts);
                let cancel = cancel.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    engine.evaluate(rule, &facts, started_at, &cancel)
                });
                (id, handle)
            })
            .collect()
    }

    /// Evaluate one rule on the current thread.
    ///
    /// Compile and evaluation failures are logged and reported as no match.
    pub fn evaluate(
        &self,
        rule: FirewallRule,
        facts: &RequestFacts,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> FirewallMatchResult {
        if cancel.is_cancelled() {
            return FirewallMatchResult::no_match();
        }

        let outcome = Expression::parse(&rule.expression, &self.operators)
            .and_then(|expression| expression.evaluate(facts, &self.operators));

        match outcome {
            Ok(true) => {
                debug!(rule_id = %rule.id, "firewall rule matched");
                FirewallMatchResult::matched(rule, started_at)
            },
            Ok(false) => FirewallMatchResult::no_match(),
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    expression = %rule.expression,
                    error = %e,
                    "firewall rule skipped"
                );
                FirewallMatchResult::no_match()
            },
        }
    }
}
