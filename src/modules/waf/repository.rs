//! Rule repository
//!
//! Targets, payloads and firewall rules come from a [`RuleRepository`].
//! [`RuleStore`] is the in-memory implementation, optionally loaded from a
//! TOML file:
//!
//! ```toml
//! [[targets]]
//! id = "shop"
//! waf_enabled = true
//!
//! [[payloads]]
//! id = "sqli-1"
//! checkpoint = "query"
//! pattern = '(?i)union\s+select'
//!
//! [[firewall_rules]]
//! id = "fw-1"
//! target_id = "shop"
//! expression = 'http.method == "TRACE"'
//! ```

use super::error::{WafError, WafResult};
use super::payload::PayloadData;
use crate::modules::firewall::FirewallRule;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A protected site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target identifier
    pub id: String,

    /// Whether requests to this target are inspected
    #[serde(default = "default_true")]
    pub waf_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Target {
    /// Create a target with the WAF enabled
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            waf_enabled: true,
        }
    }

    /// Builder: set the WAF flag
    pub fn with_waf_enabled(mut self, enabled: bool) -> Self {
        self.waf_enabled = enabled;
        self
    }
}

/// Source of targets and rules
pub trait RuleRepository: Send + Sync {
    /// Every payload, in declared order
    fn payloads(&self) -> WafResult<Vec<PayloadData>>;

    /// Firewall rules scoped to `target_id`, in declared order
    fn firewall_rules(&self, target_id: &str) -> WafResult<Vec<FirewallRule>>;

    /// Look up a target
    fn target(&self, id: &str) -> WafResult<Option<Target>>;
}

/// In-memory rule repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStore {
    /// Known targets
    #[serde(default)]
    pub targets: Vec<Target>,

    /// Detection payloads
    #[serde(default)]
    pub payloads: Vec<PayloadData>,

    /// Firewall rules of every target
    #[serde(default)]
    pub firewall_rules: Vec<FirewallRule>,
}

impl RuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::Repository`] if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> WafResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WafError::Repository(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a store from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`WafError::Repository`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> WafResult<Self> {
        toml::from_str(content).map_err(|e| WafError::Repository(e.to_string()))
    }

    /// Builder: add a target
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Builder: add a payload
    pub fn with_payload(mut self, payload: PayloadData) -> Self {
        self.payloads.push(payload);
        self
    }

    /// Builder: add a firewall rule
    pub fn with_firewall_rule(mut self, rule: FirewallRule) -> Self {
        self.firewall_rules.push(rule);
        self
    }

    /// Firewall rules whose target is not registered
    pub fn orphan_rules(&self) -> impl Iterator<Item = &FirewallRule> {
        self.firewall_rules
            .iter()
            .filter(|rule| !self.targets.iter().any(|t| t.id == rule.target_id))
    }
}

impl RuleRepository for RuleStore {
    fn payloads(&self) -> WafResult<Vec<PayloadData>> {
        Ok(self.payloads.clone())
    }

    fn firewall_rules(&self, target_id: &str) -> WafResult<Vec<FirewallRule>> {
        Ok(self
            .firewall_rules
            .iter()
            .filter(|rule| rule.target_id == target_id)
            .cloned()
            .collect())
    }

    fn target(&self, id: &str) -> WafResult<Option<Target>> {
        Ok(self.targets.iter().find(|t| t.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::waf::payload::Checkpoint;
    use tempfile::tempdir;

    const RULES: &str = r#"
        [[targets]]
        id = "shop"

        [[targets]]
        id = "static"
        waf_enabled = false

        [[payloads]]
        id = "sqli-1"
        checkpoint = "query"
        pattern = '(?i)union\s+select'

        [[payloads]]
        checkpoint = "Upload"
        pattern = '\.php$'
        description = "php upload"

        [[firewall_rules]]
        id = "fw-1"
        target_id = "shop"
        expression = 'http.method == "TRACE"'

        [[firewall_rules]]
        id = "fw-2"
        target_id = "blog"
        expression = "true"
    "#;

    #[test]
    fn test_parse_store() {
        let store = RuleStore::from_toml_str(RULES).unwrap();

        assert_eq!(store.targets.len(), 2);
        assert!(store.target("shop").unwrap().unwrap().waf_enabled);
        assert!(!store.target("static").unwrap().unwrap().waf_enabled);
        assert!(store.target("missing").unwrap().is_none());

        let payloads = store.payloads().unwrap();
        assert_eq!(payloads[0].checkpoint, Checkpoint::Query);
        assert_eq!(payloads[1].description.as_deref(), Some("php upload"));

        let rules = store.firewall_rules("shop").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "fw-1");

        let orphans: Vec<_> = store.orphan_rules().map(|r| r.id.as_str()).collect();
        assert_eq!(orphans, vec!["fw-2"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, RULES).unwrap();

        let store = RuleStore::load(&path).unwrap();
        assert_eq!(store.payloads.len(), 2);
    }

    #[test]
    fn test_load_errors() {
        let err = RuleStore::load("/nonexistent/rules.toml").unwrap_err();
        assert!(matches!(err, WafError::Repository(_)));

        let err = RuleStore::from_toml_str("[[payloads]]\ncheckpoint = \"cookie\"\npattern = \"x\"")
            .unwrap_err();
        assert!(matches!(err, WafError::Repository(_)));
    }

    #[test]
    fn test_builder() {
        let store = RuleStore::new()
            .with_target(Target::new("api").with_waf_enabled(false))
            .with_payload(PayloadData::new(Checkpoint::Path, "etc/passwd"))
            .with_firewall_rule(FirewallRule::new("r", "api", "false"));

        assert_eq!(store.targets[0].id, "api");
        assert_eq!(store.firewall_rules("api").unwrap().len(), 1);
        assert!(store.firewall_rules("other").unwrap().is_empty());
    }
}
