//! Fact map derived from a request

use crate::modules::waf::InspectedRequest;
use std::collections::BTreeMap;

/// Fact keys understood by firewall expressions
pub const FACT_KEYS: [&str; 8] = [
    "ip.src",
    "http.query",
    "http.path",
    "http.host",
    "http.cookie",
    "http.header",
    "http.method",
    "http.protocol",
];

/// Flat string facts about one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFacts {
    facts: BTreeMap<&'static str, String>,
}

impl RequestFacts {
    /// Derive facts from an inspected request.
    ///
    /// Cookies serialize as `name=value` pairs joined by `"; "` in request
    /// order. Headers serialize as `name: value` lines sorted by name.
    pub fn from_request(request: &InspectedRequest) -> Self {
        let cookie = request
            .cookies()
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");

        let mut headers: Vec<(&str, String)> = request
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(b.0));
        let header = headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n");

        let ip = request
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();

        let mut facts = BTreeMap::new();
        facts.insert("ip.src", ip);
        facts.insert("http.query", request.raw_query().to_string());
        facts.insert("http.path", request.raw_path().to_string());
        facts.insert("http.host", request.host().to_string());
        facts.insert("http.cookie", cookie);
        facts.insert("http.header", header);
        facts.insert("http.method", request.method().as_str().to_string());
        facts.insert("http.protocol", format!("{:?}", request.version()));
        Self { facts }
    }

    /// Builder: override a single fact
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.facts.insert(key, value.into());
        self
    }

    /// Look up a fact by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Iterate over all facts in key order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.facts.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
