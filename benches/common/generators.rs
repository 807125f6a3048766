//! Test data generators for benchmarks.

use bytes::Bytes;
use http::Request;
use tollgate::modules::firewall::FirewallRule;
use tollgate::modules::waf::{Checkpoint, InspectedRequest, PayloadData, RuleStore, Target};

// ---------------------------------------------------------------------------
// Attack strings
// ---------------------------------------------------------------------------

/// Query strings carrying SQL injection attempts, percent-encoded.
pub fn sqli_queries() -> Vec<&'static str> {
    vec![
        "id=%27%20OR%20%271%27%3D%271",
        "id=1%3B%20DROP%20TABLE%20users--",
        "q=%27%20UNION%20SELECT%20username%2Cpassword%20FROM%20users--",
        "id=1%27%20AND%20SLEEP(5)--",
    ]
}

/// Request paths attempting traversal.
pub fn traversal_paths() -> Vec<&'static str> {
    vec![
        "/files/../../../etc/passwd",
        "/files/%2e%2e%2f%2e%2e%2fetc%2fpasswd",
        "/static/..%5c..%5cwindows%5cwin.ini",
    ]
}

/// Query strings that match nothing.
pub fn benign_queries() -> Vec<&'static str> {
    vec![
        "page=2",
        "q=select+your+favorite+color",
        "name=O%27Brien%27s+restaurant",
        "redirect=https%3A%2F%2Fexample.com%2Fpage",
    ]
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub fn get(uri: &str) -> InspectedRequest {
    InspectedRequest::from_request(Request::get(uri).body(Bytes::new()).unwrap(), None)
}

pub fn post(uri: &str, content_type: &str, body: impl Into<Bytes>) -> InspectedRequest {
    InspectedRequest::from_request(
        Request::post(uri)
            .header("content-type", content_type)
            .body(body.into())
            .unwrap(),
        None,
    )
}

/// Url-encoded form with `fields` benign fields.
pub fn urlencoded_form(fields: usize) -> String {
    (0..fields)
        .map(|i| format!("field{}=value+number+{}", i, i))
        .collect::<Vec<_>>()
        .join("&")
}

/// JSON document nested `depth` objects deep with a string leaf at each level.
pub fn nested_json(depth: usize) -> String {
    let mut doc = String::from("\"leaf\"");
    for i in 0..depth {
        doc = format!("{{\"k{}\":{},\"s{}\":\"text {}\"}}", i, doc, i, i);
    }
    doc
}

/// Multipart body with one text part and one file part.
pub fn multipart(boundary: &str, filename: &str, size: usize) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = "x".repeat(size),
    )
}

// ---------------------------------------------------------------------------
// Rule stores
// ---------------------------------------------------------------------------

/// Store for target `bench` with a realistic payload set and `rules`
/// firewall rules that never match.
pub fn rule_store(rules: usize) -> RuleStore {
    let mut store = RuleStore::new()
        .with_target(Target::new("bench"))
        .with_payload(PayloadData::new(Checkpoint::Query, r"(?i)union\s+select"))
        .with_payload(PayloadData::new(Checkpoint::Query, r"(?i)'\s*or\s*'"))
        .with_payload(PayloadData::new(Checkpoint::Query, r"(?i)sleep\s*\("))
        .with_payload(PayloadData::new(Checkpoint::Query, r"(?i)drop\s+table"))
        .with_payload(PayloadData::new(Checkpoint::Path, r"\.\./"))
        .with_payload(PayloadData::new(Checkpoint::Path, r"\.\.\\"))
        .with_payload(PayloadData::new(Checkpoint::Form, r"(?i)<script"))
        .with_payload(PayloadData::new(Checkpoint::Form, r"(?i)javascript:"))
        .with_payload(PayloadData::new(Checkpoint::Upload, r"(?i)\.(php|jsp|asp)$"));
    for i in 0..rules {
        store = store.with_firewall_rule(FirewallRule::new(
            format!("rule-{}", i),
            "bench",
            format!(r#"http.path == "/never/{}" || http.header contains "x-never-{}""#, i, i),
        ));
    }
    store
}
