//! End-to-end inspection tests
//!
//! Drives [`WafHandler`] through its public API only: rule store in,
//! decision or inspection out.

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tollgate::modules::firewall::{FirewallRule, OnFailure, OperatorRegistry};
use tollgate::modules::waf::{
    BlockCause, Checkpoint, Decision, FailurePolicy, InspectedRequest, InspectionState,
    PayloadData, RegexMatcher, RuleStore, Target, Verdict, WafConfig, WafHandler,
};

const MULTIPART: &str = "--frontier\r\n\
    Content-Disposition: form-data; name=\"note\"\r\n\r\n\
    monthly invoice\r\n\
    --frontier\r\n\
    Content-Disposition: form-data; name=\"attachment\"; filename=\"shell.php\"\r\n\
    Content-Type: application/octet-stream\r\n\r\n\
    <?php echo 1; ?>\r\n\
    --frontier--\r\n";

fn store() -> RuleStore {
    RuleStore::new()
        .with_target(Target::new("shop"))
        .with_payload(PayloadData::new(Checkpoint::Query, r"(?i)union\s+select").with_id("sqli"))
        .with_payload(PayloadData::new(Checkpoint::Path, r"\.\./").with_id("traversal"))
        .with_payload(PayloadData::new(Checkpoint::Form, r"(?i)<script>").with_id("xss"))
        .with_payload(PayloadData::new(Checkpoint::Upload, r"\.php$").with_id("php-upload"))
}

fn handler_with(store: RuleStore, config: WafConfig, operators: OperatorRegistry) -> WafHandler {
    WafHandler::from_repository(
        config,
        Arc::new(store),
        Arc::new(RegexMatcher::new()),
        Arc::new(operators),
    )
    .unwrap()
}

fn handler(config: WafConfig) -> WafHandler {
    handler_with(store(), config, OperatorRegistry::with_defaults())
}

fn post(uri: &str, content_type: &str, body: &str) -> InspectedRequest {
    InspectedRequest::from_request(
        Request::post(uri)
            .header("content-type", content_type)
            .body(Bytes::from(body.to_string()))
            .unwrap(),
        None,
    )
}

fn get(uri: &str) -> InspectedRequest {
    InspectedRequest::from_request(Request::get(uri).body(Bytes::new()).unwrap(), None)
}

fn blocking_payload(verdict: &Verdict) -> Option<String> {
    match verdict {
        Verdict::Block(BlockCause::Payload(result)) => {
            result.payload.as_ref().and_then(|p| p.id.clone())
        },
        _ => None,
    }
}

#[tokio::test]
async fn test_static_resource_is_not_inspected() {
    let handler = handler(WafConfig::default());
    let inspection = handler.inspect(&Target::new("shop"), get("/assets/logo.png")).await;

    assert!(inspection.bypassed);
    assert!(!inspection.is_blocked());
    assert_eq!(inspection.workers_spawned, 0);
}

#[tokio::test]
async fn test_block_response_contract() {
    let handler = handler(WafConfig::default());
    let request = Request::get("/the/path?id=1%20union%20select%20pw")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let decision = handler
        .handle(request, None, &Target::new("shop"))
        .await
        .unwrap();
    let Decision::Block(response) = decision else {
        panic!("expected a block");
    };
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"Bad Request. /the/path");
}

#[tokio::test]
async fn test_nested_json_leaf_blocks() {
    let handler = handler(WafConfig::default());
    let request = post("/api/comments", "application/json", r#"{"a":{"b":["<script>"]}}"#);
    let inspection = handler.inspect(&Target::new("shop"), request).await;

    assert_eq!(inspection.state, InspectionState::Blocked);
    assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("xss"));
}

#[tokio::test]
async fn test_multipart_php_upload_blocks() {
    let handler = handler(WafConfig::default());
    let request = post("/upload", "multipart/form-data; boundary=frontier", MULTIPART);
    let inspection = handler.inspect(&Target::new("shop"), request).await;

    assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("php-upload"));
}

#[tokio::test]
async fn test_inspection_is_idempotent() {
    let handler = handler(WafConfig::default());
    let before: Vec<PayloadData> = handler.payload_engine().payloads().iter().cloned().collect();

    for _ in 0..2 {
        let inspection = handler
            .inspect(&Target::new("shop"), get("/files/..%2F..%2Fetc%2Fpasswd"))
            .await;
        assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("traversal"));
    }

    let after: Vec<PayloadData> = handler.payload_engine().payloads().iter().cloned().collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_clean_form_passes_and_is_replayed() {
    let handler = handler(WafConfig::default());
    let request = Request::post("/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(b"user=ann&pin=1234")))
        .unwrap();

    let decision = handler
        .handle(request, None, &Target::new("shop"))
        .await
        .unwrap();
    let Decision::Pass(forwarded) = decision else {
        panic!("expected a pass");
    };
    let body = forwarded.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"user=ann&pin=1234");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_firewall_rules_run_in_parallel() {
    const RULES: usize = 6;
    const DELAY: Duration = Duration::from_millis(200);

    let mut operators = OperatorRegistry::with_defaults();
    operators.register("sleepy", OnFailure::NoMatch, |_, _| {
        std::thread::sleep(DELAY);
        Ok(false)
    });
    let mut store = RuleStore::new().with_target(Target::new("shop"));
    for i in 0..RULES {
        store = store.with_firewall_rule(FirewallRule::new(
            format!("slow-{}", i),
            "shop",
            r#"http.path sleepy """#,
        ));
    }
    let handler = handler_with(store, WafConfig::default(), operators);

    let started = Instant::now();
    let inspection = handler.inspect(&Target::new("shop"), get("/slow")).await;
    let elapsed = started.elapsed();

    assert!(!inspection.is_blocked());
    assert_eq!(inspection.workers_spawned, RULES);
    assert!(elapsed < DELAY * 3, "took {:?}", elapsed);
}

#[tokio::test]
async fn test_le_operator_rule() {
    let store = RuleStore::new()
        .with_target(Target::new("shop"))
        .with_firewall_rule(FirewallRule::new(
            "short-query",
            "shop",
            r#"3 le "5" && http.query contains "debug""#,
        ))
        .with_firewall_rule(FirewallRule::new("never", "shop", r#"7 le "5""#));
    let handler = handler_with(store, WafConfig::default(), OperatorRegistry::with_defaults());

    let inspection = handler.inspect(&Target::new("shop"), get("/x?debug=1")).await;
    match &inspection.verdict {
        Verdict::Block(BlockCause::Firewall(result)) => {
            assert_eq!(result.rule.as_ref().map(|r| r.id.as_str()), Some("short-query"));
        },
        other => panic!("unexpected verdict {:?}", other),
    }

    let inspection = handler.inspect(&Target::new("shop"), get("/x?page=2")).await;
    assert!(!inspection.is_blocked());
}

#[tokio::test]
async fn test_rules_are_scoped_to_their_target() {
    let store = RuleStore::new()
        .with_target(Target::new("shop"))
        .with_target(Target::new("blog"))
        .with_firewall_rule(FirewallRule::new("no-delete", "shop", r#"http.method == "DELETE""#));
    let handler = handler_with(store, WafConfig::default(), OperatorRegistry::with_defaults());

    let delete = || {
        InspectedRequest::from_request(
            Request::builder()
                .method(Method::DELETE)
                .uri("/posts/1")
                .body(Bytes::new())
                .unwrap(),
            None,
        )
    };
    assert!(handler.inspect(&Target::new("shop"), delete()).await.is_blocked());
    assert!(!handler.inspect(&Target::new("blog"), delete()).await.is_blocked());
}

#[tokio::test]
async fn test_zero_deadline() {
    let open = handler(WafConfig::default().with_deadline(Duration::ZERO));
    let inspection = open.inspect(&Target::new("shop"), get("/a?q=1")).await;
    assert_eq!(inspection.state, InspectionState::TimedOut);
    assert!(!inspection.is_blocked());

    let closed = handler(
        WafConfig::default()
            .with_deadline(Duration::ZERO)
            .with_failure_policy(FailurePolicy::FailClosed),
    );
    let inspection = closed.inspect(&Target::new("shop"), get("/a?q=1")).await;
    assert_eq!(inspection.state, InspectionState::TimedOut);
    assert!(matches!(inspection.verdict, Verdict::Block(BlockCause::Policy)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_earliest_registered_match_wins() {
    let mut operators = OperatorRegistry::with_defaults();
    operators.register("slow_true", OnFailure::NoMatch, |_, _| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(true)
    });
    let store = RuleStore::new()
        .with_target(Target::new("shop"))
        .with_firewall_rule(FirewallRule::new("first", "shop", r#"http.path slow_true """#))
        .with_firewall_rule(FirewallRule::new("second", "shop", "true"));
    let handler = handler_with(store, WafConfig::default(), operators);

    let inspection = handler.inspect(&Target::new("shop"), get("/x")).await;
    match &inspection.verdict {
        Verdict::Block(BlockCause::Firewall(result)) => {
            assert_eq!(result.rule.as_ref().map(|r| r.id.as_str()), Some("first"));
        },
        other => panic!("unexpected verdict {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_utf8_escape_still_decoded() {
    let handler = handler(WafConfig::default());
    let target = Target::new("shop");

    let inspection = handler
        .inspect(&target, get("/a?q=1%20union%20select%20pw%FF"))
        .await;
    assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("sqli"));

    let inspection = handler.inspect(&target, get("/files/..%2F..%2Fetc%FF")).await;
    assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("traversal"));
}

#[tokio::test]
async fn test_json_past_parser_depth_limit_blocks() {
    let handler = handler(WafConfig::default());
    let depth = 600;
    let body = format!(
        "{}\"<script>\"{}",
        "[{\"k\":".repeat(depth),
        "}]".repeat(depth)
    );

    let inspection = handler
        .inspect(&Target::new("shop"), post("/api", "application/json", &body))
        .await;
    assert_eq!(blocking_payload(&inspection.verdict).as_deref(), Some("xss"));
}
