//! tollgate binary entry point.
//!
//! Loads and validates the configuration and rule store, builds the
//! inspection engines, and reports what would be enforced.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use tollgate::config::{ConfigLoader, LogFormat, LoggingConfig, Settings};
use tollgate::modules::firewall::{Expression, OperatorRegistry};
use tollgate::modules::waf::{AuditLogger, Checkpoint, RegexMatcher, WafHandler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "tollgate.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let loader = ConfigLoader::new();
    let settings = match loader.load_or_default(&path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("tollgate: {}", e);
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&settings.logging);

    info!(version = env!("CARGO_PKG_VERSION"), config = %path, "tollgate starting");
    match run(&loader, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_directive()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

async fn run(loader: &ConfigLoader, settings: Settings) -> Result<(), Box<dyn Error>> {
    let store = loader.load_rules(&settings)?;
    for rule in store.orphan_rules() {
        warn!(rule_id = %rule.id, target_id = %rule.target_id, "firewall rule for unknown target");
    }

    let matcher = Arc::new(RegexMatcher::new());
    matcher.precompile(store.payloads.iter().map(|p| p.pattern.as_str()))?;

    let operators = Arc::new(OperatorRegistry::with_defaults());
    for rule in &store.firewall_rules {
        if let Err(e) = Expression::parse(&rule.expression, &operators) {
            warn!(rule_id = %rule.id, error = %e, "firewall rule will never match");
        }
    }

    let store = Arc::new(store);
    let mut handler = WafHandler::from_repository(
        settings.waf.clone(),
        store.clone(),
        matcher,
        Arc::clone(&operators),
    )?;
    if let Some(audit) = AuditLogger::from_config(&settings.waf.audit)? {
        handler = handler.with_audit(audit);
    }

    let payloads = handler.payload_engine().payloads();
    let per_checkpoint = [
        Checkpoint::Query,
        Checkpoint::Path,
        Checkpoint::Form,
        Checkpoint::Upload,
    ]
    .map(|cp| format!("{}={}", cp, payloads.for_checkpoint(cp).len()))
    .join(" ");

    info!(
        targets = store.targets.len(),
        payloads = %per_checkpoint,
        firewall_rules = store.firewall_rules.len(),
        operators = ?operators.names(),
        deadline_ms = settings.waf.deadline_ms,
        failure_policy = ?settings.waf.failure_policy,
        audit = handler.audit().is_some(),
        "inspection core ready"
    );

    if let Some(audit) = handler.audit() {
        audit.shutdown().await;
    }
    Ok(())
}
