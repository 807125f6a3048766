//! Firewall Rule Module
//!
//! Target-scoped boolean rules evaluated over a flat fact map derived from
//! the request:
//! - `ip.src`, `http.query`, `http.path`, `http.host`
//! - `http.cookie`, `http.header`, `http.method`, `http.protocol`
//!
//! Comparisons beyond the built-in `==`/`<` family come from an
//! [`OperatorRegistry`] built once at startup.

mod engine;
mod error;
mod expression;
mod facts;
mod operators;

pub use engine::{FirewallEngine, FirewallMatchResult, FirewallRule};
pub use error::{FirewallError, FirewallResult};
pub use expression::Expression;
pub use facts::{RequestFacts, FACT_KEYS};
pub use operators::{OnFailure, OperatorFn, OperatorRegistry, Value};
