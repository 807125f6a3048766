//! # tollgate
//!
//! The request-inspection core of a web application firewall.
//!
//! ## Features
//!
//! - Ordered payload patterns per checkpoint (query, path, form, upload)
//! - Multipart, JSON and url-encoded body inspection
//! - Target-scoped firewall rules over request facts
//! - A single deadline with a fail-open or fail-closed policy
//! - Bounded, asynchronous audit logging
//!
//! ## Architecture
//!
//! [`modules::waf::WafHandler`] owns one request at a time. It checks
//! eligibility, runs one payload worker per checkpoint, then one firewall
//! worker per rule, and stops at the first match. Payloads and operators are
//! loaded once at startup and shared read-only.

pub mod config;
pub mod modules;
