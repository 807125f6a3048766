//! # Inspection Modules
//!
//! - [`waf`] - Payload matching, orchestration, snapshots and audit logging
//! - [`firewall`] - Target-scoped rule expressions and the operator registry

pub mod firewall;
pub mod waf;
