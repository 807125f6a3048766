#![allow(missing_docs, dead_code)]
//! Shared benchmark support: requests and rule stores.

pub mod generators;
