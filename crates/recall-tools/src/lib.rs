//! JSON tool surface over the Recall memory gateway.
//!
//! Exposes memory and people operations as named tools that take JSON
//! arguments and return structured status payloads for an agent runtime.

pub mod tools;

pub use tools::*;
