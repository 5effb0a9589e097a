//! Namespace and per-record authorization for the Recall memory gateway.
//!
//! Authorization runs in two stages: a coarse namespace policy evaluated
//! before any confirmation, and a per-record ownership check evaluated after
//! confirmation against the record currently held by the store.

pub mod namespace;
pub mod policy;

pub use namespace::{Namespace, NamespaceParseError, Operation};
pub use policy::{
    allowed, authorize_record_update, evaluate_access, identity_matches, AccessDecision,
    AccessPolicyConfig, RecordOwnership,
};
