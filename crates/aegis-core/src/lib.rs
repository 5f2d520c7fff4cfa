//! Aegis Core Library
//!
//! Shared definitions for the Aegis filter engine: the declarative rule model
//! handed to the host rule engine, the fixed rule-id ranges each rule category
//! lives in, and small host/text helpers used by both the compiler and the
//! lifecycle engine.
//!
//! # Modules
//!
//! - `types`: Compiled rule model, resource types and priority tiers
//! - `ranges`: Disjoint rule-id ranges (network, allowlist, sentinel)
//! - `url`: Allocation-light host extraction and hostname normalization
//! - `hash`: Content hashing for fetched filter list text

pub mod hash;
pub mod ranges;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use hash::content_hash;
pub use ranges::{RuleRange, ALLOWLIST_RULES, NETWORK_RULES, SENTINEL_RULE_ID};
pub use types::{
    priority, CompiledRule, DomainType, ResourceType, ResourceTypes, RuleAction, RuleActionType,
    RuleCondition,
};
pub use url::normalize_host;
