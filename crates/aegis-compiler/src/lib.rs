//! Aegis filter list compiler
//!
//! Pure stages of the rebuild pipeline: filter text parsing, network rule
//! compilation, cosmetic selector merging and allowlist rule generation.
//! Nothing here does I/O.

pub mod allowlist;
pub mod compiler;
pub mod cosmetic;
pub mod parser;

pub use allowlist::build_allowlist_rules;
pub use compiler::{
    compile_network_rules, compile_network_rules_with, CompileError, CompileErrorKind, CompileOutput, MAX_REGEX_LEN,
};
pub use cosmetic::{merge_collections, CosmeticCollection};
pub use parser::{
    parse_filter_text, DomainConstraint, NetworkOptions, NetworkRuleEntry, ParseDiagnostics, ParsedFilterList,
};
