//! Network rule compiler
//!
//! Turns parsed network entries into declarative rules inside a fixed id
//! budget. Ids are handed out in input order; once the budget is spent the
//! tail of the input is dropped and reported, never reordered.

use aegis_core::ranges::RuleRange;
use aegis_core::types::{priority, CompiledRule, RuleAction, RuleCondition};
use serde::Serialize;

use crate::parser::{DomainConstraint, NetworkRuleEntry};

/// Longest regex body accepted, in characters.
pub const MAX_REGEX_LEN: usize = 200;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
pub enum CompileErrorKind {
    #[error("empty regex body")]
    EmptyRegex,

    #[error("regex body too long")]
    RegexTooLong,

    #[error("rule budget exhausted")]
    Limit,
}

/// A dropped entry and the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileError {
    #[serde(rename = "type")]
    pub kind: CompileErrorKind,
    pub entry: NetworkRuleEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub rules: Vec<CompiledRule>,
    /// First id not used by `rules`.
    pub next_id: u32,
    pub errors: Vec<CompileError>,
}

impl CompileOutput {
    pub fn count(&self, kind: CompileErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    pub fn truncated(&self) -> usize {
        self.count(CompileErrorKind::Limit)
    }

    /// Entries rejected for an empty or overlong regex body. Budget
    /// truncation is counted separately by [`truncated`](Self::truncated).
    pub fn rejected(&self) -> usize {
        self.count(CompileErrorKind::EmptyRegex) + self.count(CompileErrorKind::RegexTooLong)
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile `entries` into rules with ids from `budget`.
pub fn compile_network_rules(entries: &[NetworkRuleEntry], budget: RuleRange) -> CompileOutput {
    compile_network_rules_with(entries, budget, MAX_REGEX_LEN)
}

/// Same as [`compile_network_rules`] with an explicit regex length cap.
pub fn compile_network_rules_with(
    entries: &[NetworkRuleEntry],
    budget: RuleRange,
    regex_max_len: usize,
) -> CompileOutput {
    let mut output = CompileOutput {
        next_id: budget.start,
        ..CompileOutput::default()
    };

    for (index, entry) in entries.iter().enumerate() {
        if output.next_id >= budget.end() {
            output.errors.extend(entries[index..].iter().map(|e| CompileError {
                kind: CompileErrorKind::Limit,
                entry: e.clone(),
            }));
            log::warn!(
                "rule budget of {} exhausted, dropped {} trailing entries",
                budget.len,
                entries.len() - index
            );
            break;
        }

        match build_condition(entry, regex_max_len) {
            Ok(condition) => {
                output.rules.push(CompiledRule {
                    id: output.next_id,
                    priority: if entry.is_exception { priority::EXCEPTION } else { priority::BLOCK },
                    action: if entry.is_exception { RuleAction::allow() } else { RuleAction::block() },
                    condition,
                });
                output.next_id += 1;
            }
            Err(kind) => output.errors.push(CompileError {
                kind,
                entry: entry.clone(),
            }),
        }
    }

    output
}

/// Regex body of a `/.../` pattern, if it is one.
fn regex_body(pattern: &str) -> Option<&str> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

fn build_condition(entry: &NetworkRuleEntry, regex_max_len: usize) -> Result<RuleCondition, CompileErrorKind> {
    let options = &entry.options;
    let mut condition = RuleCondition::default();

    match regex_body(&entry.pattern) {
        Some("") => return Err(CompileErrorKind::EmptyRegex),
        Some(body) if body.chars().count() > regex_max_len => return Err(CompileErrorKind::RegexTooLong),
        Some(body) => condition.regex_filter = Some(body.to_string()),
        None => {
            condition.url_filter = Some(entry.pattern.clone());
            if options.match_case {
                condition.is_url_filter_case_sensitive = Some(true);
            }
        }
    }

    condition.resource_types = options.resource_types.types().collect();
    (condition.initiator_domains, condition.excluded_initiator_domains) = domain_lists(&options.initiator);
    (condition.request_domains, condition.excluded_request_domains) = domain_lists(&options.request);
    condition.domain_type = options.domain_type;

    Ok(condition)
}

fn domain_lists(constraint: &DomainConstraint) -> (Vec<String>, Vec<String>) {
    (
        constraint.include.iter().cloned().collect(),
        constraint.exclude.iter().cloned().collect(),
    )
}
