//! Allowlist overlay rules
//!
//! One unconditional allow rule per allow-listed site, matched on the
//! initiating domain so everything a trusted page loads goes through.

use std::collections::HashSet;

use aegis_core::ranges::RuleRange;
use aegis_core::types::{priority, CompiledRule, RuleAction, RuleCondition};
use aegis_core::url::normalize_host;

/// Build allow rules for `hosts`, with ids taken from `budget`.
///
/// Hosts are normalized and deduplicated in first-seen order. Hosts past the
/// budget are dropped.
pub fn build_allowlist_rules<I, S>(hosts: I, budget: RuleRange) -> Vec<CompiledRule>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();

    hosts
        .into_iter()
        .filter_map(|h| normalize_host(h.as_ref()))
        .filter(|h| seen.insert(h.clone()))
        .take(budget.len as usize)
        .zip(budget.start..)
        .map(|(host, id)| CompiledRule {
            id,
            priority: priority::ALLOWLIST,
            action: RuleAction::allow(),
            condition: RuleCondition {
                initiator_domains: vec![host],
                ..RuleCondition::match_all()
            },
        })
        .collect()
}
