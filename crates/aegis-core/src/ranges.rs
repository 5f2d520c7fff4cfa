//! Rule-id ranges
//!
//! The installed rule space is split into fixed, disjoint spans. Every writer
//! owns exactly one span and replaces it wholesale, so ids never collide
//! across categories and stale rules never outlive a rebuild.

use serde::{Deserialize, Serialize};

/// Half-open span of rule ids `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRange {
    pub start: u32,
    pub len: u32,
}

/// Rules compiled from filter lists.
pub const NETWORK_RULES: RuleRange = RuleRange::new(1, 650_000);
/// Allowlist overlay rules.
pub const ALLOWLIST_RULES: RuleRange = RuleRange::new(700_000, 5_000);
/// The single disable-all rule.
pub const SENTINEL_RULE_ID: u32 = 900_000;

impl RuleRange {
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Exclusive upper bound.
    #[inline]
    pub const fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }

    /// Last id inside the range, or `None` for an empty range.
    #[inline]
    pub const fn last(&self) -> Option<u32> {
        if self.len == 0 {
            None
        } else {
            Some(self.end() - 1)
        }
    }

    #[inline]
    pub const fn contains(&self, id: u32) -> bool {
        id >= self.start && id < self.end()
    }

    pub const fn overlaps(&self, other: &RuleRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ranges_are_disjoint() {
        assert!(!NETWORK_RULES.overlaps(&ALLOWLIST_RULES));
        assert!(!NETWORK_RULES.contains(SENTINEL_RULE_ID));
        assert!(!ALLOWLIST_RULES.contains(SENTINEL_RULE_ID));
    }

    #[test]
    fn range_bounds() {
        assert_eq!(NETWORK_RULES.end(), 650_001);
        assert_eq!(NETWORK_RULES.last(), Some(650_000));
        assert!(NETWORK_RULES.contains(1));
        assert!(!NETWORK_RULES.contains(0));
        assert!(!NETWORK_RULES.contains(650_001));

        assert_eq!(ALLOWLIST_RULES.last(), Some(704_999));
        assert!(!ALLOWLIST_RULES.contains(705_000));
        assert_eq!(RuleRange::new(10, 0).last(), None);
    }
}
