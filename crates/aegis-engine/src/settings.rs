//! Engine settings
//!
//! Deployment-level knobs. Persisted user preferences live in
//! [`Configuration`](crate::model::Configuration) instead.

use aegis_core::ranges::{RuleRange, ALLOWLIST_RULES, NETWORK_RULES, SENTINEL_RULE_ID};
use aegis_compiler::MAX_REGEX_LEN;
use serde::{Deserialize, Serialize};

/// Lists above this many characters are never cached.
pub const MAX_CACHED_CHARS: usize = 900_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub network_range: RuleRange,
    pub allowlist_range: RuleRange,
    pub sentinel_id: u32,
    pub max_cached_chars: usize,
    pub regex_max_len: usize,
    pub builtin_network_source: String,
    pub builtin_cosmetic_source: String,
    pub state_key: String,
    pub cosmetic_key: String,
    pub default_auto_update_hours: u32,
    pub auto_update_initial_delay_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            network_range: NETWORK_RULES,
            allowlist_range: ALLOWLIST_RULES,
            sentinel_id: SENTINEL_RULE_ID,
            max_cached_chars: MAX_CACHED_CHARS,
            regex_max_len: MAX_REGEX_LEN,
            builtin_network_source: "filters/default_network.txt".to_string(),
            builtin_cosmetic_source: "filters/default_cosmetic.txt".to_string(),
            state_key: "aegis_state".to_string(),
            cosmetic_key: "aegis_cosmetic".to_string(),
            default_auto_update_hours: 24,
            auto_update_initial_delay_secs: 5 * 60,
        }
    }
}

impl EngineSettings {
    /// Parse settings from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = EngineSettings::from_json(r#"{ "maxCachedChars": 10, "stateKey": "custom" }"#).expect("parse");
        assert_eq!(settings.max_cached_chars, 10);
        assert_eq!(settings.state_key, "custom");
        assert_eq!(settings.cosmetic_key, "aegis_cosmetic");
        assert_eq!(settings.network_range, NETWORK_RULES);
        assert_eq!(settings.sentinel_id, 900_000);
    }

    #[test]
    fn default_ranges_do_not_overlap() {
        let settings = EngineSettings::default();
        assert!(!settings.network_range.overlaps(&settings.allowlist_range));
        assert!(!settings.network_range.contains(settings.sentinel_id));
        assert!(!settings.allowlist_range.contains(settings.sentinel_id));
    }
}
