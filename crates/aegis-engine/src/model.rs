//! Persisted state and UI-facing views
//!
//! Field names serialize in camelCase so stored blobs and messages stay
//! readable by the extension's JS side. TypeScript bindings are generated
//! with ts-rs.

use std::collections::{BTreeMap, BTreeSet};

use aegis_compiler::CosmeticCollection;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::settings::EngineSettings;

pub const BUILTIN_NETWORK_ID: &str = "builtin-network";
pub const BUILTIN_COSMETIC_ID: &str = "builtin-cosmetic";

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Filter Lists
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ListKind {
    Network,
    Cosmetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FilterList {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ListKind,
    pub source: String,
    #[serde(default)]
    pub builtin: bool,
    #[serde(default)]
    pub enabled: bool,
    /// Raw text of the last fetch, absent for built-ins and oversized lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cached_text: Option<String>,
    #[serde(default)]
    pub cache_too_large: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub last_fetched_at: Option<i64>,
    /// Length of the last fetched text in characters, the same unit as
    /// `EngineSettings::max_cached_chars`. Persisted as `sizeBytes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub size_bytes: Option<usize>,
}

impl FilterList {
    fn builtin(id: &str, title: &str, kind: ListKind, source: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            kind,
            source: source.to_string(),
            builtin: true,
            enabled: true,
            cached_text: None,
            cache_too_large: false,
            content_hash: None,
            last_fetched_at: None,
            size_bytes: None,
        }
    }

    /// The built-in lists, in their canonical order.
    pub fn builtins(settings: &EngineSettings) -> [FilterList; 2] {
        [
            Self::builtin(
                BUILTIN_NETWORK_ID,
                "Built-in network filters",
                ListKind::Network,
                &settings.builtin_network_source,
            ),
            Self::builtin(
                BUILTIN_COSMETIC_ID,
                "Built-in cosmetic filters",
                ListKind::Cosmetic,
                &settings.builtin_cosmetic_source,
            ),
        ]
    }

    /// A user-added remote list. Remote lists are always network lists;
    /// their cosmetic lines are still honored.
    pub fn remote(id: String, source: String, title: Option<String>) -> Self {
        Self {
            title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| source.clone()),
            id,
            kind: ListKind::Network,
            source,
            builtin: false,
            enabled: true,
            cached_text: None,
            cache_too_large: false,
            content_hash: None,
            last_fetched_at: None,
            size_bytes: None,
        }
    }

    pub fn view(&self) -> FilterListView {
        FilterListView {
            id: self.id.clone(),
            title: self.title.clone(),
            kind: self.kind,
            source: self.source.clone(),
            builtin: self.builtin,
            enabled: self.enabled,
            last_fetched_at: self.last_fetched_at,
            cache_too_large: self.cache_too_large,
            content_hash: self.content_hash.clone(),
            size: self
                .size_bytes
                .or_else(|| self.cached_text.as_ref().map(|t| t.chars().count())),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct Stats {
    pub blocked_count: u64,
    pub updated_at: i64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            blocked_count: 0,
            updated_at: now_millis(),
        }
    }
}

/// Persisted root of user configuration and compile bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct Configuration {
    pub version: u32,
    pub enabled: bool,
    pub heuristics_enabled: bool,
    pub same_domain_only: bool,
    pub auto_update_interval_hours: u32,
    pub filter_lists: Vec<FilterList>,
    /// Normalized hostnames.
    pub allowlist: BTreeSet<String>,
    pub stats: Stats,
    pub compiled_rule_count: usize,
    #[ts(optional)]
    pub last_full_compile_at: Option<i64>,
    pub support_links: Vec<SupportLink>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: 1,
            enabled: true,
            heuristics_enabled: true,
            same_domain_only: false,
            auto_update_interval_hours: 24,
            filter_lists: Vec::new(),
            allowlist: BTreeSet::new(),
            stats: Stats::default(),
            compiled_rule_count: 0,
            last_full_compile_at: None,
            support_links: Vec::new(),
        }
    }
}

impl Configuration {
    /// First-run configuration.
    pub fn with_defaults(settings: &EngineSettings) -> Self {
        let mut config = Self {
            auto_update_interval_hours: settings.default_auto_update_hours,
            ..Self::default()
        };
        config.heal(settings);
        config
    }

    /// Re-insert missing built-in lists and point built-ins at their
    /// configured source. Returns whether anything changed.
    pub fn heal(&mut self, settings: &EngineSettings) -> bool {
        let mut changed = false;

        for builtin in FilterList::builtins(settings) {
            match self.filter_lists.iter_mut().find(|l| l.id == builtin.id) {
                Some(existing) => {
                    if !existing.builtin || existing.source != builtin.source {
                        existing.builtin = true;
                        existing.source = builtin.source;
                        changed = true;
                    }
                }
                None => {
                    self.filter_lists.push(builtin);
                    changed = true;
                }
            }
        }

        if self.auto_update_interval_hours == 0 {
            self.auto_update_interval_hours = settings.default_auto_update_hours;
            changed = true;
        }

        changed
    }

    pub fn list(&self, id: &str) -> Option<&FilterList> {
        self.filter_lists.iter().find(|l| l.id == id)
    }

    pub fn list_mut(&mut self, id: &str) -> Option<&mut FilterList> {
        self.filter_lists.iter_mut().find(|l| l.id == id)
    }

    pub fn enabled_lists(&self) -> impl Iterator<Item = &FilterList> {
        self.filter_lists.iter().filter(|l| l.enabled)
    }
}

// =============================================================================
// Cosmetic Cache
// =============================================================================

/// Compiled cosmetic table handed to the content-script side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmeticCache {
    #[serde(flatten)]
    pub selectors: CosmeticCollection,
    #[serde(default)]
    pub heuristics_enabled: bool,
    #[serde(default)]
    pub same_domain_only: bool,
    #[serde(default)]
    pub updated_at: i64,
}

impl CosmeticCache {
    pub fn new(selectors: CosmeticCollection, config: &Configuration) -> Self {
        Self {
            selectors,
            heuristics_enabled: config.heuristics_enabled,
            same_domain_only: config.same_domain_only,
            updated_at: now_millis(),
        }
    }

    pub fn global(&self) -> &BTreeSet<String> {
        &self.selectors.global
    }

    pub fn per_domain(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.selectors.per_domain
    }
}

// =============================================================================
// Support Links
// =============================================================================

/// Links shown by the popup, at most this many.
pub const POPUP_SUPPORT_LINKS: usize = 3;

/// A user-editable donation or project link.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct SupportLink {
    pub id: String,
    pub label: String,
    pub url: String,
}

impl SupportLink {
    /// Fill in a missing id or label. `index` is the link's position in the
    /// submitted list.
    pub fn sanitized(self, index: usize, now: i64) -> Self {
        let id = self.id.trim();
        let label = self.label.trim();
        Self {
            id: if id.is_empty() { format!("support-{now}-{index}") } else { id.to_string() },
            label: if label.is_empty() { "Support".to_string() } else { label.to_string() },
            url: self.url.trim().to_string(),
        }
    }
}

// =============================================================================
// Views and Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PopupState {
    pub enabled: bool,
    #[ts(optional)]
    pub hostname: Option<String>,
    pub site_allowed: bool,
    pub blocked_count: u64,
    pub compiled_rule_count: usize,
    pub support_links: Vec<SupportLink>,
}

/// A filter list as shown in the options page: no cached text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FilterListView {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ListKind,
    pub source: String,
    pub builtin: bool,
    pub enabled: bool,
    #[ts(optional)]
    pub last_fetched_at: Option<i64>,
    pub cache_too_large: bool,
    #[ts(optional)]
    pub content_hash: Option<String>,
    /// Character count.
    #[ts(optional)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OptionsState {
    pub enabled: bool,
    pub heuristics_enabled: bool,
    pub same_domain_only: bool,
    pub auto_update_interval_hours: u32,
    pub stats: Stats,
    pub compiled_rule_count: usize,
    #[ts(optional)]
    pub last_full_compile_at: Option<i64>,
    pub filter_lists: Vec<FilterListView>,
    pub allowlist: Vec<String>,
    pub support_links: Vec<SupportLink>,
}

impl From<&Configuration> for OptionsState {
    fn from(config: &Configuration) -> Self {
        Self {
            enabled: config.enabled,
            heuristics_enabled: config.heuristics_enabled,
            same_domain_only: config.same_domain_only,
            auto_update_interval_hours: config.auto_update_interval_hours,
            stats: config.stats.clone(),
            compiled_rule_count: config.compiled_rule_count,
            last_full_compile_at: config.last_full_compile_at,
            filter_lists: config.filter_lists.iter().map(FilterList::view).collect(),
            allowlist: config.allowlist.iter().cloned().collect(),
            support_links: config.support_links.clone(),
        }
    }
}

/// Request to subscribe to a remote list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewFilterList {
    pub url: String,
    #[serde(default)]
    #[ts(optional)]
    pub title: Option<String>,
}
