//! Filter manager
//!
//! The engine's public surface. Every mutation persists configuration first
//! and then goes through the orchestrator, which is the only writer of
//! installed rules.

use std::sync::Arc;

use aegis_core::url::normalize_host;

use crate::error::{EngineError, Result};
use crate::fetch::ListFetcher;
use crate::model::{
    now_millis, Configuration, CosmeticCache, FilterList, NewFilterList, OptionsState, PopupState, SupportLink,
    POPUP_SUPPORT_LINKS,
};
use crate::orchestrator::{RebuildOrchestrator, RebuildReport, RebuildScope};
use crate::rules::RuleEngine;
use crate::settings::EngineSettings;
use crate::storage::KeyValueStore;
use crate::store::FilterStateStore;

pub struct FilterManager {
    store: Arc<FilterStateStore>,
    rules: Arc<dyn RuleEngine>,
    orchestrator: RebuildOrchestrator,
}

impl FilterManager {
    /// Load persisted state and wire up the services.
    pub async fn open(
        settings: EngineSettings,
        kv: Arc<dyn KeyValueStore>,
        rules: Arc<dyn RuleEngine>,
        fetcher: Arc<dyn ListFetcher>,
    ) -> Result<Self> {
        let store = Arc::new(FilterStateStore::load(kv, Arc::new(settings)).await?);
        let orchestrator = RebuildOrchestrator::new(store.clone(), rules.clone(), fetcher);
        Ok(Self {
            store,
            rules,
            orchestrator,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        self.store.settings()
    }

    pub async fn configuration(&self) -> Configuration {
        self.store.snapshot().await
    }

    /// Bring installed rules in line with persisted state after startup.
    ///
    /// A full rebuild runs when the network range is empty or no cosmetic
    /// cache exists; otherwise only the overlay is re-synced.
    pub async fn bootstrap(&self) -> Result<RebuildReport> {
        let network_range = self.settings().network_range;
        let has_network_rules = self
            .rules
            .installed_rule_ids()
            .await?
            .into_iter()
            .any(|id| network_range.contains(id));
        let has_cosmetics = self.store.cosmetic_cache().await?.is_some();

        let scope = if has_network_rules && has_cosmetics {
            RebuildScope::Overlay
        } else {
            log::info!(
                "bootstrap: network rules {}, cosmetic cache {}, running full rebuild",
                if has_network_rules { "present" } else { "missing" },
                if has_cosmetics { "present" } else { "missing" }
            );
            RebuildScope::Full
        };

        self.orchestrator.rebuild(scope, false).await
    }

    pub async fn popup_state(&self, tab_url: Option<&str>) -> PopupState {
        let config = self.store.snapshot().await;
        let hostname = tab_url.and_then(normalize_host);
        let site_allowed = hostname.as_ref().is_some_and(|h| config.allowlist.contains(h));

        PopupState {
            enabled: config.enabled,
            hostname,
            site_allowed,
            blocked_count: config.stats.blocked_count,
            compiled_rule_count: config.compiled_rule_count,
            support_links: config.support_links.iter().take(POPUP_SUPPORT_LINKS).cloned().collect(),
        }
    }

    pub async fn options_state(&self) -> OptionsState {
        OptionsState::from(&self.store.snapshot().await)
    }

    pub async fn cosmetic_cache(&self) -> Result<Option<CosmeticCache>> {
        self.store.cosmetic_cache().await
    }

    // =========================================================================
    // Overlay mutations
    // =========================================================================

    pub async fn set_enabled(&self, enabled: bool) -> Result<Configuration> {
        self.store
            .update(|c| {
                c.enabled = enabled;
                Ok(())
            })
            .await?;
        self.orchestrator.rebuild(RebuildScope::Overlay, false).await?;
        Ok(self.store.snapshot().await)
    }

    /// Add `hostname` to the allowlist, or remove it if already present.
    /// Input that normalizes to nothing is ignored.
    pub async fn toggle_site(&self, hostname: &str) -> Result<Configuration> {
        let Some(host) = normalize_host(hostname) else {
            return Ok(self.store.snapshot().await);
        };

        self.store
            .update(|c| {
                if !c.allowlist.remove(&host) {
                    c.allowlist.insert(host);
                }
                Ok(())
            })
            .await?;
        self.orchestrator.rebuild(RebuildScope::Overlay, false).await?;
        Ok(self.store.snapshot().await)
    }

    // =========================================================================
    // List mutations
    // =========================================================================

    pub async fn add_filter_list(&self, request: NewFilterList) -> Result<Configuration> {
        let url = request.url.trim().to_string();
        if url.is_empty() {
            return Err(EngineError::InvalidInput("filter list url is empty".to_string()));
        }

        let now = now_millis();
        self.store
            .update(|c| {
                let base = format!("remote-{now}");
                let mut id = base.clone();
                let mut n = 1;
                while c.list(&id).is_some() {
                    id = format!("{base}-{n}");
                    n += 1;
                }
                log::info!("adding filter list {} from {}", id, url);
                c.filter_lists.push(FilterList::remote(id, url, request.title));
                Ok(())
            })
            .await?;

        self.orchestrator.rebuild(RebuildScope::Full, true).await?;
        Ok(self.store.snapshot().await)
    }

    pub async fn remove_filter_list(&self, id: &str) -> Result<Configuration> {
        self.store
            .update(|c| {
                let list = c.list(id).ok_or_else(|| EngineError::UnknownList(id.to_string()))?;
                if list.builtin {
                    return Err(EngineError::BuiltinList(id.to_string()));
                }
                c.filter_lists.retain(|l| l.id != id);
                Ok(())
            })
            .await?;

        self.orchestrator.rebuild(RebuildScope::Full, false).await?;
        Ok(self.store.snapshot().await)
    }

    pub async fn toggle_filter_list(&self, id: &str, enabled: bool) -> Result<Configuration> {
        self.store
            .update(|c| {
                let list = c.list_mut(id).ok_or_else(|| EngineError::UnknownList(id.to_string()))?;
                list.enabled = enabled;
                Ok(())
            })
            .await?;

        self.orchestrator.rebuild(RebuildScope::Full, false).await?;
        Ok(self.store.snapshot().await)
    }

    pub async fn refresh_filters(&self, force_fetch: bool) -> Result<RebuildReport> {
        self.orchestrator.rebuild(RebuildScope::Full, force_fetch).await
    }

    // =========================================================================
    // Cosmetic flags
    // =========================================================================

    pub async fn set_heuristics_enabled(&self, enabled: bool) -> Result<Configuration> {
        let config = self
            .store
            .update(|c| {
                c.heuristics_enabled = enabled;
                Ok(())
            })
            .await?;
        self.store.sync_cosmetic_flags().await?;
        Ok(config)
    }

    pub async fn set_same_domain_only(&self, enabled: bool) -> Result<Configuration> {
        let config = self
            .store
            .update(|c| {
                c.same_domain_only = enabled;
                Ok(())
            })
            .await?;
        self.store.sync_cosmetic_flags().await?;
        Ok(config)
    }

    // =========================================================================
    // Support links
    // =========================================================================

    /// Replace the support links. Missing ids and labels are filled in.
    /// No rebuild is needed.
    pub async fn save_support_links(&self, links: Vec<SupportLink>) -> Result<Configuration> {
        let now = now_millis();
        let links: Vec<SupportLink> = links
            .into_iter()
            .enumerate()
            .map(|(index, link)| link.sanitized(index, now))
            .collect();
        self.store
            .update(move |c| {
                c.support_links = links;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Count a match reported by the host engine. Only network-range rules
    /// count as blocks. Returns the new blocked count.
    pub async fn record_rule_match(&self, rule_id: u32) -> Result<u64> {
        if !self.settings().network_range.contains(rule_id) {
            return Ok(self.store.snapshot().await.stats.blocked_count);
        }

        let config = self
            .store
            .update(|c| {
                c.stats.blocked_count += 1;
                c.stats.updated_at = now_millis();
                Ok(())
            })
            .await?;
        Ok(config.stats.blocked_count)
    }
}
