//! Rebuild orchestration
//!
//! A rebuild fetches every enabled list, parses and compiles it, installs the
//! result into the network range, re-syncs the sentinel and allowlist
//! overlay, and persists the cosmetic table and compile bookkeeping.
//!
//! At most one rebuild runs at a time. A request that arrives while a run is
//! in flight attaches to it and receives the same outcome, unless the run
//! can no longer reflect the request (see [`RebuildScope`]), in which case
//! the request waits for the run to finish and then starts its own.

use std::sync::{Arc, Mutex, PoisonError};

use aegis_compiler::{build_allowlist_rules, compile_network_rules_with, parse_filter_text, CosmeticCollection};
use aegis_core::hash::content_hash;
use tokio::sync::oneshot;

use crate::error::{EngineError, Result};
use crate::fetch::{FetchOptions, ListFetcher};
use crate::model::{now_millis, FilterList};
use crate::rules::{ensure_disable_rule, replace_range, RuleEngine};
use crate::store::FilterStateStore;

// =============================================================================
// Scope and Report
// =============================================================================

/// How much of the compiled state a rebuild recomputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildScope {
    /// Fetch, parse, compile and install everything.
    Full,
    /// Re-sync only the sentinel and the allowlist range from the current
    /// configuration.
    Overlay,
}

impl std::fmt::Display for RebuildScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Overlay => f.write_str("overlay"),
        }
    }
}

/// Per-list contribution to a full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    pub network_entries: usize,
    pub cosmetic_selectors: usize,
    pub skipped_lines: usize,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOutcome {
    pub list_id: String,
    pub title: String,
    /// `Err` carries the failure message; the list contributed nothing.
    pub result: std::result::Result<ListStats, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub scope: RebuildScope,
    pub force_fetch: bool,
    pub lists: Vec<ListOutcome>,
    pub compiled_rule_count: usize,
    pub regex_rejected: usize,
    pub truncated: usize,
    pub allowlist_rule_count: usize,
    pub sentinel_installed: bool,
    pub finished_at: i64,
}

impl RebuildReport {
    pub fn failed_lists(&self) -> impl Iterator<Item = &ListOutcome> {
        self.lists.iter().filter(|l| l.result.is_err())
    }
}

pub type RebuildOutcome = std::result::Result<RebuildReport, EngineError>;

// =============================================================================
// Run State
// =============================================================================

enum RunState {
    Idle,
    Running {
        scope: RebuildScope,
        /// Set once the run has read the configuration for its overlay
        /// phase; later overlay changes are invisible to it.
        overlay_started: bool,
        waiters: Vec<oneshot::Sender<RebuildOutcome>>,
    },
}

enum Ticket {
    Lead,
    Join(oneshot::Receiver<RebuildOutcome>),
    WaitThenRetry(oneshot::Receiver<RebuildOutcome>),
}

/// Resets the run state if the leading future is dropped mid-run. Dropping
/// the waiters' senders reports [`EngineError::Interrupted`] to them.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
    armed: bool,
}

impl RunGuard<'_> {
    fn take_waiters(&self) -> Vec<oneshot::Sender<RebuildOutcome>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *state, RunState::Idle) {
            RunState::Running { waiters, .. } => waiters,
            RunState::Idle => Vec::new(),
        }
    }

    fn finish(mut self) -> Vec<oneshot::Sender<RebuildOutcome>> {
        self.armed = false;
        self.take_waiters()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let waiters = self.take_waiters();
            log::warn!("rebuild dropped before completion, {} waiters interrupted", waiters.len());
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Text of one list plus the cache bookkeeping a network fetch produced.
struct LoadedList {
    text: String,
    from_cache: bool,
    update: Option<CacheUpdate>,
}

struct CacheUpdate {
    fetched_at: i64,
    content_hash: String,
    size_chars: usize,
    cached_text: Option<String>,
}

impl CacheUpdate {
    fn new(text: &str, max_cached_chars: usize) -> Self {
        let size_chars = text.chars().count();
        Self {
            fetched_at: now_millis(),
            content_hash: content_hash(text),
            size_chars,
            cached_text: (size_chars <= max_cached_chars).then(|| text.to_string()),
        }
    }

    fn apply(self, list: &mut FilterList) {
        list.last_fetched_at = Some(self.fetched_at);
        list.content_hash = Some(self.content_hash);
        list.size_bytes = Some(self.size_chars);
        list.cache_too_large = self.cached_text.is_none();
        list.cached_text = self.cached_text;
    }
}

pub struct RebuildOrchestrator {
    store: Arc<FilterStateStore>,
    rules: Arc<dyn RuleEngine>,
    fetcher: Arc<dyn ListFetcher>,
    state: Mutex<RunState>,
}

impl RebuildOrchestrator {
    pub fn new(store: Arc<FilterStateStore>, rules: Arc<dyn RuleEngine>, fetcher: Arc<dyn ListFetcher>) -> Self {
        Self {
            store,
            rules,
            fetcher,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, RunState::Running { .. })
    }

    /// Run a rebuild, or attach to the one in flight.
    ///
    /// `force_fetch` re-downloads remote lists even when cached. A caller
    /// that attaches to a running rebuild gets that run's outcome; its own
    /// `force_fetch` is not merged in.
    pub async fn rebuild(&self, scope: RebuildScope, force_fetch: bool) -> RebuildOutcome {
        loop {
            match self.ticket(scope) {
                Ticket::Lead => return self.lead(scope, force_fetch).await,
                Ticket::Join(rx) => return rx.await.unwrap_or(Err(EngineError::Interrupted)),
                Ticket::WaitThenRetry(rx) => {
                    let _ = rx.await;
                }
            }
        }
    }

    fn ticket(&self, requested: RebuildScope) -> Ticket {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            RunState::Idle => {
                *state = RunState::Running {
                    scope: requested,
                    overlay_started: false,
                    waiters: Vec::new(),
                };
                Ticket::Lead
            }
            RunState::Running {
                scope,
                overlay_started,
                waiters,
            } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);

                let covered = match requested {
                    RebuildScope::Full => *scope == RebuildScope::Full,
                    RebuildScope::Overlay => !*overlay_started,
                };
                if covered {
                    Ticket::Join(rx)
                } else {
                    Ticket::WaitThenRetry(rx)
                }
            }
        }
    }

    fn mark_overlay_started(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let RunState::Running { overlay_started, .. } = &mut *state {
            *overlay_started = true;
        }
    }

    async fn lead(&self, scope: RebuildScope, force_fetch: bool) -> RebuildOutcome {
        let guard = RunGuard {
            state: &self.state,
            armed: true,
        };

        let outcome = match scope {
            RebuildScope::Full => self.run_full(force_fetch).await,
            RebuildScope::Overlay => self.run_overlay().await,
        };

        match &outcome {
            Ok(report) => log::info!(
                "{} rebuild finished: {} network rules, {} allowlist rules, sentinel {}",
                scope,
                report.compiled_rule_count,
                report.allowlist_rule_count,
                if report.sentinel_installed { "on" } else { "off" }
            ),
            Err(err) => log::error!("{} rebuild failed: {}", scope, err),
        }

        let waiters = guard.finish();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    async fn run_overlay(&self) -> RebuildOutcome {
        let (sentinel_installed, allowlist_rule_count) = self.sync_overlay().await?;
        let config = self.store.snapshot().await;

        Ok(RebuildReport {
            scope: RebuildScope::Overlay,
            force_fetch: false,
            lists: Vec::new(),
            compiled_rule_count: config.compiled_rule_count,
            regex_rejected: 0,
            truncated: 0,
            allowlist_rule_count,
            sentinel_installed,
            finished_at: now_millis(),
        })
    }

    /// Sentinel and allowlist from the current configuration.
    async fn sync_overlay(&self) -> Result<(bool, usize)> {
        self.mark_overlay_started();
        let settings = self.store.settings();
        let config = self.store.snapshot().await;

        let sentinel_installed = ensure_disable_rule(&*self.rules, settings.sentinel_id, !config.enabled).await?;

        let allow_rules = build_allowlist_rules(&config.allowlist, settings.allowlist_range);
        let allowlist_rule_count = allow_rules.len();
        if allowlist_rule_count < config.allowlist.len() {
            log::warn!(
                "allowlist has {} hosts, only {} installed",
                config.allowlist.len(),
                allowlist_rule_count
            );
        }
        replace_range(&*self.rules, settings.allowlist_range, allow_rules).await?;

        Ok((sentinel_installed, allowlist_rule_count))
    }

    async fn run_full(&self, force_fetch: bool) -> RebuildOutcome {
        let settings = self.store.settings();
        let config = self.store.snapshot().await;
        log::info!(
            "full rebuild started: {} enabled lists, force_fetch={}",
            config.enabled_lists().count(),
            force_fetch
        );

        let mut entries = Vec::new();
        let mut cosmetics = CosmeticCollection::new();
        let mut lists = Vec::new();
        let mut updates = Vec::new();

        for list in config.enabled_lists() {
            let result = match self.load_list(list, force_fetch).await {
                Ok(loaded) => {
                    let parsed = parse_filter_text(&loaded.text);
                    let stats = ListStats {
                        network_entries: parsed.network.len(),
                        cosmetic_selectors: parsed.cosmetics.selector_count(),
                        skipped_lines: parsed.diagnostics.skipped_count,
                        from_cache: loaded.from_cache,
                    };
                    entries.extend(parsed.network);
                    cosmetics.absorb(parsed.cosmetics);
                    if let Some(update) = loaded.update {
                        updates.push((list.id.clone(), update));
                    }
                    Ok(stats)
                }
                Err(err) => {
                    log::warn!("skipping list {} ({}): {}", list.id, list.title, err);
                    Err(err.to_string())
                }
            };
            lists.push(ListOutcome {
                list_id: list.id.clone(),
                title: list.title.clone(),
                result,
            });
        }

        let compiled = compile_network_rules_with(&entries, settings.network_range, settings.regex_max_len);
        let compiled_rule_count = compiled.rules.len();
        let regex_rejected = compiled.rejected();
        let truncated = compiled.truncated();
        if truncated > 0 {
            log::warn!("rule limit reached, {} network entries dropped", truncated);
        }

        replace_range(&*self.rules, settings.network_range, compiled.rules).await?;

        let (sentinel_installed, allowlist_rule_count) = self.sync_overlay().await?;

        self.store.save_compiled_cosmetics(cosmetics).await?;

        let finished_at = now_millis();
        self.store
            .update(move |c| {
                c.compiled_rule_count = compiled_rule_count;
                c.last_full_compile_at = Some(finished_at);
                for (id, update) in updates {
                    // lists removed mid-run are ignored
                    if let Some(list) = c.list_mut(&id) {
                        update.apply(list);
                    }
                }
                Ok(())
            })
            .await?;

        Ok(RebuildReport {
            scope: RebuildScope::Full,
            force_fetch,
            lists,
            compiled_rule_count,
            regex_rejected,
            truncated,
            allowlist_rule_count,
            sentinel_installed,
            finished_at,
        })
    }

    async fn load_list(&self, list: &FilterList, force_fetch: bool) -> Result<LoadedList> {
        if list.builtin {
            let text = self.fetch_text(&list.source, FetchOptions::default()).await?;
            return Ok(LoadedList {
                text,
                from_cache: false,
                update: None,
            });
        }

        if !force_fetch {
            if let Some(text) = &list.cached_text {
                log::debug!("using cached copy of {}", list.id);
                return Ok(LoadedList {
                    text: text.clone(),
                    from_cache: true,
                    update: None,
                });
            }
        }

        let text = self.fetch_text(&list.source, FetchOptions { bypass_cache: true }).await?;
        let update = CacheUpdate::new(&text, self.store.settings().max_cached_chars);
        if update.cached_text.is_none() {
            log::debug!("{} is {} chars, too large to cache", list.id, update.size_chars);
        }

        Ok(LoadedList {
            text,
            from_cache: false,
            update: Some(update),
        })
    }

    async fn fetch_text(&self, source: &str, options: FetchOptions) -> Result<String> {
        let response = self.fetcher.fetch(source, options).await?;
        if !response.is_success() {
            return Err(EngineError::HttpStatus {
                location: source.to_string(),
                status: response.status,
            });
        }
        Ok(response.text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use aegis_core::ranges::{ALLOWLIST_RULES, NETWORK_RULES, SENTINEL_RULE_ID};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::fetch::FetchResponse;
    use crate::model::{BUILTIN_COSMETIC_ID, BUILTIN_NETWORK_ID};
    use crate::rules::MemoryRuleEngine;
    use crate::settings::EngineSettings;
    use crate::storage::MemoryStore;

    pub const NETWORK_TEXT: &str = "! built-in\n||ads.example.com^\n@@||ads.example.com/ok^\n";
    pub const COSMETIC_TEXT: &str = "##.banner\nexample.com##.sidebar-ad\n";

    /// Serves canned responses. The first fetch can be held on a gate.
    #[derive(Default)]
    pub struct StubFetcher {
        responses: Mutex<HashMap<String, FetchResponse>>,
        pub calls: AtomicUsize,
        pub bypassed: AtomicUsize,
        gated: AtomicBool,
        pub entered: Notify,
        pub gate: Notify,
    }

    impl StubFetcher {
        pub fn with_builtins() -> Self {
            let fetcher = Self::default();
            let settings = EngineSettings::default();
            fetcher.serve(&settings.builtin_network_source, 200, NETWORK_TEXT);
            fetcher.serve(&settings.builtin_cosmetic_source, 200, COSMETIC_TEXT);
            fetcher
        }

        pub fn serve(&self, source: &str, status: u16, text: &str) {
            let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            responses.insert(
                source.to_string(),
                FetchResponse {
                    status,
                    text: text.to_string(),
                },
            );
        }

        pub fn hold_first_fetch(&self) {
            self.gated.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ListFetcher for StubFetcher {
        async fn fetch(&self, source: &str, options: FetchOptions) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if options.bypass_cache {
                self.bypassed.fetch_add(1, Ordering::SeqCst);
            }
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            responses
                .get(source)
                .cloned()
                .ok_or_else(|| EngineError::fetch(source, "connection refused"))
        }
    }

    pub struct Harness {
        pub store: Arc<FilterStateStore>,
        pub rules: Arc<MemoryRuleEngine>,
        pub fetcher: Arc<StubFetcher>,
        pub orchestrator: RebuildOrchestrator,
    }

    pub async fn harness_with(settings: EngineSettings, fetcher: StubFetcher) -> Harness {
        let store = Arc::new(
            FilterStateStore::load(Arc::new(MemoryStore::new()), Arc::new(settings))
                .await
                .expect("load"),
        );
        let rules = Arc::new(MemoryRuleEngine::new());
        let fetcher = Arc::new(fetcher);
        let orchestrator = RebuildOrchestrator::new(store.clone(), rules.clone(), fetcher.clone());
        Harness {
            store,
            rules,
            fetcher,
            orchestrator,
        }
    }

    async fn harness() -> Harness {
        harness_with(EngineSettings::default(), StubFetcher::with_builtins()).await
    }

    async fn add_remote(h: &Harness, id: &str, url: &str) {
        let list = FilterList::remote(id.to_string(), url.to_string(), None);
        h.store
            .update(move |c| {
                c.filter_lists.push(list);
                Ok(())
            })
            .await
            .expect("add list");
    }

    #[tokio::test]
    async fn full_rebuild_installs_rules_and_cosmetics() {
        let h = harness().await;
        let report = h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("rebuild");

        assert_eq!(report.compiled_rule_count, 2);
        assert_eq!(report.lists.len(), 2);
        assert!(report.failed_lists().next().is_none());
        assert!(!report.sentinel_installed);

        let network = h.rules.rules_in(NETWORK_RULES);
        assert_eq!(network.len(), 2);
        assert!(network[1].priority > network[0].priority);

        let cache = h.store.cosmetic_cache().await.expect("read").expect("saved");
        assert!(cache.global().contains(".banner"));
        assert!(cache.per_domain()["example.com"].contains(".sidebar-ad"));
        assert!(cache.heuristics_enabled);

        let config = h.store.snapshot().await;
        assert_eq!(config.compiled_rule_count, 2);
        assert_eq!(config.last_full_compile_at, Some(report.finished_at));
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn failing_list_is_skipped_and_others_still_compile() {
        let h = harness().await;
        h.fetcher.serve("https://lists.example/good.txt", 200, "||good-list.example^\n");
        h.fetcher.serve("https://lists.example/gone.txt", 404, "not found");
        add_remote(&h, "remote-good", "https://lists.example/good.txt").await;
        add_remote(&h, "remote-gone", "https://lists.example/gone.txt").await;
        add_remote(&h, "remote-down", "https://lists.example/down.txt").await;

        let report = h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("rebuild");
        let failed: Vec<_> = report.failed_lists().map(|l| l.list_id.as_str()).collect();
        assert_eq!(failed, vec!["remote-gone", "remote-down"]);
        assert_eq!(report.compiled_rule_count, 3);

        let patterns: Vec<_> = h
            .rules
            .rules_in(NETWORK_RULES)
            .into_iter()
            .filter_map(|r| r.condition.url_filter)
            .collect();
        assert!(patterns.contains(&"||good-list.example^".to_string()));
    }

    #[tokio::test]
    async fn remote_cache_is_used_until_forced() {
        let h = harness().await;
        h.fetcher.serve("https://lists.example/a.txt", 200, "||a.example^\n");
        add_remote(&h, "remote-a", "https://lists.example/a.txt").await;

        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("first");
        let list = h.store.snapshot().await.list("remote-a").cloned().expect("list");
        assert_eq!(list.cached_text.as_deref(), Some("||a.example^\n"));
        assert_eq!(list.size_bytes, Some(13));
        assert_eq!(list.content_hash, Some(content_hash("||a.example^\n")));
        assert!(list.last_fetched_at.is_some());
        assert!(!list.cache_too_large);
        assert_eq!(h.fetcher.bypassed.load(Ordering::SeqCst), 1);

        // served from cache even though the remote changed
        h.fetcher.serve("https://lists.example/a.txt", 200, "||b.example^\n");
        let report = h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("cached");
        assert_eq!(h.fetcher.bypassed.load(Ordering::SeqCst), 1);
        let remote = report.lists.iter().find(|l| l.list_id == "remote-a").expect("outcome");
        assert_eq!(remote.result.as_ref().map(|s| s.from_cache), Ok(true));

        h.orchestrator.rebuild(RebuildScope::Full, true).await.expect("forced");
        assert_eq!(h.fetcher.bypassed.load(Ordering::SeqCst), 2);
        let list = h.store.snapshot().await.list("remote-a").cloned().expect("list");
        assert_eq!(list.cached_text.as_deref(), Some("||b.example^\n"));
    }

    #[tokio::test]
    async fn oversized_lists_are_never_cached() {
        let settings = EngineSettings {
            max_cached_chars: 8,
            ..EngineSettings::default()
        };
        let h = harness_with(settings, StubFetcher::with_builtins()).await;
        h.fetcher.serve("https://lists.example/big.txt", 200, "||big.example^\n");
        add_remote(&h, "remote-big", "https://lists.example/big.txt").await;

        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("first");
        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("second");

        let list = h.store.snapshot().await.list("remote-big").cloned().expect("list");
        assert!(list.cache_too_large);
        assert_eq!(list.cached_text, None);
        assert_eq!(list.size_bytes, Some(15));
        // re-fetched on every rebuild
        assert_eq!(h.fetcher.bypassed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn list_size_counts_characters() {
        let h = harness().await;
        let text = "##.ünïcode\n";
        assert_eq!(text.len(), 13);
        h.fetcher.serve("https://lists.example/intl.txt", 200, text);
        add_remote(&h, "remote-intl", "https://lists.example/intl.txt").await;

        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("rebuild");
        let list = h.store.snapshot().await.list("remote-intl").cloned().expect("list");
        assert_eq!(list.size_bytes, Some(11));
        assert_eq!(list.view().size, Some(11));
    }

    #[tokio::test]
    async fn builtins_are_always_fetched_without_cache_metadata() {
        let h = harness().await;
        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("first");
        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("second");
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.fetcher.bypassed.load(Ordering::SeqCst), 0);

        let config = h.store.snapshot().await;
        let builtin = config.list(BUILTIN_NETWORK_ID).expect("builtin");
        assert_eq!(builtin.cached_text, None);
        assert_eq!(builtin.last_fetched_at, None);
    }

    #[tokio::test]
    async fn overlay_rebuild_skips_fetching() {
        let h = harness().await;
        h.store
            .update(|c| {
                c.enabled = false;
                c.allowlist.insert("example.com".to_string());
                Ok(())
            })
            .await
            .expect("update");

        let report = h.orchestrator.rebuild(RebuildScope::Overlay, false).await.expect("overlay");
        assert_eq!(report.scope, RebuildScope::Overlay);
        assert!(report.sentinel_installed);
        assert_eq!(report.allowlist_rule_count, 1);
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);

        let ids: Vec<_> = h.rules.rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ALLOWLIST_RULES.start, SENTINEL_RULE_ID]);
    }

    #[tokio::test]
    async fn installed_ranges_never_overlap() {
        let h = harness().await;
        h.fetcher.serve("https://lists.example/more.txt", 200, "||more.example^\n||other.example^$script\n");
        add_remote(&h, "remote-more", "https://lists.example/more.txt").await;
        h.store
            .update(|c| {
                c.enabled = false;
                c.allowlist.insert("example.com".to_string());
                c.allowlist.insert("news.org".to_string());
                Ok(())
            })
            .await
            .expect("update");

        let report = h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("rebuild");
        assert_eq!(report.compiled_rule_count, 4);
        assert_eq!(report.allowlist_rule_count, 2);
        assert!(report.sentinel_installed);

        let installed = h.rules.rules();
        assert_eq!(installed.len(), 7);
        let network: Vec<u32> = h.rules.rules_in(NETWORK_RULES).iter().map(|r| r.id).collect();
        let allowlist: Vec<u32> = h.rules.rules_in(ALLOWLIST_RULES).iter().map(|r| r.id).collect();
        let sentinel: Vec<u32> = installed.iter().map(|r| r.id).filter(|&id| id == SENTINEL_RULE_ID).collect();
        assert_eq!(network.len() + allowlist.len() + sentinel.len(), installed.len());
        assert_eq!(sentinel, vec![SENTINEL_RULE_ID]);

        assert!(!NETWORK_RULES.overlaps(&ALLOWLIST_RULES));
        assert!(!NETWORK_RULES.contains(SENTINEL_RULE_ID));
        assert!(!ALLOWLIST_RULES.contains(SENTINEL_RULE_ID));
        assert!(network.iter().all(|id| !allowlist.contains(id)));

        let mut ids: Vec<u32> = installed.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), installed.len());
    }

    #[tokio::test]
    async fn concurrent_full_rebuilds_share_one_run() {
        let h = harness().await;
        h.fetcher.hold_first_fetch();

        let (first, second) = tokio::join!(h.orchestrator.rebuild(RebuildScope::Full, false), async {
            h.fetcher.entered.notified().await;
            let joined = h.orchestrator.rebuild(RebuildScope::Full, true);
            h.fetcher.gate.notify_one();
            joined.await
        });

        let first = first.expect("first");
        let second = second.expect("second");
        assert_eq!(first, second);
        // the joiner's force flag is not merged in
        assert!(!second.force_fetch);

        // one pass over the two built-ins, one network replace
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.rules.replace_calls(), 1);
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn run_failure_reaches_every_joined_caller() {
        let h = harness().await;
        h.rules.set_failing(true);
        h.fetcher.hold_first_fetch();

        let (first, second) = tokio::join!(h.orchestrator.rebuild(RebuildScope::Full, false), async {
            h.fetcher.entered.notified().await;
            let joined = h.orchestrator.rebuild(RebuildScope::Full, false);
            h.fetcher.gate.notify_one();
            joined.await
        });

        assert!(matches!(first, Err(EngineError::RuleEngine(_))));
        assert_eq!(first, second);
        assert_eq!(h.rules.replace_calls(), 1);
        assert_eq!(h.store.snapshot().await.compiled_rule_count, 0);

        // the next run starts fresh
        h.rules.set_failing(false);
        assert!(h.orchestrator.rebuild(RebuildScope::Full, false).await.is_ok());
    }

    #[tokio::test]
    async fn overlay_request_during_full_run_joins_before_overlay_phase() {
        let h = harness().await;
        h.fetcher.hold_first_fetch();

        let (full, overlay) = tokio::join!(h.orchestrator.rebuild(RebuildScope::Full, false), async {
            h.fetcher.entered.notified().await;
            h.store
                .update(|c| {
                    c.allowlist.insert("news.org".to_string());
                    Ok(())
                })
                .await
                .expect("update");
            let joined = h.orchestrator.rebuild(RebuildScope::Overlay, false);
            h.fetcher.gate.notify_one();
            joined.await
        });

        let full = full.expect("full");
        assert_eq!(full, overlay.expect("overlay"));
        assert_eq!(full.allowlist_rule_count, 1);
        assert_eq!(h.rules.rules_in(ALLOWLIST_RULES).len(), 1);
    }

    #[tokio::test]
    async fn dropped_leader_interrupts_waiters() {
        let h = harness().await;
        h.fetcher.hold_first_fetch();

        let joiner = h.orchestrator.rebuild(RebuildScope::Full, false);
        tokio::pin!(joiner);
        {
            let leader = h.orchestrator.rebuild(RebuildScope::Full, false);
            tokio::pin!(leader);
            tokio::select! {
                biased;
                _ = &mut leader => panic!("leader finished while gated"),
                _ = h.fetcher.entered.notified() => {}
            }
            // registers the joiner behind the stalled leader
            assert!(tokio::time::timeout(Duration::from_millis(20), &mut joiner).await.is_err());
        }

        assert_eq!(joiner.await, Err(EngineError::Interrupted));
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn cosmetic_cache_carries_current_flags() {
        let h = harness().await;
        h.store
            .update(|c| {
                c.heuristics_enabled = false;
                c.same_domain_only = true;
                Ok(())
            })
            .await
            .expect("update");

        h.orchestrator.rebuild(RebuildScope::Full, false).await.expect("rebuild");
        let cache = h.store.cosmetic_cache().await.expect("read").expect("saved");
        assert!(!cache.heuristics_enabled);
        assert!(cache.same_domain_only);
        assert!(h.store.snapshot().await.list(BUILTIN_COSMETIC_ID).is_some());
    }
}
