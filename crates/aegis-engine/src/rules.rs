//! Rule installation
//!
//! The host rule engine is an id-keyed set of declarative rules with a
//! single batched `replace_rules(add, remove)` call. Every writer in this
//! crate replaces one whole id range at a time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use aegis_core::ranges::RuleRange;
use aegis_core::types::{priority, CompiledRule, RuleAction, RuleCondition};
use async_trait::async_trait;

use crate::error::{EngineError, Result};

#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn installed_rule_ids(&self) -> Result<Vec<u32>>;

    /// Remove `remove`, then add `add`, atomically.
    async fn replace_rules(&self, add: Vec<CompiledRule>, remove: Vec<u32>) -> Result<()>;
}

// =============================================================================
// Range replacement
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeDiff {
    pub added: usize,
    pub removed: usize,
}

impl RangeDiff {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Replace everything installed in `range` with `rules`.
///
/// Issues no call when there is nothing to add and nothing to remove.
pub async fn replace_range(engine: &dyn RuleEngine, range: RuleRange, rules: Vec<CompiledRule>) -> Result<RangeDiff> {
    if let Some(rule) = rules.iter().find(|r| !range.contains(r.id)) {
        return Err(EngineError::RuleOutOfRange {
            id: rule.id,
            start: range.start,
            end: range.end(),
        });
    }

    let remove: Vec<u32> = engine
        .installed_rule_ids()
        .await?
        .into_iter()
        .filter(|id| range.contains(*id))
        .collect();

    let diff = RangeDiff {
        added: rules.len(),
        removed: remove.len(),
    };

    if diff.is_noop() {
        log::debug!("range [{}, {}) already empty, skipping replace", range.start, range.end());
        return Ok(diff);
    }

    log::debug!(
        "replacing range [{}, {}): -{} +{}",
        range.start,
        range.end(),
        diff.removed,
        diff.added
    );
    engine.replace_rules(rules, remove).await?;
    Ok(diff)
}

/// The unconditional allow rule that pauses all filtering.
pub fn sentinel_rule(id: u32) -> CompiledRule {
    CompiledRule {
        id,
        priority: priority::SENTINEL,
        action: RuleAction::allow(),
        condition: RuleCondition::match_all(),
    }
}

/// Install the sentinel when `disabled`, remove it otherwise.
///
/// Returns whether the sentinel is installed afterwards.
pub async fn ensure_disable_rule(engine: &dyn RuleEngine, sentinel_id: u32, disabled: bool) -> Result<bool> {
    let present = engine.installed_rule_ids().await?.contains(&sentinel_id);

    match (disabled, present) {
        (true, false) => {
            log::info!("filtering paused");
            engine.replace_rules(vec![sentinel_rule(sentinel_id)], Vec::new()).await?;
        }
        (false, true) => {
            log::info!("filtering resumed");
            engine.replace_rules(Vec::new(), vec![sentinel_id]).await?;
        }
        _ => {}
    }

    Ok(disabled)
}

// =============================================================================
// Rule set bookkeeping shared by the provided engines
// =============================================================================

fn apply_replace(rules: &mut BTreeMap<u32, CompiledRule>, add: Vec<CompiledRule>, remove: &[u32]) -> Result<()> {
    let mut next = rules.clone();
    for id in remove {
        next.remove(id);
    }
    for rule in add {
        let id = rule.id;
        if next.insert(id, rule).is_some() {
            return Err(EngineError::RuleEngine(format!("duplicate rule id {id}")));
        }
    }
    *rules = next;
    Ok(())
}

// =============================================================================
// Memory
// =============================================================================

/// In-process rule engine. Mirrors the host's duplicate-id rejection.
#[derive(Debug, Default)]
pub struct MemoryRuleEngine {
    rules: Mutex<BTreeMap<u32, CompiledRule>>,
    replace_calls: AtomicUsize,
    fail_replace: AtomicBool,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// All installed rules, ordered by id.
    pub fn rules(&self) -> Vec<CompiledRule> {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        rules.values().cloned().collect()
    }

    pub fn rules_in(&self, range: RuleRange) -> Vec<CompiledRule> {
        self.rules().into_iter().filter(|r| range.contains(r.id)).collect()
    }

    /// Number of `replace_rules` calls received so far.
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `replace_rules` calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail_replace.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn installed_rule_ids(&self) -> Result<Vec<u32>> {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rules.keys().copied().collect())
    }

    async fn replace_rules(&self, add: Vec<CompiledRule>, remove: Vec<u32>) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(EngineError::RuleEngine("replace rejected".to_string()));
        }
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        apply_replace(&mut rules, add, &remove)
    }
}

// =============================================================================
// File
// =============================================================================

/// Rule set kept as a JSON array on disk, for driving the engine offline.
#[derive(Debug)]
pub struct FileRuleEngine {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileRuleEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Vec<CompiledRule>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(EngineError::rule_engine(format!("{}: {err}", self.path.display()))),
        }
    }

    async fn store(&self, rules: &BTreeMap<u32, CompiledRule>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::rule_engine(format!("{}: {e}", parent.display())))?;
        }
        let list: Vec<&CompiledRule> = rules.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&list)?)
            .await
            .map_err(|e| EngineError::rule_engine(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| EngineError::rule_engine(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl RuleEngine for FileRuleEngine {
    async fn installed_rule_ids(&self) -> Result<Vec<u32>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().map(|r| r.id).collect())
    }

    async fn replace_rules(&self, add: Vec<CompiledRule>, remove: Vec<u32>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rules: BTreeMap<u32, CompiledRule> = self.load().await?.into_iter().map(|r| (r.id, r)).collect();
        apply_replace(&mut rules, add, &remove)?;
        self.store(&rules).await
    }
}
