//! Filter state store
//!
//! Owns the authoritative in-memory [`Configuration`] and mirrors it to a
//! [`KeyValueStore`]. Every mutation runs against a copy that is persisted
//! first and committed to memory only once the write succeeded, so a failed
//! write never leaves memory ahead of storage.

use std::sync::Arc;

use aegis_compiler::CosmeticCollection;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{Configuration, CosmeticCache};
use crate::settings::EngineSettings;
use crate::storage::KeyValueStore;

pub struct FilterStateStore {
    kv: Arc<dyn KeyValueStore>,
    settings: Arc<EngineSettings>,
    config: Mutex<Configuration>,
    /// Serializes read-modify-write of the cosmetic cache.
    cosmetic: Mutex<()>,
}

impl FilterStateStore {
    /// Load the configuration, creating defaults on first run and
    /// re-inserting missing built-in lists.
    pub async fn load(kv: Arc<dyn KeyValueStore>, settings: Arc<EngineSettings>) -> Result<Self> {
        let (config, dirty) = match kv.get(&settings.state_key).await? {
            Some(value) => {
                let mut config: Configuration = serde_json::from_value(value)?;
                let healed = config.heal(&settings);
                (config, healed)
            }
            None => (Configuration::with_defaults(&settings), true),
        };

        if dirty {
            log::debug!("persisting initial or healed configuration");
            kv.set(&settings.state_key, serde_json::to_value(&config)?).await?;
        }

        Ok(Self {
            kv,
            settings,
            config: Mutex::new(config),
            cosmetic: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Copy of the current configuration.
    pub async fn snapshot(&self) -> Configuration {
        self.config.lock().await.clone()
    }

    /// Apply `mutator` to a copy of the configuration, persist it, then
    /// commit. Returns the committed configuration.
    ///
    /// If the mutator or the write fails, nothing changes.
    pub async fn update<F>(&self, mutator: F) -> Result<Configuration>
    where
        F: FnOnce(&mut Configuration) -> Result<()>,
    {
        let mut current = self.config.lock().await;
        let mut next = current.clone();
        mutator(&mut next)?;

        if next != *current {
            self.kv.set(&self.settings.state_key, serde_json::to_value(&next)?).await?;
            *current = next.clone();
        }

        Ok(next)
    }

    // =========================================================================
    // Cosmetic cache
    // =========================================================================

    pub async fn cosmetic_cache(&self) -> Result<Option<CosmeticCache>> {
        let _guard = self.cosmetic.lock().await;
        self.read_cosmetic().await
    }

    /// Store freshly merged selectors, tagged with the flags current at the
    /// time of the write. The flags are read under the cosmetic lock so a
    /// concurrent [`sync_cosmetic_flags`](Self::sync_cosmetic_flags) always
    /// lands after this write.
    pub async fn save_compiled_cosmetics(&self, selectors: CosmeticCollection) -> Result<CosmeticCache> {
        let _guard = self.cosmetic.lock().await;
        let cache = CosmeticCache::new(selectors, &*self.config.lock().await);
        self.kv.set(&self.settings.cosmetic_key, serde_json::to_value(&cache)?).await?;
        Ok(cache)
    }

    /// Copy the current heuristics and same-domain flags into the stored
    /// cosmetic cache. Does nothing when no cache has been compiled yet.
    /// Returns whether a cache was patched.
    pub async fn sync_cosmetic_flags(&self) -> Result<bool> {
        let _guard = self.cosmetic.lock().await;
        let Some(mut cache) = self.read_cosmetic().await? else {
            return Ok(false);
        };

        let (heuristics_enabled, same_domain_only) = {
            let config = self.config.lock().await;
            (config.heuristics_enabled, config.same_domain_only)
        };
        if cache.heuristics_enabled == heuristics_enabled && cache.same_domain_only == same_domain_only {
            return Ok(true);
        }

        cache.heuristics_enabled = heuristics_enabled;
        cache.same_domain_only = same_domain_only;
        self.kv.set(&self.settings.cosmetic_key, serde_json::to_value(&cache)?).await?;
        Ok(true)
    }

    async fn read_cosmetic(&self) -> Result<Option<CosmeticCache>> {
        match self.kv.get(&self.settings.cosmetic_key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
