//! File-backed engine wiring for the lifecycle commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aegis_engine::{EngineSettings, FileRuleEngine, FileStore, FilterManager, HttpFetcher};

pub const RULES_FILE: &str = "rules.json";

pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings, String> {
    let Some(path) = path else {
        return Ok(EngineSettings::default());
    };
    let json = std::fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    EngineSettings::from_json(&json).map_err(|e| format!("Invalid settings '{}': {}", path.display(), e))
}

/// Open a manager whose state, cosmetic cache and installed rules all live
/// under `state_dir`. Built-in lists resolve against `bundle_dir`.
pub async fn open_manager(
    settings: EngineSettings,
    state_dir: &Path,
    bundle_dir: Option<PathBuf>,
) -> Result<(FilterManager, Arc<FileRuleEngine>), String> {
    let kv = Arc::new(FileStore::new(state_dir));
    let rules = Arc::new(FileRuleEngine::new(state_dir.join(RULES_FILE)));

    let mut fetcher = HttpFetcher::new().map_err(|e| e.to_string())?;
    if let Some(dir) = bundle_dir {
        fetcher = fetcher.with_base_dir(dir);
    }

    let manager = FilterManager::open(settings, kv, rules.clone(), Arc::new(fetcher))
        .await
        .map_err(|e| format!("Failed to open state in '{}': {}", state_dir.display(), e))?;
    Ok((manager, rules))
}
