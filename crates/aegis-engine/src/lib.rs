//! Aegis rule lifecycle engine
//!
//! Owns persisted filter configuration and the compiled rule state derived
//! from it. Storage, rule installation and list fetching are abstract
//! services supplied by the host.

pub mod error;
pub mod fetch;
pub mod manager;
pub mod model;
pub mod orchestrator;
pub mod rules;
pub mod schedule;
pub mod settings;
pub mod storage;
pub mod store;

pub use error::{EngineError, Result};
pub use fetch::{FetchOptions, FetchResponse, HttpFetcher, ListFetcher};
pub use manager::FilterManager;
pub use model::{
    Configuration, CosmeticCache, FilterList, FilterListView, ListKind, NewFilterList, OptionsState, PopupState, Stats,
    SupportLink,
};
pub use orchestrator::{ListOutcome, ListStats, RebuildOrchestrator, RebuildOutcome, RebuildReport, RebuildScope};
pub use rules::{ensure_disable_rule, replace_range, FileRuleEngine, MemoryRuleEngine, RangeDiff, RuleEngine};
pub use schedule::spawn_auto_update;
pub use settings::EngineSettings;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::FilterStateStore;
