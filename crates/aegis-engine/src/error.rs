//! Engine error type
//!
//! Errors are `Clone` so a single rebuild outcome can be handed to every
//! caller that joined the run. Underlying errors are flattened into strings.

use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Rule engine error: {0}")]
    RuleEngine(String),

    #[error("Fetch failed for {location}: {message}")]
    Fetch { location: String, message: String },

    #[error("Failed to download {location}: HTTP {status}")]
    HttpStatus { location: String, status: u16 },

    #[error("Rule id {id} outside range [{start}, {end})")]
    RuleOutOfRange { id: u32, start: u32, end: u32 },

    #[error("Unknown filter list: {0}")]
    UnknownList(String),

    #[error("Built-in filter list cannot be removed: {0}")]
    BuiltinList(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rebuild interrupted before completion")]
    Interrupted,
}

impl EngineError {
    pub fn storage(err: impl Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn rule_engine(err: impl Display) -> Self {
        Self::RuleEngine(err.to_string())
    }

    pub fn fetch(location: &str, err: impl Display) -> Self {
        Self::Fetch {
            location: location.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
