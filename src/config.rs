use serde::Deserialize;

use crate::storage::IsolationLevel;

/// Engine configuration
///
/// Deserializable from any serde format; missing fields keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema of unqualified table names, created with the engine
    pub default_schema: String,
    /// Isolation of BEGIN without ISOLATION LEVEL, and of autocommit
    /// statements
    pub default_isolation: IsolationLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_schema: "public".to_string(),
            default_isolation: IsolationLevel::ReadCommitted,
        }
    }
}
