//! Session configuration

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a `SessionController`
///
/// Every field has a default, so a host may supply a partial JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Prefix for durable storage keys
    pub namespace: String,

    /// Load and save history through the persistence adapter
    pub enable_history: bool,

    /// Keep only the most recent N turns when loading history
    pub max_messages: usize,

    /// Display name used when the active agent is missing from the roster
    pub fallback_agent_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "agent_chat_history".to_string(),
            enable_history: true,
            max_messages: 100,
            fallback_agent_name: "Agent".to_string(),
        }
    }
}

impl SessionConfig {
    /// Parse a (possibly partial) JSON configuration over the defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ChatError::Config(format!("Invalid session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce unusable storage keys
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(ChatError::Config("namespace must not be empty".to_string()));
        }
        if self.max_messages == 0 {
            return Err(ChatError::Config(
                "maxMessages must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Disable durable history
    pub fn without_history(mut self) -> Self {
        self.enable_history = false;
        self
    }
}
