//! # config
//!
//! why: tune the unstable log without recompiling
//! relations: consumed by unstable.rs and by raft-storage's RaftLog
//! what: LogConfig, ConfigError

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`LogConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse log config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("shrink_multiple must be at least 1, got {0}")]
    InvalidShrinkMultiple(usize),

    #[error("tag must not be empty")]
    EmptyTag,
}

/// Configuration for the in-memory log segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Prefix for log lines and panic messages, usually the group or node name
    pub tag: String,
    /// The entries buffer is reallocated once `len * shrink_multiple < capacity`
    pub shrink_multiple: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            tag: "raft".to_string(),
            shrink_multiple: 2,
        }
    }
}

impl LogConfig {
    /// Default configuration with a custom tag
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.is_empty() {
            return Err(ConfigError::EmptyTag);
        }
        if self.shrink_multiple == 0 {
            return Err(ConfigError::InvalidShrinkMultiple(self.shrink_multiple));
        }
        Ok(())
    }
}
