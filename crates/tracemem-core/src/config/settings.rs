use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::DecayPolicy;
use crate::storage::RetryPolicy;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceMemoryConfig {
    pub storage: StorageConfig,
    pub retry: RetryPolicy,
    pub consolidation: ConsolidationConfig,
    pub decay: DecayPolicy,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Largest accepted encoded record, in bytes.
    pub max_frame_bytes: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Largest request/response step distance still counted as a
    /// successful handoff.
    pub handoff_step_bound: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            handoff_step_bound: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub purge_after_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            purge_after_days: 14,
        }
    }
}

impl TraceMemoryConfig {
    /// Read `<root>/config.toml`, falling back to defaults when it is absent.
    pub fn load(root: &Path) -> Result<Self, CoreError> {
        let path = root.join(CONFIG_FILE);
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<(), CoreError> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(root.join(CONFIG_FILE), content)?;
        Ok(())
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut errors = Vec::new();

        if self.storage.max_frame_bytes == 0 {
            errors.push("storage.max_frame_bytes must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if !(self.decay.factor > 0.0 && self.decay.factor <= 1.0) {
            errors.push("decay.factor must be in (0, 1]");
        }
        if self.decay.min_age_days < 0 {
            errors.push("decay.min_age_days must not be negative");
        }
        if !(0.0..=1.0).contains(&self.decay.floor) {
            errors.push("decay.floor must be in [0, 1]");
        }
        if self.retention.purge_after_days < 0 {
            errors.push("retention.purge_after_days must not be negative");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_documented_values() {
        let config = TraceMemoryConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.retry.max_delay_ms, 2000);
        assert_eq!(config.consolidation.handoff_step_bound, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = TraceMemoryConfig::load(tmp.path()).unwrap();
        assert_eq!(config, TraceMemoryConfig::default());
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "[consolidation]\nhandoff_step_bound = 3\n\n[retry]\nmax_attempts = 5\n",
        )
        .unwrap();
        let config = TraceMemoryConfig::load(tmp.path()).unwrap();
        assert_eq!(config.consolidation.handoff_step_bound, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut config = TraceMemoryConfig::default();
        config.decay.factor = 0.25;
        config.save(tmp.path()).unwrap();
        assert_eq!(TraceMemoryConfig::load(tmp.path()).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TraceMemoryConfig::default();
        config.retry.max_attempts = 0;
        config.decay.factor = 1.5;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_attempts"));
        assert!(err.contains("decay.factor"));
    }
}
