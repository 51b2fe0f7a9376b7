use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Staleness threshold for the integrity check.
    pub max_age_hours: i64,
    /// Resources not modified within this many days are skipped. `None` keeps everything.
    pub resource_max_age_days: Option<i64>,
    /// Resources at or below this size are skipped; the portal lists empty placeholders.
    pub min_resource_size_bytes: u64,
    /// Worker threads; `None` uses one per CPU.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            resource_max_age_days: Some(2),
            min_resource_size_bytes: 100,
            threads: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_age_hours <= 0 {
            return Err(ConfigError::Invalid("max_age_hours must be positive".into()));
        }
        if matches!(self.resource_max_age_days, Some(days) if days <= 0) {
            return Err(ConfigError::Invalid(
                "resource_max_age_days must be positive when set".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::hours(self.max_age_hours)
    }

    pub fn resource_max_age(&self) -> Option<Duration> {
        self.resource_max_age_days.map(Duration::days)
    }
}
