use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("config {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Alert thresholds and the "good" band for the derived km/L metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EfficiencyThresholds {
    pub alert_low: f64,
    pub alert_high: f64,
    pub good_min: f64,
    pub good_max: f64,
}

impl Default for EfficiencyThresholds {
    fn default() -> Self {
        Self {
            alert_low: 4.0,
            alert_high: 20.0,
            good_min: 6.0,
            good_max: 12.0,
        }
    }
}

/// Bounds on outbound notification delivery: a minimum spacing between
/// batches and a cap per poll cycle. Undelivered messages stay queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryPolicy {
    pub min_spacing_secs: i64,
    pub max_per_cycle: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            min_spacing_secs: 2,
            max_per_cycle: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum hours between two auto-accepted updates for the same entity.
    pub cooldown_hours: i64,
    /// Window after the original channel timestamp inside which a material
    /// edit escalates instead of spawning a new report.
    pub edit_window_minutes: i64,
    /// Validation-agent polling interval.
    pub poll_interval_secs: u64,
    /// Watermark older than this triggers a history fetch on startup.
    pub stale_watermark_minutes: i64,
    /// Maximum messages requested from the channel-history source.
    pub history_fetch_limit: usize,
    pub efficiency: EfficiencyThresholds,
    pub delivery: DeliveryPolicy,
    /// Entities the fleet allow-list is seeded with on first run.
    pub fleet_seed: Vec<String>,
    /// Resolved approvals retained alongside all pending ones.
    pub approvals_keep_resolved: usize,
    /// Notification backlog cap.
    pub notification_cap: usize,
    /// Efficiency history cap.
    pub efficiency_history_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 12,
            edit_window_minutes: 10,
            poll_interval_secs: 10,
            stale_watermark_minutes: 6,
            history_fetch_limit: 50,
            efficiency: EfficiencyThresholds::default(),
            delivery: DeliveryPolicy::default(),
            fleet_seed: Vec::new(),
            approvals_keep_resolved: 300,
            notification_cap: 1_000,
            efficiency_history_cap: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = PipelineConfig::default();
        assert_eq!(config.cooldown_hours, 12);
        assert_eq!(config.edit_window_minutes, 10);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.efficiency.alert_low, 4.0);
        assert_eq!(config.efficiency.alert_high, 20.0);
        assert_eq!(config.efficiency.good_min, 6.0);
        assert_eq!(config.efficiency.good_max, 12.0);
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() {
        let parsed: PipelineConfig =
            serde_json::from_str(r#"{"cooldown_hours": 6, "fleet_seed": ["KCA542Q"]}"#)
                .expect("parse partial config");
        assert_eq!(parsed.cooldown_hours, 6);
        assert_eq!(parsed.fleet_seed, vec!["KCA542Q".to_string()]);
        assert_eq!(parsed.edit_window_minutes, 10);
    }
}
