//! Engine configuration
//!
//! All thresholds and caps used by ingestion and reconciliation. Every field
//! has a default, so a partial TOML file only overrides what it names.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Heap usage above which ingestion calls are dropped (MB)
pub const DEFAULT_HEAP_LIMIT_MB: f64 = 1800.0;

/// Meeting-wide snapshot buffer cap
pub const DEFAULT_SNAPSHOT_CAP: usize = 200;

/// Maximum snapshots per append
pub const DEFAULT_SNAPSHOT_BATCH: usize = 10;

/// Per-state ceiling (24 hours)
pub const MAX_STATE_SECONDS: u64 = 24 * 60 * 60;

/// Meeting duration ceiling (2 hours)
pub const MAX_MEETING_SECONDS: u64 = 2 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backpressure: BackpressureConfig,
    pub accumulator: AccumulatorConfig,
    pub buffer: BufferConfig,
    pub limits: LimitsConfig,
    /// Minimum seconds between "processing" log lines per meeting
    pub log_throttle_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backpressure: BackpressureConfig::default(),
            accumulator: AccumulatorConfig::default(),
            buffer: BufferConfig::default(),
            limits: LimitsConfig::default(),
            log_throttle_secs: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Hard limit; ingestion is skipped above this
    pub heap_limit_mb: f64,
    /// Health report thresholds
    pub high_mb: f64,
    pub critical_mb: f64,
    pub emergency_mb: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            heap_limit_mb: DEFAULT_HEAP_LIMIT_MB,
            high_mb: 1500.0,
            critical_mb: 2000.0,
            emergency_mb: 2500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Increment used with no prior snapshot or an anomalous delta
    pub default_increment_secs: u64,
    /// Largest delta credited as-is
    pub max_regular_gap_secs: u64,
    /// Increment used after a long silence
    pub gap_increment_secs: u64,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            default_increment_secs: 5,
            max_regular_gap_secs: 10,
            gap_increment_secs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub snapshot_cap: usize,
    pub snapshot_batch: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            snapshot_cap: DEFAULT_SNAPSHOT_CAP,
            snapshot_batch: DEFAULT_SNAPSHOT_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_state_secs: u64,
    pub max_meeting_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_state_secs: MAX_STATE_SECONDS,
            max_meeting_secs: MAX_MEETING_SECONDS,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buffer.snapshot_cap == 0 {
            return Err(EngineError::ConfigError(
                "buffer.snapshot_cap must be positive".to_string(),
            ));
        }
        if self.buffer.snapshot_batch == 0 {
            return Err(EngineError::ConfigError(
                "buffer.snapshot_batch must be positive".to_string(),
            ));
        }
        if self.accumulator.max_regular_gap_secs == 0 {
            return Err(EngineError::ConfigError(
                "accumulator.max_regular_gap_secs must be positive".to_string(),
            ));
        }
        if self.limits.max_state_secs == 0 || self.limits.max_meeting_secs == 0 {
            return Err(EngineError::ConfigError(
                "limits must be positive".to_string(),
            ));
        }

        let bp = &self.backpressure;
        if bp.heap_limit_mb.is_nan() || bp.heap_limit_mb <= 0.0 {
            return Err(EngineError::ConfigError(
                "backpressure.heap_limit_mb must be positive".to_string(),
            ));
        }
        if !(bp.high_mb <= bp.critical_mb && bp.critical_mb <= bp.emergency_mb) {
            return Err(EngineError::ConfigError(format!(
                "pressure thresholds must ascend (high {} <= critical {} <= emergency {})",
                bp.high_mb, bp.critical_mb, bp.emergency_mb
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backpressure.heap_limit_mb, 1800.0);
        assert_eq!(config.buffer.snapshot_cap, 200);
        assert_eq!(config.buffer.snapshot_batch, 10);
        assert_eq!(config.limits.max_state_secs, 86_400);
        assert_eq!(config.limits.max_meeting_secs, 7_200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            log_throttle_secs = 10

            [buffer]
            snapshot_cap = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer.snapshot_cap, 50);
        assert_eq!(config.buffer.snapshot_batch, 10);
        assert_eq!(config.log_throttle_secs, 10);
        assert_eq!(config.accumulator, AccumulatorConfig::default());
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(EngineConfig::from_toml_str("[buffer]\nsnapshot_cap = 0").is_err());
        assert!(EngineConfig::from_toml_str(
            "[backpressure]\nhigh_mb = 3000.0\ncritical_mb = 2000.0"
        )
        .is_err());
        assert!(EngineConfig::from_toml_str("not toml = = =").is_err());
    }
}
