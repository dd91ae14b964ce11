//! Analysis configuration.
//!
//! All tunables of the inference engines live here with their protocol
//! defaults; a YAML file can override any subset. `validate()` rejects
//! configurations the engines cannot run with.

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Trickle-timing edge discovery tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyParams {
    /// Lower edge of the rebroadcast acceptance window, inclusive (ms).
    /// A copy heard earlier than this means the presumed origin was
    /// itself a relay.
    pub window_low_ms: f64,
    /// Upper edge of the acceptance window, exclusive (ms); the Trickle
    /// minimum interval.
    pub window_high_ms: f64,
    /// Accepted-evidence tally required before an edge is registered.
    pub min_occurrences: usize,
}

impl Default for TopologyParams {
    fn default() -> Self {
        Self {
            window_low_ms: 16.0,
            window_high_ms: 32.0,
            min_occurrences: 2,
        }
    }
}

/// Protocol constants of the observed Trickle deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrickleParams {
    /// Minimum Trickle interval I_min (ms).
    pub i_min_ms: f64,
    /// Redundant receptions after which a node suppresses its own
    /// rebroadcast.
    pub redundancy_constant: usize,
}

impl Default for TrickleParams {
    fn default() -> Self {
        Self {
            i_min_ms: 32.0,
            redundancy_constant: 4,
        }
    }
}

/// Sample-size policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Source-message count at or below which delivery metrics are
    /// reported null rather than as noise.
    pub min_sample: usize,
    /// Latency sample count after which a periodic latency worker
    /// considers its run complete.
    pub latency_target_samples: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            min_sample: 10,
            latency_target_samples: 1000,
        }
    }
}

/// Trace store rotation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationParams {
    /// Records kept after a rotation.
    pub keep_records: usize,
    /// Record count that triggers a rotation.
    pub rotate_threshold: usize,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            keep_records: 50_000,
            rotate_threshold: 100_000,
        }
    }
}

/// Complete analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub topology: TopologyParams,
    pub trickle: TrickleParams,
    pub sampling: SamplingParams,
    pub rotation: RotationParams,
    /// Interval between periodic topology batches.
    #[serde(with = "humantime_serde")]
    pub topology_interval: Duration,
    /// Interval between periodic delivery/latency batches.
    #[serde(with = "humantime_serde")]
    pub analysis_interval: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            topology: TopologyParams::default(),
            trickle: TrickleParams::default(),
            sampling: SamplingParams::default(),
            rotation: RotationParams::default(),
            topology_interval: Duration::from_secs(1),
            analysis_interval: Duration::from_secs(2),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid window configuration: {0}")]
    InvalidWindow(String),
    #[error("Invalid threshold configuration: {0}")]
    InvalidThreshold(String),
    #[error("Invalid rotation configuration: {0}")]
    InvalidRotation(String),
}

impl AnalysisConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topology.window_low_ms < 0.0 {
            return Err(ValidationError::InvalidWindow(
                "window_low_ms cannot be negative".to_string(),
            ));
        }
        if self.topology.window_high_ms <= self.topology.window_low_ms {
            return Err(ValidationError::InvalidWindow(format!(
                "window_high_ms ({}) must exceed window_low_ms ({})",
                self.topology.window_high_ms, self.topology.window_low_ms
            )));
        }
        if self.topology.min_occurrences == 0 {
            return Err(ValidationError::InvalidThreshold(
                "min_occurrences must be at least 1".to_string(),
            ));
        }
        if self.trickle.i_min_ms <= 0.0 {
            return Err(ValidationError::InvalidWindow(
                "i_min_ms must be positive".to_string(),
            ));
        }
        if self.trickle.redundancy_constant == 0 {
            return Err(ValidationError::InvalidThreshold(
                "redundancy_constant must be at least 1".to_string(),
            ));
        }
        if self.rotation.keep_records >= self.rotation.rotate_threshold {
            return Err(ValidationError::InvalidRotation(format!(
                "keep_records ({}) must be below rotate_threshold ({})",
                self.rotation.keep_records, self.rotation.rotate_threshold
            )));
        }
        Ok(())
    }
}

/// Load and validate a YAML configuration file.
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: AnalysisConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let mut config = AnalysisConfig::default();
        config.topology.window_high_ms = config.topology.window_low_ms;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = AnalysisConfig::default();
        config.topology.min_occurrences = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_rotation_order_enforced() {
        let mut config = AnalysisConfig::default();
        config.rotation.rotate_threshold = config.rotation.keep_records;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRotation(_))
        ));
    }

    #[test]
    fn test_yaml_overrides_subset() {
        let yaml = r#"
topology:
  min_occurrences: 3
analysis_interval: 5s
"#;
        let config: AnalysisConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.topology.min_occurrences, 3);
        assert_eq!(config.topology.window_low_ms, 16.0);
        assert_eq!(config.analysis_interval, Duration::from_secs(5));
    }
}
