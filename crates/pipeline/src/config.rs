use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Conversion pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Repair retries after the first attempt
    pub max_retries: usize,

    /// Upper bound for a single repair call
    pub repair_timeout_ms: u64,

    /// Nodes below this confidence may be relabelled by a repair patch
    pub confidence_threshold: f64,

    /// Fraction of high-confidence partial elements a repair may change
    /// before eval warns about drift
    pub drift_threshold: f64,

    /// Draw.io page to extract
    pub drawio_page: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            repair_timeout_ms: 30_000,
            confidence_threshold: 0.5,
            drift_threshold: 0.5,
            drawio_page: 0,
        }
    }
}

impl PipelineConfig {
    pub fn repair_timeout(&self) -> Duration {
        Duration::from_millis(self.repair_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 2 {
            return Err(format!(
                "max_retries ({}) cannot exceed 2",
                self.max_retries
            ));
        }
        if self.repair_timeout_ms == 0 {
            return Err("repair_timeout_ms must be > 0".to_string());
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("drift_threshold", self.drift_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} ({value}) must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_bounded() {
        assert!(PipelineConfig::default().validate().is_ok());
        let unbounded = PipelineConfig {
            max_retries: 5,
            ..Default::default()
        };
        assert!(unbounded.validate().is_err());
        let drift = PipelineConfig {
            drift_threshold: 1.5,
            ..Default::default()
        };
        assert!(drift.validate().unwrap_err().contains("drift_threshold"));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.drift_threshold, 0.5);
    }
}
