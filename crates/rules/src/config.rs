use serde::{Deserialize, Serialize};

/// Estimated tokens above which validation switches to batched reading.
pub const TOKEN_BUDGET: usize = 80_000;
pub const BYTES_PER_TOKEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rules evaluated per batch when the budget is exceeded
    pub batch_size: usize,
    /// Index plus document size (bytes) that still fits a single pass
    pub budget_bytes: usize,
    /// Category name; defaults to the category directory name
    pub category: Option<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            budget_bytes: TOKEN_BUDGET * BYTES_PER_TOKEN,
            category: None,
        }
    }
}

impl RulesConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.budget_bytes == 0 {
            return Err("budget_bytes must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_budget_is_eighty_thousand_tokens() {
        let cfg = RulesConfig::default();
        assert_eq!(cfg.budget_bytes, 320_000);
        assert_eq!(cfg.batch_size, 50);
        assert!(cfg.validate().is_ok());
        let zero = RulesConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
