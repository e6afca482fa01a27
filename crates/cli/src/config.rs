use anyhow::{anyhow, Context, Result};
use canon_pipeline::{CacheBackend, CacheConfig, PipelineConfig};
use canon_rules::{DedupPolicy, RulesConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "canon.toml";

/// Everything the binary can be tuned with; each table is optional in
/// `canon.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub rules: RulesConfig,
    pub dedup: DedupPolicy,
}

/// Values given on the command line win over the environment and the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub cache_backend: Option<String>,
}

impl CanonConfig {
    /// An explicit path must exist; otherwise `./canon.toml` is read when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.is_file().then_some(default)
            }
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let cfg = Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// `CANON_*` variables, looked up through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("CANON_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("CANON_CACHE_BACKEND") {
            self.cache.backend = parse_backend(&raw)?;
        }
        if let Some(raw) = lookup("CANON_MAX_RETRIES") {
            self.pipeline.max_retries = parse_number("CANON_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("CANON_REPAIR_TIMEOUT_MS") {
            self.pipeline.repair_timeout_ms = parse_number("CANON_REPAIR_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("CANON_BATCH_SIZE") {
            self.rules.batch_size = parse_number("CANON_BATCH_SIZE", &raw)?;
        }
        if let Some(category) = lookup("CANON_CATEGORY") {
            self.rules.category = Some(category);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(dir) = &overrides.cache_dir {
            self.cache.dir = dir.clone();
        }
        if let Some(raw) = &overrides.cache_backend {
            self.cache.backend = parse_backend(raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline
            .validate()
            .map_err(|err| anyhow!("[pipeline] {err}"))?;
        self.cache.validate().map_err(|err| anyhow!("[cache] {err}"))?;
        self.rules.validate().map_err(|err| anyhow!("[rules] {err}"))?;
        self.dedup.validate().map_err(|err| anyhow!("[dedup] {err}"))?;
        Ok(())
    }

    /// File, then environment, then flags; the result is validated.
    pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut cfg = Self::load(explicit)?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_backend(raw: &str) -> Result<CacheBackend> {
    CacheBackend::parse(raw).ok_or_else(|| anyhow!("Unknown cache backend '{raw}' (expected file|memory)"))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("{key} must be a non-negative integer, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_tables() {
        let cfg = CanonConfig::from_toml(
            r#"
            [pipeline]
            max_retries = 1

            [dedup]
            min_shared_keywords = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.max_retries, 1);
        assert_eq!(cfg.pipeline.repair_timeout_ms, 30_000);
        assert_eq!(cfg.dedup.min_shared_keywords, 4);
        assert_eq!(cfg.rules.batch_size, 50);
        assert_eq!(cfg.cache.backend, CacheBackend::File);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn environment_then_flags_override_the_file() {
        let mut cfg = CanonConfig::from_toml("[cache]\ndir = \"from-file\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("CANON_CACHE_DIR", "from-env"),
            ("CANON_CACHE_BACKEND", "memory"),
            ("CANON_BATCH_SIZE", "25"),
            ("CANON_CATEGORY", "security"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.cache.dir, PathBuf::from("from-env"));
        assert_eq!(cfg.cache.backend, CacheBackend::Memory);
        assert_eq!(cfg.rules.batch_size, 25);
        assert_eq!(cfg.rules.category.as_deref(), Some("security"));

        cfg.apply_overrides(&Overrides {
            cache_dir: Some(PathBuf::from("from-flag")),
            cache_backend: Some("file".to_string()),
        })
        .unwrap();
        assert_eq!(cfg.cache.dir, PathBuf::from("from-flag"));
        assert_eq!(cfg.cache.backend, CacheBackend::File);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut cfg = CanonConfig::default();
        assert!(cfg
            .apply_env(|key| (key == "CANON_MAX_RETRIES").then(|| "two".to_string()))
            .is_err());
        assert!(cfg
            .apply_overrides(&Overrides {
                cache_backend: Some("disk".to_string()),
                ..Default::default()
            })
            .is_err());

        let cfg = CanonConfig::from_toml("[pipeline]\nmax_retries = 5\n").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.starts_with("[pipeline]"), "{err}");
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(CanonConfig::load(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("canon.toml");
        std::fs::write(&path, "[rules]\nbatch_size = 10\n").unwrap();
        let cfg = CanonConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.rules.batch_size, 10);
    }
}
