use crate::error::{PipelineError, Result};
use canon_ir::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
    pub backend: CacheBackend,
    pub capacity: usize,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    File,
    Memory,
}

impl CacheBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".canon/cache"),
            ttl: Duration::from_secs(30 * 86_400),
            backend: CacheBackend::File,
            capacity: 64,
        }
    }
}

impl CacheConfig {
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(PipelineError::from)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.capacity == 0 {
            return Err("cache capacity must be > 0".to_string());
        }
        if self.ttl.is_zero() {
            return Err("cache ttl must be > 0".to_string());
        }
        Ok(())
    }
}

mod ttl_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct CacheEnvelope<T> {
    created_ms: u64,
    data: T,
}

/// `sha256(source)-method`
pub fn cache_key(source_hash: &str, method: &str) -> String {
    format!("{source_hash}-{method}")
}

pub async fn load<T: for<'de> Deserialize<'de> + Clone>(
    cfg: &CacheConfig,
    key: &str,
) -> Result<Option<T>> {
    if cfg.backend == CacheBackend::Memory {
        let mut cache = MEM_CACHE
            .lock()
            .map_err(|_| PipelineError::Config("cache mutex poisoned".to_string()))?;
        return Ok(cache.get(key, cfg.ttl));
    }

    let path = cfg.dir.join(format!("{key}.json"));
    let Ok(bytes) = fs::read(&path).await else {
        return Ok(None);
    };

    let envelope: CacheEnvelope<T> = match serde_json::from_slice(&bytes) {
        Ok(val) => val,
        Err(err) => {
            log::warn!("Conversion cache corrupted {}: {err}", path.display());
            return Ok(None);
        }
    };

    let age = unix_ms_now().saturating_sub(envelope.created_ms);
    let ttl_ms = u64::try_from(cfg.ttl.as_millis()).unwrap_or(u64::MAX);
    if age > ttl_ms {
        log::debug!("Conversion cache entry {key} expired");
        return Ok(None);
    }

    Ok(Some(envelope.data))
}

pub async fn save<T: Serialize>(cfg: &CacheConfig, key: &str, data: &T) -> Result<()> {
    if cfg.backend == CacheBackend::Memory {
        let envelope: CacheEnvelope<serde_json::Value> = CacheEnvelope {
            created_ms: unix_ms_now(),
            data: serde_json::to_value(data)?,
        };
        MEM_CACHE
            .lock()
            .map_err(|_| PipelineError::Config("cache mutex poisoned".to_string()))?
            .insert(key, envelope, cfg.capacity);
        return Ok(());
    }

    cfg.ensure_dir()?;
    let path = cfg.dir.join(format!("{key}.json"));
    let bytes = {
        let envelope = CacheEnvelope {
            created_ms: unix_ms_now(),
            data,
        };
        serde_json::to_vec_pretty(&envelope)?
    };
    write_atomic(&path, &bytes).await?;
    Ok(())
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

struct MemCache {
    map: HashMap<String, serde_json::Value>,
    order: VecDeque<String>,
}

impl MemCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn unlink(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    fn touch(&mut self, key: &str) {
        self.unlink(key);
        self.order.push_front(key.to_string());
    }

    fn insert<T: Serialize>(&mut self, key: &str, envelope: CacheEnvelope<T>, capacity: usize) {
        if let Ok(val) = serde_json::to_value(envelope) {
            self.map.insert(key.to_string(), val);
            self.touch(key);
            while self.order.len() > capacity {
                if let Some(old) = self.order.pop_back() {
                    self.map.remove(&old);
                }
            }
        }
    }

    fn get<T: for<'de> Deserialize<'de> + Clone>(&mut self, key: &str, ttl: Duration) -> Option<T> {
        let val = self.map.get(key)?.clone();
        let envelope: CacheEnvelope<T> = serde_json::from_value(val).ok()?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if unix_ms_now().saturating_sub(envelope.created_ms) > ttl_ms {
            self.map.remove(key);
            self.unlink(key);
            return None;
        }
        self.touch(key);
        Some(envelope.data)
    }
}

static MEM_CACHE: once_cell::sync::Lazy<Mutex<MemCache>> =
    once_cell::sync::Lazy::new(|| Mutex::new(MemCache::new()));

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file_cfg(dir: &std::path::Path) -> CacheConfig {
        CacheConfig {
            dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn file_backend_round_trips_and_ignores_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = file_cfg(dir.path());
        let key = cache_key("ab12cd34", "xml");
        assert_eq!(key, "ab12cd34-xml");

        assert_eq!(load::<String>(&cfg, &key).await.unwrap(), None);
        save(&cfg, &key, &"flowchart TB".to_string()).await.unwrap();
        assert_eq!(
            load::<String>(&cfg, &key).await.unwrap().as_deref(),
            Some("flowchart TB")
        );

        std::fs::write(dir.path().join(format!("{key}.json")), b"{not json").unwrap();
        assert_eq!(load::<String>(&cfg, &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = file_cfg(dir.path());
        let stale = serde_json::json!({"created_ms": 1, "data": "old"});
        std::fs::write(dir.path().join("k-dsl.json"), stale.to_string()).unwrap();
        assert_eq!(load::<String>(&cfg, "k-dsl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_backend_evicts_least_recently_used() {
        let cfg = CacheConfig {
            backend: CacheBackend::Memory,
            capacity: 2,
            ..Default::default()
        };
        save(&cfg, "lru-a", &1u32).await.unwrap();
        save(&cfg, "lru-b", &2u32).await.unwrap();
        assert_eq!(load::<u32>(&cfg, "lru-a").await.unwrap(), Some(1));
        save(&cfg, "lru-c", &3u32).await.unwrap();
        assert_eq!(load::<u32>(&cfg, "lru-b").await.unwrap(), None);
        assert_eq!(load::<u32>(&cfg, "lru-a").await.unwrap(), Some(1));
    }

    #[test]
    fn expired_memory_entries_leave_the_recency_list() {
        let mut cache = MemCache::new();
        cache.insert("old", CacheEnvelope { created_ms: 1, data: 1u32 }, 2);
        cache.insert(
            "fresh",
            CacheEnvelope {
                created_ms: unix_ms_now(),
                data: 2u32,
            },
            2,
        );
        assert_eq!(cache.get::<u32>("old", Duration::from_secs(60)), None);
        assert!(!cache.map.contains_key("old"));
        assert_eq!(cache.order, VecDeque::from(vec!["fresh".to_string()]));

        // the freed slot is reused without evicting the live entry
        cache.insert(
            "next",
            CacheEnvelope {
                created_ms: unix_ms_now(),
                data: 3u32,
            },
            2,
        );
        assert_eq!(cache.get::<u32>("fresh", Duration::from_secs(60)), Some(2));
        assert_eq!(cache.order.len(), 2);
    }

    #[test]
    fn config_parses_backend_names() {
        assert_eq!(CacheBackend::parse("Memory"), Some(CacheBackend::Memory));
        assert_eq!(CacheBackend::parse("disk"), None);
        let cfg: CacheConfig =
            serde_json::from_str(r#"{"backend": "memory", "ttl": 60}"#).unwrap();
        assert_eq!(cfg.ttl, Duration::from_secs(60));
        assert!(cfg.validate().is_ok());
    }
}
