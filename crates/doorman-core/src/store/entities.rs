//! Local JSON caching of fetched inventory for offline display.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{CloudNode, Device};

/// Consider cached inventory stale after an hour.
const CACHE_STALE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Caches cloud-node and device listings alongside the token records.
pub struct EntityCache {
    cache_dir: PathBuf,
}

impl EntityCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", cache_dir.display(), e)))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("cannot read cache {}: {}", name, e)))?;
        let cached = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("corrupt cache {}: {}", name, e)))?;
        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)
            .map_err(|e| Error::Storage(format!("cannot serialize cache {}: {}", name, e)))?;
        std::fs::write(self.cache_path(name), contents)
            .map_err(|e| Error::Storage(format!("cannot write cache {}: {}", name, e)))?;
        Ok(())
    }

    pub fn load_cloud_nodes(&self) -> Result<Option<CachedData<Vec<CloudNode>>>> {
        self.load("cloud_nodes")
    }

    pub fn save_cloud_nodes(&self, nodes: &[CloudNode]) -> Result<()> {
        self.save("cloud_nodes", &nodes)
    }

    pub fn load_devices(&self, cloud_node_id: &str) -> Result<Option<CachedData<Vec<Device>>>> {
        self.load(&format!("devices_{}", cloud_node_id))
    }

    pub fn save_devices(&self, cloud_node_id: &str, devices: &[Device]) -> Result<()> {
        self.save(&format!("devices_{}", cloud_node_id), &devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cached_data_fresh_then_stale() {
        let fresh = CachedData::new(vec![1, 2, 3]);
        assert!(!fresh.is_stale());
        assert_eq!(fresh.age_display(), "just now");

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_stale());
        assert_eq!(old.age_display(), "1h ago");
    }

    #[test]
    fn test_entity_cache_round_trip() {
        let dir = std::env::temp_dir().join(format!("doorman-entities-{}", std::process::id()));
        let cache = EntityCache::new(dir).unwrap();

        let nodes: Vec<CloudNode> = serde_json::from_str(
            r#"[{"id": "node-1", "name": "Front Gate", "serialNumber": "SN-1"}]"#,
        )
        .unwrap();
        cache.save_cloud_nodes(&nodes).unwrap();

        let loaded = cache.load_cloud_nodes().unwrap().unwrap();
        assert_eq!(loaded.data.len(), 1);
        assert_eq!(loaded.data[0].name, "Front Gate");
        assert!(!loaded.is_stale());

        assert!(cache.load_devices("node-1").unwrap().is_none());
    }
}
