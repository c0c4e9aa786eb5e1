pub mod db;

use std::collections::HashMap;
use std::sync::Mutex;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Key-value store of the last endpoint that worked for each server
#[async_trait]
pub trait EndpointCache: Send + Sync {
    async fn get(&self, server_id: &str) -> Result<Option<String>>;
    async fn set(&self, server_id: &str, url: &str) -> Result<()>;
}

/// Process-local cache, lost on exit
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointCache for MemoryCache {
    async fn get(&self, server_id: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("Endpoint cache poisoned"))?;
        Ok(entries.get(server_id).cloned())
    }

    async fn set(&self, server_id: &str, url: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("Endpoint cache poisoned"))?;
        entries.insert(server_id.to_string(), url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("srv").await.unwrap(), None);

        cache.set("srv", "http://a:1").await.unwrap();
        cache.set("srv", "https://b:2").await.unwrap();
        assert_eq!(cache.get("srv").await.unwrap().as_deref(), Some("https://b:2"));
    }
}
