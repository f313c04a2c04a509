//! 内存键值存储
//!
//! 单进程场景的默认后端；条目写入后在 TTL 内不可变，读取时惰性清理过期项。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{KvStore, StoreError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() >= t).unwrap_or(false)
    }
}

/// 内存存储：HashMap + 惰性过期
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }

        // 过期项：升级为写锁清理
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if let Some(expires_at) = locks.get(key) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        locks.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        self.locks.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let store = MemoryStore::new();
        store.set("k", "v1", None).await.unwrap();
        store.set("k", "v2", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_exclusion_and_release() {
        let store = MemoryStore::new();
        assert!(store
            .acquire_lock("lock:u1", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!store
            .acquire_lock("lock:u1", Duration::from_secs(5))
            .await
            .unwrap());
        store.release_lock("lock:u1").await.unwrap();
        assert!(store
            .acquire_lock("lock:u1", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lock_ttl_recovery() {
        let store = MemoryStore::new();
        assert!(store
            .acquire_lock("lock:u1", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .acquire_lock("lock:u1", Duration::from_secs(5))
            .await
            .unwrap());
    }
}
