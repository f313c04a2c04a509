//! 文件键值存储
//!
//! 无外部存储环境的替代后端：每个键一个 JSON 文件，锁为带过期时间的
//! .lock 文件。与内存实现共用同一接口，启动时选定一次。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{KvStore, StoreError};

#[derive(Serialize, Deserialize)]
struct FileEntry {
    value: String,
    /// Unix 秒；None 表示不过期
    expires_at: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct LockEntry {
    expires_at: i64,
}

/// 文件存储：root 下每键一个文件
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// 键名清洗 + 短哈希后缀，避免路径字符与清洗后的碰撞
    fn key_path(&self, key: &str, suffix: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.root
            .join(format!("{}-{}{}", sanitized, &digest[..12], suffix))
    }

    fn now_secs() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key, ".json");
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        let entry: FileEntry = serde_json::from_str(&data)?;
        if let Some(expires_at) = entry.expires_at {
            if Self::now_secs() >= expires_at {
                std::fs::remove_file(&path).ok();
                return Ok(None);
            }
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = FileEntry {
            value: value.to_string(),
            expires_at: ttl.map(|t| Self::now_secs() + t.as_secs() as i64),
        };
        let path = self.key_path(key, ".json");
        std::fs::write(&path, serde_json::to_string(&entry)?)?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let path = self.key_path(key, ".lock");
        if path.exists() {
            let held = std::fs::read_to_string(&path)
                .ok()
                .and_then(|data| serde_json::from_str::<LockEntry>(&data).ok())
                .map(|lock| Self::now_secs() < lock.expires_at)
                .unwrap_or(false);
            if held {
                return Ok(false);
            }
            std::fs::remove_file(&path).ok();
        }
        let lock = LockEntry {
            expires_at: Self::now_secs() + ttl.as_secs() as i64,
        };
        std::fs::write(&path, serde_json::to_string(&lock)?)?;
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key, ".lock");
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}
