//! 键值存储抽象层
//!
//! 统一的 get / set / acquire_lock 接口，供调研缓存、会话持久化与
//! 按用户的咨询锁共用。内存实现用于单进程与测试，文件实现用于
//! 无外部存储的环境；后端在启动时选定一次。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// 键值存储接口
///
/// 锁是咨询性的：acquire_lock 成功即持有，ttl 到期自动失效，
/// 持有方应在完成后显式 release_lock。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 写入键值；ttl 为 None 表示不过期。写入总是整体覆盖。
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// 尝试获取 key 上的咨询锁；已被他人持有且未过期时返回 false
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn release_lock(&self, key: &str) -> Result<(), StoreError>;
}

/// 根据配置选择存储后端（启动时一次）
///
/// backend = "file" 且目录可用时使用文件存储，否则退回内存存储
pub fn create_store(backend: &str, file_root: Option<&Path>) -> Arc<dyn KvStore> {
    if backend == "file" {
        if let Some(root) = file_root {
            match FileStore::new(root) {
                Ok(store) => {
                    tracing::info!("using file-backed store at {:?}", root);
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!("file store init failed ({}), falling back to memory", e);
                }
            }
        } else {
            tracing::warn!("file store requested without a root path, using memory store");
        }
    }

    tracing::info!("using in-memory store");
    Arc::new(MemoryStore::new())
}
