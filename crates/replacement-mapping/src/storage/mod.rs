//! 存储模块 - 替换表的缓存后端
//!
//! 替换表按 hash 语义存放：一个 hash key（如 `replacements.42`）下有多个字段，
//! 字段值为 JSON 文本。后端负责 TTL。
//!
//! - MemoryBackend: 进程内后端，惰性过期
//! - SledBackend: 基于 sled 的持久化后端，每个 hash 一个 Tree

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::MappingConfig;
use crate::error::Result;

pub mod glob;
pub mod kv;
pub mod memory;

pub use glob::GlobPattern;
pub use kv::SledBackend;
pub use memory::MemoryBackend;

/// 共享缓存后端
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 读取字段
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// 写入字段
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// 删除字段，返回实际删除的数量
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize>;

    /// 删除整个 hash
    async fn del(&self, key: &str) -> Result<()>;

    /// hash 是否存在（至少有一个字段且未过期）
    async fn exists(&self, key: &str) -> Result<bool>;

    /// 设置 hash 的过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// 按 glob 模式扫描字段
    async fn hscan(&self, key: &str, pattern: &str) -> Result<Vec<(String, String)>>;

    /// 批量写入字段，默认逐个 hset
    async fn hset_many(&self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        for (field, value) in pairs {
            self.hset(key, field, value).await?;
        }
        Ok(())
    }
}

/// 按配置打开后端：设置了 data_dir 时使用 sled，否则使用内存
pub async fn open_backend(config: &MappingConfig) -> Result<Arc<dyn CacheBackend>> {
    match &config.data_dir {
        Some(dir) => {
            info!("使用 sled 缓存后端: {}", dir.display());
            Ok(Arc::new(SledBackend::new(dir).await?))
        }
        None => {
            info!("使用内存缓存后端");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_open_backend_from_config() {
        let memory = assert_ok!(open_backend(&MappingConfig::default()).await);
        assert_ok!(memory.hset("h", "f", "1").await);
        assert_eq!(memory.hget("h", "f").await.unwrap().as_deref(), Some("1"));

        let dir = TempDir::new().unwrap();
        let config = MappingConfig::builder().data_dir(dir.path()).build();
        let sled = open_backend(&config).await.unwrap();
        sled.hset("h", "f", "2").await.unwrap();
        assert!(sled.exists("h").await.unwrap());
        assert!(dir.path().join("replacements").exists());

        // 数据目录被普通文件占用时无法打开
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let config = MappingConfig::builder().data_dir(&file).build();
        assert!(open_backend(&config).await.is_err());
    }
}
