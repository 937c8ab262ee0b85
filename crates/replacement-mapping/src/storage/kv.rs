//! KV 存储模块 - 基于 sled 的替换表后端
//!
//! 本模块提供：
//! - 每个 hash key 一个 Tree（`hash:{key}`）
//! - 过期时间记录在元数据 Tree 中，读取时惰性清理
//! - 打开数据库时对文件锁冲突做退避重试

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{CacheBackend, GlobPattern};
use crate::error::{MappingError, Result};

const HASH_TREE_PREFIX: &str = "hash:";
const EXPIRY_TREE: &str = "__expiry";

/// sled 缓存后端
#[derive(Debug, Clone)]
pub struct SledBackend {
    base_path: PathBuf,
    /// 主数据库实例
    db: Arc<Db>,
    /// hash key -> 过期时间戳（毫秒）
    expiry: Tree,
}

impl SledBackend {
    /// 在 `{base_path}/replacements` 下打开数据库
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("replacements");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| MappingError::KvStore(format!("创建 KV 存储目录失败: {}", e)))?;

        // 其它进程可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<sled::Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tracing::warn!("sled 数据库被占用，{}ms 后重试 (第 {} 次)", delay_ms, attempt + 1);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            MappingError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let expiry = db
            .open_tree(EXPIRY_TREE)
            .map_err(|e| MappingError::KvStore(format!("打开过期元数据 Tree 失败: {}", e)))?;

        tracing::info!("替换表 KV 存储已打开: {}", kv_path.display());

        Ok(Self {
            base_path,
            db: Arc::new(db),
            expiry,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn tree_name(key: &str) -> String {
        format!("{}{}", HASH_TREE_PREFIX, key)
    }

    fn open_hash(&self, key: &str) -> Result<Tree> {
        self.db
            .open_tree(Self::tree_name(key))
            .map_err(|e| MappingError::KvStore(format!("打开 hash Tree 失败: {}", e)))
    }

    fn drop_hash(&self, key: &str) -> Result<()> {
        self.db
            .drop_tree(Self::tree_name(key))
            .map_err(|e| MappingError::KvStore(format!("删除 hash Tree 失败: {}", e)))?;
        self.expiry.remove(key)?;
        Ok(())
    }

    /// 已过期则删除整个 hash
    fn purge_if_expired(&self, key: &str) -> Result<()> {
        let Some(raw) = self.expiry.get(key)? else {
            return Ok(());
        };
        let mut buf = [0u8; 8];
        if raw.len() != buf.len() {
            self.expiry.remove(key)?;
            return Ok(());
        }
        buf.copy_from_slice(&raw);
        let expires_at = i64::from_be_bytes(buf);
        if chrono::Utc::now().timestamp_millis() >= expires_at {
            tracing::debug!("替换表已过期: key={}", key);
            self.drop_hash(key)?;
        }
        Ok(())
    }

    fn decode_utf8(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| MappingError::Serialization(format!("字段不是合法 UTF-8: {}", e)))
    }
}

#[async_trait]
impl CacheBackend for SledBackend {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;
        match tree.get(field.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_utf8(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;
        tree.insert(field.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn hset_many(&self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;
        let mut batch = sled::Batch::default();
        for (field, value) in pairs {
            batch.insert(field.as_bytes(), value.as_bytes());
        }
        tree.apply_batch(batch)
            .map_err(|e| MappingError::KvStore(format!("批量写入失败: {}", e)))?;
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;
        let mut removed = 0;
        for field in fields {
            if tree.remove(field.as_bytes())?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.drop_hash(key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;
        Ok(!tree.is_empty())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.expiry.insert(key, expires_at.to_be_bytes().to_vec())?;
        Ok(())
    }

    async fn hscan(&self, key: &str, pattern: &str) -> Result<Vec<(String, String)>> {
        let glob = GlobPattern::new(pattern)?;
        self.purge_if_expired(key)?;
        let tree = self.open_hash(key)?;

        let mut results = Vec::new();
        for item in tree.iter() {
            let (field, value) = item?;
            let field = Self::decode_utf8(&field)?;
            if glob.matches(&field) {
                results.push((field, Self::decode_utf8(&value)?));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sled_backend_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::new(temp_dir.path()).await.unwrap();

        assert!(!backend.exists("replacements.1").await.unwrap());

        backend
            .hset_many(
                "replacements.1",
                &[
                    ("1.attribute.size.i".to_string(), r#"{"id":5}"#.to_string()),
                    ("1.attribute.5.e".to_string(), r#"{"id":5,"name":"Size"}"#.to_string()),
                ],
            )
            .await
            .unwrap();

        assert!(backend.exists("replacements.1").await.unwrap());
        assert_eq!(
            backend.hget("replacements.1", "1.attribute.size.i").await.unwrap().as_deref(),
            Some(r#"{"id":5}"#)
        );

        let scanned = backend.hscan("replacements.1", "1.attribute.*.e").await.unwrap();
        assert_eq!(scanned.len(), 1);

        let removed = backend
            .hdel("replacements.1", &["1.attribute.size.i".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        backend.del("replacements.1").await.unwrap();
        assert!(!backend.exists("replacements.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sled_backend_ttl() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::new(temp_dir.path()).await.unwrap();

        backend.hset("k", "f", "v").await.unwrap();
        backend.expire("k", Duration::from_millis(50)).await.unwrap();
        assert!(backend.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!backend.exists("k").await.unwrap());
        assert!(backend.hget("k", "f").await.unwrap().is_none());
    }
}
