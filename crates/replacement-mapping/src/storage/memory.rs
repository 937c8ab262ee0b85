//! 进程内缓存后端

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::{CacheBackend, GlobPattern};
use crate::error::Result;

#[derive(Debug, Default)]
struct HashEntry {
    fields: BTreeMap<String, String>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// 内存后端，过期的 hash 在下次访问时清除
#[derive(Debug, Default)]
pub struct MemoryBackend {
    hashes: RwLock<HashMap<String, HashEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(&self, key: &str) -> bool {
        self.hashes
            .read()
            .get(key)
            .map(HashEntry::is_expired)
            .unwrap_or(false)
    }

    /// 持有写锁后再确认一次，读写锁之间可能已被重新写入或续期
    fn remove_expired(&self, key: &str) {
        let mut hashes = self.hashes.write();
        if hashes.get(key).map(HashEntry::is_expired).unwrap_or(false) {
            tracing::debug!("替换表已过期: key={}", key);
            hashes.remove(key);
        }
    }

    fn purge_if_expired(&self, key: &str) {
        if self.is_expired(key) {
            self.remove_expired(key);
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.purge_if_expired(key);
        Ok(self
            .hashes
            .read()
            .get(key)
            .and_then(|entry| entry.fields.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.purge_if_expired(key);
        self.hashes
            .write()
            .entry(key.to_string())
            .or_default()
            .fields
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.purge_if_expired(key);
        let mut hashes = self.hashes.write();
        let Some(entry) = hashes.get_mut(key) else {
            return Ok(0);
        };
        let removed = fields
            .iter()
            .filter(|field| entry.fields.remove(field.as_str()).is_some())
            .count();
        if entry.fields.is_empty() {
            hashes.remove(key);
        }
        Ok(removed)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.hashes.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_if_expired(key);
        Ok(self
            .hashes
            .read()
            .get(key)
            .map(|entry| !entry.fields.is_empty())
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(entry) = self.hashes.write().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hscan(&self, key: &str, pattern: &str) -> Result<Vec<(String, String)>> {
        let glob = GlobPattern::new(pattern)?;
        self.purge_if_expired(key);
        Ok(self
            .hashes
            .read()
            .get(key)
            .map(|entry| {
                entry
                    .fields
                    .iter()
                    .filter(|(field, _)| glob.matches(field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
