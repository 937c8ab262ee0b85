//! 替换表工厂
//!
//! 负责：
//! - 每个渠道缓存一个 ReplacementStore 句柄（同一工厂的所有克隆共享）
//! - 渠道替换表冷启动时从远端拉取并整表写入
//! - 批量写入（覆盖 / 增量）、自动映射结果回写、键删除

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{MappingConfig, DEFAULT_STORE_PREFIX, DEFAULT_TTL_SECS};
use crate::error::{MappingError, Result};
use crate::provider::RemoteReplacementSource;
use crate::resolver::{composite_key, key_part, KeyKind};
use crate::storage::CacheBackend;
use crate::store::ReplacementStore;

/// 远端返回的空替换表标记字段
pub const EMPTY_SENTINEL_FIELD: &str = "empty";

/// 一条替换记录：多个键指向同一个值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementEntry {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub value: Value,
}

impl ReplacementEntry {
    pub fn new<K: Into<String>>(keys: Vec<K>, value: Value) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            value,
        }
    }
}

/// 自动映射结果项 `{referenceTo, type, data: {id?, name?}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomapItem {
    #[serde(rename = "referenceTo", default, skip_serializing_if = "Option::is_none")]
    pub reference_to: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomapItem {
    /// 引用的目标 id（> 0 才有效）
    pub fn reference_id(&self) -> Option<i64> {
        let reference = self.reference_to.as_ref()?;
        let id = match reference {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => crate::store::parse_numeric(s),
            _ => None,
        }?;
        (id > 0).then_some(id)
    }
}

type StoreCache = Arc<RwLock<HashMap<String, Arc<ReplacementStore>>>>;

/// 替换表工厂
///
/// 克隆共享句柄缓存、后端和远端数据源，但各自持有当前 channel。
#[derive(Clone)]
pub struct StoreFactory {
    prefix: String,
    ttl: Duration,
    backend: Arc<dyn CacheBackend>,
    source: Arc<dyn RemoteReplacementSource>,
    stores: StoreCache,
    channel_id: Option<u64>,
}

impl std::fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFactory")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl StoreFactory {
    pub fn new(backend: Arc<dyn CacheBackend>, source: Arc<dyn RemoteReplacementSource>) -> Self {
        Self {
            prefix: DEFAULT_STORE_PREFIX.to_string(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            backend,
            source,
            stores: Arc::new(RwLock::new(HashMap::new())),
            channel_id: None,
        }
    }

    pub fn from_config(
        config: &MappingConfig,
        backend: Arc<dyn CacheBackend>,
        source: Arc<dyn RemoteReplacementSource>,
    ) -> Self {
        Self {
            prefix: config.store_prefix.clone(),
            ttl: config.ttl(),
            ..Self::new(backend, source)
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn set_channel(&mut self, channel_id: u64) -> &mut Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    /// 当前渠道的 hash key
    pub fn store_key(&self) -> Result<String> {
        let channel_id = self.channel_id.ok_or_else(MappingError::channel_not_set)?;
        Ok(format!("{}.{}", self.prefix, channel_id))
    }

    /// 获取当前渠道的替换表，必要时从远端加载
    pub async fn create_or_get_store(&self) -> Result<Arc<ReplacementStore>> {
        let key = self.store_key()?;

        let store = {
            let cached = self.stores.read().get(&key).cloned();
            match cached {
                Some(store) => store,
                None => {
                    let mut stores = self.stores.write();
                    stores
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(ReplacementStore::new(key.clone(), self.backend.clone())))
                        .clone()
                }
            }
        };

        if !self.backend.exists(&key).await? {
            let channel_id = self.channel_id.ok_or_else(MappingError::channel_not_set)?;
            info!("替换表未命中缓存，从远端加载: channel={}", channel_id);
            let entries = self.source.fetch_replacement_map(channel_id).await?;
            self.bulk_set(&entries, true).await?;
        }

        Ok(store)
    }

    /// 批量写入替换记录
    ///
    /// 同一个键以第一次出现为准；`full_erase` 时先清空整表；
    /// 没有任何键时写入 `empty` 标记，避免重复冷启动。
    pub async fn bulk_set(&self, entries: &[ReplacementEntry], full_erase: bool) -> Result<()> {
        let key = self.store_key()?;

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for entry in entries {
            for k in &entry.keys {
                let field = k.to_lowercase();
                if !seen.insert(field.clone()) {
                    continue;
                }
                pairs.push((field, serde_json::to_string(&entry.value)?));
            }
        }

        if full_erase {
            self.backend.del(&key).await?;
        }

        if pairs.is_empty() {
            self.backend.hset(&key, EMPTY_SENTINEL_FIELD, "").await?;
        } else {
            self.backend.hset_many(&key, &pairs).await?;
        }

        self.backend.expire(&key, self.ttl).await?;

        debug!(
            "替换表已写入: key={}, fields={}, full_erase={}",
            key,
            pairs.len(),
            full_erase
        );
        Ok(())
    }

    /// 将自动映射结果增量写入替换表
    pub async fn enhance_with_data(&self, item: &AutomapItem) -> Result<()> {
        let channel_id = self.channel_id.ok_or_else(MappingError::channel_not_set)?;

        let (Some(reference_to), Some(data), Some(mapping_type)) =
            (item.reference_to.as_ref(), item.data.as_ref(), item.mapping_type.as_deref())
        else {
            return Ok(());
        };
        if reference_to.is_null() {
            return Ok(());
        }
        let Some(reference) = key_part(reference_to) else {
            return Ok(());
        };

        let mut entries = Vec::new();

        let import_keys: Vec<String> = [data.get("name"), data.get("id")]
            .into_iter()
            .flatten()
            .filter_map(key_part)
            .map(|part| composite_key(channel_id, mapping_type, &part, KeyKind::Import))
            .collect();
        if !import_keys.is_empty() {
            entries.push(ReplacementEntry::new(import_keys, reference_to.clone()));
        }

        entries.push(ReplacementEntry::new(
            vec![composite_key(channel_id, mapping_type, &reference, KeyKind::Entity)],
            Value::Object(data.clone()),
        ));

        self.bulk_set(&entries, false).await
    }

    /// 删除指定字段
    pub async fn remove_keys(&self, keys: &[String]) -> Result<()> {
        let key = self.store_key()?;
        let fields: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
        let removed = self.backend.hdel(&key, &fields).await?;
        debug!("删除替换键: key={}, requested={}, removed={}", key, fields.len(), removed);
        Ok(())
    }

    /// 已缓存的句柄数
    pub fn cached_store_count(&self) -> usize {
        self.stores.read().len()
    }
}
