//! 渠道替换表
//!
//! 一个渠道对应缓存后端中的一个 hash（`replacements.{channel}`），字段为复合键
//! `{channel}.{type}.{discriminator}.{e|i}`，值为 JSON 文本。

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::record::Entity;
use crate::storage::CacheBackend;

/// 单个渠道的替换表句柄
pub struct ReplacementStore {
    key: String,
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for ReplacementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplacementStore").field("key", &self.key).finish()
    }
}

impl ReplacementStore {
    pub fn new<S: Into<String>>(key: S, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            key: key.into(),
            backend,
        }
    }

    /// 后端 hash key，例如 `replacements.42`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 按复合键查找（大小写不敏感）
    pub async fn find(&self, key: &str) -> Result<Option<Entity>> {
        let raw = self.backend.hget(&self.key, &key.to_lowercase()).await?;
        Ok(raw.as_deref().and_then(decode))
    }

    /// 按 glob 扫描，结果按键升序；无匹配时返回 None
    pub async fn scan(&self, pattern: &str) -> Result<Option<BTreeMap<String, Entity>>> {
        let fields = self.backend.hscan(&self.key, pattern).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let decoded: BTreeMap<String, Entity> = fields
            .into_iter()
            .filter_map(|(field, raw)| decode(&raw).map(|entity| (field, entity)))
            .collect();

        if decoded.is_empty() {
            Ok(None)
        } else {
            Ok(Some(decoded))
        }
    }

    /// 删除整个渠道替换表
    pub async fn remove_all(&self) -> Result<()> {
        tracing::debug!("清空替换表: key={}", self.key);
        self.backend.del(&self.key).await
    }
}

/// 解码存储值
///
/// 数字（含数字字符串）→ `{"id": n}`；对象原样返回；数组转为以下标为键的对象；
/// 其它（布尔、非数字字符串、无法解析的文本）→ None
pub fn decode(raw: &str) -> Option<Entity> {
    let value: Value = serde_json::from_str(raw).ok()?;
    decode_value(value)
}

fn decode_value(value: Value) -> Option<Entity> {
    match value {
        Value::Number(n) => number_to_id(&n).map(id_entity),
        Value::String(s) => parse_numeric(&s).map(id_entity),
        Value::Object(map) => Some(map),
        Value::Array(items) => Some(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), item))
                .collect(),
        ),
        Value::Null | Value::Bool(_) => None,
    }
}

fn id_entity(id: i64) -> Entity {
    let mut entity = Map::new();
    entity.insert("id".to_string(), Value::from(id));
    entity
}

fn number_to_id(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))
}

/// 数字字符串转整数 id（小数截断）
pub(crate) fn parse_numeric(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(i);
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}
