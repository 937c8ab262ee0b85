//! 标识符解析
//!
//! 由查询主体推导复合键并查询渠道替换表：
//! - 顶层 `id` → `{c}.{t}.{id}.e`
//! - `data.id` → `{c}.{t}.{id}.i`
//! - `data.name` → `{c}.{t}.{lower(name)}.i`（优先于 id）
//! - `data.attributes` → `{c}.{t}.{a-b-c}.e`（关系查询）
//!
//! 以最后确定的键查询，未命中且存在不同的 id 键时再用 id 键查询一次。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MappingError, Result};
use crate::factory::StoreFactory;
use crate::record::Entity;
use crate::types::MappingType;

/// 键类别：e = 目标实体键，i = 源系统导入键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Entity,
    Import,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Entity => "e",
            KeyKind::Import => "i",
        }
    }
}

/// 拼接复合键 `{channel}.{type}.{discriminator}.{kind}`
pub fn composite_key(channel_id: u64, mapping_type: &str, discriminator: &str, kind: KeyKind) -> String {
    format!("{}.{}.{}.{}", channel_id, mapping_type, discriminator, kind.as_str())
}

/// 标量转为键片段；null、数组、对象没有键片段
pub fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// 查询主体中的源数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
}

/// 查询主体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupSubject {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SubjectData>,
}

impl LookupSubject {
    /// 按目标渠道 id 查询（导出方向）
    pub fn by_id(mapping_type: MappingType, id: impl Into<Value>) -> Self {
        Self {
            kind: Some(mapping_type.as_str().to_string()),
            id: Some(id.into()),
            data: None,
        }
    }

    /// 按源系统 id 查询（导入方向）
    pub fn by_source_id(mapping_type: MappingType, id: impl Into<Value>) -> Self {
        Self {
            kind: Some(mapping_type.as_str().to_string()),
            id: None,
            data: Some(SubjectData {
                id: Some(id.into()),
                ..Default::default()
            }),
        }
    }

    /// 按源系统名称查询（导入方向）
    pub fn by_name(mapping_type: MappingType, name: impl Into<Value>) -> Self {
        Self {
            kind: Some(mapping_type.as_str().to_string()),
            id: None,
            data: Some(SubjectData {
                name: Some(name.into()),
                ..Default::default()
            }),
        }
    }

    /// 按变体属性集合查询关系
    pub fn by_attributes(mapping_type: MappingType, attributes: Vec<String>) -> Self {
        Self {
            kind: Some(mapping_type.as_str().to_string()),
            id: None,
            data: Some(SubjectData {
                attributes: Some(attributes),
                ..Default::default()
            }),
        }
    }
}

/// 解析器，持有一个 StoreFactory 句柄
#[derive(Clone)]
pub struct Resolver {
    factory: StoreFactory,
    channel_id: Option<u64>,
}

impl Resolver {
    pub fn new(factory: StoreFactory) -> Self {
        Self {
            factory,
            channel_id: None,
        }
    }

    pub fn set_channel(&mut self, channel_id: u64) -> &mut Self {
        self.channel_id = Some(channel_id);
        self.factory.set_channel(channel_id);
        self
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    pub fn factory(&self) -> &StoreFactory {
        &self.factory
    }

    /// 解析查询主体
    pub async fn convert(&self, subject: Option<&LookupSubject>) -> Result<Option<Entity>> {
        let Some(subject) = subject else {
            return Ok(None);
        };

        let kind = subject.kind.as_deref().ok_or_else(|| {
            MappingError::InvalidArgument(
                "Conversion subject must contain \"type\" attribute".to_string(),
            )
        })?;

        let channel_id = self.channel_id.ok_or_else(MappingError::channel_not_set)?;

        let (key, id_key) = derive_keys(channel_id, kind, subject);
        let Some(key) = key else {
            return Ok(None);
        };

        let store = self.factory.create_or_get_store().await?;
        let mut result = store.find(&key).await?;

        if result.is_none() {
            if let Some(id_key) = id_key.filter(|id_key| *id_key != key) {
                tracing::debug!("名称键未命中，回退到 id 键: key={}, id_key={}", key, id_key);
                result = store.find(&id_key).await?;
            }
        }

        Ok(result)
    }
}

/// 返回 (最终查询键, id 键)
fn derive_keys(channel_id: u64, kind: &str, subject: &LookupSubject) -> (Option<String>, Option<String>) {
    let mut key = None;
    let mut id_key = None;

    if let Some(id) = subject.id.as_ref().and_then(key_part) {
        let k = composite_key(channel_id, kind, &id, KeyKind::Entity);
        key = Some(k.clone());
        id_key = Some(k);
    }

    if let Some(data) = &subject.data {
        if let Some(id) = data.id.as_ref().and_then(key_part) {
            let k = composite_key(channel_id, kind, &id, KeyKind::Import);
            key = Some(k.clone());
            id_key = Some(k);
        }

        if let Some(name) = data.name.as_ref().and_then(key_part) {
            key = Some(composite_key(channel_id, kind, &name.to_lowercase(), KeyKind::Import));
        }

        if let Some(attributes) = data.attributes.as_ref().filter(|a| !a.is_empty()) {
            let mut parts: Vec<String> = attributes.iter().map(|a| a.to_lowercase()).collect();
            parts.sort();
            key = Some(composite_key(channel_id, kind, &parts.join("-"), KeyKind::Entity));
        }
    }

    (key, id_key)
}
