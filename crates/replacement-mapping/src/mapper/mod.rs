//! 映射器模块
//!
//! - Mapper: 映射策略接口（supports + run + error_message）
//! - MapperChain: 责任链分发，记住上一次命中的映射器
//! - MapperBase: 各实体映射器共享的状态（解析器、转换缓存、错误信息、自动映射）
//! - 商品 / 订单的导入导出映射器，以及渠道 0 的原始名称映射器

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::error::{MappingError, Result};
use crate::events::MappingEvent;
use crate::record::{Entity, Record};
use crate::resolver::{LookupSubject, Resolver};
use crate::types::{MappingContext, MappingType};

pub mod automap;
pub mod chain;
pub mod order_export;
pub mod order_import;
pub mod original_name;
pub mod product_export;
pub mod product_import;

pub use automap::Automapper;
pub use chain::MapperChain;
pub use order_export::OrderExportMapper;
pub use order_import::OrderImportMapper;
pub use original_name::OriginalNameMapper;
pub use product_export::ProductExportMapper;
pub use product_import::ProductImportMapper;

/// 映射策略
#[async_trait]
pub trait Mapper: Send + Sync {
    /// 映射器名称（日志用）
    fn name(&self) -> &'static str;

    /// 是否处理该记录
    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool;

    /// 转换记录；返回 None 表示拒绝，原因见 `error_message`
    async fn run(&mut self, record: Record, ctx: &MappingContext) -> Result<Option<Record>>;

    /// 上一次 run 的错误信息
    fn error_message(&self) -> Option<&str>;

    /// 渠道替换表已同步
    fn on_replacements_synced(&mut self, _channel_id: u64) {}
}

/// 转换结果缓存，按渠道区分，只保存命中的结果
#[derive(Debug, Default)]
pub struct ConversionMemo {
    entries: HashMap<(u64, MappingType, String), Entity>,
}

impl ConversionMemo {
    pub fn get(&self, channel_id: u64, mapping_type: MappingType, raw: &str) -> Option<&Entity> {
        self.entries.get(&(channel_id, mapping_type, raw.to_string()))
    }

    pub fn insert(&mut self, channel_id: u64, mapping_type: MappingType, raw: &str, entity: Entity) {
        self.entries.insert((channel_id, mapping_type, raw.to_string()), entity);
    }

    /// 清除某个渠道的缓存，返回清除条数
    pub fn clear_channel(&mut self, channel_id: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(channel, _, _), _| *channel != channel_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 实体映射器共享状态
pub struct MapperBase {
    resolver: Resolver,
    memo: ConversionMemo,
    error: Option<String>,
    channel_id: Option<u64>,
    events: Option<broadcast::Receiver<MappingEvent>>,
    automapper: Option<Automapper>,
}

impl MapperBase {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            memo: ConversionMemo::default(),
            error: None,
            channel_id: None,
            events: None,
            automapper: None,
        }
    }

    /// 订阅同步事件，每次 run 开始时处理
    pub fn subscribe(&mut self, receiver: broadcast::Receiver<MappingEvent>) {
        self.events = Some(receiver);
    }

    pub fn set_automapper(&mut self, automapper: Automapper) {
        self.automapper = Some(automapper);
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    pub fn memo(&self) -> &ConversionMemo {
        &self.memo
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 开始一次转换：处理积压事件、设置 channel、清空错误
    pub fn begin(&mut self, ctx: &MappingContext) -> Result<u64> {
        self.drain_events();

        let channel_id = ctx.channel_id.ok_or_else(MappingError::channel_not_set)?;
        self.channel_id = Some(channel_id);
        self.resolver.set_channel(channel_id);
        self.error = None;
        Ok(channel_id)
    }

    fn drain_events(&mut self) {
        let Some(receiver) = self.events.as_mut() else {
            return;
        };

        let mut synced = Vec::new();
        let mut lagged = false;
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    if let Some(channel_id) = event.synced_channel() {
                        synced.push(channel_id);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("同步事件积压，跳过 {} 条，清空转换缓存", skipped);
                    lagged = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if lagged {
            self.memo.clear();
        }
        for channel_id in synced {
            self.on_synced(channel_id);
        }
    }

    /// 清除已同步渠道的缓存，其他渠道不受影响
    pub fn on_synced(&mut self, channel_id: u64) {
        let removed = self.memo.clear_channel(channel_id);
        if removed > 0 {
            tracing::debug!("替换表已同步，清除转换缓存: channel={}, count={}", channel_id, removed);
        }
    }

    /// 记录错误并拒绝
    pub fn reject<T>(&mut self, message: impl Into<String>) -> Result<Option<T>> {
        let message = message.into();
        tracing::debug!("记录被拒绝: {}", message);
        self.error = Some(message);
        Ok(None)
    }

    /// 带缓存的解析，未命中不缓存，之后写入的替换记录可以被读到
    pub async fn resolve(
        &mut self,
        mapping_type: MappingType,
        raw: &str,
        subject: LookupSubject,
    ) -> Result<Option<Entity>> {
        let channel_id = self.channel_id.ok_or_else(MappingError::channel_not_set)?;
        if let Some(cached) = self.memo.get(channel_id, mapping_type, raw) {
            return Ok(Some(cached.clone()));
        }

        let resolved = self.resolver.convert(Some(&subject)).await?;
        if let Some(entity) = &resolved {
            self.memo.insert(channel_id, mapping_type, raw, entity.clone());
        }
        Ok(resolved)
    }

    /// 直接解析，不经缓存
    pub async fn resolve_uncached(&self, subject: LookupSubject) -> Result<Option<Entity>> {
        self.resolver.convert(Some(&subject)).await
    }

    pub fn cached(&self, mapping_type: MappingType, raw: &str) -> Option<Entity> {
        let channel_id = self.channel_id?;
        self.memo.get(channel_id, mapping_type, raw).cloned()
    }

    /// 缓存未命中且名称非空时尝试自动映射
    pub async fn automap(&mut self, mapping_type: MappingType, raw: &str, is_configurable: Option<bool>) {
        if raw.is_empty() || self.cached(mapping_type, raw).is_some() {
            return;
        }
        let (Some(automapper), Some(channel_id)) = (self.automapper.as_ref(), self.channel_id) else {
            return;
        };

        match automapper.automap(mapping_type, raw, is_configurable, channel_id).await {
            Ok(Some(reference_to)) => {
                let mut entity = Entity::new();
                entity.insert("id".to_string(), reference_to.into());
                self.memo.insert(channel_id, mapping_type, raw, entity);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("自动映射失败: type={}, name={}, error={}", mapping_type, raw, e);
            }
        }
    }
}

/// 空值判断：null、空字符串、"0"、0、false、空数组、空对象
pub(crate) fn is_blank(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// 字段为数组时取出，否则保持原样
pub(crate) fn take_array(field: &mut Option<serde_json::Value>) -> Option<Vec<serde_json::Value>> {
    match field.take() {
        Some(serde_json::Value::Array(items)) => Some(items),
        other => {
            *field = other;
            None
        }
    }
}

/// 数值字段转整数，无法转换时为 0
pub(crate) fn as_count(value: Option<&serde_json::Value>) -> i64 {
    use serde_json::Value;
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => crate::store::parse_numeric(s).unwrap_or(0),
        Some(Value::Bool(true)) => 1,
        _ => 0,
    }
}
