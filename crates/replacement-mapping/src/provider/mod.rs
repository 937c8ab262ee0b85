//! 外部协作方接口
//!
//! - RemoteReplacementSource: 拉取渠道的权威替换表
//! - ReplacementPublisher: 推送自动映射结果
//! - AutomappingBuilder: 为未映射的名称生成候选映射
//! - MessageQueue: 同步消息队列
//! - CatalogSource: 本地目录（名称 → id），供原始名称映射器使用

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{MappingError, Result};
use crate::factory::{AutomapItem, ReplacementEntry};
use crate::types::MappingType;

pub mod http;

pub use http::{translate_response, MappingDataProvider, ProviderResponse, DEFAULT_QUEUE_SYNC};

/// 自动映射请求中的一个候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomapCandidate {
    pub label: String,
    pub name: String,
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_configurable: Option<bool>,
}

/// 映射类型 → 候选列表
pub type AutomapRequest = BTreeMap<String, Vec<AutomapCandidate>>;
/// 映射类型 → 自动映射结果
pub type AutomapResponse = BTreeMap<String, Vec<AutomapItem>>;

/// 远端结构化错误 `{ErrorCode, Message}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "ErrorCode")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl From<RemoteError> for MappingError {
    fn from(error: RemoteError) -> Self {
        MappingError::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

#[async_trait]
pub trait RemoteReplacementSource: Send + Sync {
    /// 拉取渠道替换表，无映射时返回空列表
    async fn fetch_replacement_map(&self, channel_id: u64) -> Result<Vec<ReplacementEntry>>;
}

#[async_trait]
pub trait ReplacementPublisher: Send + Sync {
    /// 推送自动映射结果，返回远端确认的映射
    async fn sync_replacements(&self, automap: &AutomapResponse, channel_id: u64) -> Result<Option<Value>>;
}

#[async_trait]
pub trait AutomappingBuilder: Send + Sync {
    async fn build(&self, request: &AutomapRequest) -> Result<AutomapResponse>;
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, queue: &str, payload: &Value) -> Result<()>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// 某类型的全部本地条目：名称 → id
    async fn load_names(&self, mapping_type: MappingType) -> Result<HashMap<String, i64>>;
}
