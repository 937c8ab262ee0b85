//! 映射微服务 HTTP 客户端
//!
//! 接口：
//! - GET  /api/replacements/map/{channel}  渠道替换表（属性 `map`）
//! - POST /api/replacements/sync           推送自动映射结果（属性 `map`）
//! - POST /api/replacements/unlink         解除映射（完整响应体）
//! - GET  /api/replacements                查询映射（`hydra:member`，完整响应体）
//!
//! 响应统一经 `translate_response` 转换为 Body / Empty / Error。

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{AutomapResponse, MessageQueue, RemoteError, RemoteReplacementSource, ReplacementPublisher};
use crate::config::MappingConfig;
use crate::error::{MappingError, Result};
use crate::events::SyncNotifier;
use crate::factory::ReplacementEntry;
use crate::resolver::key_part;

/// 替换表同步消息的默认队列
pub const DEFAULT_QUEUE_SYNC: &str = "mapping_replacements_sync";

const HYDRA_ERROR: &str = "hydra:Error";
const HYDRA_DESCRIPTION: &str = "@hydra:description";
const NO_DESCRIPTION: &str = "Mapping no error description provided.";

/// 转换后的响应
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// 无内容（204 或无法识别的状态）
    Empty,
    Body(Value),
    Error(RemoteError),
}

impl ProviderResponse {
    pub fn into_result(self) -> Result<Option<Value>> {
        match self {
            ProviderResponse::Empty => Ok(None),
            ProviderResponse::Body(body) => Ok(Some(body)),
            ProviderResponse::Error(error) => Err(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ProviderResponse::Error(_))
    }
}

fn is_hydra_error(body: &Value) -> bool {
    body.get("@type").and_then(Value::as_str) == Some(HYDRA_ERROR)
}

fn hydra_message(body: &Value, reason: Option<&str>, fallback: &str) -> String {
    body.get(HYDRA_DESCRIPTION)
        .and_then(Value::as_str)
        .or(reason)
        .unwrap_or(fallback)
        .to_string()
}

/// 将 HTTP 响应转换为统一结果
///
/// - 2xx：`@type == hydra:Error` 视为 400 错误；否则返回 `attribute` 对应的值或完整响应体
/// - 204 且响应体不是 JSON 结构：Empty
/// - >= 400：hydra 错误保留状态码，其余统一为 500
pub fn translate_response(
    status: u16,
    reason: Option<&str>,
    body: Option<Value>,
    endpoint: &str,
    attribute: Option<&str>,
    full_body: bool,
) -> ProviderResponse {
    if (200..300).contains(&status) {
        let body = match body {
            Some(body @ (Value::Object(_) | Value::Array(_))) => body,
            _ => return ProviderResponse::Empty,
        };

        match attribute {
            None => {
                if is_hydra_error(&body) {
                    return ProviderResponse::Error(RemoteError {
                        code: "400".to_string(),
                        message: hydra_message(&body, reason, NO_DESCRIPTION),
                    });
                }
                ProviderResponse::Body(body)
            }
            Some(attribute) => {
                if body.is_object() && body.get(attribute).is_none() {
                    error!(
                        "Wrong data came from {} endpoint, expected and array with {} attribute: body={}",
                        endpoint, attribute, body
                    );
                    if is_hydra_error(&body) {
                        return ProviderResponse::Error(RemoteError {
                            code: "400".to_string(),
                            message: hydra_message(&body, reason, NO_DESCRIPTION),
                        });
                    }
                    return ProviderResponse::Body(body);
                }

                if full_body {
                    return ProviderResponse::Body(body);
                }

                match body.get(attribute) {
                    Some(value) => ProviderResponse::Body(value.clone()),
                    None => ProviderResponse::Empty,
                }
            }
        }
    } else if status >= 400 {
        match body {
            Some(body) if is_hydra_error(&body) => ProviderResponse::Error(RemoteError {
                code: status.to_string(),
                message: hydra_message(&body, reason, NO_DESCRIPTION.trim_end_matches('.')),
            }),
            _ => ProviderResponse::Error(RemoteError {
                code: "500".to_string(),
                message: reason.unwrap_or_default().to_string(),
            }),
        }
    } else {
        ProviderResponse::Empty
    }
}

struct RawResponse {
    status: u16,
    reason: Option<&'static str>,
    body: Option<Value>,
}

/// 映射微服务客户端
pub struct MappingDataProvider {
    client: Client,
    base_url: String,
    tenant_id: Option<String>,
    notifier: SyncNotifier,
    queue: Option<Arc<dyn MessageQueue>>,
}

impl MappingDataProvider {
    pub fn new(config: &MappingConfig, notifier: SyncNotifier) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.remote.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.remote.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| MappingError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = config.remote.base_url.trim_end_matches('/').to_string();
        info!("映射服务客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            tenant_id: config.tenant_id.clone(),
            notifier,
            queue: None,
        })
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<RawResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.request(method.clone(), &url);

        if let Some(body) = body {
            if method == Method::GET {
                let query: Vec<(String, String)> = body
                    .as_object()
                    .map(|filter| {
                        filter
                            .iter()
                            .filter_map(|(k, v)| key_part(v).map(|v| (k.clone(), v)))
                            .collect()
                    })
                    .unwrap_or_default();
                request = request.query(&query);
            } else {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| {
            error!("映射服务请求失败: {} {}: {}", method, endpoint, e);
            MappingError::Transport(format!("映射服务请求失败: {}", e))
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MappingError::Transport(format!("读取映射服务响应失败: {}", e)))?;
        let body = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        if status.as_u16() >= 500 {
            error!(
                "Links microservice fails: code={}, message={:?}, body={}",
                status.as_u16(),
                status.canonical_reason(),
                text
            );
        }

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason(),
            body,
        })
    }

    /// 拉取渠道替换表；2xx 时发布同步事件
    pub async fn get_replacements_map(&self, channel_id: u64) -> Result<ProviderResponse> {
        let endpoint = format!("/api/replacements/map/{}", channel_id);
        let raw = self.request(Method::GET, &endpoint, None).await?;
        let result = translate_response(
            raw.status,
            raw.reason,
            raw.body,
            &format!("GET {}", endpoint),
            Some("map"),
            false,
        );

        if (200..300).contains(&raw.status) {
            self.notify_synced(&result, channel_id);
        }

        Ok(result)
    }

    pub async fn unlink_replacements(&self, filter: &Value) -> Result<ProviderResponse> {
        let endpoint = "/api/replacements/unlink";
        let raw = self.request(Method::POST, endpoint, Some(filter)).await?;
        Ok(translate_response(
            raw.status,
            raw.reason,
            raw.body,
            &format!("POST {}", endpoint),
            None,
            true,
        ))
    }

    pub async fn get_replacements(&self, filter: &Value) -> Result<ProviderResponse> {
        let endpoint = "/api/replacements";
        let raw = self.request(Method::GET, endpoint, Some(filter)).await?;
        Ok(translate_response(
            raw.status,
            raw.reason,
            raw.body,
            &format!("GET {}", endpoint),
            Some("hydra:member"),
            true,
        ))
    }

    /// 推送映射数据；空数据直接返回空列表
    pub async fn push_replacements(&self, mut data: Map<String, Value>, channel_id: u64) -> Result<ProviderResponse> {
        if data.is_empty() {
            return Ok(ProviderResponse::Body(Value::Array(Vec::new())));
        }

        data.insert("channel".to_string(), Value::from(channel_id));

        let endpoint = "/api/replacements/sync";
        let raw = self
            .request(Method::POST, endpoint, Some(&Value::Object(data)))
            .await?;
        let result = translate_response(
            raw.status,
            raw.reason,
            raw.body,
            &format!("POST {}", endpoint),
            Some("map"),
            false,
        );

        if (200..300).contains(&raw.status) {
            self.notify_synced(&result, channel_id);
        }

        Ok(result)
    }

    fn notify_synced(&self, result: &ProviderResponse, channel_id: u64) {
        let map = match result {
            ProviderResponse::Body(body) => body.clone(),
            _ => Value::Null,
        };
        self.notifier.replacements_synced(map, channel_id);
    }

    /// 发送队列消息，附带租户 ID；失败只记录日志
    pub async fn send(&self, queue: &str, mut data: Map<String, Value>) {
        let tenant = self.tenant_id.clone().unwrap_or_else(|| "guest".to_string());
        data.insert("tenant".to_string(), Value::from(tenant));
        let payload = Value::Object(data);

        let Some(transport) = &self.queue else {
            error!("Mapping: MQ send failed: 消息队列未配置, queue={}, data={}", queue, payload);
            return;
        };

        if let Err(e) = transport.send(queue, &payload).await {
            error!("Mapping: MQ send failed: {}, queue={}, data={}", e, queue, payload);
        }
    }
}

fn entries_from_map(map: Value) -> Result<Vec<ReplacementEntry>> {
    match map {
        Value::Array(items) => Ok(serde_json::from_value(Value::Array(items))?),
        Value::Object(items) => items
            .into_iter()
            .map(|(_, item)| serde_json::from_value(item).map_err(MappingError::from))
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => {
            warn!("替换表格式无法识别: {}", other);
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl RemoteReplacementSource for MappingDataProvider {
    async fn fetch_replacement_map(&self, channel_id: u64) -> Result<Vec<ReplacementEntry>> {
        match self.get_replacements_map(channel_id).await?.into_result()? {
            Some(map) => entries_from_map(map),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ReplacementPublisher for MappingDataProvider {
    async fn sync_replacements(&self, automap: &AutomapResponse, channel_id: u64) -> Result<Option<Value>> {
        let data = match serde_json::to_value(automap)? {
            Value::Object(data) => data,
            _ => Map::new(),
        };
        self.push_replacements(data, channel_id).await?.into_result()
    }
}
