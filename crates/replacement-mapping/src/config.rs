//! 映射引擎配置
//!
//! 与 SDK 其它配置一致：可序列化的配置结构 + 构建器。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 缓存 hash key 的默认前缀，完整 key 为 `{prefix}.{channel_id}`
pub const DEFAULT_STORE_PREFIX: &str = "replacements";
/// 替换表默认 TTL（秒）
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// 映射微服务客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 服务基础 URL，例如 http://ms-mapping:8080
    pub base_url: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 映射引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// 替换表 hash key 前缀
    pub store_prefix: String,
    /// 替换表 TTL（秒），每次批量写入后刷新
    pub ttl_secs: u64,
    /// sled 后端的数据目录；None 时使用内存后端
    pub data_dir: Option<PathBuf>,
    /// 同步事件缓冲区大小
    pub event_buffer_size: usize,
    /// 发送同步消息时附带的租户 ID，None 时为 "guest"
    pub tenant_id: Option<String>,
    /// 映射微服务配置
    pub remote: RemoteConfig,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            data_dir: None,
            event_buffer_size: 1000,
            tenant_id: None,
            remote: RemoteConfig::default(),
        }
    }
}

impl MappingConfig {
    pub fn builder() -> MappingConfigBuilder {
        MappingConfigBuilder::new()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 映射引擎配置构建器
pub struct MappingConfigBuilder {
    config: MappingConfig,
}

impl MappingConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MappingConfig::default(),
        }
    }

    pub fn store_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.store_prefix = prefix.into();
        self
    }

    pub fn ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.config.ttl_secs = ttl_secs;
        self
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn tenant_id<S: Into<String>>(mut self, tenant_id: S) -> Self {
        self.config.tenant_id = Some(tenant_id.into());
        self
    }

    /// 设置映射微服务地址
    pub fn remote_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.remote.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn remote_config(mut self, config: RemoteConfig) -> Self {
        self.config.remote = config;
        self
    }

    pub fn build(self) -> MappingConfig {
        self.config
    }
}

impl Default for MappingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MappingConfig::default();
        assert_eq!(config.store_prefix, "replacements");
        assert_eq!(config.ttl(), Duration::from_secs(3600));
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = MappingConfig::builder()
            .ttl_secs(60)
            .store_prefix("repl")
            .tenant_id("acme")
            .remote_url("http://mapping.local/")
            .build();

        assert_eq!(config.ttl_secs, 60);
        assert_eq!(config.store_prefix, "repl");
        assert_eq!(config.tenant_id.as_deref(), Some("acme"));
        assert_eq!(config.remote.base_url, "http://mapping.local");
    }
}
