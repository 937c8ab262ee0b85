use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    /// 配置错误：使用前未设置 channel（调用方编程错误，不重试）
    #[error("Config error: {0}")]
    Config(String),
    /// 查询主体缺少必需字段
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 记录在边界处被拒绝
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No registered mappers found")]
    NoMappers,
    /// 映射微服务返回的结构化错误 {ErrorCode, Message}
    #[error("Remote error [{code}]: {message}")]
    Remote {
        code: String,
        message: String,
    },
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for MappingError {
    fn from(error: serde_json::Error) -> Self {
        MappingError::Serialization(error.to_string())
    }
}

impl From<sled::Error> for MappingError {
    fn from(error: sled::Error) -> Self {
        MappingError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for MappingError {
    fn from(error: reqwest::Error) -> Self {
        MappingError::Transport(error.to_string())
    }
}

impl From<regex::Error> for MappingError {
    fn from(error: regex::Error) -> Self {
        MappingError::InvalidArgument(format!("invalid glob pattern: {}", error))
    }
}

impl MappingError {
    /// channel 未设置
    pub fn channel_not_set() -> Self {
        MappingError::Config("ChannelId must be set before conversion".to_string())
    }

    /// 判断是否是配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, MappingError::Config(_))
    }

    /// 判断是否是远端结构化错误
    pub fn is_remote_error(&self) -> bool {
        matches!(self, MappingError::Remote { .. })
    }

    /// 获取远端错误码（如果这是一个远端错误）
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            MappingError::Remote { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MappingError>;
