//! 映射类型与转换上下文
//!
//! 映射类型为受控枚举，出现在复合键 `{channel}.{type}.{discriminator}.{kind}` 中。

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 映射类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MappingType {
    Attribute,
    Variation,
    Carrier,
    Location,
    Classification,
    Relationship,
    Tax,
}

impl MappingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Variation => "variation",
            Self::Carrier => "carrier",
            Self::Location => "location",
            Self::Classification => "classification",
            Self::Relationship => "relationship",
            Self::Tax => "tax",
        }
    }
}

impl FromStr for MappingType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attribute" => Ok(Self::Attribute),
            "variation" => Ok(Self::Variation),
            "carrier" => Ok(Self::Carrier),
            "location" => Ok(Self::Location),
            "classification" => Ok(Self::Classification),
            "relationship" => Ok(Self::Relationship),
            "tax" => Ok(Self::Tax),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 数据流向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 从渠道流入源系统
    Import,
    /// 从源系统流向渠道
    Export,
}

/// 单次转换请求的上下文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingContext {
    pub direction: Option<Direction>,
    pub channel_id: Option<u64>,
    /// 渠道设置中的默认入库承运商（订单导入时使用）
    pub default_inbound_carrier: Option<String>,
}

impl MappingContext {
    pub fn new(direction: Direction, channel_id: u64) -> Self {
        Self {
            direction: Some(direction),
            channel_id: Some(channel_id),
            default_inbound_carrier: None,
        }
    }

    pub fn import(channel_id: u64) -> Self {
        Self::new(Direction::Import, channel_id)
    }

    pub fn export(channel_id: u64) -> Self {
        Self::new(Direction::Export, channel_id)
    }

    pub fn with_default_inbound_carrier<S: Into<String>>(mut self, carrier: S) -> Self {
        self.default_inbound_carrier = Some(carrier.into());
        self
    }

    pub fn is_import(&self) -> bool {
        self.direction == Some(Direction::Import)
    }

    pub fn is_export(&self) -> bool {
        self.direction == Some(Direction::Export)
    }
}
