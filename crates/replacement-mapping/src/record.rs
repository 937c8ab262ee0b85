//! 转换记录模型
//!
//! 记录在边界处解析为带类型的结构（商品 / 订单），可选字段区分「缺失」与「显式 null」：
//! - `None` 表示字段不存在，转换时跳过
//! - `Some(Value::Null)` 表示字段存在但为空
//!
//! 字段内部的值仍保留为 JSON：导入与导出方向上同一字段的形状不同
//! （如 `variations` 导入时为名称列表，导出时为 `{id, name}` 列表），
//! 解析后的实体会直接替换原始值。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{MappingError, Result};

/// 解析后的目标渠道实体（如 `{"id": 12, "name": "Size"}`）
pub type Entity = Map<String, Value>;

/// 商品类型：简单商品
pub const SIMPLE_TYPE: &str = "simple";
/// 商品类型：可配置商品
pub const CONFIGURABLE_TYPE: &str = "configurable";

/// 字段存在即 Some，包括显式 null
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// 商品记录（也用于 `variants` 中的子商品）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub sku: Option<Value>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub product_type: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub variations: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub classification: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub location_stock: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub on_hand: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<ProductRecord>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProductRecord {
    fn type_is(&self, expected: &str) -> bool {
        self.product_type
            .as_ref()
            .and_then(Value::as_str)
            .map(|t| t.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }

    pub fn is_configurable(&self) -> bool {
        self.type_is(CONFIGURABLE_TYPE)
    }

    pub fn is_simple(&self) -> bool {
        self.type_is(SIMPLE_TYPE)
    }
}

/// 订单中的发货 / 退货 / 取消条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub carrier: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 订单记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub number: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub requested_carrier: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub carrier: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipments: Option<Vec<Fulfillment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Vec<Fulfillment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellations: Option<Vec<Fulfillment>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 一条待转换的记录
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Product(ProductRecord),
    Order(OrderRecord),
    /// 无法识别的结构，原样透传
    Other(Map<String, Value>),
}

impl Record {
    /// 在边界处解析记录：带 `sku` 的为商品，带 `number` + `items` 的为订单
    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(MappingError::InvalidInput(format!(
                    "record must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        if map.contains_key("sku") {
            let product = serde_json::from_value(Value::Object(map))
                .map_err(|e| MappingError::InvalidInput(format!("invalid product record: {}", e)))?;
            return Ok(Record::Product(product));
        }

        if map.contains_key("number") && map.contains_key("items") {
            let order = serde_json::from_value(Value::Object(map))
                .map_err(|e| MappingError::InvalidInput(format!("invalid order record: {}", e)))?;
            return Ok(Record::Order(order));
        }

        Ok(Record::Other(map))
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Record::Product(product) => Ok(serde_json::to_value(product)?),
            Record::Order(order) => Ok(serde_json::to_value(order)?),
            Record::Other(map) => Ok(Value::Object(map)),
        }
    }

    pub fn as_product(&self) -> Option<&ProductRecord> {
        match self {
            Record::Product(product) => Some(product),
            _ => None,
        }
    }

    pub fn as_order(&self) -> Option<&OrderRecord> {
        match self {
            Record::Order(order) => Some(order),
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_record_keeps_explicit_null() {
        let record = Record::from_value(json!({
            "sku": "SKU-1",
            "type": "configurable",
            "classification": null,
            "color": "red"
        }))
        .unwrap();

        let product = record.as_product().unwrap();
        assert!(product.is_configurable());
        assert_eq!(product.classification, Some(Value::Null));
        assert!(product.attributes.is_none());
        assert_eq!(product.extra.get("color"), Some(&json!("red")));
    }

    #[test]
    fn test_order_record_detection() {
        let record = Record::from_value(json!({
            "number": "100001",
            "items": [],
            "shipments": [{"carrier": "UPS", "tracking": "1Z"}]
        }))
        .unwrap();

        let order = record.as_order().unwrap();
        assert!(order.id.is_none());
        let shipments = order.shipments.as_ref().unwrap();
        assert_eq!(shipments[0].carrier, Some(json!("UPS")));
        assert_eq!(shipments[0].extra.get("tracking"), Some(&json!("1Z")));
    }

    #[test]
    fn test_unknown_shape_passes_through() {
        let value = json!({"foo": 1});
        let record = Record::from_value(value.clone()).unwrap();
        assert!(matches!(record, Record::Other(_)));
        assert_eq!(record.into_value().unwrap(), value);
    }

    #[test]
    fn test_rejects_non_object() {
        let err = Record::from_value(json!(["test"])).unwrap_err();
        assert!(matches!(err, MappingError::InvalidInput(_)));

        let err = Record::from_value(json!({"sku": "A", "variants": "nope"})).unwrap_err();
        assert!(matches!(err, MappingError::InvalidInput(_)));
    }

    #[test]
    fn test_product_serializes_back_with_original_field_names() {
        let value = json!({
            "sku": "SKU-1",
            "type": "simple",
            "externalId": "77",
            "locationStock": [],
            "onHand": 3
        });
        let record = Record::from_value(value.clone()).unwrap();
        assert_eq!(record.into_value().unwrap(), value);
    }
}
