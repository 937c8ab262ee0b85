//! 原始名称映射器
//!
//! 渠道 0 表示源系统自身：名称直接对照本地目录（CatalogSource），
//! 每种类型只加载一次，名称不区分大小写。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{is_blank, take_array, Mapper};
use crate::error::Result;
use crate::provider::CatalogSource;
use crate::record::{Entity, ProductRecord, Record};
use crate::resolver::key_part;
use crate::types::{MappingContext, MappingType};

/// 可从本地目录加载的类型
const CATALOG_TYPES: [MappingType; 4] = [
    MappingType::Attribute,
    MappingType::Classification,
    MappingType::Location,
    MappingType::Carrier,
];

pub struct OriginalNameMapper {
    catalog: Arc<dyn CatalogSource>,
    schema: HashMap<MappingType, HashMap<String, Entity>>,
    error: Option<String>,
}

impl OriginalNameMapper {
    pub fn new(catalog: Arc<dyn CatalogSource>) -> Self {
        Self {
            catalog,
            schema: HashMap::new(),
            error: None,
        }
    }

    async fn load_schema(&self, mapping_type: MappingType) -> Result<HashMap<String, Entity>> {
        if !CATALOG_TYPES.contains(&mapping_type) {
            return Ok(HashMap::new());
        }

        let names = self.catalog.load_names(mapping_type).await?;
        debug!("加载本地目录: type={}, count={}", mapping_type, names.len());

        Ok(names
            .into_iter()
            .map(|(name, id)| {
                let mut entity = Entity::new();
                entity.insert("id".to_string(), id.into());
                (name.to_lowercase(), entity)
            })
            .collect())
    }

    async fn convert(&mut self, mapping_type: MappingType, name: &str) -> Result<Option<Entity>> {
        if !self.schema.contains_key(&mapping_type) {
            let loaded = self.load_schema(mapping_type).await?;
            self.schema.insert(mapping_type, loaded);
        }

        Ok(self
            .schema
            .get(&mapping_type)
            .and_then(|names| names.get(&name.to_lowercase()))
            .cloned())
    }

    fn reject(&mut self, message: String) -> Result<Option<ProductRecord>> {
        debug!("记录被拒绝: {}", message);
        self.error = Some(message);
        Ok(None)
    }

    async fn process_variation(&mut self, mut product: ProductRecord) -> Result<Option<ProductRecord>> {
        let Some(variations) = product.variations.take() else {
            return Ok(Some(product));
        };

        let empty = match &variations {
            Value::Array(items) => items.is_empty(),
            other => is_blank(other),
        };
        if empty && product.is_configurable() {
            return self.reject(
                "No Variation attributes found in product, Variation attribute is required for \"Configurable\" products."
                    .to_string(),
            );
        }

        if !product.is_configurable() {
            product.variations = Some(Value::Array(Vec::new()));
            return Ok(Some(product));
        }

        let Value::Array(items) = variations else {
            product.variations = Some(variations);
            return Ok(Some(product));
        };

        let mut converted = Vec::with_capacity(items.len());
        for item in items {
            let name = key_part(&item).unwrap_or_default();
            match self.convert(MappingType::Attribute, &name).await? {
                Some(entity) => converted.push(Value::Object(entity)),
                None => {
                    return self.reject(format!(
                        "Variation attribute \"{}\" cannot be converted, attribute not found in catalog.",
                        name
                    ));
                }
            }
        }

        product.variations = Some(Value::Array(converted));
        Ok(Some(product))
    }

    async fn process_classification(&mut self, mut product: ProductRecord) -> Result<ProductRecord> {
        let Some(classification) = product.classification.take() else {
            return Ok(product);
        };

        let name = match &classification {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        };
        let converted = match name {
            Some(name) => self.convert(MappingType::Classification, &name).await?,
            None => None,
        };

        product.classification = Some(converted.map(Value::Object).unwrap_or(Value::Null));
        Ok(product)
    }

    async fn process_attributes(&mut self, mut product: ProductRecord) -> Result<ProductRecord> {
        let Some(items) = take_array(&mut product.attributes) else {
            return Ok(product);
        };

        let mut kept = Vec::with_capacity(items.len());
        for mut item in items {
            let Some(name) = item.get("attribute").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if let Some(entity) = self.convert(MappingType::Attribute, &name).await? {
                if let Some(obj) = item.as_object_mut() {
                    obj.insert("attribute".to_string(), Value::Object(entity));
                    kept.push(item);
                }
            }
        }

        product.attributes = Some(Value::Array(kept));
        Ok(product)
    }

    async fn process_location(&mut self, mut product: ProductRecord) -> Result<ProductRecord> {
        let Some(items) = take_array(&mut product.location_stock) else {
            return Ok(product);
        };

        let mut kept = Vec::with_capacity(items.len());
        for mut item in items {
            let Some(name) = item.get("location").map(|l| key_part(l).unwrap_or_default()) else {
                continue;
            };
            if let Some(entity) = self.convert(MappingType::Location, &name).await? {
                if let Some(obj) = item.as_object_mut() {
                    obj.insert("location".to_string(), Value::Object(entity));
                    kept.push(item);
                }
            }
        }

        product.location_stock = Some(Value::Array(kept));
        Ok(product)
    }
}

#[async_trait]
impl Mapper for OriginalNameMapper {
    fn name(&self) -> &'static str {
        "original_name"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        ctx.channel_id == Some(0) && record.as_product().is_some()
    }

    async fn run(&mut self, record: Record, _ctx: &MappingContext) -> Result<Option<Record>> {
        let Record::Product(product) = record else {
            return Ok(Some(record));
        };
        self.error = None;

        let Some(product) = self.process_variation(product).await? else {
            return Ok(None);
        };
        let product = self.process_classification(product).await?;
        let mut product = self.process_attributes(product).await?;

        if let Some(variants) = product.variants.take() {
            let mut converted = Vec::with_capacity(variants.len());
            for variant in variants {
                let variant = self.process_classification(variant).await?;
                let variant = self.process_attributes(variant).await?;
                converted.push(self.process_location(variant).await?);
            }
            product.variants = Some(converted);
        }

        Ok(Some(Record::Product(product)))
    }

    fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
