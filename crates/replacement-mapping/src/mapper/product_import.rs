//! 商品导入映射器
//!
//! 渠道商品 → 源系统商品：变体属性、分类、属性按名称解析，库位按 id 或名称解析。
//! 未映射的名称交给自动映射。

use async_trait::async_trait;
use serde_json::Value;

use super::{take_array, Mapper, MapperBase};
use crate::error::Result;
use crate::record::{Entity, ProductRecord, Record};
use crate::resolver::{key_part, LookupSubject, Resolver};
use crate::store::parse_numeric;
use crate::types::{MappingContext, MappingType};

pub struct ProductImportMapper {
    base: MapperBase,
}

impl ProductImportMapper {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            base: MapperBase::new(resolver),
        }
    }

    pub fn base_mut(&mut self) -> &mut MapperBase {
        &mut self.base
    }

    /// 解析，未命中时尝试自动映射
    async fn convert(
        &mut self,
        mapping_type: MappingType,
        raw: &str,
        subject: LookupSubject,
        is_configurable: Option<bool>,
    ) -> Result<Option<Entity>> {
        self.base.resolve(mapping_type, raw, subject).await?;
        self.base.automap(mapping_type, raw, is_configurable).await;
        Ok(self.base.cached(mapping_type, raw))
    }

    async fn process_variation(&mut self, mut product: ProductRecord) -> Result<Option<ProductRecord>> {
        let Some(items) = take_array(&mut product.variations) else {
            return Ok(Some(product));
        };

        if items.is_empty() && product.is_configurable() {
            return self.base.reject(
                "No Variation attributes found in product, Variation attribute is required for \"Configurable\" products.",
            );
        }

        if !product.is_configurable() {
            product.variations = Some(Value::Array(Vec::new()));
            return Ok(Some(product));
        }

        let mut converted = Vec::with_capacity(items.len());
        for item in items {
            let name = key_part(&item).unwrap_or_else(|| item.to_string());
            let subject = LookupSubject::by_name(MappingType::Attribute, name.clone());
            match self.convert(MappingType::Attribute, &name, subject, Some(true)).await? {
                Some(entity) => converted.push(Value::Object(entity)),
                None => {
                    return self.base.reject(format!(
                        "Variation attribute \"{}\" cannot be converted, follow channels variations mapping tab and choose proper variation attribute.",
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

        let subject = match &classification {
            Value::String(name) if !name.is_empty() => {
                Some((name.clone(), LookupSubject::by_name(MappingType::Classification, name.clone())))
            }
            Value::Number(n) if n.is_i64() || n.is_u64() => Some((
                n.to_string(),
                LookupSubject::by_source_id(MappingType::Classification, classification.clone()),
            )),
            _ => None,
        };

        let converted = match subject {
            Some((raw, subject)) => self.convert(MappingType::Classification, &raw, subject, None).await?,
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
            let subject = LookupSubject::by_name(MappingType::Attribute, name.clone());
            if let Some(entity) = self.convert(MappingType::Attribute, &name, subject, None).await? {
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
            let Some(raw) = item.get("location").and_then(key_part) else {
                continue;
            };
            let numeric = parse_numeric(&raw).is_some();
            let subject = if numeric {
                LookupSubject::by_source_id(MappingType::Location, raw.clone())
            } else {
                LookupSubject::by_name(MappingType::Location, raw.clone())
            };

            if let Some(entity) = self.base.resolve(MappingType::Location, &raw, subject).await? {
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
impl Mapper for ProductImportMapper {
    fn name(&self) -> &'static str {
        "product_import"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        if !ctx.is_import() || ctx.channel_id == Some(0) {
            return false;
        }
        record
            .as_product()
            .map(|p| p.sku.is_some() && p.external_id.is_some())
            .unwrap_or(false)
    }

    async fn run(&mut self, record: Record, ctx: &MappingContext) -> Result<Option<Record>> {
        let Record::Product(product) = record else {
            return Ok(Some(record));
        };
        self.base.begin(ctx)?;

        let Some(product) = self.process_variation(product).await? else {
            return Ok(None);
        };
        let product = self.process_classification(product).await?;
        let product = self.process_attributes(product).await?;
        let mut product = self.process_location(product).await?;

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
        self.base.error_message()
    }

    fn on_replacements_synced(&mut self, channel_id: u64) {
        self.base.on_synced(channel_id);
    }
}
