//! 商品导出映射器
//!
//! 源系统商品 → 渠道商品：变体属性、变体关系、分类、属性按目标 id 解析；
//! 子商品额外处理库位库存，并重算 `onHand`。

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;

use super::{as_count, is_blank, take_array, Mapper, MapperBase};
use crate::error::Result;
use crate::record::{Entity, ProductRecord, Record};
use crate::resolver::{key_part, LookupSubject, Resolver};
use crate::types::{MappingContext, MappingType};

pub struct ProductExportMapper {
    base: MapperBase,
    disallowed: HashSet<MappingType>,
}

impl ProductExportMapper {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            base: MapperBase::new(resolver),
            disallowed: HashSet::new(),
        }
    }

    pub fn base_mut(&mut self) -> &mut MapperBase {
        &mut self.base
    }

    /// 跳过指定映射类型的转换
    pub fn disallow_conversion(&mut self, types: &[MappingType]) {
        self.disallowed = types.iter().copied().collect();
    }

    fn allows(&self, mapping_type: MappingType) -> bool {
        !self.disallowed.contains(&mapping_type)
    }

    async fn convert_id(&mut self, mapping_type: MappingType, id: &Value) -> Result<Option<Entity>> {
        let Some(raw) = key_part(id) else {
            return Ok(None);
        };
        self.base
            .resolve(mapping_type, &raw, LookupSubject::by_id(mapping_type, id.clone()))
            .await
    }

    async fn process_variation(&mut self, mut product: ProductRecord) -> Result<Option<ProductRecord>> {
        if !self.allows(MappingType::Attribute) {
            return Ok(Some(product));
        }
        let Some(variations) = product.variations.take() else {
            return Ok(Some(product));
        };

        if product.is_simple() {
            product.variations = Some(Value::Null);
            return Ok(Some(product));
        }

        let empty = match &variations {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if product.is_configurable() && empty {
            return self
                .base
                .reject("Cannot export \"Configurable\" product without variation attributes.");
        }

        let Value::Array(items) = variations else {
            product.variations = Some(variations);
            return Ok(Some(product));
        };

        let mut converted = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = item.get("id") else {
                continue;
            };
            match self.convert_id(MappingType::Attribute, id).await? {
                Some(entity) => converted.push(Value::Object(entity)),
                None => {
                    let label = item
                        .get("name")
                        .and_then(key_part)
                        .or_else(|| key_part(id))
                        .unwrap_or_default();
                    return self.base.reject(format!(
                        "Cannot export product because variation attribute \"{}\" is not mapped.",
                        label
                    ));
                }
            }
        }

        product.variations = Some(Value::Array(converted));
        Ok(Some(product))
    }

    async fn process_relationship(&mut self, mut product: ProductRecord) -> Result<Option<ProductRecord>> {
        if !self.allows(MappingType::Relationship) || !product.is_configurable() {
            return Ok(Some(product));
        }
        let Some(Value::Array(items)) = product.relationship.clone() else {
            return Ok(Some(product));
        };

        let mut attributes = Vec::new();
        for item in &items {
            let Some(id) = item.get("id") else {
                continue;
            };
            let Some(entity) = self.convert_id(MappingType::Attribute, id).await? else {
                let label = item
                    .get("name")
                    .and_then(key_part)
                    .or_else(|| key_part(id))
                    .unwrap_or_default();
                return self.base.reject(format!(
                    "Cannot export product because variation attribute \"{}\" is not mapped.",
                    label
                ));
            };
            if let Some(name) = entity.get("name").and_then(key_part) {
                attributes.push(name);
            }
        }

        if attributes.is_empty() {
            return self
                .base
                .reject("Cannot convert relationship where variation attributes are not mapped.");
        }

        let subject = LookupSubject::by_attributes(MappingType::Relationship, attributes.clone());
        match self
            .base
            .resolve_uncached(subject)
            .await?
            .filter(|entity| entity.contains_key("name"))
        {
            Some(entity) => {
                product.relationship = Some(Value::Object(entity));
                Ok(Some(product))
            }
            None => self.base.reject(format!(
                "Cannot find relationship for the variation attributes \"{}\".",
                attributes.join(", ")
            )),
        }
    }

    async fn process_classification(&mut self, mut product: ProductRecord) -> Result<ProductRecord> {
        if !self.allows(MappingType::Classification) {
            return Ok(product);
        }
        let Some(Value::Object(classification)) = &product.classification else {
            return Ok(product);
        };

        let converted = match classification.get("id").cloned() {
            Some(id) => self.convert_id(MappingType::Classification, &id).await?,
            None => None,
        };
        product.classification = Some(converted.map(Value::Object).unwrap_or(Value::Null));
        Ok(product)
    }

    async fn process_attributes(&mut self, mut product: ProductRecord) -> Result<ProductRecord> {
        if !self.allows(MappingType::Attribute) {
            return Ok(product);
        }
        let Some(items) = take_array(&mut product.attributes) else {
            return Ok(product);
        };

        let mut kept = Vec::with_capacity(items.len());
        for mut item in items {
            let Some(id) = item.get("attribute").and_then(|a| a.get("id")).cloned() else {
                continue;
            };
            if let Some(entity) = self.convert_id(MappingType::Attribute, &id).await? {
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
        if !self.allows(MappingType::Location) {
            return Ok(product);
        }
        let Some(items) = take_array(&mut product.location_stock) else {
            return Ok(product);
        };

        let mut on_hand = 0i64;
        let mut kept = Vec::with_capacity(items.len());
        for mut item in items {
            let Some(location) = item.get("location").filter(|l| !is_blank(l)).cloned() else {
                continue;
            };
            on_hand += as_count(item.get("onHand"));

            let Some(id) = location.get("id") else {
                continue;
            };
            if let Some(entity) = self.convert_id(MappingType::Location, id).await? {
                if let Some(obj) = item.as_object_mut() {
                    obj.insert("location".to_string(), Value::Object(entity));
                    kept.push(item);
                }
            }
        }

        product.on_hand = Some(json!(on_hand));
        product.location_stock = Some(Value::Array(kept));
        Ok(product)
    }
}

#[async_trait]
impl Mapper for ProductExportMapper {
    fn name(&self) -> &'static str {
        "product_export"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        if !ctx.is_export() || ctx.channel_id == Some(0) {
            return false;
        }
        record
            .as_product()
            .map(|p| p.sku.is_some() && p.product_type.is_some())
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
        let Some(product) = self.process_relationship(product).await? else {
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
        self.base.error_message()
    }

    fn on_replacements_synced(&mut self, channel_id: u64) {
        self.base.on_synced(channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ReplacementEntry;
    use crate::provider::testing::resolver_with;

    fn mapper() -> ProductExportMapper {
        ProductExportMapper::new(resolver_with(vec![
            ReplacementEntry::new(vec!["1.attribute.1.e"], json!({"id": 100, "name": "size"})),
            ReplacementEntry::new(vec!["1.attribute.2.e"], json!({"id": 200, "name": "color"})),
            ReplacementEntry::new(vec!["1.relationship.color-size.e"], json!({"id": 500, "name": "Color/Size"})),
            ReplacementEntry::new(vec!["1.classification.3.e"], json!({"id": 30})),
            ReplacementEntry::new(vec!["1.location.7.e"], json!({"id": 70})),
        ]))
    }

    fn product(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    async fn run(mapper: &mut ProductExportMapper, value: Value) -> Option<Value> {
        mapper
            .run(product(value), &MappingContext::export(1))
            .await
            .unwrap()
            .map(|r| r.into_value().unwrap())
    }

    #[test]
    fn test_supports() {
        let mapper = mapper();
        let record = product(json!({"sku": "A", "type": "simple"}));
        assert!(mapper.supports(&record, &MappingContext::export(1)));
        assert!(!mapper.supports(&record, &MappingContext::import(1)));
        assert!(!mapper.supports(&record, &MappingContext::export(0)));
        assert!(!mapper.supports(&product(json!({"sku": "A"})), &MappingContext::export(1)));
    }

    #[tokio::test]
    async fn test_configurable_without_variations_is_rejected() {
        let mut mapper = mapper();
        for variations in [json!([]), json!(null)] {
            let result = run(
                &mut mapper,
                json!({"sku": "A", "type": "configurable", "variations": variations}),
            )
            .await;
            assert!(result.is_none());
            assert_eq!(
                mapper.error_message(),
                Some("Cannot export \"Configurable\" product without variation attributes.")
            );
        }
    }

    #[tokio::test]
    async fn test_simple_product_variations_become_null() {
        let mut mapper = mapper();
        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "simple", "variations": [{"id": 1}]}),
        )
        .await
        .unwrap();
        assert_eq!(result["variations"], Value::Null);
        assert_eq!(mapper.error_message(), None);
    }

    #[tokio::test]
    async fn test_unmapped_variation_is_rejected() {
        let mut mapper = mapper();
        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "configurable", "variations": [{"id": 9, "name": "Fit"}]}),
        )
        .await;
        assert!(result.is_none());
        assert_eq!(
            mapper.error_message(),
            Some("Cannot export product because variation attribute \"Fit\" is not mapped.")
        );

        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "configurable", "variations": [{"id": 9}]}),
        )
        .await;
        assert!(result.is_none());
        assert_eq!(
            mapper.error_message(),
            Some("Cannot export product because variation attribute \"9\" is not mapped.")
        );
    }

    #[tokio::test]
    async fn test_full_export() {
        let mut mapper = mapper();
        let result = run(
            &mut mapper,
            json!({
                "sku": "TSHIRT",
                "type": "configurable",
                "variations": [{"id": 1, "name": "Size"}, "junk"],
                "relationship": [{"id": 1}, {"id": 2}],
                "classification": {"id": 3},
                "attributes": [
                    {"attribute": {"id": 2}, "value": "Red"},
                    {"attribute": {"id": 99}, "value": "x"},
                    {"value": "no attribute"}
                ],
                "variants": [{
                    "sku": "TSHIRT-S",
                    "classification": {"name": "no id"},
                    "locationStock": [
                        {"location": {"id": 7}, "onHand": 2},
                        {"location": {"id": 8}, "onHand": 3},
                        {"location": null, "onHand": 5}
                    ]
                }]
            }),
        )
        .await
        .unwrap();

        assert_eq!(result["variations"], json!([{"id": 100, "name": "size"}]));
        assert_eq!(result["relationship"], json!({"id": 500, "name": "Color/Size"}));
        assert_eq!(result["classification"], json!({"id": 30}));
        assert_eq!(
            result["attributes"],
            json!([{"attribute": {"id": 200, "name": "color"}, "value": "Red"}])
        );

        let variant = &result["variants"][0];
        assert_eq!(variant["classification"], Value::Null);
        assert_eq!(variant["locationStock"], json!([{"location": {"id": 70}, "onHand": 2}]));
        assert_eq!(variant["onHand"], json!(5));
    }

    #[tokio::test]
    async fn test_relationship_failures() {
        let mut mapper = mapper();
        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "configurable", "variations": [{"id": 1}], "relationship": [{"id": 1}]}),
        )
        .await;
        assert!(result.is_none());
        assert_eq!(
            mapper.error_message(),
            Some("Cannot find relationship for the variation attributes \"size\".")
        );

        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "configurable", "variations": [{"id": 1}], "relationship": [{"id": 4, "name": "Fit"}]}),
        )
        .await;
        assert!(result.is_none());
        assert_eq!(
            mapper.error_message(),
            Some("Cannot export product because variation attribute \"Fit\" is not mapped.")
        );

        let result = run(
            &mut mapper,
            json!({"sku": "A", "type": "configurable", "variations": [{"id": 1}], "relationship": ["junk"]}),
        )
        .await;
        assert!(result.is_none());
        assert_eq!(
            mapper.error_message(),
            Some("Cannot convert relationship where variation attributes are not mapped.")
        );
    }

    #[tokio::test]
    async fn test_disallowed_types_are_left_untouched() {
        let mut mapper = mapper();
        mapper.disallow_conversion(&[MappingType::Attribute, MappingType::Classification]);

        let result = run(
            &mut mapper,
            json!({
                "sku": "A",
                "type": "simple",
                "variations": [{"id": 1}],
                "classification": {"id": 42},
                "attributes": [{"attribute": {"id": 99}}]
            }),
        )
        .await
        .unwrap();

        assert_eq!(result["variations"], json!([{"id": 1}]));
        assert_eq!(result["classification"], json!({"id": 42}));
        assert_eq!(result["attributes"], json!([{"attribute": {"id": 99}}]));
    }

    #[tokio::test]
    async fn test_unrelated_record_passes_through() {
        let mut mapper = mapper();
        let record = Record::from_value(json!({"foo": "bar"})).unwrap();
        let result = mapper.run(record.clone(), &MappingContext::export(1)).await.unwrap();
        assert_eq!(result, Some(record));
    }
}
