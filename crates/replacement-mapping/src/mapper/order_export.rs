//! 订单导出映射器：承运商与库位按目标 id 解析

use async_trait::async_trait;
use serde_json::Value;

use super::{is_blank, Mapper, MapperBase};
use crate::error::Result;
use crate::record::{Fulfillment, OrderRecord, Record};
use crate::resolver::{key_part, LookupSubject, Resolver};
use crate::types::{MappingContext, MappingType};

pub struct OrderExportMapper {
    base: MapperBase,
}

impl OrderExportMapper {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            base: MapperBase::new(resolver),
        }
    }

    pub fn base_mut(&mut self) -> &mut MapperBase {
        &mut self.base
    }

    /// `{id: ..}` → 解析后的实体；缺少 id 或未命中时为 null
    async fn convert_ref(&mut self, mapping_type: MappingType, value: Value) -> Result<Value> {
        let Some(id) = value.get("id").filter(|id| !is_blank(id)) else {
            return Ok(Value::Null);
        };
        let Some(raw) = key_part(id) else {
            return Ok(Value::Null);
        };

        let subject = LookupSubject::by_id(mapping_type, id.clone());
        Ok(self
            .base
            .resolve(mapping_type, &raw, subject)
            .await?
            .map(Value::Object)
            .unwrap_or(Value::Null))
    }

    async fn convert_field(&mut self, mapping_type: MappingType, field: Option<Value>) -> Result<Option<Value>> {
        match field {
            Some(value) => Ok(Some(self.convert_ref(mapping_type, value).await?)),
            None => Ok(None),
        }
    }

    async fn process_fulfillments(&mut self, items: Option<Vec<Fulfillment>>) -> Result<Option<Vec<Fulfillment>>> {
        let Some(items) = items else {
            return Ok(None);
        };

        let mut converted = Vec::with_capacity(items.len());
        for mut item in items {
            item.carrier = self.convert_field(MappingType::Carrier, item.carrier.take()).await?;
            item.location = self.convert_field(MappingType::Location, item.location.take()).await?;
            converted.push(item);
        }
        Ok(Some(converted))
    }

    async fn process_order(&mut self, mut order: OrderRecord) -> Result<OrderRecord> {
        order.requested_carrier = self
            .convert_field(MappingType::Carrier, order.requested_carrier.take())
            .await?;

        order.shipments = self.process_fulfillments(order.shipments.take()).await?;
        order.returns = self.process_fulfillments(order.returns.take()).await?;
        order.cancellations = self.process_fulfillments(order.cancellations.take()).await?;

        order.carrier = self.convert_field(MappingType::Carrier, order.carrier.take()).await?;
        order.location = self.convert_field(MappingType::Location, order.location.take()).await?;
        Ok(order)
    }
}

#[async_trait]
impl Mapper for OrderExportMapper {
    fn name(&self) -> &'static str {
        "order_export"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        if !ctx.is_export() || ctx.channel_id == Some(0) {
            return false;
        }
        record
            .as_order()
            .map(|o| matches!(&o.id, Some(id) if !id.is_null()))
            .unwrap_or(false)
    }

    async fn run(&mut self, record: Record, ctx: &MappingContext) -> Result<Option<Record>> {
        let Record::Order(order) = record else {
            return Ok(Some(record));
        };
        self.base.begin(ctx)?;

        let order = self.process_order(order).await?;
        Ok(Some(Record::Order(order)))
    }

    fn error_message(&self) -> Option<&str> {
        self.base.error_message()
    }

    fn on_replacements_synced(&mut self, channel_id: u64) {
        self.base.on_synced(channel_id);
    }
}
