//! 订单导入映射器
//!
//! 承运商按名称解析，发货单未解析到承运商时使用渠道的默认入库承运商；
//! 发货库位按 id 或名称解析，未命中保留原值。

use async_trait::async_trait;
use serde_json::Value;

use super::{is_blank, Mapper, MapperBase};
use crate::error::Result;
use crate::record::{Entity, Fulfillment, Record};
use crate::resolver::{key_part, LookupSubject, Resolver};
use crate::store::parse_numeric;
use crate::types::{MappingContext, MappingType};

pub struct OrderImportMapper {
    base: MapperBase,
}

impl OrderImportMapper {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            base: MapperBase::new(resolver),
        }
    }

    pub fn base_mut(&mut self) -> &mut MapperBase {
        &mut self.base
    }

    async fn convert_carrier(&mut self, name: &str) -> Result<Option<Entity>> {
        let subject = LookupSubject::by_name(MappingType::Carrier, name);
        self.base.resolve(MappingType::Carrier, name, subject).await
    }

    async fn process_carrier(&mut self, shipment: &mut Fulfillment, default_carrier: Option<&str>) -> Result<()> {
        if let Some(Value::String(name)) = &shipment.carrier {
            let name = name.clone();
            if let Some(entity) = self.convert_carrier(&name).await? {
                shipment.carrier = Some(Value::Object(entity));
                return Ok(());
            }
            shipment.carrier = Some(Value::Null);
        }

        if let Some(default_carrier) = default_carrier.filter(|c| !c.is_empty()) {
            let converted = self.convert_carrier(default_carrier).await?;
            shipment.carrier = Some(converted.map(Value::Object).unwrap_or(Value::Null));
        }
        Ok(())
    }

    async fn process_location(&mut self, shipment: &mut Fulfillment) -> Result<()> {
        let Some(raw) = shipment.location.as_ref().and_then(key_part) else {
            return Ok(());
        };

        let subject = if parse_numeric(&raw).is_some() {
            LookupSubject::by_source_id(MappingType::Location, raw.clone())
        } else {
            LookupSubject::by_name(MappingType::Location, raw.clone())
        };

        if let Some(entity) = self.base.resolve(MappingType::Location, &raw, subject).await? {
            shipment.location = Some(Value::Object(entity));
        }
        Ok(())
    }
}

#[async_trait]
impl Mapper for OrderImportMapper {
    fn name(&self) -> &'static str {
        "order_import"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        if !ctx.is_import() || ctx.channel_id == Some(0) {
            return false;
        }
        record.as_order().map(|o| o.id.is_none()).unwrap_or(false)
    }

    async fn run(&mut self, record: Record, ctx: &MappingContext) -> Result<Option<Record>> {
        let Record::Order(mut order) = record else {
            return Ok(Some(record));
        };
        self.base.begin(ctx)?;

        if let Some(requested) = order.requested_carrier.take() {
            let converted = match key_part(&requested).filter(|_| !is_blank(&requested)) {
                Some(name) => self.convert_carrier(&name).await?,
                None => None,
            };
            order.requested_carrier = Some(converted.map(Value::Object).unwrap_or(Value::Null));
        }

        if let Some(mut shipments) = order.shipments.take() {
            let default_carrier = ctx.default_inbound_carrier.as_deref();
            for shipment in shipments.iter_mut() {
                self.process_carrier(shipment, default_carrier).await?;
                self.process_location(shipment).await?;
            }
            order.shipments = Some(shipments);
        }

        Ok(Some(Record::Order(order)))
    }

    fn error_message(&self) -> Option<&str> {
        self.base.error_message()
    }

    fn on_replacements_synced(&mut self, channel_id: u64) {
        self.base.on_synced(channel_id);
    }
}
