//! 自动映射
//!
//! 导入时未映射的名称交给 AutomappingBuilder；匹配到的结果写回渠道替换表，
//! 并推送给映射服务。

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::factory::StoreFactory;
use crate::provider::{AutomapCandidate, AutomapRequest, AutomappingBuilder, ReplacementPublisher};
use crate::types::MappingType;

#[derive(Clone)]
pub struct Automapper {
    builder: Arc<dyn AutomappingBuilder>,
    publisher: Arc<dyn ReplacementPublisher>,
    factory: StoreFactory,
}

impl Automapper {
    pub fn new(
        builder: Arc<dyn AutomappingBuilder>,
        publisher: Arc<dyn ReplacementPublisher>,
        factory: StoreFactory,
    ) -> Self {
        Self {
            builder,
            publisher,
            factory,
        }
    }

    /// 返回请求类型下匹配到的 referenceTo
    pub async fn automap(
        &self,
        mapping_type: MappingType,
        name: &str,
        is_configurable: Option<bool>,
        channel_id: u64,
    ) -> Result<Option<i64>> {
        if name.is_empty() {
            return Ok(None);
        }

        let candidate = AutomapCandidate {
            label: name.to_string(),
            name: name.to_string(),
            id: name.parse::<i64>().ok(),
            is_configurable,
        };
        let mut request = AutomapRequest::new();
        request.insert(mapping_type.as_str().to_string(), vec![candidate]);

        let response = self.builder.build(&request).await?;
        if response.values().all(Vec::is_empty) {
            return Ok(None);
        }

        let mut factory = self.factory.clone();
        factory.set_channel(channel_id);

        let mut matched = None;
        for (response_type, items) in &response {
            for item in items {
                let Some(reference_to) = item.reference_id() else {
                    continue;
                };
                if response_type == mapping_type.as_str() {
                    matched = Some(reference_to);
                }

                let mut item = item.clone();
                if item.mapping_type.is_none() {
                    item.mapping_type = Some(response_type.clone());
                }
                if item.data.is_none() {
                    let mut data = serde_json::Map::new();
                    data.insert("name".to_string(), Value::from(name));
                    item.data = Some(data);
                }
                factory.enhance_with_data(&item).await?;
            }
        }

        debug!(
            "自动映射完成: type={}, name={}, reference_to={:?}",
            mapping_type, name, matched
        );

        if let Err(e) = self.publisher.sync_replacements(&response, channel_id).await {
            warn!("推送自动映射结果失败: channel={}, error={}", channel_id, e);
        }

        Ok(matched)
    }
}
