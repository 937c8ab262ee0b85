//! 事件模块 - 映射同步通知
//!
//! 功能包括：
//! - 替换表同步成功事件（映射器据此清理各自的转换缓存）
//! - 记录映射失败事件
//! - 基于 broadcast 的事件广播和订阅

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// 映射事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MappingEvent {
    /// 远端写入成功后，渠道替换表已变更
    ReplacementsSynced {
        map: Value,
        channel_id: u64,
        timestamp: i64,
    },
    /// 映射器拒绝了一条记录
    MappingFailed {
        item: Value,
        error: String,
        channel_id: Option<u64>,
        timestamp: i64,
    },
}

impl MappingEvent {
    pub fn replacements_synced(map: Value, channel_id: u64) -> Self {
        MappingEvent::ReplacementsSynced {
            map,
            channel_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn mapping_failed(item: Value, error: String, channel_id: Option<u64>) -> Self {
        MappingEvent::MappingFailed {
            item,
            error,
            channel_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            MappingEvent::ReplacementsSynced { .. } => "mapping.request.success",
            MappingEvent::MappingFailed { .. } => "mapping.failed",
        }
    }

    /// 若为同步成功事件，返回受影响的 channel
    pub fn synced_channel(&self) -> Option<u64> {
        match self {
            MappingEvent::ReplacementsSynced { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct NotifierStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
}

/// 同步通知器
#[derive(Clone)]
pub struct SyncNotifier {
    sender: broadcast::Sender<MappingEvent>,
    stats: Arc<parking_lot::RwLock<NotifierStats>>,
}

impl SyncNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(parking_lot::RwLock::new(NotifierStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: MappingEvent) {
        debug!("发布映射事件: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("映射事件无订阅者: {}", e);
        }
    }

    /// 通知渠道替换表已同步
    pub fn replacements_synced(&self, map: Value, channel_id: u64) {
        self.emit(MappingEvent::replacements_synced(map, channel_id));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MappingEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> NotifierStats {
        self.stats.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_notifier_broadcast_and_stats() {
        let notifier = SyncNotifier::new(16);
        let mut receiver = notifier.subscribe();

        notifier.replacements_synced(json!({"attribute": []}), 7);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.synced_channel(), Some(7));
        assert_eq!(event.event_type(), "mapping.request.success");

        let stats = notifier.stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("mapping.request.success"), Some(&1));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let notifier = SyncNotifier::default();
        notifier.emit(MappingEvent::mapping_failed(json!({}), "boom".to_string(), None));
        assert_eq!(notifier.stats().total_events, 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
