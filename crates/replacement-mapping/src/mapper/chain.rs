//! 映射器责任链
//!
//! 按注册顺序选择第一个支持该记录的映射器，并记住它；下一条记录若仍被
//! 该映射器支持则直接分发，跳过扫描。

use async_trait::async_trait;
use tracing::debug;

use super::Mapper;
use crate::error::{MappingError, Result};
use crate::events::{MappingEvent, SyncNotifier};
use crate::record::Record;
use crate::types::MappingContext;

pub struct MapperChain {
    mappers: Vec<Box<dyn Mapper>>,
    /// 本次 run 使用的映射器
    current: Option<usize>,
    /// 上一次扫描命中的映射器
    last_supported: Option<usize>,
    notifier: Option<SyncNotifier>,
}

impl MapperChain {
    pub fn new(mappers: Vec<Box<dyn Mapper>>) -> Self {
        Self {
            mappers,
            current: None,
            last_supported: None,
            notifier: None,
        }
    }

    /// 拒绝记录时发布 MappingFailed 事件
    pub fn with_notifier(mut self, notifier: SyncNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register(&mut self, mapper: Box<dyn Mapper>) {
        self.mappers.push(mapper);
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// 本次 run 使用的映射器名称
    pub fn current_mapper(&self) -> Option<&'static str> {
        self.current.map(|i| self.mappers[i].name())
    }

    fn remembered(&self, record: &Record, ctx: &MappingContext) -> Option<usize> {
        self.last_supported
            .filter(|&i| self.mappers[i].supports(record, ctx))
    }

    fn scan(&self, record: &Record, ctx: &MappingContext) -> Option<usize> {
        self.mappers.iter().position(|m| m.supports(record, ctx))
    }
}

#[async_trait]
impl Mapper for MapperChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn supports(&self, record: &Record, ctx: &MappingContext) -> bool {
        self.remembered(record, ctx).is_some() || self.scan(record, ctx).is_some()
    }

    async fn run(&mut self, record: Record, ctx: &MappingContext) -> Result<Option<Record>> {
        if self.mappers.is_empty() {
            return Err(MappingError::NoMappers);
        }

        let selected = match self.remembered(&record, ctx) {
            Some(index) => Some(index),
            None => {
                self.current = None;
                let found = self.scan(&record, ctx);
                if found.is_some() {
                    self.last_supported = found;
                }
                found
            }
        };

        let Some(index) = selected else {
            debug!("没有映射器支持该记录，原样返回");
            return Ok(Some(record));
        };
        self.current = Some(index);

        let original = self.notifier.as_ref().map(|_| record.clone());
        let mapper = &mut self.mappers[index];
        debug!("分发记录到映射器: {}", mapper.name());
        let result = mapper.run(record, ctx).await?;

        if result.is_none() {
            if let (Some(notifier), Some(original)) = (&self.notifier, original) {
                let error = mapper.error_message().unwrap_or_default().to_string();
                let item = original.into_value()?;
                notifier.emit(MappingEvent::mapping_failed(item, error, ctx.channel_id));
            }
        }

        Ok(result)
    }

    fn error_message(&self) -> Option<&str> {
        self.current.and_then(|i| self.mappers[i].error_message())
    }

    fn on_replacements_synced(&mut self, channel_id: u64) {
        for mapper in &mut self.mappers {
            mapper.on_replacements_synced(channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubMapper {
        name: &'static str,
        supported: bool,
        reject: bool,
        error: Option<String>,
        runs: Arc<AtomicUsize>,
        synced: Arc<AtomicUsize>,
    }

    impl StubMapper {
        fn new(name: &'static str, supported: bool) -> Self {
            Self {
                name,
                supported,
                reject: false,
                error: None,
                runs: Arc::new(AtomicUsize::new(0)),
                synced: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn rejecting(mut self) -> Self {
            self.reject = true;
            self
        }
    }

    #[async_trait]
    impl Mapper for StubMapper {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, _record: &Record, _ctx: &MappingContext) -> bool {
            self.supported
        }

        async fn run(&mut self, record: Record, _ctx: &MappingContext) -> Result<Option<Record>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.error = Some(format!("{} error", self.name));
            if self.reject {
                Ok(None)
            } else {
                Ok(Some(record))
            }
        }

        fn error_message(&self) -> Option<&str> {
            self.error.as_deref()
        }

        fn on_replacements_synced(&mut self, _channel_id: u64) {
            self.synced.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record() -> Record {
        Record::from_value(json!({"sku": "A-1", "type": "simple"})).unwrap()
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let mut chain = MapperChain::new(vec![]);
        let err = chain.run(record(), &MappingContext::export(1)).await.unwrap_err();
        assert!(matches!(err, MappingError::NoMappers));
        assert_eq!(err.to_string(), "No registered mappers found");
    }

    #[tokio::test]
    async fn test_first_supporting_mapper_wins() {
        let second = StubMapper::new("two", true);
        let second_runs = second.runs.clone();
        let third = StubMapper::new("three", true);
        let third_runs = third.runs.clone();

        let mut chain = MapperChain::new(vec![
            Box::new(StubMapper::new("one", false)),
            Box::new(second),
            Box::new(third),
        ]);

        let ctx = MappingContext::export(1);
        assert!(chain.supports(&record(), &ctx));
        chain.run(record(), &ctx).await.unwrap();

        assert_eq!(chain.error_message(), Some("two error"));
        assert_eq!(chain.current_mapper(), Some("two"));
        assert_eq!(second_runs.load(Ordering::SeqCst), 1);
        assert_eq!(third_runs.load(Ordering::SeqCst), 0);

        // 第二次走快速路径
        chain.run(record(), &ctx).await.unwrap();
        assert_eq!(second_runs.load(Ordering::SeqCst), 2);
        assert_eq!(chain.current_mapper(), Some("two"));
    }

    #[tokio::test]
    async fn test_unsupported_record_is_returned_unchanged() {
        let mut chain = MapperChain::new(vec![Box::new(StubMapper::new("one", false))]);
        let ctx = MappingContext::import(1);

        assert!(!chain.supports(&record(), &ctx));
        let result = chain.run(record(), &ctx).await.unwrap();
        assert_eq!(result, Some(record()));
        assert_eq!(chain.error_message(), None);
        assert_eq!(chain.current_mapper(), None);
    }

    #[tokio::test]
    async fn test_rejection_emits_mapping_failed() {
        let notifier = SyncNotifier::new(8);
        let mut receiver = notifier.subscribe();
        let mut chain = MapperChain::new(vec![Box::new(StubMapper::new("one", true).rejecting())])
            .with_notifier(notifier);

        let result = chain.run(record(), &MappingContext::export(3)).await.unwrap();
        assert!(result.is_none());

        match receiver.recv().await.unwrap() {
            MappingEvent::MappingFailed { item, error, channel_id, .. } => {
                assert_eq!(item["sku"], json!("A-1"));
                assert_eq!(error, "one error");
                assert_eq!(channel_id, Some(3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sync_notification_reaches_every_mapper() {
        let one = StubMapper::new("one", false);
        let two = StubMapper::new("two", true);
        let (one_synced, two_synced) = (one.synced.clone(), two.synced.clone());

        let mut chain = MapperChain::new(vec![Box::new(one)]);
        chain.register(Box::new(two));
        chain.on_replacements_synced(4);

        assert_eq!(chain.len(), 2);
        assert_eq!(one_synced.load(Ordering::SeqCst), 1);
        assert_eq!(two_synced.load(Ordering::SeqCst), 1);
    }
}
