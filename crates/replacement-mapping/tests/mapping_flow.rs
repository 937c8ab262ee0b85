//! 端到端：共享后端 + 完整映射链

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use replacement_mapping::{
    CacheBackend, CatalogSource, Mapper, MapperChain, MappingContext, MappingEvent, MappingType,
    MemoryBackend, OrderExportMapper, OrderImportMapper, OriginalNameMapper, ProductExportMapper,
    ProductImportMapper, Record, RemoteReplacementSource, ReplacementEntry, Resolver, Result,
    StoreFactory, SyncNotifier,
};

/// 可替换内容的远端替换表
struct MutableSource {
    entries: Mutex<Vec<ReplacementEntry>>,
    fetches: AtomicUsize,
}

impl MutableSource {
    fn new(entries: Vec<ReplacementEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteReplacementSource for MutableSource {
    async fn fetch_replacement_map(&self, _channel_id: u64) -> Result<Vec<ReplacementEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().clone())
    }
}

struct Catalog;

#[async_trait]
impl CatalogSource for Catalog {
    async fn load_names(&self, mapping_type: MappingType) -> Result<HashMap<String, i64>> {
        let mut names = HashMap::new();
        if mapping_type == MappingType::Attribute {
            names.insert("Size".to_string(), 1);
        }
        Ok(names)
    }
}

struct Fixture {
    chain: MapperChain,
    factory: StoreFactory,
    source: Arc<MutableSource>,
    notifier: SyncNotifier,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryBackend::new());
    let source = Arc::new(MutableSource::new(vec![
        ReplacementEntry::new(vec!["7.attribute.1.e"], json!({"id": 100, "name": "size"})),
        ReplacementEntry::new(vec!["7.attribute.size.i"], json!({"id": 1, "name": "Size"})),
        ReplacementEntry::new(vec!["7.carrier.5.e"], json!({"id": "ups"})),
        ReplacementEntry::new(vec!["7.carrier.ups.i"], json!({"id": 5})),
    ]));
    let factory = StoreFactory::new(backend, source.clone());
    let notifier = SyncNotifier::new(16);

    let mut product_export = ProductExportMapper::new(Resolver::new(factory.clone()));
    product_export.base_mut().subscribe(notifier.subscribe());
    let mut product_import = ProductImportMapper::new(Resolver::new(factory.clone()));
    product_import.base_mut().subscribe(notifier.subscribe());

    let chain = MapperChain::new(vec![
        Box::new(product_export),
        Box::new(product_import),
        Box::new(OrderExportMapper::new(Resolver::new(factory.clone()))),
        Box::new(OrderImportMapper::new(Resolver::new(factory.clone()))),
        Box::new(OriginalNameMapper::new(Arc::new(Catalog))),
    ])
    .with_notifier(notifier.clone());

    Fixture {
        chain,
        factory,
        source,
        notifier,
    }
}

async fn run(chain: &mut MapperChain, value: Value, ctx: &MappingContext) -> Option<Value> {
    chain
        .run(Record::from_value(value).unwrap(), ctx)
        .await
        .unwrap()
        .map(|r| r.into_value().unwrap())
}

#[tokio::test]
async fn test_records_are_dispatched_to_matching_mapper() {
    let mut f = fixture();

    let product = run(
        &mut f.chain,
        json!({"sku": "A", "type": "configurable", "variations": [{"id": 1}]}),
        &MappingContext::export(7),
    )
    .await
    .unwrap();
    assert_eq!(product["variations"], json!([{"id": 100, "name": "size"}]));
    assert_eq!(f.chain.current_mapper(), Some("product_export"));

    let imported = run(
        &mut f.chain,
        json!({"sku": "A", "externalId": "x", "type": "configurable", "variations": ["SIZE"]}),
        &MappingContext::import(7),
    )
    .await
    .unwrap();
    assert_eq!(imported["variations"], json!([{"id": 1, "name": "Size"}]));
    assert_eq!(f.chain.current_mapper(), Some("product_import"));

    let order = run(
        &mut f.chain,
        json!({"id": 1, "number": "N", "items": [], "carrier": {"id": 5}}),
        &MappingContext::export(7),
    )
    .await
    .unwrap();
    assert_eq!(order["carrier"], json!({"id": "ups"}));
    assert_eq!(f.chain.current_mapper(), Some("order_export"));

    let order = run(
        &mut f.chain,
        json!({"number": "N", "items": [], "shipments": [{"carrier": "UPS"}]}),
        &MappingContext::import(7),
    )
    .await
    .unwrap();
    assert_eq!(order["shipments"], json!([{"carrier": {"id": 5}}]));
    assert_eq!(f.chain.current_mapper(), Some("order_import"));

    let original = run(
        &mut f.chain,
        json!({"sku": "A", "type": "configurable", "variations": ["size"]}),
        &MappingContext::export(0),
    )
    .await
    .unwrap();
    assert_eq!(original["variations"], json!([{"id": 1}]));
    assert_eq!(f.chain.current_mapper(), Some("original_name"));

    // 所有映射器共享同一张替换表，只拉取一次
    assert_eq!(f.source.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(f.factory.cached_store_count(), 1);
}

#[tokio::test]
async fn test_unsupported_record_passes_through() {
    let mut f = fixture();
    let value = json!({"foo": "bar"});
    let result = run(&mut f.chain, value.clone(), &MappingContext::export(7)).await;
    assert_eq!(result, Some(value));
    assert_eq!(f.chain.current_mapper(), None);
    assert_eq!(f.chain.error_message(), None);
}

#[tokio::test]
async fn test_rejection_is_reported_and_broadcast() {
    let mut f = fixture();
    let mut events = f.notifier.subscribe();

    let result = run(
        &mut f.chain,
        json!({"sku": "A", "type": "configurable", "variations": []}),
        &MappingContext::export(7),
    )
    .await;
    assert!(result.is_none());

    let expected = "Cannot export \"Configurable\" product without variation attributes.";
    assert_eq!(f.chain.error_message(), Some(expected));

    match events.recv().await.unwrap() {
        MappingEvent::MappingFailed { error, channel_id, .. } => {
            assert_eq!(error, expected);
            assert_eq!(channel_id, Some(7));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_unmapped_attribute_is_picked_up_after_write() {
    let mut f = fixture();
    let ctx = MappingContext::export(7);
    let record = json!({"sku": "A", "type": "configurable", "variations": [{"id": 2, "name": "Color"}]});

    assert!(run(&mut f.chain, record.clone(), &ctx).await.is_none());
    assert_eq!(
        f.chain.error_message(),
        Some("Cannot export product because variation attribute \"Color\" is not mapped.")
    );

    // 远端新增映射并写入替换表，未命中不缓存，无需同步事件
    let mut factory = f.factory.clone();
    factory.set_channel(7);
    factory
        .bulk_set(
            &[ReplacementEntry::new(vec!["7.attribute.2.e"], json!({"id": 200, "name": "color"}))],
            false,
        )
        .await
        .unwrap();

    let converted = run(&mut f.chain, record, &ctx).await.unwrap();
    assert_eq!(converted["variations"], json!([{"id": 200, "name": "color"}]));
}

#[tokio::test]
async fn test_sync_event_invalidates_memoized_entities() {
    let mut f = fixture();
    let ctx = MappingContext::export(7);
    let record = json!({"sku": "A", "type": "configurable", "variations": [{"id": 1}]});

    let converted = run(&mut f.chain, record.clone(), &ctx).await.unwrap();
    assert_eq!(converted["variations"], json!([{"id": 100, "name": "size"}]));

    let mut factory = f.factory.clone();
    factory.set_channel(7);
    factory
        .bulk_set(
            &[ReplacementEntry::new(vec!["7.attribute.1.e"], json!({"id": 101, "name": "size-l"}))],
            false,
        )
        .await
        .unwrap();

    // 未收到同步事件前仍使用缓存的结果
    let converted = run(&mut f.chain, record.clone(), &ctx).await.unwrap();
    assert_eq!(converted["variations"], json!([{"id": 100, "name": "size"}]));

    f.notifier.replacements_synced(json!([]), 7);
    let converted = run(&mut f.chain, record, &ctx).await.unwrap();
    assert_eq!(converted["variations"], json!([{"id": 101, "name": "size-l"}]));
}

#[tokio::test]
async fn test_missing_channel_is_a_config_error() {
    let mut f = fixture();
    let ctx = MappingContext {
        direction: Some(replacement_mapping::Direction::Export),
        ..Default::default()
    };
    let record = Record::from_value(json!({"sku": "A", "type": "simple"})).unwrap();
    let err = f.chain.run(record, &ctx).await.unwrap_err();
    assert!(err.is_config_error());
}
