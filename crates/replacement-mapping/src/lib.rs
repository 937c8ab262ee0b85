//! Replacement Mapping - 渠道替换表解析引擎
//!
//! 在源系统与各销售渠道之间转换商品、订单中的引用（属性、分类、库位、承运商等）：
//! - 替换表缓存：按渠道存放复合键 `{channel}.{type}.{discriminator}.{kind}` → 目标实体
//! - StoreFactory：冷启动时从映射服务拉取替换表，写入共享后端并设置 TTL
//! - Resolver：由查询主体推导复合键并查询替换表
//! - MapperChain：按注册顺序选择映射器，记住上一次命中的映射器
//! - 商品 / 订单的导入导出映射器，渠道 0 的原始名称映射器
//! - 自动映射与同步事件
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use replacement_mapping::{
//!     open_backend, Mapper, MapperChain, MappingConfig, MappingContext, MappingDataProvider,
//!     ProductExportMapper, Record, Resolver, StoreFactory, SyncNotifier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MappingConfig::builder()
//!         .remote_url("http://ms-mapping:8080")
//!         .data_dir("/var/lib/mapping")
//!         .build();
//!
//!     let notifier = SyncNotifier::new(config.event_buffer_size);
//!     let provider = Arc::new(MappingDataProvider::new(&config, notifier.clone())?);
//!     let backend = open_backend(&config).await?;
//!     let factory = StoreFactory::from_config(&config, backend, provider);
//!
//!     let mut export = ProductExportMapper::new(Resolver::new(factory));
//!     export.base_mut().subscribe(notifier.subscribe());
//!
//!     let mut chain = MapperChain::new(vec![Box::new(export)]).with_notifier(notifier);
//!
//!     let record = Record::from_value(serde_json::json!({"sku": "A-1", "type": "simple"}))?;
//!     match chain.run(record, &MappingContext::export(42)).await? {
//!         Some(converted) => println!("{}", converted.into_value()?),
//!         None => println!("rejected: {:?}", chain.error_message()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod mapper;
pub mod provider;
pub mod record;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod types;

pub use config::{MappingConfig, MappingConfigBuilder, RemoteConfig};
pub use error::{MappingError, Result};
pub use events::{MappingEvent, NotifierStats, SyncNotifier};
pub use factory::{AutomapItem, ReplacementEntry, StoreFactory};
pub use mapper::{
    Automapper, Mapper, MapperBase, MapperChain, OrderExportMapper, OrderImportMapper,
    OriginalNameMapper, ProductExportMapper, ProductImportMapper,
};
pub use provider::{
    AutomapCandidate, AutomapRequest, AutomapResponse, AutomappingBuilder, CatalogSource,
    MappingDataProvider, MessageQueue, RemoteError, RemoteReplacementSource,
    ReplacementPublisher,
};
pub use record::{Entity, Fulfillment, OrderRecord, ProductRecord, Record};
pub use resolver::{LookupSubject, Resolver, SubjectData};
pub use storage::{open_backend, CacheBackend, MemoryBackend, SledBackend};
pub use store::ReplacementStore;
pub use types::{Direction, MappingContext, MappingType};
