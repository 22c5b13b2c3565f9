//! Privchat SyncAPI - 增量同步核心
//!
//! 为联邦聊天服务端提供多流长轮询能力，包括：
//! - 🔖 流位置与同步令牌：每类事件一个单调游标，组合成 next-batch 令牌
//! - 📡 流 provider 契约：setup / advance / range / notify_after / latest_position
//! - ⏰ 广播唤醒原语：位置推进时一次唤醒所有挂起的长轮询
//! - 🧾 已读回执流：SQLite 持久化，按房间聚合成单条回执事件下发
//! - ⌨️ 输入状态流：内存缓存加变更计数，过期条目自动剔除
//! - 🚦 同步引擎：range、挂起、唤醒、超时与取消的完整编排
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use privchat_syncapi::storage::{SqliteReceiptStore, TypingCache};
//! use privchat_syncapi::sync::{
//!     ReceiptStreamProvider, SyncEngine, SyncEngineConfig, TypingStreamProvider,
//! };
//! use privchat_syncapi::types::{Device, Membership, StreamingToken};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteReceiptStore::open("/path/to/receipts.db")?);
//!     let cache = Arc::new(TypingCache::default());
//!
//!     let mut engine = SyncEngine::new(SyncEngineConfig::default());
//!     engine.register(Arc::new(ReceiptStreamProvider::new(store)));
//!     engine.register(Arc::new(TypingStreamProvider::new(cache)));
//!     engine.setup().await;
//!
//!     // 一次长轮询：从 since 追到现在，没有增量就等
//!     let mut request = engine
//!         .new_request(
//!             Device::new("@alice:example.org", "PHONE"),
//!             StreamingToken::default(),
//!             None,
//!         )
//!         .with_room("!room:example.org", Membership::Join);
//!     let next = engine.poll(&mut request).await?;
//!     println!("next_batch: {}", next);
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod storage;
pub mod sync;
pub mod types;

// 重新导出核心类型，方便使用
pub use error::{PrivchatSyncError, Result};
pub use storage::{
    ReceiptRecord, ReceiptStore, SqliteReceiptStore, TypingCache, TypingCacheConfig,
    TypingCacheStats,
};
pub use sync::{
    EphemeralEvent, JoinedRoomSection, PositionNotifier, ReceiptStreamProvider, StreamProvider,
    SyncEngine, SyncEngineConfig, SyncEngineStats, SyncRequest, SyncResponse, TopologyProvider,
    TypingStreamProvider,
};
pub use types::{Device, Membership, StreamKind, StreamPosition, StreamingToken, TopologyToken};
