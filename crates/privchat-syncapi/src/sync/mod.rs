//! 增量同步核心
//!
//! 流 provider 契约、唤醒原语、请求载体和长轮询引擎都在这一层。
//! 存储细节放在 [`crate::storage`]，这里只关心位置与增量的编排。

pub mod engine;
pub mod notify;
pub mod provider;
pub mod receipt;
pub mod request;
pub mod typing;

pub use engine::{SyncEngine, SyncEngineConfig, SyncEngineStats};
pub use notify::PositionNotifier;
pub use provider::{StreamProvider, TopologyProvider};
pub use receipt::ReceiptStreamProvider;
pub use request::{EphemeralEvent, JoinedRoomSection, SyncRequest, SyncResponse};
pub use typing::TypingStreamProvider;
