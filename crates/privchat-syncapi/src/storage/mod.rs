//! 存储层
//!
//! 回执走 SQLite 落盘，输入状态走内存缓存。两边都只暴露位置与
//! 增量查询，游标语义由 [`crate::sync`] 负责。

pub mod receipts;
pub mod typing_cache;

pub use receipts::{ReceiptRecord, ReceiptStore, SqliteReceiptStore};
pub use typing_cache::{TypingCache, TypingCacheConfig, TypingCacheStats};
