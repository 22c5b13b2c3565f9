//! 回执存储
//!
//! 回执 provider 的持久化协作方。一张 receipts 表，每个（房间, 用户）
//! 一行已读标记，行上带提交位置与毫秒时间戳：
//! - 读路径：启动时的最大已提交位置、按房间集的增量查询
//! - 写路径：落库时在连接锁内分配下一个提交位置并 upsert，
//!   写入方拿返回的位置去推进 provider

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::StreamPosition;

/// 一条已读标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub room_id: String,
    pub event_id: String,
    pub user_id: String,
    pub position: StreamPosition,
    pub ts: i64,
}

/// 回执 provider 消费的存储接口
///
/// 抽成接口便于测试时替换成返回失败或定制数据的实现。
#[async_trait::async_trait]
pub trait ReceiptStore: std::fmt::Debug + Send + Sync {
    /// 历史上提交过的最大位置，空表为 0
    async fn max_committed_position(&self) -> Result<StreamPosition>;

    /// 给定房间集内位置 > `since` 的全部记录（按位置升序）及其中的最大位置
    ///
    /// 房间集为空时直接返回 `(0, [])`，不触碰存储。
    async fn receipts_in_rooms_after(
        &self,
        room_ids: &[String],
        since: StreamPosition,
    ) -> Result<(StreamPosition, Vec<ReceiptRecord>)>;
}

/// SQLite 实现
#[derive(Debug)]
pub struct SqliteReceiptStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReceiptStore {
    /// 在已有连接上初始化，建表幂等
    pub fn new(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// 打开（或创建）指定路径的库
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    fn initialize_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipts (
                position INTEGER NOT NULL,
                room_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                UNIQUE(room_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_receipts_room_position
             ON receipts (room_id, position)",
            [],
        )?;

        info!("Receipt store initialized");
        Ok(())
    }

    /// 落库一条已读标记并返回分配的提交位置
    ///
    /// 同一（房间, 用户）的新标记覆盖旧标记，位置一并前移，旧位置不会
    /// 复活。返回值由写入方转交 provider 的 advance。
    pub fn store_receipt(
        &self,
        room_id: &str,
        event_id: &str,
        user_id: &str,
        ts: i64,
    ) -> Result<StreamPosition> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM receipts",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO receipts (position, room_id, event_id, user_id, ts)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(room_id, user_id) DO UPDATE SET
                position = excluded.position,
                event_id = excluded.event_id,
                ts = excluded.ts
            "#,
            params![next, room_id, event_id, user_id, ts],
        )?;

        tx.commit()?;

        debug!(
            "Stored receipt for {} in {} at position {}",
            user_id, room_id, next
        );
        Ok(StreamPosition(next as u64))
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ReceiptRecord> {
        Ok(ReceiptRecord {
            room_id: row.get(0)?,
            event_id: row.get(1)?,
            user_id: row.get(2)?,
            position: StreamPosition(row.get::<_, i64>(3)? as u64),
            ts: row.get(4)?,
        })
    }
}

#[async_trait::async_trait]
impl ReceiptStore for SqliteReceiptStore {
    async fn max_committed_position(&self) -> Result<StreamPosition> {
        let conn = self.conn.lock().unwrap();
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), 0) FROM receipts",
            [],
            |row| row.get(0),
        )?;
        Ok(StreamPosition(max as u64))
    }

    async fn receipts_in_rooms_after(
        &self,
        room_ids: &[String],
        since: StreamPosition,
    ) -> Result<(StreamPosition, Vec<ReceiptRecord>)> {
        if room_ids.is_empty() {
            return Ok((StreamPosition::ZERO, Vec::new()));
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; room_ids.len()].join(", ");
        let sql = format!(
            "SELECT room_id, event_id, user_id, position, ts FROM receipts
             WHERE room_id IN ({}) AND position > ?
             ORDER BY position ASC",
            placeholders
        );

        let since_param = since.0 as i64;
        let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(room_ids.len() + 1);
        for room_id in room_ids {
            bind.push(room_id);
        }
        bind.push(&since_param);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(&bind[..], |row| Self::row_to_record(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut max_matched = StreamPosition::ZERO;
        for record in &rows {
            if record.position > max_matched {
                max_matched = record.position;
            }
        }

        debug!(
            "Receipt range query over {} rooms since {} matched {} rows",
            room_ids.len(),
            since,
            rows.len()
        );
        Ok((max_matched, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteReceiptStore {
        SqliteReceiptStore::open(dir.path().join("receipts.db")).unwrap()
    }

    #[tokio::test]
    async fn empty_store_reports_zero_position() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(
            store.max_committed_position().await.unwrap(),
            StreamPosition::ZERO
        );
    }

    #[tokio::test]
    async fn store_receipt_assigns_increasing_positions() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let p1 = store
            .store_receipt("!a:example.org", "$e1", "@u1:example.org", 1000)
            .unwrap();
        let p2 = store
            .store_receipt("!a:example.org", "$e2", "@u2:example.org", 2000)
            .unwrap();

        assert_eq!(p1, StreamPosition(1));
        assert_eq!(p2, StreamPosition(2));
        assert_eq!(
            store.max_committed_position().await.unwrap(),
            StreamPosition(2)
        );
    }

    #[tokio::test]
    async fn newer_marker_replaces_older_for_same_user() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .store_receipt("!a:example.org", "$e1", "@u1:example.org", 1000)
            .unwrap();
        let p2 = store
            .store_receipt("!a:example.org", "$e5", "@u1:example.org", 2000)
            .unwrap();

        let (max, records) = store
            .receipts_in_rooms_after(&["!a:example.org".to_string()], StreamPosition::ZERO)
            .await
            .unwrap();

        // 旧标记整行被覆盖，只剩前移后的一条
        assert_eq!(max, p2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, "$e5");
        assert_eq!(records[0].position, StreamPosition(2));
        assert_eq!(records[0].ts, 2000);
    }

    #[tokio::test]
    async fn range_query_scopes_rooms_and_positions() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .store_receipt("!a:example.org", "$e1", "@u1:example.org", 1000)
            .unwrap();
        store
            .store_receipt("!b:example.org", "$e2", "@u2:example.org", 2000)
            .unwrap();
        store
            .store_receipt("!c:example.org", "$e3", "@u3:example.org", 3000)
            .unwrap();

        let rooms = vec!["!a:example.org".to_string(), "!b:example.org".to_string()];
        let (max, records) = store
            .receipts_in_rooms_after(&rooms, StreamPosition(1))
            .await
            .unwrap();

        // !c 不在查询范围，位置 1 的 !a 行被 since 过滤掉
        assert_eq!(max, StreamPosition(2));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].room_id, "!b:example.org");
    }

    #[tokio::test]
    async fn empty_room_list_short_circuits() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .store_receipt("!a:example.org", "$e1", "@u1:example.org", 1000)
            .unwrap();

        let (max, records) = store
            .receipts_in_rooms_after(&[], StreamPosition::ZERO)
            .await
            .unwrap();
        assert_eq!(max, StreamPosition::ZERO);
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn reopened_store_keeps_positions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("receipts.db");

        {
            let store = SqliteReceiptStore::open(&path).unwrap();
            store
                .store_receipt("!a:example.org", "$e1", "@u1:example.org", 1000)
                .unwrap();
            store
                .store_receipt("!a:example.org", "$e2", "@u2:example.org", 2000)
                .unwrap();
        }

        let store = SqliteReceiptStore::open(&path).unwrap();
        assert_eq!(
            store.max_committed_position().await.unwrap(),
            StreamPosition(2)
        );
        // 重开后位置继续从历史最大值递增
        let p3 = store
            .store_receipt("!a:example.org", "$e3", "@u3:example.org", 3000)
            .unwrap();
        assert_eq!(p3, StreamPosition(3));
    }
}
