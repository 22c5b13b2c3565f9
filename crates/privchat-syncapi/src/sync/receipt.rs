//! 回执流 provider
//!
//! 契约的持久游标端：位置以存储里的提交位置为准，setup 读回历史最大值，
//! range 按请求方的 join 房间做增量查询，并把结果聚合成每房间一条
//! 回执事件。存储与编码失败都按「本轮本类别无更新」降级，不波及请求。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::receipts::ReceiptStore;
use crate::sync::notify::PositionNotifier;
use crate::sync::provider::StreamProvider;
use crate::sync::request::{EphemeralEvent, SyncRequest};
use crate::types::{ReceiptEventContent, ReceiptTs, StreamKind, StreamingToken, M_RECEIPT};

/// 回执事件类别的 provider
#[derive(Debug)]
pub struct ReceiptStreamProvider {
    store: Arc<dyn ReceiptStore>,
    notifier: PositionNotifier,
}

impl ReceiptStreamProvider {
    pub fn new(store: Arc<dyn ReceiptStore>) -> Self {
        Self {
            store,
            notifier: PositionNotifier::new(),
        }
    }
}

#[async_trait::async_trait]
impl StreamProvider for ReceiptStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Receipt
    }

    fn notifier(&self) -> &PositionNotifier {
        &self.notifier
    }

    async fn setup(&self) {
        match self.store.max_committed_position().await {
            Ok(position) => {
                self.notifier.advance(position);
                debug!("Receipt provider starting from position {}", position);
            }
            Err(e) => {
                // 读不到历史位置就从 0 起步，不阻断启动
                warn!(
                    "Failed to load receipt start position, starting from zero: {}",
                    e
                );
            }
        }
    }

    async fn range(
        &self,
        request: &mut SyncRequest,
        from: StreamingToken,
        to: StreamingToken,
    ) -> StreamingToken {
        let joined_rooms = request.joined_rooms();

        let (last_position, receipts) = match self
            .store
            .receipts_in_rooms_after(&joined_rooms, from.receipt_position)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Receipt range query failed for request {}, skipping category this round: {}",
                    request.id, e
                );
                return StreamingToken::default();
            }
        };

        // 按房间聚合：每个有匹配的房间恰好一条回执事件
        let mut content_by_room: BTreeMap<String, ReceiptEventContent> = BTreeMap::new();
        for receipt in receipts {
            let content = content_by_room.entry(receipt.room_id.clone()).or_default();
            let read = content.entry(receipt.event_id).or_default();
            read.read
                .insert(receipt.user_id, ReceiptTs { ts: receipt.ts });
        }

        // 先整体编码、再一次性追加，出错时累加器上不留半截内容
        let mut prepared = Vec::with_capacity(content_by_room.len());
        for (room_id, content) in content_by_room {
            match serde_json::to_value(&content) {
                Ok(value) => {
                    let event = EphemeralEvent::new(M_RECEIPT, value).in_room(room_id.clone());
                    prepared.push((room_id, event));
                }
                Err(e) => {
                    warn!("Failed to encode receipt content for {}: {}", room_id, e);
                    return StreamingToken::default();
                }
            }
        }
        for (room_id, event) in prepared {
            request
                .response
                .joined_room_mut(&room_id)
                .ephemeral
                .push(event);
        }

        // 有匹配时推进到匹配中的最大位置；没有则视为已追平 to
        if !last_position.is_zero() {
            StreamingToken::of(StreamKind::Receipt, last_position)
        } else {
            StreamingToken::of(StreamKind::Receipt, to.receipt_position)
        }
    }
}
