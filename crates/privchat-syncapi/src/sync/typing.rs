//! 输入状态流 provider
//!
//! 没有独立的持久游标：位置就是缓存的变更计数。range 只做每房间的
//! 新鲜度检查，集合变过才给这个房间发一条输入事件，令牌恒等于 `to`，
//! 错过轮次也没有回放，下一轮看到的是当前集合。

use std::sync::Arc;

use tracing::warn;

use crate::storage::typing_cache::TypingCache;
use crate::sync::notify::PositionNotifier;
use crate::sync::provider::StreamProvider;
use crate::sync::request::{EphemeralEvent, SyncRequest};
use crate::types::{StreamKind, StreamingToken, TypingEventContent, M_TYPING};

/// 输入状态事件类别的 provider
#[derive(Debug)]
pub struct TypingStreamProvider {
    cache: Arc<TypingCache>,
    notifier: PositionNotifier,
}

impl TypingStreamProvider {
    pub fn new(cache: Arc<TypingCache>) -> Self {
        Self {
            cache,
            notifier: PositionNotifier::new(),
        }
    }
}

#[async_trait::async_trait]
impl StreamProvider for TypingStreamProvider {
    fn kind(&self) -> StreamKind {
        StreamKind::Typing
    }

    fn notifier(&self) -> &PositionNotifier {
        &self.notifier
    }

    async fn setup(&self) {
        // 缓存可能先于 provider 热起来，起始位置向缓存看齐
        self.notifier.advance(self.cache.latest_position());
    }

    async fn range(
        &self,
        request: &mut SyncRequest,
        from: StreamingToken,
        to: StreamingToken,
    ) -> StreamingToken {
        for room_id in request.joined_rooms() {
            let Some(user_ids) = self
                .cache
                .typing_users_if_changed_since(&room_id, from.typing_position)
            else {
                continue;
            };

            // 空集合也要下发，客户端靠它清掉「正在输入」提示
            let content = TypingEventContent { user_ids };
            match serde_json::to_value(&content) {
                Ok(value) => {
                    request
                        .response
                        .joined_room_mut(&room_id)
                        .ephemeral
                        .push(EphemeralEvent::new(M_TYPING, value));
                }
                Err(e) => {
                    warn!("Failed to encode typing content for {}: {}", room_id, e);
                }
            }
        }

        StreamingToken::of(StreamKind::Typing, to.typing_position)
    }
}
