//! 同步请求上下文与响应累加器
//!
//! 一次长轮询的瞬态对象：请求方身份、房间成员关系、since 令牌、
//! 超时预算、取消句柄，以及各 provider 依次写入的响应累加器。
//! 单写者结构，引擎按注册顺序串行调用 provider，以 `&mut` 独占传入，
//! 不做任何内部加锁；并行的只是不同请求，彼此状态完全独立。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::{Device, Membership, StreamingToken};

/// 一次长轮询请求
#[derive(Debug)]
pub struct SyncRequest {
    /// 请求 ID，仅用于日志关联
    pub id: Uuid,
    /// 请求方设备身份
    pub device: Device,
    /// 客户端上次拿到的续传令牌
    pub since: StreamingToken,
    /// 长轮询预算，0 表示立即返回当前可得的数据
    pub timeout: Duration,
    /// 请求方参与的房间及成员关系，由上层会话层填充
    pub rooms: HashMap<String, Membership>,
    /// 取消句柄，连接断开时由传输层触发
    pub cancel: CancellationToken,
    /// 响应累加器
    pub response: SyncResponse,
}

impl SyncRequest {
    pub fn new(device: Device, since: StreamingToken, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            since,
            timeout,
            rooms: HashMap::new(),
            cancel: CancellationToken::new(),
            response: SyncResponse::default(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>, membership: Membership) -> Self {
        self.rooms.insert(room_id.into(), membership);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 当前持有 join 成员关系的房间，即 provider 的查询范围
    ///
    /// 排序后返回，保证同一请求内的查询与追加顺序稳定。
    pub fn joined_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, membership)| **membership == Membership::Join)
            .map(|(room_id, _)| room_id.clone())
            .collect();
        rooms.sort();
        rooms
    }
}

/// 响应累加器：按房间分节，provider 依次就地追加
///
/// 一次请求独占一份，请求之间互不共享。
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResponse {
    /// 下次轮询应携带的令牌文本形式，轮询结束时由引擎填充
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_batch: Option<String>,
    /// join 房间分节
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub join: BTreeMap<String, JoinedRoomSection>,
}

impl SyncResponse {
    /// 取（或建）某个 join 房间的分节
    pub fn joined_room_mut(&mut self, room_id: &str) -> &mut JoinedRoomSection {
        self.join.entry(room_id.to_string()).or_default()
    }

    /// 已累加的临时事件总数
    pub fn ephemeral_event_count(&self) -> usize {
        self.join
            .values()
            .map(|section| section.ephemeral.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ephemeral_event_count() == 0
    }
}

/// 单个 join 房间的分节
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinedRoomSection {
    /// 临时事件列表；同一房间内不同类别事件的相对顺序不作保证
    pub ephemeral: Vec<EphemeralEvent>,
}

/// 临时事件条目
#[derive(Debug, Clone, Serialize)]
pub struct EphemeralEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// 回执事件携带房间 ID，输入状态事件由所在分节隐含
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub content: serde_json::Value,
}

impl EphemeralEvent {
    pub fn new(event_type: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            room_id: None,
            content,
        }
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StreamPosition, M_TYPING};

    #[test]
    fn joined_rooms_filters_non_join_memberships() {
        let request = SyncRequest::new(
            Device::new("@u1:example.org", "DEV1"),
            StreamingToken::default(),
            Duration::from_secs(30),
        )
        .with_room("!c:example.org", Membership::Join)
        .with_room("!a:example.org", Membership::Join)
        .with_room("!b:example.org", Membership::Leave)
        .with_room("!d:example.org", Membership::Invite);

        // 只剩 join 房间，且稳定有序
        assert_eq!(
            request.joined_rooms(),
            vec!["!a:example.org".to_string(), "!c:example.org".to_string()]
        );
    }

    #[test]
    fn response_counts_events_across_sections() {
        let mut response = SyncResponse::default();
        assert!(response.is_empty());

        response
            .joined_room_mut("!a:example.org")
            .ephemeral
            .push(EphemeralEvent::new(M_TYPING, serde_json::json!({"user_ids": []})));
        response
            .joined_room_mut("!b:example.org")
            .ephemeral
            .push(EphemeralEvent::new(M_TYPING, serde_json::json!({"user_ids": []})));

        assert!(!response.is_empty());
        assert_eq!(response.ephemeral_event_count(), 2);
        // 同一房间重复取分节不会清空已有内容
        assert_eq!(
            response.joined_room_mut("!a:example.org").ephemeral.len(),
            1
        );
    }

    #[test]
    fn ephemeral_event_serializes_with_type_tag() {
        let event = EphemeralEvent::new(M_TYPING, serde_json::json!({"user_ids": ["@a:x"]}))
            .in_room("!a:example.org");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"m.typing","room_id":"!a:example.org","content":{"user_ids":["@a:x"]}}"#
        );

        let bare = EphemeralEvent::new(M_TYPING, serde_json::json!({"user_ids": []}));
        assert_eq!(
            serde_json::to_string(&bare).unwrap(),
            r#"{"type":"m.typing","content":{"user_ids":[]}}"#
        );
    }

    #[test]
    fn request_tokens_default_to_start_of_streams() {
        let request = SyncRequest::new(
            Device::new("@u1:example.org", "DEV1"),
            StreamingToken::default(),
            Duration::ZERO,
        );
        assert_eq!(request.since.receipt_position, StreamPosition::ZERO);
        assert!(request.response.is_empty());
        assert!(!request.cancel.is_cancelled());
    }
}
