//! 输入状态缓存
//!
//! typing provider 的内存协作方：按房间维护「正在输入」的用户集合，
//! 条目带过期时刻；一个跨房间共享的变更计数器充当 typing 类别的位置轴，
//! 每次集合变化都把所在房间标到新的计数值上。
//!
//! 缓存是被动的：查询只读；过期条目由 `sweep_expired` 批量回收，
//! 回收相当于外部定时器，落库侧把返回的计数值转成一次 advance，
//! 等待中的轮询才能看到「有人停止输入」。

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::types::StreamPosition;

/// 缓存配置
#[derive(Debug, Clone)]
pub struct TypingCacheConfig {
    /// 未显式给出过期时刻时输入状态的存活时长（毫秒）
    pub default_timeout_ms: i64,
}

impl Default for TypingCacheConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
        }
    }
}

impl TypingCacheConfig {
    pub fn with_default_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}

/// 缓存统计
#[derive(Debug, Clone, Default)]
pub struct TypingCacheStats {
    /// 出现过输入状态的房间数
    pub rooms: usize,
    /// 跟踪中的条目数（含尚未回收的过期条目）
    pub entries: usize,
    /// 变更计数器当前值
    pub latest_position: StreamPosition,
}

#[derive(Debug, Default)]
struct RoomTypingState {
    /// user_id -> 过期时刻（毫秒）
    users: HashMap<String, i64>,
    /// 集合最近一次变化时的计数值
    ///
    /// 房间清空后保留，这样「所有人都停下了」对增量查询仍然可见。
    last_changed: StreamPosition,
}

#[derive(Debug, Default)]
struct CacheInner {
    rooms: HashMap<String, RoomTypingState>,
    counter: u64,
}

/// 输入状态缓存
#[derive(Debug, Default)]
pub struct TypingCache {
    inner: Mutex<CacheInner>,
    config: TypingCacheConfig,
}

impl TypingCache {
    pub fn new(config: TypingCacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            config,
        }
    }

    /// 登记（或续期）一个正在输入的用户，返回新的计数值
    ///
    /// `expires_at_ms` 缺省时取当前时间加配置的存活时长。
    pub fn add_typing_user(
        &self,
        user_id: &str,
        room_id: &str,
        expires_at_ms: Option<i64>,
    ) -> StreamPosition {
        let expire = expires_at_ms.unwrap_or_else(|| now_ms() + self.config.default_timeout_ms);

        let mut inner = self.inner.lock();
        inner.counter += 1;
        let position = StreamPosition(inner.counter);
        let room = inner.rooms.entry(room_id.to_string()).or_default();
        room.users.insert(user_id.to_string(), expire);
        room.last_changed = position;

        debug!(
            "User {} typing in {} until {} (position {})",
            user_id, room_id, expire, position
        );
        position
    }

    /// 移除一个输入中的用户，真的移除了才推进计数
    pub fn remove_typing_user(&self, user_id: &str, room_id: &str) -> StreamPosition {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        if let Some(room) = inner.rooms.get_mut(room_id) {
            if room.users.remove(user_id).is_some() {
                inner.counter += 1;
                room.last_changed = StreamPosition(inner.counter);
                debug!(
                    "User {} stopped typing in {} (position {})",
                    user_id, room_id, inner.counter
                );
            }
        }
        StreamPosition(inner.counter)
    }

    /// 新鲜度检查：`since` 之后该房间的集合变过则返回当前未过期的集合
    ///
    /// 纯读路径，不触碰计数器。`None` 表示自 `since` 起无变化；
    /// `Some(空列表)` 表示变化的结果是没有人在输入了。
    pub fn typing_users_if_changed_since(
        &self,
        room_id: &str,
        since: StreamPosition,
    ) -> Option<Vec<String>> {
        let inner = self.inner.lock();
        let room = inner.rooms.get(room_id)?;
        if room.last_changed <= since {
            return None;
        }

        let now = now_ms();
        let mut users: Vec<String> = room
            .users
            .iter()
            .filter(|(_, expire)| **expire > now)
            .map(|(user, _)| user.clone())
            .collect();
        users.sort();
        Some(users)
    }

    /// 当前未过期的输入用户
    pub fn typing_users(&self, room_id: &str) -> Vec<String> {
        self.typing_users_if_changed_since(room_id, StreamPosition::ZERO)
            .unwrap_or_default()
    }

    /// 回收过期条目，有变化时返回新的计数值
    pub fn sweep_expired(&self) -> Option<StreamPosition> {
        let now = now_ms();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let mut changed = false;
        for room in inner.rooms.values_mut() {
            let before = room.users.len();
            room.users.retain(|_, expire| *expire > now);
            if room.users.len() != before {
                inner.counter += 1;
                room.last_changed = StreamPosition(inner.counter);
                changed = true;
            }
        }

        if changed {
            debug!("Swept expired typing entries, position now {}", inner.counter);
            Some(StreamPosition(inner.counter))
        } else {
            None
        }
    }

    /// 变更计数器的非阻塞快照
    pub fn latest_position(&self) -> StreamPosition {
        StreamPosition(self.inner.lock().counter)
    }

    /// 统计快照
    pub fn get_stats(&self) -> TypingCacheStats {
        let inner = self.inner.lock();
        TypingCacheStats {
            rooms: inner.rooms.len(),
            entries: inner.rooms.values().map(|room| room.users.len()).sum(),
            latest_position: StreamPosition(inner.counter),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
