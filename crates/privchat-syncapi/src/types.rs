//! 同步游标与事件类型
//!
//! 多流长轮询的基础数据模型：
//! - `StreamPosition` / `StreamingToken`：跨房间的流位置与聚合令牌
//! - `TopologyToken`：单房间时间线内部的拓扑位置（与流令牌属不同坐标系）
//! - `StreamKind`：受控的事件类别枚举，每个类别独立推进位置
//! - `Membership` / `Device`：请求方的房间成员关系与设备身份
//! - 回执 / 输入状态事件的线上内容结构（字段形状与协议一致）

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 回执事件类型名
pub const M_RECEIPT: &str = "m.receipt";
/// 输入状态事件类型名
pub const M_TYPING: &str = "m.typing";

/// 流位置：单个事件类别内单调不减的进度计数器
///
/// 0 表示「尚未观察到任何数据」。推进顺序由落库方保证，
/// 位置本身不做去重或回退检查。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamPosition(pub u64);

impl StreamPosition {
    pub const ZERO: StreamPosition = StreamPosition(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for StreamPosition {
    fn from(value: u64) -> Self {
        StreamPosition(value)
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 事件类别（受控枚举，新增类别需同步扩展令牌分量）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Receipt,
    Typing,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Typing => "typing",
        }
    }
}

impl FromStr for StreamKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(Self::Receipt),
            "typing" => Ok(Self::Typing),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 令牌文本形式解析失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenParseError {
    #[error("unknown token prefix: {0}")]
    UnknownPrefix(String),
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// 同步令牌：每个事件类别一个流位置，整体即客户端的续传点
///
/// 客户端下次轮询时原样带回；分量逐项可比，
/// 文本形式为 `s<receipt>_<typing>`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamingToken {
    pub receipt_position: StreamPosition,
    pub typing_position: StreamPosition,
}

impl StreamingToken {
    pub fn new(receipt_position: StreamPosition, typing_position: StreamPosition) -> Self {
        Self {
            receipt_position,
            typing_position,
        }
    }

    /// 仅携带单个类别位置的令牌，其余分量为 0（合并时视为「无意见」）
    pub fn of(kind: StreamKind, position: StreamPosition) -> Self {
        let mut token = Self::default();
        token.set_position(kind, position);
        token
    }

    pub fn position_of(&self, kind: StreamKind) -> StreamPosition {
        match kind {
            StreamKind::Receipt => self.receipt_position,
            StreamKind::Typing => self.typing_position,
        }
    }

    pub fn set_position(&mut self, kind: StreamKind, position: StreamPosition) {
        match kind {
            StreamKind::Receipt => self.receipt_position = position,
            StreamKind::Typing => self.typing_position = position,
        }
    }

    /// 用 `other` 中的非零分量覆盖自身对应分量
    pub fn apply_updates(&mut self, other: StreamingToken) {
        if !other.receipt_position.is_zero() {
            self.receipt_position = other.receipt_position;
        }
        if !other.typing_position.is_zero() {
            self.typing_position = other.typing_position;
        }
    }

    /// 每个分量都 ≤ `other` 且至少一个严格 < 时，自身落后于 `other`
    pub fn is_behind(&self, other: &StreamingToken) -> bool {
        self.receipt_position <= other.receipt_position
            && self.typing_position <= other.typing_position
            && (self.receipt_position < other.receipt_position
                || self.typing_position < other.typing_position)
    }

    pub fn is_empty(&self) -> bool {
        self.receipt_position.is_zero() && self.typing_position.is_zero()
    }
}

impl fmt::Display for StreamingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}_{}", self.receipt_position, self.typing_position)
    }
}

/// 解析单个令牌分量
///
/// 分量在存储侧以带符号 64 位整数绑定，超出 `i64::MAX` 的文本
/// 按伪造令牌拒绝。
fn parse_component(token: &str, part: Option<&str>) -> Result<u64, TokenParseError> {
    part.and_then(|p| p.parse::<u64>().ok())
        .filter(|value| *value <= i64::MAX as u64)
        .ok_or_else(|| TokenParseError::Malformed(token.to_string()))
}

impl FromStr for StreamingToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('s')
            .ok_or_else(|| TokenParseError::UnknownPrefix(s.to_string()))?;
        let mut parts = body.split('_');
        let receipt = parse_component(s, parts.next())?;
        let typing = parse_component(s, parts.next())?;
        if parts.next().is_some() {
            return Err(TokenParseError::Malformed(s.to_string()));
        }
        Ok(StreamingToken::new(
            StreamPosition(receipt),
            StreamPosition(typing),
        ))
    }
}

/// 拓扑令牌：单房间时间线的排序位置（深度 + 流位置）
///
/// 文本形式为 `t<depth>_<position>`，仅用于房间内翻页，
/// 与跨房间聚合的 `StreamingToken` 不可互换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TopologyToken {
    pub depth: u64,
    pub stream_position: StreamPosition,
}

impl TopologyToken {
    pub fn new(depth: u64, stream_position: StreamPosition) -> Self {
        Self {
            depth,
            stream_position,
        }
    }
}

impl fmt::Display for TopologyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}_{}", self.depth, self.stream_position)
    }
}

impl FromStr for TopologyToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('t')
            .ok_or_else(|| TokenParseError::UnknownPrefix(s.to_string()))?;
        let mut parts = body.split('_');
        let depth = parse_component(s, parts.next())?;
        let position = parse_component(s, parts.next())?;
        if parts.next().is_some() {
            return Err(TokenParseError::Malformed(s.to_string()));
        }
        Ok(TopologyToken::new(depth, StreamPosition(position)))
    }
}

/// 房间成员关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
}

impl Membership {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Invite => "invite",
            Self::Leave => "leave",
            Self::Ban => "ban",
        }
    }
}

impl FromStr for Membership {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(Self::Join),
            "invite" => Ok(Self::Invite),
            "leave" => Ok(Self::Leave),
            "ban" => Ok(Self::Ban),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发起同步的设备身份（由上层鉴权后注入，这里不做校验）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub user_id: String,
    pub device_id: String,
}

impl Device {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// 回执事件内容：事件 ID -> 已读集合
pub type ReceiptEventContent = BTreeMap<String, ReceiptMRead>;

/// 一条消息的已读集合，外层键固定为 `m.read`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptMRead {
    #[serde(rename = "m.read")]
    pub read: BTreeMap<String, ReceiptTs>,
}

/// 单个用户的已读时间戳（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptTs {
    pub ts: i64,
}

/// 输入状态事件内容：当前正在输入的用户列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypingEventContent {
    pub user_ids: Vec<String>,
}
