//! 流 provider 契约
//!
//! 每个事件类别实现同一组能力：{setup, advance, range, notify_after,
//! latest_position}。其中 advance / notify / latest 的位置簿记对所有类别
//! 完全一致，由内嵌的 `PositionNotifier` 提供默认实现；各类别只需给出
//! 类别名、簿记句柄和自己的数据抓取步骤（`range`，以及存在持久位置时的
//! `setup`）。持久游标类与纯新鲜度检查类共用同一契约。

use std::fmt::Debug;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::sync::notify::PositionNotifier;
use crate::sync::request::{SyncRequest, SyncResponse};
use crate::types::{StreamKind, StreamPosition, StreamingToken, TopologyToken};

/// 单个事件类别的流 provider
///
/// 进程启动时构造一次，此后被任意多的轮询任务（`range` / `notify_after` /
/// `latest_position`）与落库线程（`advance`）并发调用。
#[async_trait::async_trait]
pub trait StreamProvider: Debug + Send + Sync {
    /// 本 provider 负责的事件类别
    fn kind(&self) -> StreamKind;

    /// 位置簿记句柄
    fn notifier(&self) -> &PositionNotifier;

    /// 启动时加载持久化的起始位置
    ///
    /// 在任何并发流量之前调用一次；读取失败时保持位置为 0，
    /// 不阻断进程启动。没有持久位置的类别沿用默认空实现。
    async fn setup(&self) {}

    /// 记录新的高水位并唤醒等待者，不高于当前值时为空操作
    ///
    /// 调用方（落库管线）保证按提交顺序传入非递减的值，
    /// provider 不做排序或去重。
    fn advance(&self, latest: StreamPosition) {
        self.notifier().advance(latest);
    }

    /// 把 `request` 目标房间内位置落在 `(from, to]` 的更新追加进累加器
    ///
    /// 返回调用方可以视为「已完整送达」的位置，引擎据此拼出交还给
    /// 客户端的令牌。只受查询开销约束，绝不等待新数据出现。
    async fn range(
        &self,
        request: &mut SyncRequest,
        from: StreamingToken,
        to: StreamingToken,
    ) -> StreamingToken;

    /// 返回在本类别位置首次超过 `from` 对应分量时落定的通道
    ///
    /// 调用时已超过则返回已落定的通道；`cancel` 触发时同样落定，
    /// 不依赖之后的任何推进。
    fn notify_after(
        &self,
        cancel: &CancellationToken,
        from: StreamingToken,
    ) -> oneshot::Receiver<()> {
        self.notifier()
            .notify_after(cancel, from.position_of(self.kind()))
    }

    /// 当前位置的非阻塞快照，包成仅含本类别分量的令牌
    fn latest_position(&self) -> StreamingToken {
        StreamingToken::of(self.kind(), self.notifier().latest())
    }
}

/// 房间内时间线的拓扑 provider
///
/// 与跨房间聚合的流 provider 属不同坐标系：以（深度, 流位置）令牌在单个
/// 房间的时间线里定位。时间线类 provider 在流契约之外额外实现本契约。
#[async_trait::async_trait]
pub trait TopologyProvider: Debug + Send + Sync {
    /// 把 `room_id` 时间线上 `(from, to]` 之间的事件写入响应
    ///
    /// 与 `StreamProvider::range` 同样立即返回，区间内没有更新时不做改动。
    async fn topology_range(
        &self,
        response: &mut SyncResponse,
        room_id: &str,
        from: TopologyToken,
        to: TopologyToken,
    );

    /// 该房间时间线末端的拓扑令牌
    async fn topology_latest_position(&self, room_id: &str) -> TopologyToken;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Device;
    use std::time::Duration;
    use tokio::time::timeout;

    /// 契约的最小实现：只补数据抓取步骤，簿记全部走默认实现
    #[derive(Debug, Default)]
    struct CannedProvider {
        notifier: PositionNotifier,
    }

    #[async_trait::async_trait]
    impl StreamProvider for CannedProvider {
        fn kind(&self) -> StreamKind {
            StreamKind::Receipt
        }

        fn notifier(&self) -> &PositionNotifier {
            &self.notifier
        }

        async fn range(
            &self,
            _request: &mut SyncRequest,
            _from: StreamingToken,
            to: StreamingToken,
        ) -> StreamingToken {
            StreamingToken::of(StreamKind::Receipt, to.receipt_position)
        }
    }

    #[tokio::test]
    async fn default_bookkeeping_covers_advance_notify_latest() {
        let provider = CannedProvider::default();
        provider.setup().await;
        assert!(provider.latest_position().is_empty());

        provider.advance(StreamPosition(4));
        assert_eq!(
            provider.latest_position(),
            StreamingToken::of(StreamKind::Receipt, StreamPosition(4))
        );

        // notify_after 只看令牌里本类别的分量，无关分量再大也不影响
        let cancel = CancellationToken::new();
        let mut rx = provider.notify_after(
            &cancel,
            StreamingToken::new(StreamPosition(2), StreamPosition(99)),
        );
        let mut task = tokio_test::task::spawn(&mut rx);
        tokio_test::assert_ready!(task.poll()).unwrap();

        let mut rx = provider.notify_after(
            &cancel,
            StreamingToken::new(StreamPosition(9), StreamPosition(0)),
        );
        assert!(timeout(Duration::from_millis(50), &mut rx).await.is_err());
        provider.advance(StreamPosition(10));
        timeout(Duration::from_millis(500), &mut rx)
            .await
            .expect("advance past from must settle the channel")
            .unwrap();
    }

    #[tokio::test]
    async fn range_leaves_untouched_request_intact() {
        let provider = CannedProvider::default();
        let mut request = SyncRequest::new(
            Device::new("@u1:example.org", "DEV1"),
            StreamingToken::default(),
            Duration::ZERO,
        );
        let to = StreamingToken::of(StreamKind::Receipt, StreamPosition(7));
        let token = provider.range(&mut request, StreamingToken::default(), to).await;
        assert_eq!(token, to);
        assert!(request.response.is_empty());
    }

    /// 拓扑契约可由时间线类 provider 实现（这里仅验证契约形状）
    #[derive(Debug)]
    struct FixedTimeline {
        end: TopologyToken,
    }

    #[async_trait::async_trait]
    impl TopologyProvider for FixedTimeline {
        async fn topology_range(
            &self,
            _response: &mut SyncResponse,
            _room_id: &str,
            _from: TopologyToken,
            _to: TopologyToken,
        ) {
        }

        async fn topology_latest_position(&self, _room_id: &str) -> TopologyToken {
            self.end
        }
    }

    #[tokio::test]
    async fn topology_positions_are_room_scoped_tokens() {
        let timeline = FixedTimeline {
            end: TopologyToken::new(3, StreamPosition(17)),
        };
        let token = timeline.topology_latest_position("!a:example.org").await;
        assert_eq!(token, TopologyToken::new(3, StreamPosition(17)));
    }
}
