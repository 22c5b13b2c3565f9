//! 位置通知原语
//!
//! 把「某个类别的流位置推进了」变成「阻塞中的轮询被唤醒」：
//! - 一把读写锁守护的 latest 高水位
//! - 一个广播式唤醒信号，推进时唤醒全部等待者（不是单播）
//! - 等待者被唤醒后自行复查谓词，一次推进未必满足每个等待者的 from
//!
//! 等待路径同时监听取消信号；取消后立即落定，不依赖之后的任何推进。

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::select;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::types::StreamPosition;

/// 单个事件类别的位置通知器
///
/// clone 共享同一份内部状态，可以安全地交给落库线程与轮询任务两侧。
#[derive(Debug, Clone, Default)]
pub struct PositionNotifier {
    latest: Arc<RwLock<StreamPosition>>,
    wake: Arc<Notify>,
}

impl PositionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前已观察到的最新位置（非阻塞快照）
    pub fn latest(&self) -> StreamPosition {
        *self.latest.read()
    }

    /// 记录新的高水位，返回是否真的推进了
    ///
    /// 不高于当前值时为空操作。推进后广播唤醒所有等待者；
    /// 普通同步调用，落库线程不需要运行在异步运行时上。
    pub fn advance(&self, latest: StreamPosition) -> bool {
        {
            let mut current = self.latest.write();
            if latest <= *current {
                return false;
            }
            *current = latest;
        }
        self.wake.notify_waiters();
        true
    }

    /// 挂起直到 latest 首次超过 `from`
    ///
    /// 先注册唤醒、再检查谓词：推进恰好落在检查与挂起之间也不会丢。
    pub async fn wait_until_after(&self, from: StreamPosition) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if self.latest() > from {
                return;
            }
            notified.as_mut().await;
            notified.set(self.wake.notified());
        }
    }

    /// 返回一条在 latest 首次超过 `from` 时落定的通道
    ///
    /// 调用时已满足则直接返回已落定的通道，全程不挂起。
    /// `cancel` 触发时同样落定（以关闭而非发送的方式），接收端只凭通道
    /// 无法区分两种原因，需要自行复查 `latest`。调用方负责最终触发
    /// `cancel`，否则等待任务会一直挂到下一次满足条件的推进。
    pub fn notify_after(
        &self,
        cancel: &CancellationToken,
        from: StreamPosition,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.latest() > from {
            let _ = tx.send(());
            return rx;
        }

        let notifier = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            select! {
                _ = cancel.cancelled() => {
                    // 丢弃发送端即关闭通道
                }
                _ = notifier.wait_until_after(from) => {
                    let _ = tx.send(());
                }
            }
        });
        rx
    }
}
