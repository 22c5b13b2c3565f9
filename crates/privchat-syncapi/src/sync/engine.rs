//! 同步引擎
//!
//! 长轮询的编排层。按注册顺序驱动各个流 provider，把一次 poll 变成
//! 「range 到当前位置，没增量就挂起等推进，醒来重跑」的循环，
//! 收尾条件是产出了增量、等到了截止时间或请求被取消。

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{PrivchatSyncError, Result};
use crate::sync::provider::StreamProvider;
use crate::sync::request::SyncRequest;
use crate::types::{Device, StreamingToken};

/// 引擎配置
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// 请求未携带超时时使用的等待时长
    pub default_timeout: Duration,
    /// 单次长轮询允许的最大等待时长，更大的请求值会被压到这里
    pub max_timeout: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
        }
    }
}

impl SyncEngineConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }
}

/// 引擎运行统计
#[derive(Debug, Clone, Default)]
pub struct SyncEngineStats {
    /// 完成的 poll 总数
    pub polls_served: u64,
    /// 等待中被流推进唤醒的次数
    pub wake_ups: u64,
    /// 跑完 range 却没有产出增量的轮数
    pub empty_rounds: u64,
    /// 空手等到截止时间的 poll 数
    pub timeouts: u64,
}

#[derive(Debug)]
enum PollOutcome {
    Data,
    Deadline,
    Cancelled,
}

/// 多流长轮询引擎
#[derive(Debug)]
pub struct SyncEngine {
    providers: Vec<Arc<dyn StreamProvider>>,
    config: SyncEngineConfig,
    stats: RwLock<SyncEngineStats>,
}

impl SyncEngine {
    pub fn new(config: SyncEngineConfig) -> Self {
        Self {
            providers: Vec::new(),
            config,
            stats: RwLock::new(SyncEngineStats::default()),
        }
    }

    /// 注册一个流 provider，range 按注册顺序执行
    pub fn register(&mut self, provider: Arc<dyn StreamProvider>) {
        if self.providers.iter().any(|p| p.kind() == provider.kind()) {
            warn!(
                "Provider for {} stream registered more than once",
                provider.kind()
            );
        }
        self.providers.push(provider);
    }

    /// 跑一遍所有 provider 的启动恢复
    pub async fn setup(&self) {
        for provider in &self.providers {
            provider.setup().await;
        }
        info!(
            "Sync engine ready with {} stream providers",
            self.providers.len()
        );
    }

    /// 聚合所有 provider 的最新位置，得到「现在」对应的令牌
    pub fn current_token(&self) -> StreamingToken {
        let mut token = StreamingToken::default();
        for provider in &self.providers {
            token.apply_updates(provider.latest_position());
        }
        token
    }

    /// 按配置补全一个请求，未携带超时的请求用默认值
    pub fn new_request(
        &self,
        device: Device,
        since: StreamingToken,
        timeout: Option<Duration>,
    ) -> SyncRequest {
        SyncRequest::new(
            device,
            since,
            timeout.unwrap_or(self.config.default_timeout),
        )
    }

    /// 当前统计快照
    pub fn get_stats(&self) -> SyncEngineStats {
        self.stats.read().clone()
    }

    /// 驱动一次长轮询
    ///
    /// 从 `request.since` 出发把每个类别追到当前位置。没有增量时在
    /// 本轮已检视过的位置上挂等待者，任一类别推进后重跑整轮。收尾时把
    /// next-batch 令牌写回响应并返回它。
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    pub async fn poll(&self, request: &mut SyncRequest) -> Result<StreamingToken> {
        if self.providers.is_empty() {
            return Err(PrivchatSyncError::InvalidArgument(
                "no stream providers registered".to_string(),
            ));
        }

        let timeout = self.effective_timeout(request.timeout);
        let deadline = Instant::now() + timeout;
        let mut next = request.since;

        let outcome = loop {
            let now_token = self.current_token();
            if self.any_stream_ahead(&next, &now_token) {
                for provider in &self.providers {
                    let returned = provider.range(request, next, now_token).await;
                    next.apply_updates(returned);
                }
                if !request.response.is_empty() {
                    break PollOutcome::Data;
                }
                self.stats.write().empty_rounds += 1;
            }

            if request.cancel.is_cancelled() {
                break PollOutcome::Cancelled;
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                break PollOutcome::Deadline;
            }

            // 挂在本轮已检视过的上界上。挂回 since 会被已消化的推进反复
            // 惊醒，受损类别的零令牌不推进 next，挂在 next 上同样立即落定
            let floor = StreamingToken::new(
                next.receipt_position.max(now_token.receipt_position),
                next.typing_position.max(now_token.typing_position),
            );
            let arm = request.cancel.child_token();
            let _revoke = arm.clone().drop_guard();
            let waiters: Vec<_> = self
                .providers
                .iter()
                .map(|provider| provider.notify_after(&arm, floor))
                .collect();

            tokio::select! {
                _ = request.cancel.cancelled() => break PollOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break PollOutcome::Deadline,
                (woken, index, _) = select_all(waiters) => {
                    self.stats.write().wake_ups += 1;
                    if woken.is_ok() {
                        debug!(
                            "{} stream advanced, rerunning range round",
                            self.providers[index].kind()
                        );
                    }
                }
            }
        };

        match outcome {
            PollOutcome::Data => debug!(
                "Poll finished with {} ephemeral events",
                request.response.ephemeral_event_count()
            ),
            PollOutcome::Deadline => {
                self.stats.write().timeouts += 1;
                debug!("Poll reached its deadline without new data");
            }
            PollOutcome::Cancelled => debug!("Poll cancelled by caller"),
        }
        self.stats.write().polls_served += 1;

        request.response.next_batch = Some(next.to_string());
        Ok(next)
    }

    fn effective_timeout(&self, requested: Duration) -> Duration {
        requested.min(self.config.max_timeout)
    }

    /// 有没有任何类别的最新位置越过了已送达位置
    fn any_stream_ahead(&self, next: &StreamingToken, now: &StreamingToken) -> bool {
        self.providers.iter().any(|provider| {
            let kind = provider.kind();
            now.position_of(kind) > next.position_of(kind)
        })
    }
}
