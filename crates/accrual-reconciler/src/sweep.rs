//! 未完成订单扫描
//!
//! 以固定间隔读取所有 NEW / PROCESSING 订单并重新放入队列，
//! 兜底进程重启、查询失败和重新入队失败等情况。
//! 已在途的订单可能被重复入队，终态写入是幂等的，所以不做去重。

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::observability::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::ReconcileError;
use crate::queue::OrderQueue;
use crate::repository::OrderStore;

/// 未完成订单扫描任务
pub struct UnfinishedOrderSweep {
    store: Arc<dyn OrderStore>,
    queue: OrderQueue,
    interval: Duration,
    /// 单次读取存储的超时
    timeout: Duration,
}

impl UnfinishedOrderSweep {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: OrderQueue,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            interval,
            timeout,
        }
    }

    /// 在后台运行，直到 shutdown 置为 true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown).instrument(info_span!("unfinished_order_sweep")))
    }

    /// 主循环
    ///
    /// 首轮扫描在启动时立即执行，用于恢复上次进程退出时未完成的订单。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "未完成订单扫描已启动"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut shutdown) => break,
            }

            tokio::select! {
                result = self.tick() => match result {
                    Ok(enqueued) => debug!(enqueued, "扫描完成"),
                    Err(ReconcileError::QueueClosed) => break,
                    Err(e) => {
                        metrics::record_pipeline_error(e.kind());
                        error!(error = %e, "扫描未完成订单失败");
                    }
                },
                _ = stopped(&mut shutdown) => break,
            }
        }

        info!("未完成订单扫描已停止");
    }

    /// 执行一轮扫描，返回入队的订单数
    ///
    /// 队列满时逐个等待空位。
    pub async fn tick(&self) -> Result<usize, ReconcileError> {
        let order_ids = tokio::time::timeout(self.timeout, self.store.get_unfinished_order_ids())
            .await
            .map_err(|_| {
                ReconcileError::Storage(format!(
                    "读取未完成订单超时（{}ms）",
                    self.timeout.as_millis()
                ))
            })??;

        let total = order_ids.len();
        let mut enqueued = 0;
        for order_id in order_ids {
            if let Err(e) = self.queue.enqueue(order_id).await {
                metrics::record_sweep_enqueued(enqueued);
                return Err(e);
            }
            enqueued += 1;
        }

        metrics::record_sweep_enqueued(enqueued);
        if total > 0 {
            info!(enqueued, "未完成订单已重新入队");
        }
        Ok(enqueued)
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
