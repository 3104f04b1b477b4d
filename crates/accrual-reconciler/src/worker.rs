//! 对账 worker 池
//!
//! N 个常驻 worker 共同消费订单队列，每个订单的处理流程：
//!
//! 1. 从队列取出订单号（队列关闭且排空后 worker 退出）
//! 2. 获取一个在途查询名额
//! 3. 查询积分系统
//!    - 限流：持有当前名额冷却，之后把订单重新放回队列，再释放名额
//!    - 查询失败：记录后丢弃，订单保持未完成，由下一轮扫描重新入队
//!    - 成功：写回状态与积分，写入失败同样交给扫描
//! 4. 名额在每条退出路径上恰好释放一次
//!
//! 关闭时先关闭队列让 worker 排空，超过宽限期仍未结束则中断在途查询与冷却。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use loyalty_shared::observability::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::client::AccrualOracle;
use crate::error::ReconcileError;
use crate::limiter::ConcurrencyLimiter;
use crate::models::OrderId;
use crate::queue::OrderQueue;
use crate::repository::OrderStore;

/// 单个订单的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 积分结果已交给存储
    Updated,
    /// 限流冷却后重新入队
    Requeued,
    /// 本次尝试放弃，等待下一轮扫描
    Dropped,
}

/// worker 共享的依赖
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: OrderQueue,
    pub limiter: ConcurrencyLimiter,
    pub oracle: Arc<dyn AccrualOracle>,
    pub store: Arc<dyn OrderStore>,
    /// 限流后的最短冷却时间
    pub cool_down: Duration,
    /// Retry-After 提示的上限
    pub max_cool_down: Duration,
}

/// worker 池句柄
///
/// `shutdown` 等待所有 worker 退出，超过宽限期后经 `abort_tx` 中断在途查询与冷却。
pub struct WorkerPool {
    abort_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 启动 `workers` 个 worker
    pub fn spawn(workers: usize, ctx: WorkerContext) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = ctx.clone();
            let abort = abort_rx.clone();
            let span = info_span!("accrual_worker", worker_id);
            joins.push(tokio::spawn(
                async move { run_worker(worker_id, ctx, abort).await }.instrument(span),
            ));
        }

        info!(
            workers,
            max_in_flight = ctx.limiter.capacity(),
            cool_down_secs = ctx.cool_down.as_secs(),
            "对账 worker 池已启动"
        );

        Self { abort_tx, joins }
    }

    /// 等待 worker 排空队列后退出
    ///
    /// 调用方需先关闭队列。超过 `grace` 仍有 worker 未结束时中断在途查询，
    /// 再等待它们退出。
    pub async fn shutdown(self, grace: Duration) {
        let Self { abort_tx, joins } = self;
        let all = join_all(joins);
        tokio::pin!(all);

        let results = match tokio::time::timeout(grace, &mut all).await {
            Ok(results) => results,
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "worker 未在宽限期内排空，中断在途查询");
                abort_tx.send_replace(true);
                all.await
            }
        };

        for result in results {
            if let Err(e) = result {
                error!(error = %e, "worker 异常退出");
            }
        }
        info!("所有 worker 已退出");
    }
}

async fn run_worker(worker_id: usize, ctx: WorkerContext, mut abort: watch::Receiver<bool>) {
    debug!(worker_id, "worker 已启动");

    while let Some(order_id) = ctx.queue.dequeue().await {
        if *abort.borrow() {
            warn!(order_id = %order_id, "管道已中断，放弃剩余订单");
            continue;
        }
        let outcome = process_order(&ctx, order_id.clone(), &mut abort).await;
        debug!(order_id = %order_id, outcome = ?outcome, "订单处理结束");
    }

    debug!(worker_id, "队列已关闭并排空，worker 退出");
}

/// 处理一个订单
///
/// 名额由 `_permit` 持有，函数返回时释放。
pub async fn process_order(
    ctx: &WorkerContext,
    order_id: OrderId,
    abort: &mut watch::Receiver<bool>,
) -> Outcome {
    let _permit = match ctx.limiter.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            error!(order_id = %order_id, error = %e, "获取查询名额失败");
            return Outcome::Dropped;
        }
    };

    let lookup = tokio::select! {
        result = ctx.oracle.lookup(&order_id) => result,
        _ = aborted(abort) => {
            warn!(order_id = %order_id, "积分查询被中断");
            return Outcome::Dropped;
        }
    };

    match lookup {
        Ok(result) => {
            let status = result.order_status();
            let reward = result.reward();
            match ctx.store.update_order(&order_id, status, reward).await {
                Ok(changed) => {
                    if changed {
                        metrics::record_order_updated(status.as_str());
                    }
                    info!(
                        order_id = %order_id,
                        status = %status,
                        accrual = ?reward,
                        changed,
                        "订单状态已写回"
                    );
                    Outcome::Updated
                }
                Err(e) => {
                    metrics::record_pipeline_error(e.kind());
                    error!(order_id = %order_id, error = %e, "订单状态写回失败，等待下一轮扫描");
                    Outcome::Dropped
                }
            }
        }
        Err(ReconcileError::RateLimited { retry_after, .. }) => {
            let pause = cool_down_for(retry_after, ctx.cool_down, ctx.max_cool_down);
            info!(order_id = %order_id, pause_secs = pause.as_secs(), "积分系统限流，冷却后重新入队");

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = aborted(abort) => {
                    warn!(order_id = %order_id, "冷却被中断");
                    return Outcome::Dropped;
                }
            }

            requeue(ctx, order_id)
        }
        Err(e) => {
            metrics::record_pipeline_error(e.kind());
            warn!(order_id = %order_id, error = %e, "积分查询失败，等待下一轮扫描");
            Outcome::Dropped
        }
    }
}

/// 重新入队不等待空位：worker 自己就是唯一的消费方，
/// 在满队列上等待会让所有 worker 互相阻塞
fn requeue(ctx: &WorkerContext, order_id: OrderId) -> Outcome {
    match ctx.queue.try_enqueue(order_id.clone()) {
        Ok(()) => {
            metrics::record_requeue();
            info!(order_id = %order_id, "订单已重新入队");
            Outcome::Requeued
        }
        Err(e) => {
            metrics::record_pipeline_error(e.kind());
            warn!(order_id = %order_id, error = %e, "重新入队失败，等待下一轮扫描");
            Outcome::Dropped
        }
    }
}

/// 冷却时间取配置值与 Retry-After 提示中较长的一个，且不超过 `max_cool_down`
pub fn cool_down_for(
    retry_after: Option<Duration>,
    cool_down: Duration,
    max_cool_down: Duration,
) -> Duration {
    let cap = max_cool_down.max(cool_down);
    retry_after.map_or(cool_down, |hint| hint.clamp(cool_down, cap))
}

/// abort 置为 true 时完成；发送端已释放则永远等待
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
