//! 对账管道装配
//!
//! 把订单队列、查询名额、worker 池与未完成订单扫描组合成一个可启动、
//! 可关闭的整体。订单接入层只拿到 [`OrderSubmitter`]。

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::config::PipelineConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::client::AccrualOracle;
use crate::limiter::ConcurrencyLimiter;
use crate::queue::{OrderQueue, OrderSubmitter};
use crate::repository::OrderStore;
use crate::sweep::UnfinishedOrderSweep;
use crate::worker::{WorkerContext, WorkerPool};

/// 运行中的对账管道
pub struct AccrualPipeline {
    queue: OrderQueue,
    limiter: ConcurrencyLimiter,
    pool: WorkerPool,
    sweep_shutdown: watch::Sender<bool>,
    sweep: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl AccrualPipeline {
    /// 启动 worker 池与扫描任务，需在 tokio 运行时内调用
    pub fn start(
        config: &PipelineConfig,
        store: Arc<dyn OrderStore>,
        oracle: Arc<dyn AccrualOracle>,
    ) -> Self {
        let queue = OrderQueue::new(config.queue_capacity);
        let limiter = ConcurrencyLimiter::new(config.max_in_flight);

        let pool = WorkerPool::spawn(
            config.workers,
            WorkerContext {
                queue: queue.clone(),
                limiter: limiter.clone(),
                oracle,
                store: store.clone(),
                cool_down: config.cool_down(),
                max_cool_down: config.max_cool_down(),
            },
        );

        let (sweep_shutdown, sweep_rx) = watch::channel(false);
        let sweep = UnfinishedOrderSweep::new(
            store,
            queue.clone(),
            config.sweep_interval(),
            config.sweep_timeout(),
        )
        .spawn(sweep_rx);

        info!(
            workers = config.workers,
            max_in_flight = config.max_in_flight,
            queue_capacity = config.queue_capacity,
            "对账管道已启动"
        );

        Self {
            queue,
            limiter,
            pool,
            sweep_shutdown,
            sweep,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    pub fn submitter(&self) -> OrderSubmitter {
        self.queue.submitter()
    }

    /// 队列中等待处理的订单数
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// 当前在途查询数
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// 优雅关闭
    ///
    /// 停止扫描并关闭队列，worker 处理完已缓冲的订单后退出；
    /// 超过宽限期则中断剩余查询。
    pub async fn shutdown(self) {
        info!(
            pending = self.queue.len(),
            in_flight = self.limiter.in_flight(),
            "对账管道开始关闭"
        );

        self.sweep_shutdown.send_replace(true);
        self.queue.close();

        if let Err(e) = self.sweep.await {
            error!(error = %e, "扫描任务异常退出");
        }

        self.pool.shutdown(self.shutdown_grace).await;
        info!("对账管道已关闭");
    }
}
