//! 并发查询限流器
//!
//! 用计数信号量限制同时在途的积分查询数量，与 worker 数量相互独立。
//! `acquire` 返回的许可在 drop 时归还名额，因此每次获取恰好对应一次释放，
//! 任何退出路径（成功、失败、重新入队）都不会泄漏名额。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use loyalty_shared::error::LoyaltyError;
use loyalty_shared::observability::metrics;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ReconcileError;

/// 并发查询限流器
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

/// 一个在途查询名额，drop 时释放
#[must_use = "名额在 drop 时立即释放"]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_inflight_lookups(remaining);
    }
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 等待一个空闲名额
    pub async fn acquire(&self) -> Result<LimiterPermit, ReconcileError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LoyaltyError::Internal("查询名额信号量已关闭".to_string()))?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_inflight_lookups(current);

        Ok(LimiterPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前持有名额的数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
