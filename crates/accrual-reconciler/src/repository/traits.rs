//! 存储 Trait 定义
//!
//! 管道只依赖这两个操作，便于 worker 与扫描任务用 mock 测试。

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ReconcileError;
use crate::models::{OrderId, OrderStatus};

/// 订单存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 所有未完成（NEW / PROCESSING）订单的订单号
    async fn get_unfinished_order_ids(&self) -> Result<Vec<OrderId>, ReconcileError>;

    /// 写入积分系统给出的状态与积分
    ///
    /// 只有当前仍处于未完成状态的订单会被修改，终态订单保持不变，
    /// 因此重复或迟到的结果不会让订单回退。返回是否有记录被修改。
    async fn update_order(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool, ReconcileError>;
}
