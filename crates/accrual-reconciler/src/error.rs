//! 对账管道专用错误类型
//!
//! 在共享库 LoyaltyError 基础上定义本服务特有的错误变体，
//! 使 worker 可以按"限流 / 查询失败 / 存储失败 / 队列关闭"分别处理。
//! 这些错误都不会终止进程，最坏情况是订单保持未完成状态等待下一轮扫描。

use std::time::Duration;

use loyalty_shared::error::LoyaltyError;

/// 对账管道错误
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// 积分系统返回 429，冷却后重新入队
    #[error("积分系统限流: order={order_id}, retry_after={retry_after:?}")]
    RateLimited {
        order_id: String,
        retry_after: Option<Duration>,
    },

    /// 非 200 响应、响应体解析失败或网络错误，交给下一轮扫描
    #[error("积分查询失败: order={order_id}, status={status:?}, 原因={reason}")]
    LookupFailed {
        order_id: String,
        status: Option<u16>,
        reason: String,
    },

    /// 写回订单状态失败，交给下一轮扫描
    #[error("订单存储失败: {0}")]
    Storage(String),

    /// 队列已关闭，仅在有序停机时出现
    #[error("订单队列已关闭")]
    QueueClosed,

    /// 非阻塞入队时队列已满
    #[error("订单队列已满: order={order_id}")]
    QueueFull { order_id: String },

    #[error(transparent)]
    Shared(#[from] LoyaltyError),
}

impl ReconcileError {
    /// 指标与日志使用的错误分类
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::LookupFailed { .. } => "lookup_failed",
            Self::Storage(_) => "storage",
            Self::QueueClosed => "queue_closed",
            Self::QueueFull { .. } => "queue_full",
            Self::Shared(e) => e.code(),
        }
    }
}

impl From<sqlx::Error> for ReconcileError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
