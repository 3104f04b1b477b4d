//! 订单与积分查询结果模型

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 订单号
///
/// 格式（Luhn 校验）已在入队前由订单接入层校验，这里视为不透明字符串。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OrderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 订单内部状态
///
/// NEW / PROCESSING 为未完成状态，INVALID / PROCESSED 为终态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 新订单 - 已入库，尚未得到积分系统的任何结果
    #[default]
    New,
    /// 处理中 - 积分系统已登记或正在计算
    Processing,
    /// 无效 - 积分系统拒绝计算，终态
    Invalid,
    /// 已处理 - 积分计算完成，终态
    Processed,
}

impl OrderStatus {
    /// 未完成状态，与 SQL 中的 `IN ('NEW', 'PROCESSING')` 保持一致
    pub const UNFINISHED: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    /// 状态只能向前推进：终态不再变化，也不会回到 NEW
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        !self.is_terminal() && next != Self::New
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub order_id: OrderId,
    pub status: OrderStatus,
    /// 仅在 PROCESSED 时有意义
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
    pub user_id: Uuid,
}

impl Order {
    /// 订单接入层刚入库时的形态
    pub fn new(order_id: OrderId, user_id: Uuid) -> Self {
        Self {
            order_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
            user_id,
        }
    }
}

/// 积分系统返回的外部状态
///
/// 部分部署返回大写状态，反序列化时两种写法都接受。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccrualStatus {
    #[serde(alias = "REGISTERED")]
    Registered,
    #[serde(alias = "PROCESSING")]
    Processing,
    #[serde(alias = "INVALID")]
    Invalid,
    #[serde(alias = "PROCESSED")]
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// 积分系统 `GET /api/orders/{number}` 的响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResult {
    #[serde(rename = "order")]
    pub order_id: OrderId,
    pub status: AccrualStatus,
    /// 积分系统只在 processed 时返回该字段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl AccrualResult {
    pub fn order_status(&self) -> OrderStatus {
        self.status.into()
    }

    /// 需要写回存储的积分：只有产生 PROCESSED 的响应才携带积分
    pub fn reward(&self) -> Option<Decimal> {
        match self.order_status() {
            OrderStatus::Processed => Some(self.accrual.unwrap_or(Decimal::ZERO)),
            _ => None,
        }
    }
}
