//! 内存订单存储
//!
//! 与 PostgreSQL 实现保持相同的单调更新语义，用于本地运行与测试。
//! DashMap 的分片锁保证同一订单的读改写是原子的。

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::traits::OrderStore;
use crate::error::ReconcileError;
use crate::models::{Order, OrderId, OrderStatus};

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<OrderId, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 NEW 状态写入订单，已存在则保持原样
    pub fn insert_new(&self, order_id: impl Into<OrderId>, user_id: Uuid) {
        let order_id = order_id.into();
        self.orders
            .entry(order_id.clone())
            .or_insert_with(|| Order::new(order_id, user_id));
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_unfinished_order_ids(&self) -> Result<Vec<OrderId>, ReconcileError> {
        let mut unfinished: Vec<(chrono::DateTime<chrono::Utc>, OrderId)> = self
            .orders
            .iter()
            .filter(|entry| OrderStatus::UNFINISHED.contains(&entry.status))
            .map(|entry| (entry.uploaded_at, entry.order_id.clone()))
            .collect();
        unfinished.sort();
        Ok(unfinished.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_order(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool, ReconcileError> {
        let Some(mut order) = self.orders.get_mut(order_id) else {
            return Ok(false);
        };

        if !order.status.can_transition_to(status) {
            return Ok(false);
        }

        order.status = status;
        order.accrual = accrual;
        Ok(true)
    }
}
