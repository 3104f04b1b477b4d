//! 订单存储
//!
//! - `OrderStore`：管道依赖的存储抽象
//! - `PgOrderStore`：基于 PostgreSQL 的正式实现
//! - `InMemoryOrderStore`：本地运行与测试用实现

mod memory;
mod order_repo;
mod traits;

pub use memory::InMemoryOrderStore;
pub use order_repo::PgOrderStore;
pub use traits::OrderStore;

#[cfg(test)]
pub use traits::MockOrderStore;
