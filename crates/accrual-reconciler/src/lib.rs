//! 订单积分对账服务
//!
//! 从订单队列中取出订单号，向外部积分计算系统查询处理结果，
//! 并把最终状态与积分写回存储。限流时冷却后重新入队，
//! 其余失败交给周期性的未完成订单扫描兜底。

pub mod client;
pub mod error;
pub mod limiter;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod sweep;
pub mod worker;
