//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//!
//! 未安装 recorder 时（如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
///
/// drop 时停止指标 HTTP 服务器。
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "accrual_lookups_total",
        "Total number of accrual oracle lookups by outcome"
    );
    metrics::describe_histogram!(
        "accrual_lookup_duration_seconds",
        "Accrual oracle lookup duration in seconds"
    );
    metrics::describe_gauge!(
        "accrual_inflight_lookups",
        "Accrual lookups currently holding a concurrency slot"
    );
    metrics::describe_counter!(
        "accrual_orders_requeued_total",
        "Orders put back on the queue after a rate-limit cool-down"
    );
    metrics::describe_counter!(
        "accrual_orders_updated_total",
        "Order status writes accepted by storage"
    );
    metrics::describe_counter!(
        "accrual_sweep_enqueued_total",
        "Unfinished orders re-enqueued by the periodic sweep"
    );
    metrics::describe_counter!(
        "accrual_pipeline_errors_total",
        "Pipeline errors by kind"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次积分查询及其结果（ok / rate_limited / failed）
#[inline]
pub fn record_accrual_lookup(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("accrual_lookups_total", "outcome" => outcome).increment(1);
    metrics::histogram!("accrual_lookup_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

/// 设置当前在途查询数
#[inline]
pub fn set_inflight_lookups(count: usize) {
    metrics::gauge!("accrual_inflight_lookups").set(count as f64);
}

/// 记录一次限流后的重新入队
#[inline]
pub fn record_requeue() {
    metrics::counter!("accrual_orders_requeued_total").increment(1);
}

/// 记录一次被存储接受的状态写入
#[inline]
pub fn record_order_updated(status: &'static str) {
    metrics::counter!("accrual_orders_updated_total", "status" => status).increment(1);
}

/// 记录扫描重新入队的订单数
#[inline]
pub fn record_sweep_enqueued(count: usize) {
    metrics::counter!("accrual_sweep_enqueued_total").increment(count as u64);
}

/// 记录管道错误
#[inline]
pub fn record_pipeline_error(kind: &'static str) {
    metrics::counter!("accrual_pipeline_errors_total", "kind" => kind).increment(1);
}
