//! 积分计算系统 HTTP 客户端
//!
//! 每个订单一次 `GET {base}/api/orders/{number}`，并把响应归类为
//! 成功 / 限流 / 查询失败三种结果。通过 `AccrualOracle` trait 抽象，
//! worker 测试时可以注入 mock 实现。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use loyalty_shared::config::AccrualConfig;
use loyalty_shared::error::LoyaltyError;
use loyalty_shared::observability::metrics;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::models::{AccrualResult, OrderId};

/// 积分计算系统的抽象接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    /// 查询单个订单的积分处理结果
    async fn lookup(&self, order_id: &OrderId) -> Result<AccrualResult, ReconcileError>;
}

/// 基于 reqwest 的积分系统客户端
///
/// reqwest::Client 内部带连接池，clone 是廉价操作。
#[derive(Clone)]
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(config: &AccrualConfig) -> Result<Self, ReconcileError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LoyaltyError::ExternalService {
                service: "accrual".to_string(),
                message: format!("创建 HTTP 客户端失败: {e}"),
            })?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!(
            base_url = %base_url,
            timeout_secs = config.request_timeout_secs,
            "积分系统客户端已初始化"
        );

        Ok(Self { http, base_url })
    }

    fn order_url(&self, order_id: &OrderId) -> String {
        format!("{}/api/orders/{}", self.base_url, order_id)
    }

    async fn classify(
        order_id: &OrderId,
        response: reqwest::Response,
    ) -> Result<AccrualResult, ReconcileError> {
        let status = response.status();
        match status {
            StatusCode::OK => {
                let result = response.json::<AccrualResult>().await.map_err(|e| {
                    ReconcileError::LookupFailed {
                        order_id: order_id.to_string(),
                        status: Some(status.as_u16()),
                        reason: format!("响应体解析失败: {e}"),
                    }
                })?;

                if &result.order_id != order_id {
                    return Err(ReconcileError::LookupFailed {
                        order_id: order_id.to_string(),
                        status: Some(status.as_u16()),
                        reason: format!("响应中的订单号不匹配: {}", result.order_id),
                    });
                }
                Ok(result)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ReconcileError::RateLimited {
                order_id: order_id.to_string(),
                retry_after: parse_retry_after(response.headers()),
            }),
            StatusCode::NO_CONTENT => Err(ReconcileError::LookupFailed {
                order_id: order_id.to_string(),
                status: Some(status.as_u16()),
                reason: "订单未在积分系统登记".to_string(),
            }),
            other => Err(ReconcileError::LookupFailed {
                order_id: order_id.to_string(),
                status: Some(other.as_u16()),
                reason: other
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            }),
        }
    }
}

#[async_trait]
impl AccrualOracle for AccrualClient {
    async fn lookup(&self, order_id: &OrderId) -> Result<AccrualResult, ReconcileError> {
        let url = self.order_url(order_id);
        let start = Instant::now();

        debug!(order_id = %order_id, url = %url, "查询积分系统");

        let result = match self.http.get(&url).send().await {
            Ok(response) => Self::classify(order_id, response).await,
            Err(e) => Err(ReconcileError::LookupFailed {
                order_id: order_id.to_string(),
                status: e.status().map(|s| s.as_u16()),
                reason: if e.is_timeout() {
                    format!("请求超时: {e}")
                } else {
                    format!("请求失败: {e}")
                },
            }),
        };

        let elapsed = start.elapsed().as_secs_f64();
        match &result {
            Ok(accrual) => {
                metrics::record_accrual_lookup("ok", elapsed);
                debug!(
                    order_id = %order_id,
                    status = ?accrual.status,
                    accrual = ?accrual.accrual,
                    "积分查询完成"
                );
            }
            Err(ReconcileError::RateLimited { retry_after, .. }) => {
                metrics::record_accrual_lookup("rate_limited", elapsed);
                warn!(order_id = %order_id, retry_after = ?retry_after, "积分系统限流");
            }
            Err(e) => {
                metrics::record_accrual_lookup("failed", elapsed);
                warn!(order_id = %order_id, error = %e, "积分查询失败");
            }
        }

        result
    }
}

/// 解析 `Retry-After` 秒数，HTTP-date 形式不支持时返回 None
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
