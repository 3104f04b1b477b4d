//! 集成测试公共工具
//!
//! 在本进程内启动一个 axum 实现的模拟积分系统，按订单号脚本化返回结果。

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accrual_reconciler::client::AccrualClient;
use accrual_reconciler::models::{OrderId, OrderStatus};
use accrual_reconciler::repository::InMemoryOrderStore;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    routing::get,
};
use loyalty_shared::config::AccrualConfig;
use serde_json::json;
use tokio::task::JoinHandle;

/// 模拟积分系统的一次应答
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 + JSON 响应体
    Accrual {
        status: &'static str,
        accrual: Option<f64>,
    },
    /// 200，但响应体里是另一个订单号
    WrongOrder(&'static str),
    /// 200，响应体不是合法 JSON
    Garbage,
    /// 429，可选 Retry-After 秒数
    TooManyRequests(Option<u64>),
    /// 204，订单未登记
    NotRegistered,
    /// 500
    ServerError,
}

impl Reply {
    pub fn processed(accrual: f64) -> Self {
        Self::Accrual {
            status: "PROCESSED",
            accrual: Some(accrual),
        }
    }

    pub fn status(status: &'static str) -> Self {
        Self::Accrual {
            status,
            accrual: None,
        }
    }
}

#[derive(Default)]
struct OracleState {
    /// 每个订单的应答脚本，最后一条会一直重复
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl OracleState {
    fn next_reply(&self, number: &str) -> Reply {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(number.to_string())
            .or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(number) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Reply::NotRegistered),
            None => Reply::NotRegistered,
        }
    }
}

/// 运行中的模拟积分系统
pub struct MockOracle {
    state: Arc<OracleState>,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl MockOracle {
    pub async fn start() -> Self {
        let state = Arc::new(OracleState::default());
        let app = Router::new()
            .route("/api/orders/{number}", get(get_accrual))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            addr,
            server,
        }
    }

    /// 为订单设置应答脚本
    pub fn script(&self, number: &str, replies: impl IntoIterator<Item = Reply>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(number.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self, number: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .get(number)
            .copied()
            .unwrap_or(0)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// 指向本模拟服务的真实客户端
    pub fn client(&self) -> AccrualClient {
        AccrualClient::new(&AccrualConfig {
            base_url: self.base_url(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }
}

impl Drop for MockOracle {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn get_accrual(State(state): State<Arc<OracleState>>, Path(number): Path<String>) -> Response {
    match state.next_reply(&number) {
        Reply::Accrual { status, accrual } => {
            let mut body = json!({ "order": number, "status": status });
            if let Some(accrual) = accrual {
                body["accrual"] = json!(accrual);
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Reply::WrongOrder(other) => (
            StatusCode::OK,
            Json(json!({ "order": other, "status": "PROCESSED", "accrual": 1 })),
        )
            .into_response(),
        Reply::Garbage => (StatusCode::OK, "not json").into_response(),
        Reply::TooManyRequests(retry_after) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                "No more than N requests per minute allowed",
            )
                .into_response();
            if let Some(secs) = retry_after {
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(secs));
            }
            response
        }
        Reply::NotRegistered => StatusCode::NO_CONTENT.into_response(),
        Reply::ServerError => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// 轮询等待订单到达目标状态
pub async fn wait_for_status(store: &InMemoryOrderStore, order_id: &str, status: OrderStatus) {
    let order_id = OrderId::new(order_id);
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while store.get(&order_id).map(|o| o.status) != Some(status) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(
        reached.is_ok(),
        "订单 {order_id} 未到达 {status}，当前: {:?}",
        store.get(&order_id).map(|o| o.status)
    );
}
