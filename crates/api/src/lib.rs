//! # Scheduler API
//!
//! 调度服务的HTTP接口，基于Axum构建。
//!
//! ## 端点
//!
//! ### 调度
//! - `GET /schedule/queue/{code}/get?id=` - 拉取一个计划，队列为空时返回 202
//! - `POST /schedule/put` - 按 `[[计划id, 队列, "YYYYMMDDhhmmss"], ...]` 放入计划
//! - `POST /schedule/put-raw` - 原样放入信封
//! - `POST /schedule/retry?log-ids=1,2` - 按日志重试
//! - `GET /schedule/queue/status` - 各队列长度
//! - `GET /schedule/exception` / `GET /schedule/missing` - 异常计划与严格模式遗漏
//! - `GET /schedule/time-parse?sentence=` - 自然语言计划解析
//!
//! ### 消费者与程序
//! - `POST /consumer/register`、`GET /consumer/list`、`GET /consumer/{action}?id=`
//! - `GET /program/{name}/{action}` - 生产者、消费者的启停与日志
//!
//! ### 其他
//! - `POST /exception` - 客户端异常上报
//! - `GET /health`、`GET /metrics`
//!
//! 错误统一返回 `{"error": "<message>"}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::create_routes;
use scheduler_core::config::ApiConfig;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, Programs};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );
    if config.cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
