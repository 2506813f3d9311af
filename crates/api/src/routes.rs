use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{consumer, program, schedule, system};
use crate::state::AppState;

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health_check))
        .route("/metrics", get(system::metrics))
        // 调度接口
        .route("/schedule/queue/status", get(schedule::queue_status))
        .route("/schedule/queue/{code}/get", get(schedule::next))
        .route("/schedule/put", post(schedule::put))
        .route("/schedule/put-raw", post(schedule::put_raw))
        .route("/schedule/retry", post(schedule::retry))
        .route("/schedule/exception", get(schedule::exceptions))
        .route("/schedule/missing", get(schedule::missing))
        .route("/schedule/time-parse", get(schedule::time_parse))
        // 消费者
        .route("/consumer/register", post(consumer::register))
        .route("/consumer/list", get(consumer::list))
        .route("/consumer/{action}", get(consumer::action))
        // 程序控制
        .route("/program/{name}/{action}", get(program::control))
        .route("/exception", post(system::report_exception))
        .with_state(state)
}
