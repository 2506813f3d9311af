use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use scheduler_core::models::ExceptionReport;
use scheduler_core::time::{format_datetime, now};

use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": format_datetime(&now()),
        "service": "task-scheduler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus 文本格式，渲染前刷新队列长度
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("metrics disabled".to_string()))?;
    for (queue, size) in state.dispatch.status().await {
        metrics::gauge!("scheduler_queue_size", "queue" => queue).set(size as f64);
    }
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], handle.render()).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ExceptionBody {
    pub content: String,
    #[serde(default)]
    pub client: String,
}

pub async fn report_exception(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<ExceptionBody>,
) -> ApiResult<Json<ExceptionReport>> {
    Ok(Json(
        state
            .dispatch
            .report_exception(body.content, body.client, ip)
            .await?,
    ))
}
