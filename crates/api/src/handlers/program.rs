use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 日志默认每页 KiB
const DEFAULT_PAGE_SIZE: u64 = 64;

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

pub async fn control(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
    Query(params): Query<LogParams>,
) -> ApiResult<Response> {
    let agent = state
        .programs
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("program {name} not found")))?;

    let result = match action.as_str() {
        "start" => agent.start().await,
        "stop" => agent.stop().await,
        "restart" => agent.restart().await,
        "log" => {
            let log = agent
                .log(params.page.unwrap_or(0), params.page_size.unwrap_or(DEFAULT_PAGE_SIZE))
                .await?;
            let mut response = log.text.into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            headers.insert("x-page", HeaderValue::from(log.page));
            headers.insert("x-page-count", HeaderValue::from(log.page_count));
            return Ok(response);
        }
        other => return Err(ApiError::BadRequest(format!("unsupported action: {other}"))),
    };

    let response = match result {
        Ok(program_state) => Json(json!({"message": "OK", "action": action, "state": program_state})).into_response(),
        Err(e) => {
            let program_state = agent.state_handle().snapshot().await;
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": e.to_string(), "action": action, "state": program_state})),
            )
                .into_response()
        }
    };
    Ok(response)
}
