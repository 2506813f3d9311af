//! 调度接口: 拉取、放入、重试、队列状态以及异常计划查询

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use scheduler_core::models::ExceptionSchedule;
use scheduler_core::time::{format_datetime, now, nlp, parse_datetime};
use scheduler_core::ScheduleEnvelope;
use scheduler_dispatcher::{NextOutcome, PutItem};

use crate::error::{ApiError, ApiResult};
use crate::middleware::ClientIp;
use crate::state::AppState;

const UPCOMING_COUNT: usize = 5;

#[derive(Debug, Deserialize)]
pub struct NextParams {
    pub id: Option<String>,
}

pub async fn next(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<NextParams>,
    ClientIp(ip): ClientIp,
) -> ApiResult<Response> {
    let outcome = state.dispatch.next(&code, params.id.as_deref(), &ip).await?;
    let response = match outcome {
        NextOutcome::Envelope(raw) => ([(header::CONTENT_TYPE, "application/json")], raw).into_response(),
        NextOutcome::Empty(code) => (
            StatusCode::ACCEPTED,
            Json(json!({"message": format!("no schedule for {code}")})),
        )
            .into_response(),
        NextOutcome::Registering(id) => (
            StatusCode::ACCEPTED,
            Json(json!({"message": format!("consumer {id} is registering")})),
        )
            .into_response(),
    };
    Ok(response)
}

pub async fn put(
    State(state): State<AppState>,
    Json(items): Json<Vec<PutItem>>,
) -> ApiResult<Json<BTreeMap<String, Value>>> {
    Ok(Json(state.dispatch.put(items).await?))
}

#[derive(Debug, Deserialize)]
pub struct PutRawBody {
    pub schedules: Vec<Value>,
    pub queue: String,
}

pub async fn put_raw(State(state): State<AppState>, Json(body): Json<PutRawBody>) -> ApiResult<Json<Value>> {
    let count = state.dispatch.put_raw(body.schedules, &body.queue).await?;
    Ok(Json(json!({"message": format!("put {count} schedules to {}", body.queue)})))
}

#[derive(Debug, Deserialize)]
pub struct RetryParams {
    #[serde(rename = "log-ids")]
    pub log_ids: Option<String>,
}

/// 日志id可以放在 `log-ids` 参数中(逗号分隔)，也可以是请求体中的JSON数组
pub async fn retry(
    State(state): State<AppState>,
    Query(params): Query<RetryParams>,
    body: Bytes,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    let mut ids = Vec::new();
    if let Some(raw) = params.log_ids.as_deref() {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let id = part
                .parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid log id: {part}")))?;
            ids.push(id);
        }
    }
    if !body.is_empty() {
        let listed: Vec<i64> = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid log id list: {e}")))?;
        ids.extend(listed);
    }
    if ids.is_empty() {
        return Err(ApiError::BadRequest("log-ids is required".to_string()));
    }
    Ok(Json(state.dispatch.retry(&ids).await?))
}

pub async fn queue_status(State(state): State<AppState>) -> Json<BTreeMap<String, usize>> {
    Json(state.dispatch.status().await)
}

fn parse_time(name: &str, value: Option<&str>) -> ApiResult<Option<NaiveDateTime>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {name}: {raw}"))),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExceptionParams {
    pub queue: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

pub async fn exceptions(
    State(state): State<AppState>,
    Query(params): Query<ExceptionParams>,
) -> ApiResult<Json<Vec<ExceptionSchedule>>> {
    let (from, to) = state.reconciler.window(now());
    let from = parse_time("start", params.start.as_deref())?.unwrap_or(from);
    let to = parse_time("end", params.end.as_deref())?.unwrap_or(to);
    let queue = params.queue.as_deref().filter(|q| !q.is_empty());
    Ok(Json(state.reconciler.exception_schedules(from, to, queue).await?))
}

#[derive(Debug, Deserialize)]
pub struct MissingParams {
    pub schedule_id: Option<i64>,
}

pub async fn missing(
    State(state): State<AppState>,
    Query(params): Query<MissingParams>,
) -> ApiResult<Json<Vec<ScheduleEnvelope>>> {
    let now = now();
    let mut envelopes = Vec::new();
    for queue in &state.reconciler.config().strict_queues {
        envelopes.extend(
            state
                .reconciler
                .missing_envelopes(queue, now, params.schedule_id)
                .await?,
        );
    }
    Ok(Json(envelopes))
}

#[derive(Debug, Deserialize)]
pub struct TimeParseParams {
    pub sentence: String,
}

pub async fn time_parse(Query(params): Query<TimeParseParams>) -> ApiResult<Json<Value>> {
    let config = nlp::parse_sentence(&params.sentence)?;
    let upcoming: Vec<String> = config
        .upcoming(now(), UPCOMING_COUNT)?
        .iter()
        .map(format_datetime)
        .collect();
    Ok(Json(json!({"schedule": config.to_value(), "next": upcoming})))
}
