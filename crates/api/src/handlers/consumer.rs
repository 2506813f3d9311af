use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use scheduler_core::models::Consumer;
use scheduler_dispatcher::ConsumerListing;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn register(State(state): State<AppState>, Json(consumer): Json<Consumer>) -> ApiResult<Json<Consumer>> {
    let registered = state.dispatch.registry().register(consumer).await?;
    info!("消费者 {} 注册", registered.consumer_id);
    Ok(Json(registered))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<ConsumerListing>>> {
    Ok(Json(state.dispatch.registry().list().await?))
}

#[derive(Debug, Deserialize)]
pub struct ActionParams {
    pub id: Option<i64>,
}

/// `start` / `stop` / `destroy` / `log`
///
/// 只有本进程的消费者可以启动；远端消费者的停止等同于移除成员记录。
pub async fn action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Query(params): Query<ActionParams>,
) -> ApiResult<Response> {
    let id = params
        .id
        .ok_or_else(|| ApiError::BadRequest("id is required".to_string()))?;
    let registry = state.dispatch.registry();
    let local = state
        .programs
        .consumer()
        .filter(|_| state.programs.is_local_consumer(id));

    match action.as_str() {
        "start" => {
            let agent = local
                .ok_or_else(|| ApiError::BadRequest(format!("consumer {id} is not managed by this node")))?;
            agent.start().await?;
        }
        "stop" => match local {
            Some(agent) => {
                agent.stop().await?;
            }
            None => {
                if !registry.delete(id).await? {
                    return Err(ApiError::NotFound(format!("consumer {id} not found")));
                }
            }
        },
        "destroy" => {
            let mut removed = false;
            if let Some(agent) = local {
                if agent.is_running().await {
                    agent.stop().await?;
                    removed = true;
                }
            }
            removed |= registry.delete(id).await?;
            if !removed {
                return Err(ApiError::NotFound(format!("consumer {id} not found")));
            }
        }
        "log" => {
            let text = match registry.read_log(id).await? {
                Some(text) => text,
                None if registry.exists(id).await? => String::new(),
                None => return Err(ApiError::NotFound(format!("consumer {id} not found"))),
            };
            return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response());
        }
        other => return Err(ApiError::BadRequest(format!("unsupported action: {other}"))),
    }

    Ok(Json(json!({"message": "OK", "action": action, "id": id})).into_response())
}
