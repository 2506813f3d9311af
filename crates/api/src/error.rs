use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(e) => match e {
                SchedulerError::QueueMissing(_)
                | SchedulerError::ScheduleMissing(_)
                | SchedulerError::LogMissing(_)
                | SchedulerError::TaskMissing(_) => StatusCode::NOT_FOUND,
                SchedulerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                SchedulerError::ConfigInvalid(_)
                | SchedulerError::InvalidFilter(_)
                | SchedulerError::InvalidRequest(_)
                | SchedulerError::Program(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
