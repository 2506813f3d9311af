//! 计划来源：进程内直接调用分发服务，或通过HTTP访问远端的调度接口

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use scheduler_core::models::Consumer;
use scheduler_core::{ScheduleEnvelope, SchedulerError, SchedulerResult};
use scheduler_dispatcher::{DispatchService, NextOutcome};

/// 进程内拉取时使用的来源地址
const LOCAL_IP: &str = "127.0.0.1";

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// 拉取一个计划，队列为空或仍在注册握手中时返回 `None`
    async fn next(&self, queue: &str, consumer_id: i64) -> SchedulerResult<Option<ScheduleEnvelope>>;

    async fn register(&self, consumer: Consumer) -> SchedulerResult<Consumer>;

    async fn unregister(&self, consumer_id: i64) -> SchedulerResult<()>;

    /// 追加到消费者日志缓冲，远端来源不支持时忽略
    async fn write_log(&self, _consumer_id: i64, _text: &str) -> SchedulerResult<()> {
        Ok(())
    }
}

pub struct LocalSource {
    dispatch: Arc<DispatchService>,
}

impl LocalSource {
    pub fn new(dispatch: Arc<DispatchService>) -> Self {
        Self { dispatch }
    }
}

#[async_trait]
impl ScheduleSource for LocalSource {
    async fn next(&self, queue: &str, consumer_id: i64) -> SchedulerResult<Option<ScheduleEnvelope>> {
        let id = consumer_id.to_string();
        match self.dispatch.next(queue, Some(&id), LOCAL_IP).await? {
            NextOutcome::Envelope(raw) => Ok(Some(ScheduleEnvelope::from_json(&raw)?)),
            NextOutcome::Empty(_) | NextOutcome::Registering(_) => Ok(None),
        }
    }

    async fn register(&self, consumer: Consumer) -> SchedulerResult<Consumer> {
        self.dispatch.registry().register(consumer).await
    }

    async fn unregister(&self, consumer_id: i64) -> SchedulerResult<()> {
        self.dispatch.registry().delete(consumer_id).await.map(|_| ())
    }

    async fn write_log(&self, consumer_id: i64, text: &str) -> SchedulerResult<()> {
        self.dispatch.registry().write_log(consumer_id, text).await
    }
}

pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_of(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {status} - {body}"))
    }
}

fn transport(e: reqwest::Error) -> SchedulerError {
    SchedulerError::Protocol(format!("调度接口请求失败: {e}"))
}

#[async_trait]
impl ScheduleSource for HttpSource {
    async fn next(&self, queue: &str, consumer_id: i64) -> SchedulerResult<Option<ScheduleEnvelope>> {
        let response = self
            .client
            .get(self.url(&format!("/schedule/queue/{queue}/get")))
            .query(&[("id", consumer_id.to_string())])
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(transport)?;
                Ok(Some(ScheduleEnvelope::from_json(&body)?))
            }
            StatusCode::ACCEPTED => {
                debug!("队列 {} 暂无计划", queue);
                Ok(None)
            }
            StatusCode::NOT_FOUND => Err(SchedulerError::QueueMissing(queue.to_string())),
            StatusCode::FORBIDDEN => Err(SchedulerError::PermissionDenied(Self::error_of(response).await)),
            _ => Err(SchedulerError::Protocol(Self::error_of(response).await)),
        }
    }

    async fn register(&self, consumer: Consumer) -> SchedulerResult<Consumer> {
        let response = self
            .client
            .post(self.url("/consumer/register"))
            .json(&consumer)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(SchedulerError::Protocol(Self::error_of(response).await));
        }
        response.json::<Consumer>().await.map_err(transport)
    }

    async fn unregister(&self, consumer_id: i64) -> SchedulerResult<()> {
        let response = self
            .client
            .get(self.url("/consumer/destroy"))
            .query(&[("id", consumer_id.to_string())])
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(SchedulerError::Protocol(Self::error_of(response).await));
        }
        Ok(())
    }
}
