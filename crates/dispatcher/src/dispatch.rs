//! 调度接口的业务逻辑：拉取、放入、原样放入、重试和队列状态

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use scheduler_core::config::DispatchConfig;
use scheduler_core::envelope::REQUIRED_ENVELOPE_FIELDS;
use scheduler_core::models::{ExceptionReport, Schedule, ScheduleLog};
use scheduler_core::time::{now, COMPACT_DATETIME_FORMAT};
use scheduler_core::{
    Catalogue, EnvelopeTask, Generator, ScheduleEnvelope, SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::QueueManager;

use crate::registry::ConsumerRegistry;
use crate::serializer::EnvelopeBuilder;

/// 一次拉取的结果
#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    /// 序列化后的计划信封
    Envelope(String),
    /// 队列为空
    Empty(String),
    /// 消费者仍在注册握手中
    Registering(String),
}

/// 放入请求中的一项: (计划id, 队列编码, `YYYYMMDDhhmmss`)
pub type PutItem = (i64, String, String);

pub struct DispatchService {
    catalogue: Catalogue,
    queues: Arc<QueueManager>,
    registry: Arc<ConsumerRegistry>,
    builder: EnvelopeBuilder,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(
        catalogue: Catalogue,
        queues: Arc<QueueManager>,
        registry: Arc<ConsumerRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            builder: EnvelopeBuilder::new(catalogue.clone()),
            catalogue,
            queues,
            registry,
            config,
        }
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    fn check_batch(&self, len: usize) -> SchedulerResult<()> {
        if len > self.config.max_batch {
            return Err(SchedulerError::InvalidRequest(format!(
                "too many items: {len} > {}",
                self.config.max_batch
            )));
        }
        Ok(())
    }

    async fn check_permission(&self, queue: &str, ip: &str) -> SchedulerResult<()> {
        if let Some(permission) = self.catalogue.permissions.active_for_queue(queue).await? {
            permission.check_ip(ip).map_err(SchedulerError::PermissionDenied)?;
        }
        Ok(())
    }

    /// 从队列取一个计划；带 `consumer_id` 的拉取同时记录心跳
    #[instrument(skip(self), fields(queue = %queue))]
    pub async fn next(&self, queue: &str, consumer_id: Option<&str>, ip: &str) -> SchedulerResult<NextOutcome> {
        let backend = self.queues.get(queue).await?;
        self.check_permission(queue, ip).await?;

        if let Some(raw_id) = consumer_id.filter(|id| !id.is_empty()) {
            let id: i64 = raw_id
                .parse()
                .map_err(|_| SchedulerError::InvalidRequest(format!("invalid consumer id: {raw_id}")))?;
            if self.registry.exists(id).await? {
                self.registry.heartbeat(id).await?;
            } else if self.config.require_registration {
                if self.registry.is_waitlisted(id).await? {
                    return Ok(NextOutcome::Registering(raw_id.to_string()));
                }
                self.registry.join_waitlist(id).await?;
                debug!("未注册的消费者 {} 拉取队列 {}，下发注册信封", id, queue);
                let envelope = ScheduleEnvelope::register(queue, raw_id, now());
                return Ok(NextOutcome::Envelope(envelope.to_json()?));
            }
        }

        match backend.try_pop().await? {
            Some(envelope) => {
                metrics::counter!("scheduler_schedules_dispatched_total", "queue" => queue.to_string())
                    .increment(1);
                Ok(NextOutcome::Envelope(envelope))
            }
            None => Ok(NextOutcome::Empty(queue.to_string())),
        }
    }

    /// 按指定时间放入计划，结果按 计划id → 队列 → 结果 组织
    #[instrument(skip_all, fields(count = items.len()))]
    pub async fn put(&self, items: Vec<PutItem>) -> SchedulerResult<BTreeMap<String, Value>> {
        self.check_batch(items.len())?;

        let mut grouped: BTreeMap<i64, BTreeMap<String, Vec<NaiveDateTime>>> = BTreeMap::new();
        for (schedule_id, queue, time) in items {
            let time = NaiveDateTime::parse_from_str(&time, COMPACT_DATETIME_FORMAT)
                .map_err(|_| SchedulerError::InvalidRequest(format!("invalid schedule time: {time}")))?;
            grouped
                .entry(schedule_id)
                .or_default()
                .entry(queue)
                .or_default()
                .push(time);
        }

        // 单个计划或队列失败只记在它自己的结果里
        let mut results = BTreeMap::new();
        for (schedule_id, queues) in grouped {
            let outcome = match self.put_schedule(schedule_id, queues).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("计划 {} 放入失败: {}", schedule_id, e);
                    json!(e.to_string())
                }
            };
            results.insert(schedule_id.to_string(), outcome);
        }
        Ok(results)
    }

    async fn put_schedule(
        &self,
        schedule_id: i64,
        queues: BTreeMap<String, Vec<NaiveDateTime>>,
    ) -> SchedulerResult<Value> {
        let Some(schedule) = self.catalogue.schedules.get(schedule_id).await? else {
            return Ok(json!("no such schedule"));
        };
        let task = self.builder.task(schedule.task).await?;

        let mut per_queue = serde_json::Map::new();
        for (queue, times) in queues {
            let outcome = match self.put_queue(&schedule, &task, &queue, times).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("计划 {} 放入队列 {} 失败: {}", schedule_id, queue, e);
                    e.to_string()
                }
            };
            per_queue.insert(queue, json!(outcome));
        }
        Ok(Value::Object(per_queue))
    }

    async fn put_queue(
        &self,
        schedule: &Schedule,
        task: &EnvelopeTask,
        queue: &str,
        times: Vec<NaiveDateTime>,
    ) -> SchedulerResult<String> {
        let backend = match self.queues.get(queue).await {
            Ok(backend) => backend,
            Err(SchedulerError::QueueMissing(_)) => return Ok("no such queue".to_string()),
            Err(e) => return Err(e),
        };
        let mut envelopes = Vec::with_capacity(times.len());
        for time in times {
            let mut envelope =
                ScheduleEnvelope::from_schedule(schedule, task.clone(), queue, Generator::Put);
            envelope.schedule_time = time;
            envelopes.push(envelope.to_json()?);
        }
        let count = backend.push(envelopes).await?;
        info!("计划 {} 放入队列 {} 共 {} 个", schedule.id, queue, count);
        Ok(format!("{count} schedule(s) put"))
    }

    /// 原样放入已序列化的信封，返回放入个数
    #[instrument(skip(self, schedules), fields(count = schedules.len()))]
    pub async fn put_raw(&self, schedules: Vec<Value>, queue: &str) -> SchedulerResult<usize> {
        self.check_batch(schedules.len())?;
        let backend = self.queues.get(queue).await?;

        let mut envelopes = Vec::with_capacity(schedules.len());
        for (index, schedule) in schedules.iter().enumerate() {
            for field in REQUIRED_ENVELOPE_FIELDS {
                if schedule.get(field).is_none() {
                    return Err(SchedulerError::InvalidRequest(format!(
                        "schedule {index} missing field {field}"
                    )));
                }
            }
            envelopes.push(serde_json::to_string(schedule)?);
        }
        if envelopes.is_empty() {
            return Ok(0);
        }
        backend.push(envelopes).await
    }

    /// 按日志重新放入原计划，放入日志所在的队列
    #[instrument(skip_all, fields(count = log_ids.len()))]
    pub async fn retry(&self, log_ids: &[i64]) -> SchedulerResult<BTreeMap<String, String>> {
        self.check_batch(log_ids.len())?;
        let logs: BTreeMap<i64, ScheduleLog> = self
            .catalogue
            .logs
            .get_many(log_ids)
            .await?
            .into_iter()
            .map(|log| (log.id, log))
            .collect();

        let mut results = BTreeMap::new();
        for id in log_ids {
            let outcome = match logs.get(id) {
                None => "no such log".to_string(),
                Some(log) => match self.retry_log(log).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("日志 {} 重试失败: {}", id, e);
                        e.to_string()
                    }
                },
            };
            results.insert(id.to_string(), outcome);
        }
        Ok(results)
    }

    async fn retry_log(&self, log: &ScheduleLog) -> SchedulerResult<String> {
        let Some(schedule) = self.catalogue.schedules.get(log.schedule).await? else {
            return Ok("no such schedule".to_string());
        };
        let backend = match self.queues.get(&log.queue).await {
            Ok(backend) => backend,
            Err(SchedulerError::QueueMissing(_)) => return Ok("no such queue".to_string()),
            Err(e) => return Err(e),
        };
        let envelope = self.builder.retry(&schedule, log).await?;
        backend.push(vec![envelope.to_json()?]).await?;
        metrics::counter!("scheduler_retries_total", "queue" => log.queue.clone()).increment(1);
        info!("日志 {} 重试: 计划 {} 放入队列 {}", log.id, schedule.id, log.queue);
        Ok(format!("{}->{}", schedule.id, log.queue))
    }

    pub async fn status(&self) -> BTreeMap<String, usize> {
        self.queues.sizes().await
    }

    pub async fn report_exception(&self, content: String, client: String, ip: String) -> SchedulerResult<ExceptionReport> {
        if content.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("exception content is empty".to_string()));
        }
        warn!("收到客户端 {}({}) 上报的异常", client, ip);
        self.catalogue
            .exceptions
            .create(&ExceptionReport {
                id: 0,
                client,
                ip,
                content,
                create_time: now(),
            })
            .await
    }
}
