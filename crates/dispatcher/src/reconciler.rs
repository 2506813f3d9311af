//! 对账器
//!
//! 基于执行日志计算异常计划，并把可重试的失败与严格模式计划的遗漏重新放回队列：
//!
//! - 直接失败: 窗口内 `status = failed` 的日志
//! - 超过最大重试次数: 按 (队列, 计划, 计划时间) 分组的 exception/timeout 日志，条数达到上限
//! - 可重试: 同样的分组，条数未达上限，且组内没有其他状态的日志
//! - 严格模式遗漏: 严格模式计划应触发但没有任何日志的计划时间

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use scheduler_core::config::ReconcilerConfig;
use scheduler_core::models::{ExceptionReason, ExceptionSchedule, LogStatus, Schedule, ScheduleLog};
use scheduler_core::traits::LogQuery;
use scheduler_core::{Catalogue, Generator, ScheduleEnvelope, SchedulerError, SchedulerResult};
use scheduler_infrastructure::QueueManager;

use crate::dispatch::DispatchService;
use crate::serializer::EnvelopeBuilder;

/// 单个严格模式计划一次对账最多检查的触发次数
pub const MAX_STRICT_OCCURRENCES: usize = 10_000;

/// 同一 (队列, 计划, 计划时间) 的失败日志
#[derive(Debug, Clone, PartialEq)]
struct FailureGroup {
    queue: String,
    schedule: i64,
    schedule_time: NaiveDateTime,
    count: usize,
    latest_time: NaiveDateTime,
    newest_log: i64,
}

/// 一次对账的结果，同时作为系统任务的执行结果写入日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub status: LogStatus,
    /// 成功放入的条目
    pub succeeded: BTreeMap<String, String>,
    pub failed: BTreeMap<String, String>,
    /// 队列忙等原因跳过的条目
    pub no_retry: BTreeMap<String, String>,
    pub exceptions: Vec<ExceptionSchedule>,
}

impl ReconcileReport {
    fn new() -> Self {
        Self {
            status: LogStatus::Empty,
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
            no_retry: BTreeMap::new(),
            exceptions: Vec::new(),
        }
    }

    /// 跳过视为失败时用于重试，否则用于严格模式补漏
    fn finish(mut self, skipped_is_failure: bool) -> Self {
        let failures = self.failed.len() + if skipped_is_failure { self.no_retry.len() } else { 0 };
        self.status = match (self.succeeded.is_empty(), failures > 0) {
            (false, true) => LogStatus::PartialFailed,
            (true, true) => LogStatus::Failed,
            (false, false) => LogStatus::Succeed,
            (true, false) if !self.no_retry.is_empty() => LogStatus::NoRetry,
            (true, false) => LogStatus::Empty,
        };
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub struct Reconciler {
    catalogue: Catalogue,
    queues: Arc<QueueManager>,
    dispatch: Arc<DispatchService>,
    builder: EnvelopeBuilder,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(dispatch: Arc<DispatchService>, mut config: ReconcilerConfig) -> Self {
        config.normalize();
        let catalogue = dispatch.catalogue().clone();
        Self {
            builder: EnvelopeBuilder::new(catalogue.clone()),
            queues: dispatch.queues().clone(),
            catalogue,
            dispatch,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// 默认窗口 `[now - window_hours, now)`
    pub fn window(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        (now - Duration::hours(self.config.window_hours), now)
    }

    pub async fn failed_directly(&self, from: NaiveDateTime, to: NaiveDateTime) -> SchedulerResult<Vec<ExceptionSchedule>> {
        let logs = self
            .catalogue
            .logs
            .list(&LogQuery::window(from, to).with_statuses(&[LogStatus::Failed]))
            .await?;
        Ok(logs
            .into_iter()
            .map(|log| ExceptionSchedule {
                schedule_id: log.schedule,
                schedule_time: log.schedule_time,
                queue: log.queue,
                reason: ExceptionReason::FailedDirectly,
                log_id: Some(log.id),
                latest_time: Some(log.create_time),
                count: 1,
            })
            .collect())
    }

    async fn failure_groups(&self, from: NaiveDateTime, to: NaiveDateTime) -> SchedulerResult<Vec<FailureGroup>> {
        let logs = self.catalogue.logs.list(&LogQuery::window(from, to)).await?;

        let mut groups: BTreeMap<(String, i64, NaiveDateTime), Vec<ScheduleLog>> = BTreeMap::new();
        for log in logs {
            groups
                .entry((log.queue.clone(), log.schedule, log.schedule_time))
                .or_default()
                .push(log);
        }

        Ok(groups
            .into_iter()
            .filter(|(_, logs)| logs.iter().all(|log| log.status.is_retryable()))
            .filter_map(|((queue, schedule, schedule_time), logs)| {
                let newest = logs.iter().max_by_key(|log| (log.create_time, log.id))?;
                Some(FailureGroup {
                    queue,
                    schedule,
                    schedule_time,
                    count: logs.len(),
                    latest_time: newest.create_time,
                    newest_log: newest.id,
                })
            })
            .collect())
    }

    pub async fn retries_exceeded(&self, from: NaiveDateTime, to: NaiveDateTime) -> SchedulerResult<Vec<ExceptionSchedule>> {
        Ok(self
            .failure_groups(from, to)
            .await?
            .into_iter()
            .filter(|group| group.count >= self.config.max_retry_times)
            .map(|group| ExceptionSchedule {
                schedule_id: group.schedule,
                schedule_time: group.schedule_time,
                queue: group.queue,
                reason: ExceptionReason::MaximumRetriesExceeded,
                log_id: Some(group.newest_log),
                latest_time: Some(group.latest_time),
                count: group.count,
            })
            .collect())
    }

    /// 重试窗口内可重试的失败，只放入当前为空的队列
    #[instrument(skip(self))]
    pub async fn retry_pass(&self, now: NaiveDateTime) -> SchedulerResult<ReconcileReport> {
        let (from, to) = self.window(now);
        let mut report = ReconcileReport::new();
        report.exceptions.extend(self.failed_directly(from, to).await?);

        let mut retryable: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for group in self.failure_groups(from, to).await? {
            if group.count >= self.config.max_retry_times {
                report.exceptions.push(ExceptionSchedule {
                    schedule_id: group.schedule,
                    schedule_time: group.schedule_time,
                    queue: group.queue,
                    reason: ExceptionReason::MaximumRetriesExceeded,
                    log_id: Some(group.newest_log),
                    latest_time: Some(group.latest_time),
                    count: group.count,
                });
            } else {
                retryable.entry(group.queue).or_default().push(group.newest_log);
            }
        }

        for (queue, log_ids) in retryable {
            let backend = match self.queues.get(&queue).await {
                Ok(backend) => backend,
                Err(e @ SchedulerError::QueueMissing(_)) => {
                    report.failed.insert(queue, e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !backend.is_empty().await? {
                debug!("队列 {} 非空，跳过 {} 个重试", queue, log_ids.len());
                report.no_retry.insert(queue.clone(), format!("queue {queue} is not free"));
                continue;
            }
            for (log_id, outcome) in self.dispatch.retry(&log_ids).await? {
                if outcome.contains("->") {
                    report.succeeded.insert(log_id, outcome);
                } else {
                    report.failed.insert(log_id, outcome);
                }
            }
        }

        sort_exceptions(&mut report.exceptions);
        let report = report.finish(true);
        info!(
            "重试对账完成: 状态 {}，重试 {} 个，异常计划 {} 个",
            report.status,
            report.succeeded.len(),
            report.exceptions.len()
        );
        Ok(report)
    }

    /// 严格模式计划在某队列上遗漏的计划时间
    ///
    /// 期望时间取 `[update_time, now)` 内后继时间也不晚于 `now` 的触发时间，即槽位已经关闭的触发时间。
    pub async fn strict_misses(
        &self,
        queue: &str,
        now: NaiveDateTime,
        only: Option<i64>,
    ) -> SchedulerResult<Vec<(Schedule, Vec<NaiveDateTime>)>> {
        let mut misses = Vec::new();
        for schedule in self.catalogue.schedules.list_strict().await? {
            if only.is_some_and(|id| id != schedule.id) {
                continue;
            }
            let config = schedule.config.clone().with_base_on_now(false);
            let expected = match config.range_limited(schedule.update_time, now, MAX_STRICT_OCCURRENCES) {
                Ok(Some(times)) => times,
                Ok(None) => {
                    warn!(
                        "严格模式计划 {} 自 {} 起的触发次数超过 {}，跳过遗漏检查",
                        schedule.id, schedule.update_time, MAX_STRICT_OCCURRENCES
                    );
                    continue;
                }
                Err(e) => {
                    warn!("严格模式计划 {} 的时间无法枚举: {}", schedule.id, e);
                    continue;
                }
            };
            let mut closed = Vec::with_capacity(expected.len());
            for time in expected {
                if config.next_after(time)? <= now {
                    closed.push(time);
                }
            }
            if closed.is_empty() {
                continue;
            }

            let logged: HashSet<NaiveDateTime> = self
                .catalogue
                .logs
                .schedule_times(schedule.id, Some(queue), schedule.update_time, now)
                .await?
                .into_iter()
                .collect();
            let missing: Vec<NaiveDateTime> = closed.into_iter().filter(|t| !logged.contains(t)).collect();
            if !missing.is_empty() {
                debug!("严格模式计划 {} 在队列 {} 遗漏 {} 次", schedule.id, queue, missing.len());
                misses.push((schedule, missing));
            }
        }
        Ok(misses)
    }

    /// 严格模式遗漏对应的信封，`generator = put`
    pub async fn missing_envelopes(
        &self,
        queue: &str,
        now: NaiveDateTime,
        only: Option<i64>,
    ) -> SchedulerResult<Vec<ScheduleEnvelope>> {
        let mut envelopes = Vec::new();
        let mut tasks = HashMap::new();
        for (schedule, times) in self.strict_misses(queue, now, only).await? {
            let task = match tasks.get(&schedule.task) {
                Some(task) => Clone::clone(task),
                None => {
                    let task = self.builder.task(schedule.task).await?;
                    tasks.insert(schedule.task, task.clone());
                    task
                }
            };
            for time in times {
                let mut envelope = ScheduleEnvelope::from_schedule(&schedule, task.clone(), queue, Generator::Put);
                envelope.schedule_time = time;
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    /// 把严格模式遗漏放回各队列；忙碌的队列本次跳过
    #[instrument(skip(self))]
    pub async fn process_strict(&self, queues: &[String], now: NaiveDateTime) -> SchedulerResult<ReconcileReport> {
        let mut report = ReconcileReport::new();
        for queue in queues {
            let backend = match self.queues.get(queue).await {
                Ok(backend) => backend,
                Err(e @ SchedulerError::QueueMissing(_)) => {
                    report.failed.insert(queue.clone(), e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !backend.is_empty().await? {
                report.no_retry.insert(queue.clone(), format!("queue {queue} is not free"));
                continue;
            }

            let envelopes = self.missing_envelopes(queue, now, None).await?;
            if envelopes.is_empty() {
                continue;
            }
            let values = envelopes
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            match self.dispatch.put_raw(values, queue).await {
                Ok(count) => {
                    info!("严格模式补漏: 放入队列 {} 共 {} 个", queue, count);
                    report.succeeded.insert(queue.clone(), format!("put {count} schedules to {queue}"));
                }
                Err(e) => {
                    report.failed.insert(queue.clone(), e.to_string());
                }
            }
        }
        Ok(report.finish(false))
    }

    /// 窗口内的异常计划，按 (计划id, 计划时间) 排序
    pub async fn exception_schedules(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        queue: Option<&str>,
    ) -> SchedulerResult<Vec<ExceptionSchedule>> {
        let mut exceptions = self.failed_directly(from, to).await?;
        exceptions.extend(self.retries_exceeded(from, to).await?);

        for strict_queue in &self.config.strict_queues {
            if queue.is_some_and(|q| q != strict_queue) {
                continue;
            }
            for (schedule, times) in self.strict_misses(strict_queue, to, None).await? {
                exceptions.extend(times.into_iter().map(|time| ExceptionSchedule {
                    schedule_id: schedule.id,
                    schedule_time: time,
                    queue: strict_queue.clone(),
                    reason: ExceptionReason::ScheduleLogNotFound,
                    log_id: None,
                    latest_time: None,
                    count: 0,
                }));
            }
        }

        if let Some(queue) = queue {
            exceptions.retain(|e| e.queue == queue);
        }
        sort_exceptions(&mut exceptions);
        Ok(exceptions)
    }
}

fn sort_exceptions(exceptions: &mut [ExceptionSchedule]) {
    exceptions.sort_by(|a, b| {
        (a.schedule_id, a.schedule_time, a.reason).cmp(&(b.schedule_id, b.schedule_time, b.reason))
    });
}
