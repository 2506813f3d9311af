//! 进程内可直接执行的系统任务

use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use scheduler_core::config::ReconcilerConfig;
use scheduler_core::envelope::EnvelopeTask;
use scheduler_core::models::LogStatus;
use scheduler_core::{ExecutorKind, ScheduleEnvelope, SchedulerResult};
use scheduler_dispatcher::{DispatchService, Reconciler};

const DEFAULT_RETENTION_DAYS: i64 = 30;

/// 一次执行的结论，写入执行日志
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub status: LogStatus,
    pub result: Value,
}

impl Execution {
    pub fn new(status: LogStatus, result: Value) -> Self {
        Self { status, result }
    }
}

/// 从任务自身开始沿祖先查找配置项
fn task_setting<'a>(task: &'a EnvelopeTask, key: &str) -> Option<&'a Value> {
    let mut current = Some(task);
    while let Some(task) = current {
        if let Some(value) = task.config.get(key).filter(|v| !v.is_null()) {
            return Some(value);
        }
        current = task.parent.as_deref();
    }
    None
}

pub struct SystemExecutors {
    dispatch: Arc<DispatchService>,
    reconciler: ReconcilerConfig,
}

impl SystemExecutors {
    pub fn new(dispatch: Arc<DispatchService>, reconciler: ReconcilerConfig) -> Self {
        Self { dispatch, reconciler }
    }

    #[instrument(skip(self, envelope), fields(schedule = envelope.id, kind = kind.name()))]
    pub async fn execute(
        &self,
        kind: &ExecutorKind,
        envelope: &ScheduleEnvelope,
        now: NaiveDateTime,
    ) -> SchedulerResult<Execution> {
        match kind {
            ExecutorKind::ExceptionHandle => self.exception_handle(&envelope.task, now).await,
            ExecutorKind::StrictScheduleHandle => self.strict_handle(&envelope.task, now).await,
            ExecutorKind::LogCleanup => self.log_cleanup(&envelope.task, now).await,
            other => Ok(Execution::new(
                LogStatus::NoRetry,
                json!({"message": format!("executor {} is not available on this node", other.name())}),
            )),
        }
    }

    fn reconciler(&self, task: &EnvelopeTask) -> Reconciler {
        let mut config = self.reconciler.clone();
        if let Some(times) = task_setting(task, "max_retry_times").and_then(Value::as_u64) {
            config.max_retry_times = times as usize;
        }
        Reconciler::new(self.dispatch.clone(), config)
    }

    async fn exception_handle(&self, task: &EnvelopeTask, now: NaiveDateTime) -> SchedulerResult<Execution> {
        let report = self.reconciler(task).retry_pass(now).await?;
        Ok(Execution::new(report.status, report.to_value()))
    }

    async fn strict_handle(&self, task: &EnvelopeTask, now: NaiveDateTime) -> SchedulerResult<Execution> {
        let reconciler = self.reconciler(task);
        let queues: Vec<String> = match task_setting(task, "queues").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => reconciler.config().strict_queues.clone(),
        };
        let report = reconciler.process_strict(&queues, now).await?;
        Ok(Execution::new(report.status, report.to_value()))
    }

    async fn log_cleanup(&self, task: &EnvelopeTask, now: NaiveDateTime) -> SchedulerResult<Execution> {
        let days = task_setting(task, "retention_days")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        let before = now - Duration::days(days);
        let deleted = self.dispatch.catalogue().logs.delete_before(before).await?;
        info!("清理 {} 之前的执行日志 {} 条", before, deleted);
        Ok(Execution::new(
            LogStatus::Succeed,
            json!({"deleted": deleted, "retention_days": days}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(name: &str, config: Value, parent: Option<EnvelopeTask>) -> EnvelopeTask {
        EnvelopeTask {
            id: 1,
            name: name.to_string(),
            category: None,
            config,
            parent: parent.map(Box::new),
        }
    }

    #[test]
    fn test_task_setting_prefers_own_config() {
        let parent = task("严格模式计划处理", json!({"queues": ["test"], "max_retry_times": 3}), None);
        let child = task("系统严格模式任务处理", json!({"queues": ["opening"]}), Some(parent));
        assert_eq!(task_setting(&child, "queues"), Some(&json!(["opening"])));
        assert_eq!(task_setting(&child, "max_retry_times"), Some(&json!(3)));
        assert_eq!(task_setting(&child, "retention_days"), None);
    }
}
