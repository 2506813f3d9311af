//! 目录仓储接口
//!
//! 每个接口只负责一种记录；跨记录引用一律是 id，由调用方通过对应仓储解引用。
//! 所有方法都是异步的，实现需要 `Send + Sync`。

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::SchedulerError;
use crate::models::{
    Category, ExceptionReport, LogStatus, QueuePermission, Schedule, ScheduleLog,
    ScheduleProducer, ScheduleQueue, ScheduleStatus, Task,
};
use crate::SchedulerResult;

/// 计划查询条件，由生产者的过滤配置转换而来
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub is_strict: Option<bool>,
    pub priority: Option<i32>,
    pub task_id: Option<i64>,
    pub task_name: Option<String>,
    pub task_category_name: Option<String>,
    /// 只返回 `next_schedule_time ≤ due_before` 的计划
    pub due_before: Option<NaiveDateTime>,
}

impl ScheduleFilter {
    /// 解析生产者过滤条件，不支持的字段返回 `InvalidFilter`
    pub fn from_producer(filters: &HashMap<String, Value>) -> SchedulerResult<Self> {
        let mut filter = ScheduleFilter::default();
        for (key, value) in filters {
            let invalid = || SchedulerError::InvalidFilter(format!("{key}={value}"));
            match key.as_str() {
                "status" => {
                    let status = value.as_str().ok_or_else(invalid)?;
                    filter.status = Some(status.parse().map_err(|_| invalid())?);
                }
                "is_strict" => {
                    filter.is_strict = Some(match value {
                        Value::Bool(b) => *b,
                        Value::Number(n) => n.as_i64().map(|n| n != 0).ok_or_else(invalid)?,
                        Value::String(s) => matches!(s.as_str(), "true" | "1"),
                        _ => return Err(invalid()),
                    });
                }
                "priority" => {
                    let priority = as_integer(value).ok_or_else(invalid)?;
                    filter.priority = Some(i32::try_from(priority).map_err(|_| invalid())?);
                }
                "task_id" => filter.task_id = Some(as_integer(value).ok_or_else(invalid)?),
                "task__name" => {
                    filter.task_name = Some(value.as_str().ok_or_else(invalid)?.to_string())
                }
                "task__category__name" => {
                    filter.task_category_name = Some(value.as_str().ok_or_else(invalid)?.to_string())
                }
                _ => {
                    return Err(SchedulerError::InvalidFilter(format!(
                        "unsupported filter field: {key}"
                    )))
                }
            }
        }
        Ok(filter)
    }

    pub fn due_before(mut self, now: NaiveDateTime) -> Self {
        self.due_before = Some(now);
        self
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 日志查询条件，时间窗口作用于 `create_time`，左闭右开
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub queue: Option<String>,
    pub statuses: Vec<LogStatus>,
    pub schedule: Option<i64>,
}

impl LogQuery {
    pub fn window(from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[LogStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_schedule(mut self, schedule: i64) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(&self, category: &Category) -> SchedulerResult<Category>;
    async fn get(&self, id: i64) -> SchedulerResult<Option<Category>>;
    async fn find_by_name(&self, name: &str) -> SchedulerResult<Option<Category>>;
    async fn list(&self) -> SchedulerResult<Vec<Category>>;
}

/// 任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn get(&self, id: i64) -> SchedulerResult<Option<Task>>;
    /// 按唯一键 `(name, parent)` 查找
    async fn find(&self, name: &str, parent: Option<i64>) -> SchedulerResult<Option<Task>>;
    async fn list(&self) -> SchedulerResult<Vec<Task>>;
    /// 删除任务，子任务与计划级联删除
    async fn delete(&self, id: i64) -> SchedulerResult<bool>;
}

/// 计划仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> SchedulerResult<Schedule>;
    async fn get(&self, id: i64) -> SchedulerResult<Option<Schedule>>;
    /// 按 `priority desc, next_schedule_time asc` 排序
    async fn list(&self, filter: &ScheduleFilter) -> SchedulerResult<Vec<Schedule>>;
    /// 状态为 opening 的严格模式计划
    async fn list_strict(&self) -> SchedulerResult<Vec<Schedule>>;
    /// 生产者推进后写回下一次时间；`status` 为 `None` 时不改状态，也不改 `update_time`
    async fn update_progress(
        &self,
        id: i64,
        next_schedule_time: NaiveDateTime,
        status: Option<ScheduleStatus>,
    ) -> SchedulerResult<()>;
    async fn update_status(&self, id: i64, status: ScheduleStatus) -> SchedulerResult<()>;
    /// 整体更新(配置变更)，刷新 `update_time`
    async fn update(&self, schedule: &Schedule) -> SchedulerResult<Schedule>;
    async fn delete(&self, id: i64) -> SchedulerResult<bool>;
}

/// 执行日志仓储，只追加
#[async_trait]
pub trait ScheduleLogRepository: Send + Sync {
    async fn create(&self, log: &ScheduleLog) -> SchedulerResult<ScheduleLog>;
    async fn get(&self, id: i64) -> SchedulerResult<Option<ScheduleLog>>;
    async fn get_many(&self, ids: &[i64]) -> SchedulerResult<Vec<ScheduleLog>>;
    async fn list(&self, query: &LogQuery) -> SchedulerResult<Vec<ScheduleLog>>;
    /// 某计划在 `[from, to)` 内有日志的触发时间(去重)，可限定队列
    async fn schedule_times(
        &self,
        schedule: i64,
        queue: Option<&str>,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> SchedulerResult<Vec<NaiveDateTime>>;
    /// 删除早于 `before` 的日志，跳过 `preserve_log` 计划的日志
    async fn delete_before(&self, before: NaiveDateTime) -> SchedulerResult<u64>;
}

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn create(&self, queue: &ScheduleQueue) -> SchedulerResult<ScheduleQueue>;
    async fn find_by_code(&self, code: &str) -> SchedulerResult<Option<ScheduleQueue>>;
    async fn list_active(&self) -> SchedulerResult<Vec<ScheduleQueue>>;
}

#[async_trait]
pub trait ProducerRepository: Send + Sync {
    async fn create(&self, producer: &ScheduleProducer) -> SchedulerResult<ScheduleProducer>;
    async fn find_by_name(&self, name: &str) -> SchedulerResult<Option<ScheduleProducer>>;
    async fn list_active(&self) -> SchedulerResult<Vec<ScheduleProducer>>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn create(&self, permission: &QueuePermission) -> SchedulerResult<QueuePermission>;
    /// 队列当前生效的权限
    async fn active_for_queue(&self, queue: &str) -> SchedulerResult<Option<QueuePermission>>;
}

#[async_trait]
pub trait ExceptionReportRepository: Send + Sync {
    async fn create(&self, report: &ExceptionReport) -> SchedulerResult<ExceptionReport>;
    async fn list_recent(&self, limit: i64) -> SchedulerResult<Vec<ExceptionReport>>;
}

/// 后台操作员，只记录用户名
#[async_trait]
pub trait OperatorRepository: Send + Sync {
    /// 已存在时返回 `false`
    async fn ensure(&self, username: &str) -> SchedulerResult<bool>;
    async fn list(&self) -> SchedulerResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_from_producer() {
        let filters = HashMap::from([
            ("status".to_string(), json!("opening")),
            ("is_strict".to_string(), json!(true)),
            ("priority".to_string(), json!("3")),
            ("task__category__name".to_string(), json!("系统任务")),
        ]);
        let filter = ScheduleFilter::from_producer(&filters).unwrap();
        assert_eq!(filter.status, Some(ScheduleStatus::Opening));
        assert_eq!(filter.is_strict, Some(true));
        assert_eq!(filter.priority, Some(3));
        assert_eq!(filter.task_category_name.as_deref(), Some("系统任务"));
        assert_eq!(filter.due_before, None);
    }

    #[test]
    fn test_filter_rejects_unknown_fields() {
        let filters = HashMap::from([("task__user".to_string(), json!(1))]);
        assert!(matches!(
            ScheduleFilter::from_producer(&filters),
            Err(SchedulerError::InvalidFilter(_))
        ));
        let filters = HashMap::from([("status".to_string(), json!("sleeping"))]);
        assert!(ScheduleFilter::from_producer(&filters).is_err());
    }
}
