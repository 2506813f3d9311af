use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::datetime_format;

/// 计划执行日志
///
/// `schedule_time` 是被执行的那次触发时间，不是写日志的时间。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLog {
    pub id: i64,
    pub schedule: i64,
    pub status: LogStatus,
    pub queue: String,
    #[serde(default)]
    pub result: Value,
    #[serde(with = "datetime_format")]
    pub schedule_time: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub create_time: NaiveDateTime,
}

impl ScheduleLog {
    pub fn new(
        schedule: i64,
        queue: impl Into<String>,
        schedule_time: NaiveDateTime,
        status: LogStatus,
        result: Value,
    ) -> Self {
        Self {
            id: 0,
            schedule,
            status,
            queue: queue.into(),
            result,
            schedule_time,
            create_time: crate::time::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Init,
    Running,
    Succeed,
    Empty,
    NoRetry,
    Exception,
    PartialFailed,
    Failed,
    Timeout,
}

text_enum!(LogStatus {
    Init => "init",
    Running => "running",
    Succeed => "succeed",
    Empty => "empty",
    NoRetry => "no_retry",
    Exception => "exception",
    PartialFailed => "partial_failed",
    Failed => "failed",
    Timeout => "timeout",
});

impl LogStatus {
    /// 执行崩溃或超时，对账器可能重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogStatus::Exception | LogStatus::Timeout)
    }
}
