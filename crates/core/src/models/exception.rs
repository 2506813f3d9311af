use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::time::datetime_format;

/// 客户端上报的异常，只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionReport {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub ip: String,
    pub content: String,
    #[serde(with = "datetime_format")]
    pub create_time: NaiveDateTime,
}

/// 异常计划的成因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionReason {
    FailedDirectly,
    ScheduleLogNotFound,
    MaximumRetriesExceeded,
}

text_enum!(ExceptionReason {
    FailedDirectly => "failed_directly",
    ScheduleLogNotFound => "schedule_log_not_found",
    MaximumRetriesExceeded => "maximum_retries_exceeded",
});

/// 由日志派生的异常计划视图，不落库
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionSchedule {
    pub schedule_id: i64,
    #[serde(with = "datetime_format")]
    pub schedule_time: NaiveDateTime,
    pub queue: String,
    pub reason: ExceptionReason,
    /// 触发该结论的最新日志，缺失类为空
    pub log_id: Option<i64>,
    #[serde(default, with = "datetime_format::option")]
    pub latest_time: Option<NaiveDateTime>,
    pub count: usize,
}
