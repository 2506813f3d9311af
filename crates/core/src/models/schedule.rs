use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SchedulerError;
use crate::time::{datetime_format, is_max_datetime, max_datetime, ScheduleConfig};
use crate::SchedulerResult;

/// 计划
///
/// 约束: `schedule_start_time ≤ next_schedule_time ≤ schedule_end_time`，
/// 状态为 `done` 时 `next_schedule_time` 为哨兵时间。
/// 严格模式计划不允许 `base_on_now`，否则无法做缺失检测。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub task: i64,
    pub priority: i32,
    #[serde(with = "datetime_format")]
    pub next_schedule_time: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub schedule_start_time: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub schedule_end_time: NaiveDateTime,
    pub config: ScheduleConfig,
    pub status: ScheduleStatus,
    pub is_strict: bool,
    pub callback: Option<ScheduleCallback>,
    pub preserve_log: bool,
    #[serde(with = "datetime_format")]
    pub create_time: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub update_time: NaiveDateTime,
}

impl Schedule {
    /// 创建计划并计算首次触发时间
    pub fn new(task: i64, config: ScheduleConfig, now: NaiveDateTime) -> SchedulerResult<Self> {
        let start = config.start_time().unwrap_or(now);
        let from = if config.base_on_now { now } else { start };
        let next_schedule_time = config.first(from)?;
        Ok(Self {
            id: 0,
            task,
            priority: 0,
            next_schedule_time,
            schedule_start_time: start,
            schedule_end_time: max_datetime(),
            config,
            status: ScheduleStatus::Opening,
            is_strict: false,
            callback: None,
            preserve_log: false,
            create_time: now,
            update_time: now,
        })
    }

    pub fn with_status(mut self, status: ScheduleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_end_time(mut self, end: NaiveDateTime) -> Self {
        self.schedule_end_time = end;
        self
    }

    pub fn strict(mut self) -> Self {
        self.is_strict = true;
        self
    }

    pub fn with_callback(mut self, callback: ScheduleCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.is_strict && self.config.base_on_now {
            return Err(SchedulerError::config_invalid(
                "strict schedule can't be based on now",
            ));
        }
        if self.schedule_start_time > self.schedule_end_time {
            return Err(SchedulerError::config_invalid(
                "schedule_start_time is after schedule_end_time",
            ));
        }
        Ok(())
    }

    /// 推进到下一次触发时间，超过结束时间则置为 `done`
    ///
    /// 返回值表示状态是否发生变化，仓储据此决定是否写入状态。
    pub fn advance(&mut self, now: NaiveDateTime) -> SchedulerResult<bool> {
        let mut next = self.config.next(self.next_schedule_time, now)?;
        if next > self.schedule_end_time {
            next = max_datetime();
        }
        self.next_schedule_time = next;
        if is_max_datetime(&next) && self.status != ScheduleStatus::Done {
            self.status = ScheduleStatus::Done;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn is_done(&self) -> bool {
        self.status == ScheduleStatus::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Opening,
    Auto,
    Closed,
    Done,
    Test,
    Error,
}

text_enum!(ScheduleStatus {
    Opening => "opening",
    Auto => "auto",
    Closed => "closed",
    Done => "done",
    Test => "test",
    Error => "error",
});

/// 计划回调，原样随信封下发给消费者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleCallback {
    pub name: String,
    pub trigger_event: String,
    #[serde(default)]
    pub config: Value,
}
