//! 计划信封: 生产者 → 队列 → 消费者之间传递的序列化计划

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{Category, Schedule, ScheduleCallback, ScheduleLog, Task};
use crate::time::datetime_format;
use crate::SchedulerResult;

/// 信封的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    /// 生产者按计划时间产生
    Auto,
    /// 由失败日志重试产生
    Retry,
    /// 通过put接口或补漏放入
    Put,
    /// 要求未注册的消费者先注册
    Register,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeCategory {
    pub name: String,
    #[serde(default)]
    pub parent: Option<i64>,
    #[serde(default)]
    pub config: Option<Value>,
}

impl From<&Category> for EnvelopeCategory {
    fn from(category: &Category) -> Self {
        Self {
            name: category.name.clone(),
            parent: category.parent,
            config: Some(category.config.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeTask {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category: Option<EnvelopeCategory>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub parent: Option<Box<EnvelopeTask>>,
}

impl EnvelopeTask {
    pub fn new(task: &Task, category: Option<&Category>, parent: Option<EnvelopeTask>) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            category: category.map(EnvelopeCategory::from),
            config: task.config.clone(),
            parent: parent.map(Box::new),
        }
    }

    /// 自身与祖先的任务名，从近到远
    pub fn lineage(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        let mut current = self.parent.as_deref();
        while let Some(task) = current {
            names.push(task.name.as_str());
            current = task.parent.as_deref();
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEnvelope {
    pub id: i64,
    #[serde(with = "datetime_format")]
    pub schedule_time: NaiveDateTime,
    pub task: EnvelopeTask,
    #[serde(default)]
    pub callback: Option<ScheduleCallback>,
    pub queue: String,
    #[serde(default)]
    pub config: Value,
    pub generator: Generator,
    #[serde(default)]
    pub last_log: Option<Value>,
    #[serde(default)]
    pub preserve_log: bool,
}

impl ScheduleEnvelope {
    /// 以计划当前的 `next_schedule_time` 作为本次触发时间
    pub fn from_schedule(
        schedule: &Schedule,
        task: EnvelopeTask,
        queue: impl Into<String>,
        generator: Generator,
    ) -> Self {
        Self {
            id: schedule.id,
            schedule_time: schedule.next_schedule_time,
            task,
            callback: schedule.callback.clone(),
            queue: queue.into(),
            config: schedule.config.to_value(),
            generator,
            last_log: None,
            preserve_log: schedule.preserve_log,
        }
    }

    /// 重试信封: 沿用原日志的触发时间与队列，并携带原日志结果
    pub fn for_retry(schedule: &Schedule, task: EnvelopeTask, log: &ScheduleLog) -> Self {
        let mut envelope = Self::from_schedule(schedule, task, log.queue.clone(), Generator::Retry);
        envelope.schedule_time = log.schedule_time;
        envelope.last_log = Some(log.result.clone());
        envelope
    }

    /// 未注册消费者拉取时下发的注册信封
    pub fn register(queue: &str, consumer_id: &str, now: NaiveDateTime) -> Self {
        Self {
            id: 0,
            schedule_time: now,
            task: EnvelopeTask {
                id: 0,
                name: "register".to_string(),
                category: Some(EnvelopeCategory {
                    name: crate::builtin_names::CATEGORY_SYSTEM.to_string(),
                    parent: None,
                    config: None,
                }),
                config: json!({
                    "action": "register",
                    "consumer_id": consumer_id,
                    "url": "/consumer/register",
                }),
                parent: None,
            },
            callback: None,
            queue: queue.to_string(),
            config: json!({}),
            generator: Generator::Register,
            last_log: None,
            preserve_log: false,
        }
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> SchedulerResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// put-raw 接口要求每个信封都带上的字段
pub const REQUIRED_ENVELOPE_FIELDS: [&str; 4] = ["schedule_time", "task", "id", "queue"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStatus;
    use crate::time::{parse_datetime, ScheduleConfig};

    #[test]
    fn test_envelope_wire_shape() {
        let config = ScheduleConfig::from_value(json!({
            "schedule_type": "S",
            "S": {"period": 60, "schedule_start_time": "2024-01-01 00:00:00"}
        }))
        .unwrap();
        let mut schedule =
            Schedule::new(7, config, parse_datetime("2024-01-01 00:00:00").unwrap()).unwrap();
        schedule.id = 3;
        let mut parent = Task::new("Shell执行");
        parent.id = 1;
        let mut task = Task::new("hello").with_config(json!({"script": "echo hi"}));
        task.id = 7;
        let category = Category::new("系统测试");
        let envelope_task = EnvelopeTask::new(&task, Some(&category), Some(EnvelopeTask::new(&parent, None, None)));

        let envelope = ScheduleEnvelope::from_schedule(&schedule, envelope_task, "opening", Generator::Auto);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["schedule_time"], "2024-01-01 00:00:00");
        assert_eq!(value["generator"], "auto");
        assert_eq!(value["queue"], "opening");
        assert_eq!(value["task"]["category"]["name"], "系统测试");
        assert_eq!(value["task"]["parent"]["name"], "Shell执行");
        assert_eq!(value["callback"], Value::Null);
        assert_eq!(value["config"]["schedule_type"], "S");

        let decoded = ScheduleEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.task.lineage(), vec!["hello", "Shell执行"]);
    }

    #[test]
    fn test_retry_envelope_keeps_log_time() {
        let config = ScheduleConfig::from_value(json!({
            "schedule_type": "S",
            "S": {"period": 60, "schedule_start_time": "2024-01-01 00:00:00"}
        }))
        .unwrap();
        let schedule =
            Schedule::new(7, config, parse_datetime("2024-01-02 00:00:00").unwrap()).unwrap();
        let log = ScheduleLog::new(
            schedule.id,
            "opening",
            parse_datetime("2024-01-01 08:00:00").unwrap(),
            LogStatus::Exception,
            json!({"error": "boom"}),
        );
        let task = EnvelopeTask::new(&Task::new("t"), None, None);
        let envelope = ScheduleEnvelope::for_retry(&schedule, task, &log);
        assert_eq!(envelope.generator, Generator::Retry);
        assert_eq!(envelope.schedule_time, log.schedule_time);
        assert_eq!(envelope.last_log, Some(json!({"error": "boom"})));
    }
}
