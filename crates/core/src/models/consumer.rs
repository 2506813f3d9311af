use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::datetime_format;

/// 消费者成员记录
///
/// 以 `consumer_id` 为标识，对外视为不可变: 修改等于删除后重新注册。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    /// 未指定时注册接口按毫秒时间戳分配
    #[serde(default)]
    pub consumer_id: i64,
    #[serde(default)]
    pub machine: Machine,
    #[serde(default)]
    pub consume_url: String,
    #[serde(default)]
    pub consume_kwargs: Value,
    #[serde(default)]
    pub program_type: ProgramType,
    #[serde(default)]
    pub program_setting: Value,
    #[serde(default)]
    pub program_env: Value,
    #[serde(default)]
    pub program_source: ProgramSource,
    #[serde(default)]
    pub consume_status: ConsumeStatus,
    #[serde(default)]
    pub setting: Value,
    #[serde(default)]
    pub program: Option<Value>,
    #[serde(default, with = "datetime_format::option")]
    pub create_time: Option<NaiveDateTime>,
}

impl Consumer {
    pub fn new(consumer_id: i64) -> Self {
        Self {
            consumer_id,
            machine: Machine::default(),
            consume_url: String::new(),
            consume_kwargs: Value::Null,
            program_type: ProgramType::default(),
            program_setting: Value::Null,
            program_env: Value::Null,
            program_source: ProgramSource::default(),
            consume_status: ConsumeStatus::default(),
            setting: Value::Null,
            program: None,
            create_time: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub intranet_ip: String,
    #[serde(default)]
    pub internet_ip: String,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    Docker,
    #[default]
    Process,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramSource {
    #[default]
    Report,
    Detect,
    Admin,
    Api,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumeStatus {
    Created,
    #[default]
    Running,
    Stopped,
    Failed,
}
