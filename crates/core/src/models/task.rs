use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::datetime_format;

/// 任务分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent: Option<i64>,
    #[serde(default = "empty_object")]
    pub config: Value,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            parent: None,
            config: empty_object(),
        }
    }
}

/// 任务定义
///
/// 任务组成一棵树: 子任务通过 `parent` 指向父任务，父任务名通常决定执行器。
/// `(name, parent)` 唯一，删除任务会级联删除子任务与其计划。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub parent: Option<i64>,
    pub name: String,
    pub category: Option<i64>,
    pub status: TaskStatus,
    /// 任务自由配置，执行器按需读取
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(with = "datetime_format")]
    pub create_time: NaiveDateTime,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            parent: None,
            name: name.into(),
            category: None,
            status: TaskStatus::Enabled,
            config: empty_object(),
            create_time: crate::time::now(),
        }
    }

    pub fn with_parent(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_category(mut self, category: i64) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enabled,
    Disabled,
}

text_enum!(TaskStatus {
    Enabled => "enabled",
    Disabled => "disabled",
});

pub(crate) fn empty_object() -> Value {
    Value::Object(Default::default())
}
