use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::task::empty_object;
use crate::errors::SchedulerError;
use crate::SchedulerResult;

/// 调度队列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleQueue {
    pub id: i64,
    /// 队列编码，仅允许 `[a-zA-Z_-]`
    pub code: String,
    pub name: String,
    pub status: bool,
    pub module: QueueModule,
    #[serde(default = "empty_object")]
    pub config: Value,
}

impl ScheduleQueue {
    pub fn new(code: impl Into<String>, name: impl Into<String>, module: QueueModule) -> Self {
        Self {
            id: 0,
            code: code.into(),
            name: name.into(),
            status: true,
            module,
            config: empty_object(),
        }
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.code.is_empty()
            || !self
                .code
                .chars()
                .all(|c| c.is_ascii_alphabetic() || c == '_' || c == '-')
        {
            return Err(SchedulerError::config_invalid(format!(
                "invalid queue code: {}",
                self.code
            )));
        }
        self.module.validate_config(&self.config)
    }
}

/// 队列后端实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueModule {
    #[serde(rename = "memory-fifo")]
    MemoryFifo,
    #[serde(rename = "memory-lifo")]
    MemoryLifo,
    /// 外部缓存服务上的FIFO队列
    #[serde(rename = "cache-fifo", alias = "remote-fifo")]
    CacheFifo,
    /// 外部缓存服务上的LIFO队列
    #[serde(rename = "cache-lifo", alias = "remote-lifo")]
    CacheLifo,
}

impl QueueModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueModule::MemoryFifo => "memory-fifo",
            QueueModule::MemoryLifo => "memory-lifo",
            QueueModule::CacheFifo => "cache-fifo",
            QueueModule::CacheLifo => "cache-lifo",
        }
    }

    /// 实例化后端之前先校验配置字段与类型
    pub fn validate_config(&self, config: &Value) -> SchedulerResult<()> {
        let Some(fields) = config.as_object() else {
            if config.is_null() {
                return Ok(());
            }
            return Err(SchedulerError::config_invalid("queue config must be an object"));
        };
        for (key, value) in fields {
            let ok = match (self, key.as_str()) {
                (_, "description") => value.is_string(),
                (QueueModule::CacheFifo | QueueModule::CacheLifo, "key") => {
                    value.as_str().map(|s| !s.is_empty()).unwrap_or(false)
                }
                _ => {
                    return Err(SchedulerError::config_invalid(format!(
                        "unknown field {key} for queue module {}",
                        self.as_str()
                    )))
                }
            };
            if !ok {
                return Err(SchedulerError::config_invalid(format!(
                    "invalid value for field {key}: {value}"
                )));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for QueueModule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory-fifo" => Ok(QueueModule::MemoryFifo),
            "memory-lifo" => Ok(QueueModule::MemoryLifo),
            "cache-fifo" | "remote-fifo" => Ok(QueueModule::CacheFifo),
            "cache-lifo" | "remote-lifo" => Ok(QueueModule::CacheLifo),
            other => Err(SchedulerError::config_invalid(format!(
                "unsupported queue module: {other}"
            ))),
        }
    }
}

/// 生产者: 把满足过滤条件的到期计划放入目标队列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleProducer {
    pub id: i64,
    pub name: String,
    /// 字段 → 值，合取条件
    #[serde(default)]
    pub filters: HashMap<String, Value>,
    pub lte_now: bool,
    /// 目标队列编码
    pub queue: String,
    pub status: bool,
}

impl ScheduleProducer {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            filters: HashMap::new(),
            lte_now: true,
            queue: queue.into(),
            status: true,
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }
}

/// 队列消费权限，每个队列至多一条生效记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePermission {
    pub id: i64,
    pub queue: String,
    #[serde(rename = "type")]
    pub permission_type: PermissionType,
    #[serde(default = "empty_object")]
    pub config: Value,
    pub status: bool,
}

impl QueuePermission {
    pub fn ip_allowlist(queue: impl Into<String>, ips: &[&str]) -> Self {
        Self {
            id: 0,
            queue: queue.into(),
            permission_type: PermissionType::IpAllowlist,
            config: serde_json::json!({ "ip_whitelist": ips }),
            status: true,
        }
    }

    /// 校验客户端IP，不通过时返回给客户端的错误信息
    pub fn check_ip(&self, ip: &str) -> Result<(), String> {
        match self.permission_type {
            PermissionType::IpAllowlist => {
                let allowed = self
                    .config
                    .get("ip_whitelist")
                    .and_then(Value::as_array)
                    .map(|ips| ips.iter().any(|v| v.as_str() == Some(ip)))
                    .unwrap_or(false);
                if allowed {
                    Ok(())
                } else {
                    Err(format!("IP {ip} Not Allowed"))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionType {
    #[serde(rename = "ip-allowlist")]
    IpAllowlist,
}

text_enum!(PermissionType {
    IpAllowlist => "ip-allowlist",
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_code_validation() {
        assert!(ScheduleQueue::new("opening", "系统任务队列", QueueModule::MemoryFifo)
            .validate()
            .is_ok());
        assert!(ScheduleQueue::new("bad code", "x", QueueModule::MemoryFifo)
            .validate()
            .is_err());
        assert!(ScheduleQueue::new("q1", "x", QueueModule::MemoryFifo)
            .validate()
            .is_err());
    }

    #[test]
    fn test_queue_config_is_checked_per_module() {
        assert!(QueueModule::CacheFifo
            .validate_config(&json!({"key": "remote"}))
            .is_ok());
        assert!(QueueModule::CacheFifo.validate_config(&json!({"key": 1})).is_err());
        assert!(QueueModule::CacheLifo
            .validate_config(&json!({"key": "stack", "description": "最新优先"}))
            .is_ok());
        assert!(QueueModule::CacheLifo.validate_config(&json!({"key": ""})).is_err());
        assert!(QueueModule::MemoryFifo
            .validate_config(&json!({"key": "remote"}))
            .is_err());
        assert!(QueueModule::MemoryLifo.validate_config(&json!([])).is_err());
    }

    #[test]
    fn test_ip_allowlist() {
        let permission = QueuePermission::ip_allowlist("opening", &["10.0.0.1"]);
        assert!(permission.check_ip("10.0.0.1").is_ok());
        assert_eq!(
            permission.check_ip("10.0.0.2").unwrap_err(),
            "IP 10.0.0.2 Not Allowed"
        );
    }

    #[test]
    fn test_remote_fifo_alias() {
        let module: QueueModule = serde_json::from_value(json!("remote-fifo")).unwrap();
        assert_eq!(module, QueueModule::CacheFifo);
    }

    #[test]
    fn test_remote_lifo_alias() {
        let module: QueueModule = serde_json::from_value(json!("remote-lifo")).unwrap();
        assert_eq!(module, QueueModule::CacheLifo);
        assert_eq!("cache-lifo".parse::<QueueModule>().unwrap(), QueueModule::CacheLifo);
        assert_eq!(serde_json::to_value(module).unwrap(), json!("cache-lifo"));
    }
}
