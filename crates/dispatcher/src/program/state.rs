use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use scheduler_core::time::datetime_format;
use scheduler_core::traits::CacheService;
use scheduler_core::{SchedulerError, SchedulerResult};

/// 程序运行状态，保存在缓存服务的哈希 `program:<name>` 中，每个字段一个JSON文本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramState {
    pub ident: Option<String>,
    pub is_running: bool,
    pub engine: String,
    #[serde(with = "datetime_format::option")]
    pub create_time: Option<NaiveDateTime>,
    pub program_name: String,
    pub log_file: Option<String>,
    pub scheduled_count: u64,
    #[serde(with = "datetime_format::option")]
    pub last_schedule_time: Option<NaiveDateTime>,
    pub succeed_count: u64,
    pub failed_count: u64,
    #[serde(with = "datetime_format::option")]
    pub last_process_time: Option<NaiveDateTime>,
    /// 队列编码 → 累计放入数
    pub put_counts: BTreeMap<String, u64>,
}

impl ProgramState {
    pub fn new(program_name: impl Into<String>) -> Self {
        Self {
            program_name: program_name.into(),
            ..Default::default()
        }
    }

    fn fields(&self) -> SchedulerResult<BTreeMap<String, String>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, v.to_string())).collect()),
            other => Err(SchedulerError::Internal(format!("程序状态不是对象: {other}"))),
        }
    }

    fn from_fields(raw: HashMap<String, String>) -> SchedulerResult<Self> {
        let map: serde_json::Map<String, Value> = raw
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_str(&v).ok().map(|v| (k, v)))
            .collect();
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// 程序状态句柄：读取时拉取最新值，写入时只推送变化的字段
#[derive(Clone)]
pub struct ProgramStateHandle {
    name: String,
    cache: Arc<dyn CacheService>,
    state: Arc<Mutex<ProgramState>>,
}

impl ProgramStateHandle {
    pub fn new(name: impl Into<String>, cache: Arc<dyn CacheService>) -> Self {
        let name = name.into();
        Self {
            state: Arc::new(Mutex::new(ProgramState::new(name.clone()))),
            name,
            cache,
        }
    }

    pub fn key(&self) -> String {
        format!("program:{}", self.name)
    }

    pub async fn pull(&self) -> SchedulerResult<ProgramState> {
        let raw = self.cache.hgetall(&self.key()).await?;
        let mut state = self.state.lock().await;
        if !raw.is_empty() {
            *state = ProgramState::from_fields(raw)?;
        }
        Ok(state.clone())
    }

    pub async fn update<F>(&self, apply: F) -> SchedulerResult<ProgramState>
    where
        F: FnOnce(&mut ProgramState),
    {
        let mut state = self.state.lock().await;
        let before = state.fields()?;
        apply(&mut state);
        let changed: HashMap<String, String> = state
            .fields()?
            .into_iter()
            .filter(|(field, value)| before.get(field) != Some(value))
            .collect();
        if !changed.is_empty() {
            debug!("程序 {} 状态更新 {} 个字段", self.name, changed.len());
            self.cache.hset(&self.key(), changed).await?;
        }
        Ok(state.clone())
    }

    /// 本地缓存的状态，不访问缓存服务
    pub async fn snapshot(&self) -> ProgramState {
        self.state.lock().await.clone()
    }

    pub async fn delete(&self) -> SchedulerResult<()> {
        self.cache.delete(&self.key()).await?;
        *self.state.lock().await = ProgramState::new(self.name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::time::parse_datetime;
    use scheduler_infrastructure::cache::LocalCacheClient;

    #[tokio::test]
    async fn test_update_pushes_changed_fields_only() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let handle = ProgramStateHandle::new("producer", cache.clone());
        handle
            .update(|s| {
                s.is_running = true;
                s.scheduled_count = 3;
            })
            .await
            .unwrap();

        let stored = cache.hgetall("program:producer").await.unwrap();
        assert_eq!(stored.get("is_running").map(String::as_str), Some("true"));
        assert_eq!(stored.get("scheduled_count").map(String::as_str), Some("3"));
        assert!(!stored.contains_key("program_name"));
    }

    #[tokio::test]
    async fn test_pull_reads_other_writers() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let writer = ProgramStateHandle::new("producer", cache.clone());
        let reader = ProgramStateHandle::new("producer", cache.clone());
        let time = parse_datetime("2024-01-01 00:02:00").unwrap();
        writer
            .update(|s| {
                s.last_schedule_time = Some(time);
                s.put_counts.insert("opening".into(), 3);
            })
            .await
            .unwrap();

        let state = reader.pull().await.unwrap();
        assert_eq!(state.last_schedule_time, Some(time));
        assert_eq!(state.put_counts.get("opening"), Some(&3));

        reader.delete().await.unwrap();
        assert!(cache.hgetall("program:producer").await.unwrap().is_empty());
    }
}
