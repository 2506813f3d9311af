#![allow(dead_code)]

use chrono::NaiveDateTime;
use serde_json::json;
use std::sync::Arc;

use scheduler_core::config::DispatchConfig;
use scheduler_core::models::{QueueModule, Schedule, ScheduleQueue, Task};
use scheduler_core::time::{parse_datetime, ScheduleConfig};
use scheduler_core::traits::{CacheService, QueueBackend};
use scheduler_core::Catalogue;
use scheduler_dispatcher::{ConsumerRegistry, DispatchService};
use scheduler_infrastructure::{DatabaseManager, LocalCacheClient, QueueManager};

pub fn dt(s: &str) -> NaiveDateTime {
    parse_datetime(s).unwrap()
}

pub fn period(seconds: i64, start: &str) -> ScheduleConfig {
    ScheduleConfig::from_value(json!({
        "schedule_type": "S",
        "S": {"period": seconds, "schedule_start_time": start}
    }))
    .unwrap()
}

pub fn daily(time: &str) -> ScheduleConfig {
    ScheduleConfig::from_value(json!({
        "schedule_type": "T",
        "T": {"type": "DAY", "time": time, "DAY": {"period": 1}}
    }))
    .unwrap()
}

/// 内存目录 + 进程内缓存，预置 opening 与 test 两个内存队列
pub struct Fixture {
    pub catalogue: Catalogue,
    pub cache: Arc<dyn CacheService>,
    pub queues: Arc<QueueManager>,
    pub registry: Arc<ConsumerRegistry>,
    pub dispatch: Arc<DispatchService>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_dispatch(DispatchConfig::default()).await
    }

    pub async fn with_dispatch(config: DispatchConfig) -> Self {
        let catalogue = DatabaseManager::in_memory().await.unwrap().catalogue();
        for (code, name) in [("opening", "系统任务队列"), ("test", "测试任务队列")] {
            catalogue
                .queues
                .create(&ScheduleQueue::new(code, name, QueueModule::MemoryFifo))
                .await
                .unwrap();
        }

        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let queues = Arc::new(QueueManager::new(Some(cache.clone())));
        queues.reload(catalogue.queues.as_ref()).await.unwrap();
        let registry = Arc::new(ConsumerRegistry::new(cache.clone(), &config));
        let dispatch = Arc::new(DispatchService::new(
            catalogue.clone(),
            queues.clone(),
            registry.clone(),
            config,
        ));
        Self {
            catalogue,
            cache,
            queues,
            registry,
            dispatch,
        }
    }

    pub async fn task(&self, name: &str) -> Task {
        self.catalogue.tasks.create(&Task::new(name)).await.unwrap()
    }

    pub async fn schedule(&self, schedule: Schedule) -> Schedule {
        self.catalogue.schedules.create(&schedule).await.unwrap()
    }

    pub async fn queue(&self, code: &str) -> Arc<dyn QueueBackend> {
        self.queues.get(code).await.unwrap()
    }

    /// 弹出队列中的全部信封
    pub async fn drain(&self, code: &str) -> Vec<serde_json::Value> {
        let queue = self.queue(code).await;
        let mut items = Vec::new();
        while let Some(raw) = queue.try_pop().await.unwrap() {
            items.push(serde_json::from_str(&raw).unwrap());
        }
        items
    }
}
