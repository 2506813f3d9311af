use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use scheduler_core::models::{QueueModule, ScheduleQueue};
use scheduler_core::traits::{CacheService, QueueBackend, QueueRepository};
use scheduler_core::{SchedulerError, SchedulerResult};

use super::cache::CacheQueue;
use super::memory::MemoryQueue;

struct QueueEntry {
    record: ScheduleQueue,
    backend: Arc<dyn QueueBackend>,
}

/// 队列注册表：编码 → 队列后端
pub struct QueueManager {
    queues: RwLock<HashMap<String, QueueEntry>>,
    cache: Option<Arc<dyn CacheService>>,
}

impl QueueManager {
    pub fn new(cache: Option<Arc<dyn CacheService>>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            cache,
        }
    }

    /// 校验配置后创建后端
    pub fn build(&self, queue: &ScheduleQueue) -> SchedulerResult<Arc<dyn QueueBackend>> {
        queue.validate()?;
        let backend: Arc<dyn QueueBackend> = match queue.module {
            QueueModule::MemoryFifo => Arc::new(MemoryQueue::fifo()),
            QueueModule::MemoryLifo => Arc::new(MemoryQueue::lifo()),
            QueueModule::CacheFifo | QueueModule::CacheLifo => {
                let cache = self.cache.clone().ok_or_else(|| {
                    SchedulerError::Configuration(format!(
                        "队列({})需要缓存服务，但未配置缓存服务",
                        queue.code
                    ))
                })?;
                let key = queue
                    .config
                    .get("key")
                    .and_then(|k| k.as_str())
                    .unwrap_or(&queue.code);
                match queue.module {
                    QueueModule::CacheLifo => Arc::new(CacheQueue::lifo(cache, key)),
                    _ => Arc::new(CacheQueue::fifo(cache, key)),
                }
            }
        };
        Ok(backend)
    }

    /// 注册或替换一个队列
    pub async fn register(&self, queue: ScheduleQueue) -> SchedulerResult<Arc<dyn QueueBackend>> {
        let backend = self.build(&queue)?;
        let code = queue.code.clone();
        self.queues.write().await.insert(
            code,
            QueueEntry {
                record: queue,
                backend: backend.clone(),
            },
        );
        Ok(backend)
    }

    pub async fn get(&self, code: &str) -> SchedulerResult<Arc<dyn QueueBackend>> {
        self.queues
            .read()
            .await
            .get(code)
            .map(|entry| entry.backend.clone())
            .ok_or_else(|| SchedulerError::QueueMissing(code.to_string()))
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.queues.read().await.contains_key(code)
    }

    pub async fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.queues.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// 各队列当前长度，读取失败的队列记为 0
    pub async fn sizes(&self) -> BTreeMap<String, usize> {
        let backends: Vec<(String, Arc<dyn QueueBackend>)> = self
            .queues
            .read()
            .await
            .iter()
            .map(|(code, entry)| (code.clone(), entry.backend.clone()))
            .collect();
        let results = join_all(backends.iter().map(|(_, backend)| backend.size())).await;
        let mut sizes = BTreeMap::new();
        for ((code, _), result) in backends.into_iter().zip(results) {
            let size = match result {
                Ok(size) => size,
                Err(e) => {
                    warn!("读取队列({})长度失败: {}", code, e);
                    0
                }
            };
            metrics::gauge!("scheduler_queue_size", "queue" => code.clone()).set(size as f64);
            sizes.insert(code, size);
        }
        sizes
    }

    /// 按目录重新加载启用的队列；模块与配置未变的队列保留原后端和其中的数据
    #[instrument(skip_all)]
    pub async fn reload(&self, repository: &dyn QueueRepository) -> SchedulerResult<usize> {
        let records = repository.list_active().await?;
        let mut queues = self.queues.write().await;
        let mut next = HashMap::with_capacity(records.len());
        for record in records {
            let kept = queues
                .remove(&record.code)
                .filter(|entry| entry.record.module == record.module && entry.record.config == record.config);
            let backend = match kept {
                Some(entry) => entry.backend,
                None => match self.build(&record) {
                    Ok(backend) => backend,
                    Err(e) => {
                        warn!("队列({})配置无效，跳过: {}", record.code, e);
                        continue;
                    }
                },
            };
            next.insert(record.code.clone(), QueueEntry { record, backend });
        }
        let count = next.len();
        *queues = next;
        info!("加载队列 {} 个", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let manager = QueueManager::new(None);
        manager
            .register(ScheduleQueue::new("opening", "系统任务队列", QueueModule::MemoryFifo))
            .await
            .unwrap();
        let queue = manager.get("opening").await.unwrap();
        queue.push(vec!["a".into()]).await.unwrap();
        assert_eq!(manager.sizes().await.get("opening"), Some(&1));
        assert!(matches!(
            manager.get("missing").await,
            Err(SchedulerError::QueueMissing(code)) if code == "missing"
        ));
    }

    #[tokio::test]
    async fn test_cache_queue_requires_cache_service() {
        let queue = ScheduleQueue::new("remote", "远程队列", QueueModule::CacheFifo);
        assert!(QueueManager::new(None).build(&queue).is_err());

        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let manager = QueueManager::new(Some(cache.clone()));
        let mut queue = queue;
        queue.config = json!({"key": "shared"});
        let backend = manager.register(queue).await.unwrap();
        backend.push(vec!["x".into()]).await.unwrap();
        assert_eq!(cache.llen("shared").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_lifo_queue_pops_newest() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let manager = QueueManager::new(Some(cache.clone()));
        let mut queue = ScheduleQueue::new("latest", "最新优先", QueueModule::CacheLifo);
        queue.config = json!({"key": "latest-shared"});
        let backend = manager.register(queue).await.unwrap();
        backend.push(vec!["old".into(), "new".into()]).await.unwrap();
        assert_eq!(cache.llen("latest-shared").await.unwrap(), 2);
        assert_eq!(backend.try_pop().await.unwrap(), Some("new".to_string()));

        let remote = ScheduleQueue::new("remote", "远程队列", QueueModule::CacheLifo);
        assert!(QueueManager::new(None).build(&remote).is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_build() {
        let mut queue = ScheduleQueue::new("opening", "队列", QueueModule::MemoryFifo);
        queue.config = json!({"key": "x"});
        assert!(QueueManager::new(None).build(&queue).is_err());
    }
}
