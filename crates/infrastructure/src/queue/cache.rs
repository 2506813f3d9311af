use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use scheduler_core::traits::{CacheService, QueueBackend};
use scheduler_core::SchedulerResult;

use super::memory::PopOrder;

/// 缓存服务上的队列，多个进程可以共享
///
/// 推入总是追加到尾部，`order` 决定从哪一端取。
pub struct CacheQueue {
    cache: Arc<dyn CacheService>,
    key: String,
    order: PopOrder,
}

impl CacheQueue {
    pub fn new(cache: Arc<dyn CacheService>, key: impl Into<String>, order: PopOrder) -> Self {
        Self {
            cache,
            key: key.into(),
            order,
        }
    }

    pub fn fifo(cache: Arc<dyn CacheService>, key: impl Into<String>) -> Self {
        Self::new(cache, key, PopOrder::Fifo)
    }

    pub fn lifo(cache: Arc<dyn CacheService>, key: impl Into<String>) -> Self {
        Self::new(cache, key, PopOrder::Lifo)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn order(&self) -> PopOrder {
        self.order
    }
}

#[async_trait]
impl QueueBackend for CacheQueue {
    async fn push(&self, values: Vec<String>) -> SchedulerResult<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        self.cache.qpush(&self.key, values).await
    }

    async fn try_pop(&self) -> SchedulerResult<Option<String>> {
        match self.order {
            PopOrder::Fifo => self.cache.qpop(&self.key).await,
            PopOrder::Lifo => self.cache.qrpop(&self.key).await,
        }
    }

    async fn pop(&self, timeout: Duration) -> SchedulerResult<Option<String>> {
        // 服务端按整秒等待，不足一秒按一秒算
        let seconds = if timeout.is_zero() {
            0
        } else {
            timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
        };
        match self.order {
            PopOrder::Fifo => self.cache.qbpop(&self.key, seconds).await,
            PopOrder::Lifo => self.cache.qbrpop(&self.key, seconds).await,
        }
    }

    async fn size(&self) -> SchedulerResult<usize> {
        self.cache.llen(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCacheClient;

    #[tokio::test]
    async fn test_cache_queue_roundtrip() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let queue = CacheQueue::fifo(cache.clone(), "remote");
        assert_eq!(queue.push(vec!["a".into(), "b".into()]).await.unwrap(), 2);
        assert_eq!(cache.llen("remote").await.unwrap(), 2);
        assert_eq!(queue.try_pop().await.unwrap(), Some("a".to_string()));
        assert_eq!(queue.pop(Duration::from_millis(200)).await.unwrap(), Some("b".to_string()));
        assert_eq!(queue.push(vec![]).await.unwrap(), 0);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_lifo_roundtrip() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let queue = CacheQueue::lifo(cache.clone(), "stack");
        assert_eq!(queue.order(), PopOrder::Lifo);
        assert_eq!(queue.push(vec!["a".into(), "b".into(), "c".into()]).await.unwrap(), 3);
        assert_eq!(queue.try_pop().await.unwrap(), Some("c".to_string()));
        assert_eq!(queue.pop(Duration::from_millis(200)).await.unwrap(), Some("b".to_string()));
        assert_eq!(queue.size().await.unwrap(), 1);
        assert_eq!(queue.try_pop().await.unwrap(), Some("a".to_string()));
        assert_eq!(queue.pop(Duration::from_millis(200)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_lifo_blocking_pop_wakes_on_push() {
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let queue = Arc::new(CacheQueue::lifo(cache, "stack"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(vec!["late".into()]).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Some("late".to_string()));
    }
}
