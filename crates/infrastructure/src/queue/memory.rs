use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use scheduler_core::traits::QueueBackend;
use scheduler_core::SchedulerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOrder {
    Fifo,
    Lifo,
}

/// 进程内队列，单节点部署使用
#[derive(Debug)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    order: PopOrder,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(order: PopOrder) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            order,
            notify: Notify::new(),
        }
    }

    pub fn fifo() -> Self {
        Self::new(PopOrder::Fifo)
    }

    pub fn lifo() -> Self {
        Self::new(PopOrder::Lifo)
    }

    async fn take(&self) -> Option<String> {
        let mut items = self.items.lock().await;
        match self.order {
            PopOrder::Fifo => items.pop_front(),
            PopOrder::Lifo => items.pop_back(),
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, values: Vec<String>) -> SchedulerResult<usize> {
        let count = values.len();
        self.items.lock().await.extend(values);
        for _ in 0..count {
            self.notify.notify_one();
        }
        Ok(count)
    }

    async fn try_pop(&self) -> SchedulerResult<Option<String>> {
        Ok(self.take().await)
    }

    async fn pop(&self, timeout: Duration) -> SchedulerResult<Option<String>> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.take().await {
                return Ok(Some(value));
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(self.take().await);
                    }
                }
            }
        }
    }

    async fn size(&self) -> SchedulerResult<usize> {
        Ok(self.items.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fifo_and_lifo_order() {
        let fifo = MemoryQueue::fifo();
        fifo.push(values(&["a", "b", "c"])).await.unwrap();
        assert_eq!(fifo.try_pop().await.unwrap(), Some("a".to_string()));

        let lifo = MemoryQueue::lifo();
        lifo.push(values(&["a", "b", "c"])).await.unwrap();
        assert_eq!(lifo.try_pop().await.unwrap(), Some("c".to_string()));
        assert_eq!(lifo.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue = MemoryQueue::fifo();
        let popped = queue.pop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped, None);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::fifo());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(values(&["x"])).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Some("x".to_string()));
    }
}
