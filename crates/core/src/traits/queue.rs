use async_trait::async_trait;
use std::time::Duration;

use crate::SchedulerResult;

/// 调度队列后端
///
/// 队列里的元素是序列化后的计划信封文本。
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// 追加一个或多个元素，返回追加的个数
    async fn push(&self, values: Vec<String>) -> SchedulerResult<usize>;

    /// 非阻塞弹出
    async fn try_pop(&self) -> SchedulerResult<Option<String>>;

    /// 阻塞弹出，`timeout` 为零时一直等待
    async fn pop(&self, timeout: Duration) -> SchedulerResult<Option<String>>;

    async fn size(&self) -> SchedulerResult<usize>;

    /// 队列为空才允许追加重试或补漏
    async fn is_empty(&self) -> SchedulerResult<bool> {
        Ok(self.size().await? == 0)
    }
}
