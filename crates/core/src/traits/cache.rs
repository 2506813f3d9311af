use async_trait::async_trait;
use std::collections::HashMap;

use crate::SchedulerResult;

/// 缓存服务客户端
///
/// 覆盖缓存服务的队列、列表、字符串和哈希命令。消费者成员、心跳和程序状态都保存在这里。
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn qpush(&self, name: &str, values: Vec<String>) -> SchedulerResult<usize>;
    async fn qpop(&self, name: &str) -> SchedulerResult<Option<String>>;
    /// `timeout_seconds` 为零时一直阻塞
    async fn qbpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>>;
    /// 取最新推入的一条，用于后进先出队列
    async fn qrpop(&self, name: &str) -> SchedulerResult<Option<String>>;
    async fn qbrpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>>;
    async fn llen(&self, name: &str) -> SchedulerResult<usize>;

    async fn delete(&self, name: &str) -> SchedulerResult<bool>;

    async fn set(&self, key: &str, value: &str, expire_seconds: Option<u64>) -> SchedulerResult<()>;
    async fn get(&self, key: &str) -> SchedulerResult<Option<String>>;

    /// 合并字段，返回写入的字段数
    async fn hset(&self, name: &str, fields: HashMap<String, String>) -> SchedulerResult<usize>;
    async fn hget(&self, name: &str, field: &str) -> SchedulerResult<Option<String>>;
    async fn hgetall(&self, name: &str) -> SchedulerResult<HashMap<String, String>>;
    /// 返回被删除字段的旧值
    async fn hdel(&self, name: &str, field: &str) -> SchedulerResult<Option<String>>;
}
