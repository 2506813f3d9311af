//! Redis 缓存客户端

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::{info, instrument};

use scheduler_core::traits::CacheService;
use scheduler_core::{SchedulerError, SchedulerResult};

fn cache_error(e: redis::RedisError) -> SchedulerError {
    SchedulerError::Cache(e.to_string())
}

/// 基于 Redis 的缓存服务，队列使用 list，哈希和字符串一一对应
#[derive(Clone)]
pub struct RedisCacheClient {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisCacheClient {
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        info!("连接Redis缓存服务: {}", url);
        let client = redis::Client::open(url).map_err(cache_error)?;
        let mut manager = client.get_connection_manager().await.map_err(cache_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(cache_error)?;

        Ok(Self { client, manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl CacheService for RedisCacheClient {
    #[instrument(skip(self, values), fields(count = values.len()))]
    async fn qpush(&self, name: &str, values: Vec<String>) -> SchedulerResult<usize> {
        if values.is_empty() {
            return Err(SchedulerError::Cache("message is empty".to_string()));
        }
        let count = values.len();
        let _: i64 = redis::cmd("RPUSH")
            .arg(name)
            .arg(values)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)?;
        Ok(count)
    }

    async fn qpop(&self, name: &str) -> SchedulerResult<Option<String>> {
        redis::cmd("LPOP")
            .arg(name)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn qbpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        // 阻塞命令独占连接，避免拖住共享的连接管理器
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(name)
            .arg(timeout_seconds)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn qrpop(&self, name: &str) -> SchedulerResult<Option<String>> {
        redis::cmd("RPOP")
            .arg(name)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn qbrpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_error)?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(name)
            .arg(timeout_seconds)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, name: &str) -> SchedulerResult<usize> {
        redis::cmd("LLEN")
            .arg(name)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn delete(&self, name: &str) -> SchedulerResult<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(name)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)?;
        Ok(removed > 0)
    }

    async fn set(&self, key: &str, value: &str, expire_seconds: Option<u64>) -> SchedulerResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(expire) = expire_seconds.filter(|e| *e > 0) {
            cmd.arg("EX").arg(expire);
        }
        let _: () = cmd.query_async(&mut self.conn()).await.map_err(cache_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn hset(&self, name: &str, fields: HashMap<String, String>) -> SchedulerResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let count = fields.len();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(name);
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = cmd.query_async(&mut self.conn()).await.map_err(cache_error)?;
        Ok(count)
    }

    async fn hget(&self, name: &str, field: &str) -> SchedulerResult<Option<String>> {
        redis::cmd("HGET")
            .arg(name)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn hgetall(&self, name: &str) -> SchedulerResult<HashMap<String, String>> {
        redis::cmd("HGETALL")
            .arg(name)
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)
    }

    async fn hdel(&self, name: &str, field: &str) -> SchedulerResult<Option<String>> {
        let (old,): (Option<String>,) = redis::pipe()
            .atomic()
            .cmd("HGET")
            .arg(name)
            .arg(field)
            .cmd("HDEL")
            .arg(name)
            .arg(field)
            .ignore()
            .query_async(&mut self.conn())
            .await
            .map_err(cache_error)?;
        Ok(old)
    }
}
