//! 消费者注册表
//!
//! 成员信息、心跳和日志缓冲都保存在缓存服务里：
//!
//! ```text
//! consumers                  hash   consumer_id -> 消费者JSON
//! consumers:heartbeat        hash   consumer_id -> 最近心跳(毫秒时间戳)
//! consumers:waitlist:<id>    string 注册握手期间的等待标记，带过期时间
//! logs:<id>                  string 日志缓冲(JSON编码)，1小时过期
//! ```

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use scheduler_core::config::DispatchConfig;
use scheduler_core::models::Consumer;
use scheduler_core::time::now;
use scheduler_core::traits::CacheService;
use scheduler_core::SchedulerResult;

pub const CONSUMERS_KEY: &str = "consumers";
pub const HEARTBEAT_KEY: &str = "consumers:heartbeat";
const LOG_TTL_SECONDS: u64 = 3600;
const LOG_BUFFER_BYTES: usize = 64 * 1024;

/// 消费者及其心跳
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerListing {
    #[serde(flatten)]
    pub consumer: Consumer,
    pub last_heartbeat: Option<i64>,
    pub lost: bool,
}

pub struct ConsumerRegistry {
    cache: Arc<dyn CacheService>,
    consumer_timeout_ms: i64,
    waitlist_ttl_seconds: u64,
}

impl ConsumerRegistry {
    pub fn new(cache: Arc<dyn CacheService>, config: &DispatchConfig) -> Self {
        Self {
            cache,
            consumer_timeout_ms: i64::try_from(config.consumer_timeout_seconds)
                .unwrap_or(i64::MAX / 1000)
                .saturating_mul(1000),
            waitlist_ttl_seconds: config.waitlist_ttl_seconds,
        }
    }

    fn log_key(id: i64) -> String {
        format!("logs:{id}")
    }

    fn waitlist_key(id: i64) -> String {
        format!("consumers:waitlist:{id}")
    }

    /// 写入成员记录；未指定 id 时使用当前毫秒时间戳
    #[instrument(skip(self, consumer), fields(consumer_id = consumer.consumer_id))]
    pub async fn register(&self, mut consumer: Consumer) -> SchedulerResult<Consumer> {
        if consumer.consumer_id == 0 {
            consumer.consumer_id = Utc::now().timestamp_millis();
        }
        consumer.create_time = Some(now());
        let id = consumer.consumer_id;
        let record = serde_json::to_string(&consumer)?;
        self.cache
            .hset(CONSUMERS_KEY, HashMap::from([(id.to_string(), record)]))
            .await?;
        self.cache.delete(&Self::waitlist_key(id)).await?;
        self.heartbeat(id).await?;
        info!("消费者 {} 注册成功", id);
        Ok(consumer)
    }

    pub async fn exists(&self, id: i64) -> SchedulerResult<bool> {
        Ok(self.cache.hget(CONSUMERS_KEY, &id.to_string()).await?.is_some())
    }

    pub async fn get(&self, id: i64) -> SchedulerResult<Option<Consumer>> {
        match self.cache.hget(CONSUMERS_KEY, &id.to_string()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 记录心跳，同一消费者的心跳时间不回退
    pub async fn heartbeat(&self, id: i64) -> SchedulerResult<i64> {
        let field = id.to_string();
        let now_ms = Utc::now().timestamp_millis();
        let last = self.last_heartbeat(id).await?.unwrap_or(0);
        let beat = now_ms.max(last);
        self.cache
            .hset(HEARTBEAT_KEY, HashMap::from([(field, beat.to_string())]))
            .await?;
        Ok(beat)
    }

    pub async fn last_heartbeat(&self, id: i64) -> SchedulerResult<Option<i64>> {
        Ok(self
            .cache
            .hget(HEARTBEAT_KEY, &id.to_string())
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    /// 追加日志，只保留最新的 64 KiB
    pub async fn write_log(&self, id: i64, text: &str) -> SchedulerResult<()> {
        let mut buffer = self.read_log(id).await?.unwrap_or_default();
        buffer.push_str(text);
        if buffer.len() > LOG_BUFFER_BYTES {
            let mut cut = buffer.len() - LOG_BUFFER_BYTES;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
        let encoded = serde_json::to_string(&buffer)?;
        self.cache
            .set(&Self::log_key(id), &encoded, Some(LOG_TTL_SECONDS))
            .await
    }

    pub async fn read_log(&self, id: i64) -> SchedulerResult<Option<String>> {
        match self.cache.get(&Self::log_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 注册握手期间的等待标记
    pub async fn join_waitlist(&self, id: i64) -> SchedulerResult<()> {
        debug!("消费者 {} 进入等待注册列表", id);
        self.cache
            .set(&Self::waitlist_key(id), "1", Some(self.waitlist_ttl_seconds))
            .await
    }

    pub async fn is_waitlisted(&self, id: i64) -> SchedulerResult<bool> {
        Ok(self.cache.get(&Self::waitlist_key(id)).await?.is_some())
    }

    /// 删除成员记录、心跳与日志缓冲
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let field = id.to_string();
        let removed = self.cache.hdel(CONSUMERS_KEY, &field).await?.is_some();
        self.cache.hdel(HEARTBEAT_KEY, &field).await?;
        self.cache.delete(&Self::log_key(id)).await?;
        if removed {
            info!("消费者 {} 已移除", id);
        }
        Ok(removed)
    }

    pub async fn list(&self) -> SchedulerResult<Vec<ConsumerListing>> {
        let records = self.cache.hgetall(CONSUMERS_KEY).await?;
        let heartbeats = self.cache.hgetall(HEARTBEAT_KEY).await?;
        let now_ms = Utc::now().timestamp_millis();

        let mut listing = Vec::with_capacity(records.len());
        for (field, raw) in records {
            let consumer: Consumer = serde_json::from_str(&raw)?;
            let last_heartbeat = heartbeats.get(&field).and_then(|raw| raw.parse::<i64>().ok());
            let lost = last_heartbeat.map_or(true, |beat| now_ms - beat > self.consumer_timeout_ms);
            listing.push(ConsumerListing {
                consumer,
                last_heartbeat,
                lost,
            });
        }
        listing.sort_by_key(|item| item.consumer.consumer_id);
        Ok(listing)
    }
}
