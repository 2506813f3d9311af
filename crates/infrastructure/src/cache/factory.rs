use std::sync::Arc;
use tracing::info;

use scheduler_core::config::{CacheConfig, CacheEngine};
use scheduler_core::traits::CacheService;
use scheduler_core::SchedulerResult;

use super::client::SocketCacheClient;
use super::redis_client::RedisCacheClient;

/// 按配置创建缓存服务客户端
pub struct CacheFactory;

impl CacheFactory {
    pub async fn create(config: &CacheConfig) -> SchedulerResult<Arc<dyn CacheService>> {
        match config.engine {
            CacheEngine::Socket => {
                info!("使用socket缓存服务: {}", config.address());
                Ok(Arc::new(SocketCacheClient::from_config(config)))
            }
            CacheEngine::Redis => Ok(Arc::new(RedisCacheClient::connect(&config.redis_url).await?)),
        }
    }
}
