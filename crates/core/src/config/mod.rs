//! 配置管理
//!
//! 加载顺序: 内置默认值 → TOML配置文件 → `SCHEDULER__*` 环境变量 → 兼容旧部署的环境变量
//! (`SERVER_ADDRESS`、`CACHE_SERVICE`、`RUN_MAIN`、`RUN_CLIENT`)。

mod app_config;
mod sections;

pub use app_config::AppConfig;
pub use sections::{
    ApiConfig, CacheConfig, CacheEngine, DatabaseConfig, DispatchConfig, LoggingConfig,
    ProducerConfig, ReconcilerConfig, WorkerConfig,
};
