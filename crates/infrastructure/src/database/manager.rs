use scheduler_core::config::DatabaseConfig;
use scheduler_core::{Catalogue, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteCategoryRepository, SqliteExceptionReportRepository, SqliteOperatorRepository,
    SqlitePermissionRepository, SqliteProducerRepository, SqliteQueueRepository,
    SqliteScheduleLogRepository, SqliteScheduleRepository, SqliteTaskRepository,
};

/// SQLite 连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        Self::connect(&config.url, config.max_connections).await
    }

    /// 建立连接池，启用外键约束和WAL模式
    ///
    /// 内存数据库只保留一条常驻连接，否则每条连接都会看到各自独立的空库。
    pub async fn connect(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        debug!("Connecting SQLite catalogue at: {}", url);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections).min_connections(1)
        };
        let pool = pool_options.connect_with(options).await?;

        Ok(Self { pool })
    }

    /// 测试用的内存目录，已完成迁移
    pub async fn in_memory() -> SchedulerResult<Self> {
        let manager = Self::connect("sqlite::memory:", 1).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        run_migrations(&self.pool).await?;
        info!("目录数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 基于当前连接池组装全部仓储
    pub fn catalogue(&self) -> Catalogue {
        let pool = self.pool.clone();
        Catalogue {
            categories: Arc::new(SqliteCategoryRepository::new(pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(pool.clone())),
            schedules: Arc::new(SqliteScheduleRepository::new(pool.clone())),
            logs: Arc::new(SqliteScheduleLogRepository::new(pool.clone())),
            queues: Arc::new(SqliteQueueRepository::new(pool.clone())),
            producers: Arc::new(SqliteProducerRepository::new(pool.clone())),
            permissions: Arc::new(SqlitePermissionRepository::new(pool.clone())),
            exceptions: Arc::new(SqliteExceptionReportRepository::new(pool.clone())),
            operators: Arc::new(SqliteOperatorRepository::new(pool)),
        }
    }
}
