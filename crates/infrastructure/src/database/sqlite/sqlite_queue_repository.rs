//! 队列、生产者、队列权限三类配置记录

use async_trait::async_trait;
use scheduler_core::models::{QueuePermission, ScheduleProducer, ScheduleQueue};
use scheduler_core::traits::{PermissionRepository, ProducerRepository, QueueRepository};
use scheduler_core::SchedulerResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::instrument;

use crate::database::mapping::MappingHelpers;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_queue(row: &SqliteRow) -> SchedulerResult<ScheduleQueue> {
        Ok(ScheduleQueue {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            status: MappingHelpers::bool(row, "status")?,
            module: MappingHelpers::text(row, "module")?,
            config: MappingHelpers::json(row, "config")?,
        })
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    #[instrument(skip(self, queue), fields(code = %queue.code))]
    async fn create(&self, queue: &ScheduleQueue) -> SchedulerResult<ScheduleQueue> {
        queue.validate()?;
        let row = sqlx::query(
            "INSERT INTO schedule_queues (code, name, status, module, config) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&queue.code)
        .bind(&queue.name)
        .bind(queue.status)
        .bind(queue.module.as_str())
        .bind(queue.config.to_string())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_queue(&row)
    }

    async fn find_by_code(&self, code: &str) -> SchedulerResult<Option<ScheduleQueue>> {
        let row = sqlx::query("SELECT * FROM schedule_queues WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_queue).transpose()
    }

    async fn list_active(&self) -> SchedulerResult<Vec<ScheduleQueue>> {
        let rows = sqlx::query("SELECT * FROM schedule_queues WHERE status = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_queue).collect()
    }
}

pub struct SqliteProducerRepository {
    pool: SqlitePool,
}

impl SqliteProducerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_producer(row: &SqliteRow) -> SchedulerResult<ScheduleProducer> {
        let filters: HashMap<String, serde_json::Value> =
            serde_json::from_value(MappingHelpers::json(row, "filters")?)?;
        Ok(ScheduleProducer {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            filters,
            lte_now: MappingHelpers::bool(row, "lte_now")?,
            queue: row.try_get("queue")?,
            status: MappingHelpers::bool(row, "status")?,
        })
    }
}

#[async_trait]
impl ProducerRepository for SqliteProducerRepository {
    #[instrument(skip(self, producer), fields(name = %producer.name))]
    async fn create(&self, producer: &ScheduleProducer) -> SchedulerResult<ScheduleProducer> {
        let row = sqlx::query(
            "INSERT INTO schedule_producers (name, filters, lte_now, queue, status) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&producer.name)
        .bind(serde_json::to_string(&producer.filters)?)
        .bind(producer.lte_now)
        .bind(&producer.queue)
        .bind(producer.status)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_producer(&row)
    }

    async fn find_by_name(&self, name: &str) -> SchedulerResult<Option<ScheduleProducer>> {
        let row = sqlx::query("SELECT * FROM schedule_producers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_producer).transpose()
    }

    async fn list_active(&self) -> SchedulerResult<Vec<ScheduleProducer>> {
        let rows = sqlx::query("SELECT * FROM schedule_producers WHERE status = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_producer).collect()
    }
}

pub struct SqlitePermissionRepository {
    pool: SqlitePool,
}

impl SqlitePermissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_permission(row: &SqliteRow) -> SchedulerResult<QueuePermission> {
        Ok(QueuePermission {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            permission_type: MappingHelpers::text(row, "type")?,
            config: MappingHelpers::json(row, "config")?,
            status: MappingHelpers::bool(row, "status")?,
        })
    }
}

#[async_trait]
impl PermissionRepository for SqlitePermissionRepository {
    #[instrument(skip(self, permission), fields(queue = %permission.queue))]
    async fn create(&self, permission: &QueuePermission) -> SchedulerResult<QueuePermission> {
        let row = sqlx::query(
            "INSERT INTO queue_permissions (queue, type, config, status) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(&permission.queue)
        .bind(permission.permission_type.as_str())
        .bind(permission.config.to_string())
        .bind(permission.status)
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_permission(&row)
    }

    async fn active_for_queue(&self, queue: &str) -> SchedulerResult<Option<QueuePermission>> {
        let row = sqlx::query(
            "SELECT * FROM queue_permissions WHERE queue = ? AND status = 1 ORDER BY id DESC LIMIT 1",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_permission).transpose()
    }
}
