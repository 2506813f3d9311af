use async_trait::async_trait;
use scheduler_core::models::Task;
use scheduler_core::traits::TaskRepository;
use scheduler_core::SchedulerResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            parent: row.try_get("parent")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            status: MappingHelpers::text(row, "status")?,
            config: MappingHelpers::json(row, "config")?,
            create_time: MappingHelpers::datetime(row, "create_time")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (parent, name, category, status, config, create_time)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(task.parent)
        .bind(&task.name)
        .bind(task.category)
        .bind(task.status.as_str())
        .bind(task.config.to_string())
        .bind(MappingHelpers::format(&task.create_time))
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!("创建任务成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn find(&self, name: &str, parent: Option<i64>) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE name = ? AND parent IS ?")
            .bind(name)
            .bind(parent)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
