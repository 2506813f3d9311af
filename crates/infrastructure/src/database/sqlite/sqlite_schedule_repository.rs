use async_trait::async_trait;
use chrono::NaiveDateTime;
use scheduler_core::models::{Schedule, ScheduleCallback, ScheduleStatus};
use scheduler_core::time::ScheduleConfig;
use scheduler_core::traits::{ScheduleFilter, ScheduleRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &SqliteRow) -> SchedulerResult<Schedule> {
        let callback = match MappingHelpers::optional_json(row, "callback")? {
            Some(value) if !value.is_null() => Some(serde_json::from_value::<ScheduleCallback>(value)?),
            _ => None,
        };
        Ok(Schedule {
            id: row.try_get("id")?,
            task: row.try_get("task")?,
            priority: row.try_get("priority")?,
            next_schedule_time: MappingHelpers::datetime(row, "next_schedule_time")?,
            schedule_start_time: MappingHelpers::datetime(row, "schedule_start_time")?,
            schedule_end_time: MappingHelpers::datetime(row, "schedule_end_time")?,
            config: ScheduleConfig::from_value(MappingHelpers::json(row, "config")?)?,
            status: MappingHelpers::text(row, "status")?,
            is_strict: MappingHelpers::bool(row, "is_strict")?,
            callback,
            preserve_log: MappingHelpers::bool(row, "preserve_log")?,
            create_time: MappingHelpers::datetime(row, "create_time")?,
            update_time: MappingHelpers::datetime(row, "update_time")?,
        })
    }

    fn callback_text(schedule: &Schedule) -> SchedulerResult<Option<String>> {
        schedule
            .callback
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(SchedulerError::from)
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    #[instrument(skip(self, schedule), fields(task_id = %schedule.task))]
    async fn create(&self, schedule: &Schedule) -> SchedulerResult<Schedule> {
        schedule.validate()?;
        let row = sqlx::query(
            r#"
            INSERT INTO schedules (
                task, priority, next_schedule_time, schedule_start_time, schedule_end_time,
                config, status, is_strict, callback, preserve_log, create_time, update_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(schedule.task)
        .bind(schedule.priority)
        .bind(MappingHelpers::format(&schedule.next_schedule_time))
        .bind(MappingHelpers::format(&schedule.schedule_start_time))
        .bind(MappingHelpers::format(&schedule.schedule_end_time))
        .bind(schedule.config.to_value().to_string())
        .bind(schedule.status.as_str())
        .bind(schedule.is_strict)
        .bind(Self::callback_text(schedule)?)
        .bind(schedule.preserve_log)
        .bind(MappingHelpers::format(&schedule.create_time))
        .bind(MappingHelpers::format(&schedule.update_time))
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_schedule(&row)?;
        debug!("创建计划成功: {} -> {}", created.id, created.next_schedule_time);
        Ok(created)
    }

    #[instrument(skip(self), fields(schedule_id = %id))]
    async fn get(&self, id: i64) -> SchedulerResult<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &ScheduleFilter) -> SchedulerResult<Vec<Schedule>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT s.* FROM schedules s
            JOIN tasks t ON t.id = s.task
            LEFT JOIN categories c ON c.id = t.category
            WHERE 1 = 1
            "#,
        );
        if let Some(status) = filter.status {
            query.push(" AND s.status = ").push_bind(status.as_str());
        }
        if let Some(is_strict) = filter.is_strict {
            query.push(" AND s.is_strict = ").push_bind(is_strict);
        }
        if let Some(priority) = filter.priority {
            query.push(" AND s.priority = ").push_bind(priority);
        }
        if let Some(task_id) = filter.task_id {
            query.push(" AND s.task = ").push_bind(task_id);
        }
        if let Some(name) = &filter.task_name {
            query.push(" AND t.name = ").push_bind(name.clone());
        }
        if let Some(name) = &filter.task_category_name {
            query.push(" AND c.name = ").push_bind(name.clone());
        }
        if let Some(due) = &filter.due_before {
            query
                .push(" AND s.next_schedule_time <= ")
                .push_bind(MappingHelpers::format(due));
        }
        query.push(" ORDER BY s.priority DESC, s.next_schedule_time ASC, s.id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self))]
    async fn list_strict(&self) -> SchedulerResult<Vec<Schedule>> {
        let rows = sqlx::query(
            "SELECT * FROM schedules WHERE is_strict = 1 AND status = ? ORDER BY id",
        )
        .bind(ScheduleStatus::Opening.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self), fields(schedule_id = %id))]
    async fn update_progress(
        &self,
        id: i64,
        next_schedule_time: NaiveDateTime,
        status: Option<ScheduleStatus>,
    ) -> SchedulerResult<()> {
        let next = MappingHelpers::format(&next_schedule_time);
        let result = match status {
            Some(status) => {
                sqlx::query("UPDATE schedules SET next_schedule_time = ?, status = ? WHERE id = ?")
                    .bind(next)
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE schedules SET next_schedule_time = ? WHERE id = ?")
                    .bind(next)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(SchedulerError::ScheduleMissing(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(schedule_id = %id))]
    async fn update_status(&self, id: i64, status: ScheduleStatus) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE schedules SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::ScheduleMissing(id));
        }
        Ok(())
    }

    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    async fn update(&self, schedule: &Schedule) -> SchedulerResult<Schedule> {
        schedule.validate()?;
        let row = sqlx::query(
            r#"
            UPDATE schedules SET
                task = ?, priority = ?, next_schedule_time = ?, schedule_start_time = ?,
                schedule_end_time = ?, config = ?, status = ?, is_strict = ?, callback = ?,
                preserve_log = ?, update_time = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(schedule.task)
        .bind(schedule.priority)
        .bind(MappingHelpers::format(&schedule.next_schedule_time))
        .bind(MappingHelpers::format(&schedule.schedule_start_time))
        .bind(MappingHelpers::format(&schedule.schedule_end_time))
        .bind(schedule.config.to_value().to_string())
        .bind(schedule.status.as_str())
        .bind(schedule.is_strict)
        .bind(Self::callback_text(schedule)?)
        .bind(schedule.preserve_log)
        .bind(MappingHelpers::format(&scheduler_core::time::now()))
        .bind(schedule.id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_schedule(&row),
            None => Err(SchedulerError::ScheduleMissing(schedule.id)),
        }
    }

    #[instrument(skip(self), fields(schedule_id = %id))]
    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
