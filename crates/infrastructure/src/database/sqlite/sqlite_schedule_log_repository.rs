use async_trait::async_trait;
use chrono::NaiveDateTime;
use scheduler_core::models::ScheduleLog;
use scheduler_core::traits::{LogQuery, ScheduleLogRepository};
use scheduler_core::time::parse_datetime;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteScheduleLogRepository {
    pool: SqlitePool,
}

impl SqliteScheduleLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &SqliteRow) -> SchedulerResult<ScheduleLog> {
        Ok(ScheduleLog {
            id: row.try_get("id")?,
            schedule: row.try_get("schedule")?,
            status: MappingHelpers::text(row, "status")?,
            queue: row.try_get("queue")?,
            result: MappingHelpers::json(row, "result")?,
            schedule_time: MappingHelpers::datetime(row, "schedule_time")?,
            create_time: MappingHelpers::datetime(row, "create_time")?,
        })
    }
}

#[async_trait]
impl ScheduleLogRepository for SqliteScheduleLogRepository {
    #[instrument(skip(self, log), fields(schedule_id = %log.schedule, status = %log.status))]
    async fn create(&self, log: &ScheduleLog) -> SchedulerResult<ScheduleLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO schedule_logs (schedule, status, queue, result, schedule_time, create_time)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(log.schedule)
        .bind(log.status.as_str())
        .bind(&log.queue)
        .bind(log.result.to_string())
        .bind(MappingHelpers::format(&log.schedule_time))
        .bind(MappingHelpers::format(&log.create_time))
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_log(&row)
    }

    #[instrument(skip(self), fields(log_id = %id))]
    async fn get(&self, id: i64) -> SchedulerResult<Option<ScheduleLog>> {
        let row = sqlx::query("SELECT * FROM schedule_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_log).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn get_many(&self, ids: &[i64]) -> SchedulerResult<Vec<ScheduleLog>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM schedule_logs WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");
        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_log).collect()
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &LogQuery) -> SchedulerResult<Vec<ScheduleLog>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM schedule_logs WHERE 1 = 1");
        if let Some(from) = &filter.from {
            query.push(" AND create_time >= ").push_bind(MappingHelpers::format(from));
        }
        if let Some(to) = &filter.to {
            query.push(" AND create_time < ").push_bind(MappingHelpers::format(to));
        }
        if let Some(queue) = &filter.queue {
            query.push(" AND queue = ").push_bind(queue.clone());
        }
        if let Some(schedule) = filter.schedule {
            query.push(" AND schedule = ").push_bind(schedule);
        }
        if !filter.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_log).collect()
    }

    #[instrument(skip(self), fields(schedule_id = %schedule))]
    async fn schedule_times(
        &self,
        schedule: i64,
        queue: Option<&str>,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> SchedulerResult<Vec<NaiveDateTime>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT DISTINCT schedule_time FROM schedule_logs WHERE schedule = ");
        query.push_bind(schedule);
        query.push(" AND schedule_time >= ");
        query.push_bind(MappingHelpers::format(&from));
        query.push(" AND schedule_time < ");
        query.push_bind(MappingHelpers::format(&to));
        if let Some(queue) = queue {
            query.push(" AND queue = ");
            query.push_bind(queue.to_string());
        }
        query.push(" ORDER BY schedule_time");
        let rows = query.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("schedule_time")?;
                parse_datetime(&raw).ok_or_else(|| {
                    SchedulerError::Serialization(format!("解析时间字段schedule_time失败: {raw}"))
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete_before(&self, before: NaiveDateTime) -> SchedulerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM schedule_logs
            WHERE create_time < ?
              AND schedule NOT IN (SELECT id FROM schedules WHERE preserve_log = 1)
            "#,
        )
        .bind(MappingHelpers::format(&before))
        .execute(&self.pool)
        .await?;
        debug!("清理日志 {} 条", result.rows_affected());
        Ok(result.rows_affected())
    }
}
