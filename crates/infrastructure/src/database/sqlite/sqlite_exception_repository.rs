use async_trait::async_trait;
use scheduler_core::models::ExceptionReport;
use scheduler_core::traits::{ExceptionReportRepository, OperatorRepository};
use scheduler_core::SchedulerResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, instrument};

use crate::database::mapping::MappingHelpers;

pub struct SqliteExceptionReportRepository {
    pool: SqlitePool,
}

impl SqliteExceptionReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: &SqliteRow) -> SchedulerResult<ExceptionReport> {
        Ok(ExceptionReport {
            id: row.try_get("id")?,
            client: row.try_get("client")?,
            ip: row.try_get("ip")?,
            content: row.try_get("content")?,
            create_time: MappingHelpers::datetime(row, "create_time")?,
        })
    }
}

#[async_trait]
impl ExceptionReportRepository for SqliteExceptionReportRepository {
    #[instrument(skip(self, report), fields(ip = %report.ip))]
    async fn create(&self, report: &ExceptionReport) -> SchedulerResult<ExceptionReport> {
        let row = sqlx::query(
            "INSERT INTO exception_reports (client, ip, content, create_time) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(&report.client)
        .bind(&report.ip)
        .bind(&report.content)
        .bind(MappingHelpers::format(&report.create_time))
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_report(&row)
    }

    async fn list_recent(&self, limit: i64) -> SchedulerResult<Vec<ExceptionReport>> {
        let rows = sqlx::query("SELECT * FROM exception_reports ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_report).collect()
    }
}

pub struct SqliteOperatorRepository {
    pool: SqlitePool,
}

impl SqliteOperatorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperatorRepository for SqliteOperatorRepository {
    #[instrument(skip(self))]
    async fn ensure(&self, username: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "INSERT INTO operators (username, create_time) VALUES (?, ?) ON CONFLICT(username) DO NOTHING",
        )
        .bind(username)
        .bind(MappingHelpers::format(&scheduler_core::time::now()))
        .execute(&self.pool)
        .await?;
        let created = result.rows_affected() > 0;
        if created {
            info!("创建操作员: {}", username);
        }
        Ok(created)
    }

    async fn list(&self) -> SchedulerResult<Vec<String>> {
        let rows = sqlx::query("SELECT username FROM operators ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("username").map_err(Into::into))
            .collect()
    }
}
