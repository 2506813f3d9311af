use async_trait::async_trait;
use scheduler_core::models::Category;
use scheduler_core::traits::CategoryRepository;
use scheduler_core::SchedulerResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::database::mapping::MappingHelpers;

pub struct SqliteCategoryRepository {
    pool: SqlitePool,
}

impl SqliteCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_category(row: &SqliteRow) -> SchedulerResult<Category> {
        Ok(Category {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            parent: row.try_get("parent")?,
            config: MappingHelpers::json(row, "config")?,
        })
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    #[instrument(skip(self, category), fields(name = %category.name))]
    async fn create(&self, category: &Category) -> SchedulerResult<Category> {
        let row = sqlx::query(
            "INSERT INTO categories (name, parent, config) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(&category.name)
        .bind(category.parent)
        .bind(category.config.to_string())
        .fetch_one(&self.pool)
        .await?;
        Self::row_to_category(&row)
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_category).transpose()
    }

    async fn find_by_name(&self, name: &str) -> SchedulerResult<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_category).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<Category>> {
        let rows = sqlx::query("SELECT * FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_category).collect()
    }
}
