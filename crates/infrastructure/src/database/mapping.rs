//! 数据行解析的公共工具
//!
//! 时间统一以 `YYYY-MM-DD HH:MM:SS` 文本存储，字符串顺序即时间顺序；JSON 字段以文本存储。

use chrono::NaiveDateTime;
use scheduler_core::time::{format_datetime, parse_datetime};
use scheduler_core::{SchedulerError, SchedulerResult};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn datetime(row: &SqliteRow, field: &str) -> SchedulerResult<NaiveDateTime> {
        let raw: String = row.try_get(field)?;
        parse_datetime(&raw)
            .ok_or_else(|| SchedulerError::Serialization(format!("解析时间字段{field}失败: {raw}")))
    }

    pub fn json(row: &SqliteRow, field: &str) -> SchedulerResult<Value> {
        let raw: String = row.try_get(field)?;
        serde_json::from_str(&raw)
            .map_err(|e| SchedulerError::Serialization(format!("解析JSON字段{field}失败: {e}")))
    }

    pub fn optional_json(row: &SqliteRow, field: &str) -> SchedulerResult<Option<Value>> {
        match row.try_get::<Option<String>, _>(field)? {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| SchedulerError::Serialization(format!("解析JSON字段{field}失败: {e}"))),
            _ => Ok(None),
        }
    }

    /// 解析以文本存储的枚举
    pub fn text<T>(row: &SqliteRow, field: &str) -> SchedulerResult<T>
    where
        T: FromStr<Err = SchedulerError>,
    {
        let raw: String = row.try_get(field)?;
        raw.parse()
    }

    pub fn bool(row: &SqliteRow, field: &str) -> SchedulerResult<bool> {
        let raw: i64 = row.try_get(field)?;
        Ok(raw != 0)
    }

    pub fn format(t: &NaiveDateTime) -> String {
        format_datetime(t)
    }
}
