//! 计划时间引擎
//!
//! 将声明式的计划配置(crontab / 固定周期 / 单次 / 按日、周、月、年、指定日期的定时)
//! 转换为确定的触发时间序列。所有时间均为本地墙上时间(`NaiveDateTime`)，精确到秒。

mod config;
mod engine;
pub mod nlp;

pub use config::{ScheduleConfig, ScheduleRule, ScheduleType, Timing, TimingType};

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

/// 计划时间的序列化格式
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 定时类计划的时刻格式
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// put接口使用的紧凑时间格式
pub const COMPACT_DATETIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// 哨兵时间: 计划结束后 `next_schedule_time` 固定为该值
pub fn max_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .unwrap_or(NaiveDateTime::MAX)
}

pub fn is_max_datetime(t: &NaiveDateTime) -> bool {
    *t >= max_datetime()
}

/// 当前本地时间，截断到秒
pub fn now() -> NaiveDateTime {
    truncate_seconds(Local::now().naive_local())
}

pub fn truncate_seconds(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

pub fn format_datetime(t: &NaiveDateTime) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

/// 解析 `YYYY-MM-DD HH:MM:SS`，同时接受 `T` 分隔的写法
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// `serde(with = ...)` 适配器，按 `YYYY-MM-DD HH:MM:SS` 读写时间
pub mod datetime_format {
    use super::{format_datetime, parse_datetime};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_datetime(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_datetime(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {raw}")))
    }

    pub mod option {
        use super::super::{format_datetime, parse_datetime};
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            t: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => serializer.serialize_str(&format_datetime(t)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(raw) => parse_datetime(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {raw}"))),
            }
        }
    }
}
