use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use super::config::{ScheduleConfig, ScheduleRule, Timing};
use super::{is_max_datetime, max_datetime};
use crate::errors::SchedulerError;
use crate::SchedulerResult;

/// 月份或年份推进的最大尝试次数，超过仍找不到合法日期视为配置无效
const MAX_CALENDAR_STEPS: u32 = 1200;

impl ScheduleConfig {
    /// 严格大于 `after` 的最早触发时间；计划已结束时返回哨兵时间
    pub fn next_after(&self, after: NaiveDateTime) -> SchedulerResult<NaiveDateTime> {
        if is_max_datetime(&after) {
            return Ok(max_datetime());
        }
        match &self.rule {
            ScheduleRule::Once { start } => Ok(if *start > after { *start } else { max_datetime() }),
            ScheduleRule::Continuous {
                start,
                period_seconds,
            } => {
                if *start > after {
                    return Ok(*start);
                }
                let elapsed = (after - *start).num_seconds();
                let steps = elapsed / period_seconds + 1;
                steps
                    .checked_mul(*period_seconds)
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|delta| start.checked_add_signed(delta))
                    .ok_or_else(|| period_overflow(*period_seconds))
            }
            ScheduleRule::Crontab { expression } => {
                let schedule = parse_cron(expression)?;
                let next = schedule
                    .after(&Utc.from_utc_datetime(&after))
                    .next()
                    .map(|t| t.naive_utc())
                    .unwrap_or_else(max_datetime);
                Ok(next)
            }
            ScheduleRule::Timings { time, timing } => {
                let at = |date: NaiveDate| date.and_time(*time);
                match timing {
                    Timing::Day { period } => {
                        let mut next = at(after.date());
                        while next <= after {
                            next = TimeDelta::try_days(i64::from(*period))
                                .and_then(|delta| next.checked_add_signed(delta))
                                .ok_or_else(|| period_overflow(*period))?;
                        }
                        Ok(next)
                    }
                    Timing::Weekday { period, weekdays } => {
                        let today = after.weekday().number_from_monday();
                        let date = after.date();
                        if weekdays.contains(&today) && at(date) > after {
                            return Ok(at(date));
                        }
                        let delta = match weekdays.iter().find(|d| **d > today) {
                            Some(d) => i64::from(d - today),
                            None => {
                                let first = weekdays.first().copied().unwrap_or(today);
                                i64::from(*period) * 7 - i64::from(today - first)
                            }
                        };
                        TimeDelta::try_days(delta)
                            .and_then(|delta| date.checked_add_signed(delta))
                            .map(at)
                            .ok_or_else(|| period_overflow(*period))
                    }
                    Timing::Monthday { period, monthdays } => {
                        let (year, month) = (after.year(), after.month());
                        for day in monthdays {
                            if let Some(date) = resolve_monthday(year, month, *day) {
                                if at(date) > after {
                                    return Ok(at(date));
                                }
                            }
                        }
                        for step in 1..=MAX_CALENDAR_STEPS {
                            let (y, m) = add_months(year, month, u64::from(*period) * u64::from(step))
                                .ok_or_else(|| period_overflow(*period))?;
                            if let Some(date) = monthdays
                                .iter()
                                .find_map(|day| resolve_monthday(y, m, *day))
                            {
                                return Ok(at(date));
                            }
                        }
                        Err(SchedulerError::config_invalid(format!(
                            "no valid month day in {monthdays:?}"
                        )))
                    }
                    Timing::Year { period, dates } => {
                        let year = after.year();
                        for (month, day) in dates {
                            if let Some(date) = NaiveDate::from_ymd_opt(year, *month, *day) {
                                if at(date) > after {
                                    return Ok(at(date));
                                }
                            }
                        }
                        for step in 1..=MAX_CALENDAR_STEPS {
                            let y = i32::try_from(u64::from(*period) * u64::from(step))
                                .ok()
                                .and_then(|years| year.checked_add(years))
                                .filter(|y| NaiveDate::from_ymd_opt(*y, 1, 1).is_some())
                                .ok_or_else(|| period_overflow(*period))?;
                            if let Some(date) = dates
                                .iter()
                                .find_map(|(m, d)| NaiveDate::from_ymd_opt(y, *m, *d))
                            {
                                return Ok(at(date));
                            }
                        }
                        Err(SchedulerError::config_invalid(format!(
                            "no valid date in {dates:?}"
                        )))
                    }
                    Timing::Datetime { dates } => Ok(dates
                        .iter()
                        .map(|d| at(*d))
                        .find(|t| *t > after)
                        .unwrap_or_else(max_datetime)),
                }
            }
        }
    }

    /// 计划推进: `base_on_now` 时以当前时间为基准，否则以上一次的计划时间为基准
    pub fn next(&self, last: NaiveDateTime, now: NaiveDateTime) -> SchedulerResult<NaiveDateTime> {
        let after = if self.base_on_now { now } else { last };
        self.next_after(after)
    }

    /// 大于等于 `from` 的最早触发时间
    pub fn first(&self, from: NaiveDateTime) -> SchedulerResult<NaiveDateTime> {
        self.next_after(from - Duration::seconds(1))
    }

    /// 枚举 `[from, to)` 内的全部触发时间，严格递增
    pub fn range(&self, from: NaiveDateTime, to: NaiveDateTime) -> SchedulerResult<Vec<NaiveDateTime>> {
        Ok(self.range_limited(from, to, usize::MAX)?.unwrap_or_default())
    }

    /// 同 [`range`](Self::range)，触发次数超过 `limit` 时返回 None
    pub fn range_limited(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        limit: usize,
    ) -> SchedulerResult<Option<Vec<NaiveDateTime>>> {
        let mut times = Vec::new();
        let mut t = self.first(from)?;
        while t < to && !is_max_datetime(&t) {
            if times.len() == limit {
                return Ok(None);
            }
            times.push(t);
            t = self.next_after(t)?;
        }
        Ok(Some(times))
    }

    /// 从 `from` 之后开始的 `count` 个触发时间
    pub fn upcoming(&self, from: NaiveDateTime, count: usize) -> SchedulerResult<Vec<NaiveDateTime>> {
        let mut times = Vec::with_capacity(count);
        let mut t = from;
        while times.len() < count {
            t = self.next_after(t)?;
            if is_max_datetime(&t) {
                break;
            }
            times.push(t);
        }
        Ok(times)
    }
}

/// 解析crontab表达式。五段式(分 时 日 月 周)按标准crontab语义补秒字段并换算星期编号，
/// 六、七段式直接交给 `cron` 库
pub(crate) fn parse_cron(expression: &str) -> SchedulerResult<CronSchedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => {
            let day_of_week = normalize_day_of_week(fields[4])?;
            format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            )
        }
        6 | 7 => fields.join(" "),
        _ => {
            return Err(SchedulerError::config_invalid(format!(
                "invalid crontab: {expression}"
            )))
        }
    };
    CronSchedule::from_str(&normalized)
        .map_err(|e| SchedulerError::config_invalid(format!("invalid crontab {expression}: {e}")))
}

/// 标准crontab的星期为 0..7(0与7都是周日，1是周一)，`cron` 库为 1..7(1是周日)
fn normalize_day_of_week(field: &str) -> SchedulerResult<String> {
    let invalid = || SchedulerError::config_invalid(format!("invalid day of week: {field}"));
    let convert = |raw: &str| -> SchedulerResult<String> {
        match raw.parse::<u32>() {
            Ok(n) if n <= 7 => Ok(((n % 7) + 1).to_string()),
            Ok(_) => Err(invalid()),
            // 名称(MON、TUE...)与 * 保持原样
            Err(_) => Ok(raw.to_string()),
        }
    };
    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let converted = match range.split_once('-') {
            Some((start, end)) => {
                let (start_n, end_n) = (start.parse::<u32>(), end.parse::<u32>());
                if let (Ok(s), Ok(7)) = (start_n, end_n) {
                    // x-7 跨过周日，拆成 x..周六 与 周日
                    if s == 0 || s == 7 {
                        "1-7".to_string()
                    } else {
                        items.push("1".to_string());
                        format!("{}-7", s + 1)
                    }
                } else {
                    format!("{}-{}", convert(start)?, convert(end)?)
                }
            }
            None => convert(range)?,
        };
        match step {
            Some(step) => items.push(format!("{converted}/{step}")),
            None => items.push(converted),
        }
    }
    Ok(items.join(","))
}

/// 周期推进超出可表示的时间范围
fn period_overflow(period: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::config_invalid(format!("period {period} is out of range"))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    add_months(year, month, 1)
        .and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1))
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// 0 表示当月1号，32 表示当月最后一天，当月不存在的日期返回 None
fn resolve_monthday(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let day = match day {
        0 => 1,
        32 => days_in_month(year, month),
        d => d,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 超出日期范围时返回 None
fn add_months(year: i32, month: u32, months: u64) -> Option<(i32, u32)> {
    let zero_based = u64::from(month - 1) + months;
    let year = i32::try_from(zero_based / 12)
        .ok()
        .and_then(|years| year.checked_add(years))?;
    let month = (zero_based % 12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).map(|_| (year, month))
}
