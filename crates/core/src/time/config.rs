use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{format_datetime, parse_datetime, TIME_FORMAT};
use crate::errors::SchedulerError;

/// 计划类型，序列化为原始的单字母代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    Once,
    Continuous,
    Crontab,
    Timings,
}

impl ScheduleType {
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleType::Once => "O",
            ScheduleType::Continuous => "S",
            ScheduleType::Crontab => "C",
            ScheduleType::Timings => "T",
        }
    }
}

impl FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "O" => Ok(ScheduleType::Once),
            "S" => Ok(ScheduleType::Continuous),
            "C" => Ok(ScheduleType::Crontab),
            "T" => Ok(ScheduleType::Timings),
            other => Err(SchedulerError::config_invalid(format!("type<{other}> is invalid"))),
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingType {
    Day,
    Weekday,
    Monthday,
    Year,
    Datetime,
}

impl TimingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimingType::Day => "DAY",
            TimingType::Weekday => "WEEKDAY",
            TimingType::Monthday => "MONTHDAY",
            TimingType::Year => "YEAR",
            TimingType::Datetime => "DATETIME",
        }
    }
}

impl FromStr for TimingType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" => Ok(TimingType::Day),
            "WEEKDAY" => Ok(TimingType::Weekday),
            "MONTHDAY" => Ok(TimingType::Monthday),
            "YEAR" => Ok(TimingType::Year),
            "DATETIME" => Ok(TimingType::Datetime),
            other => Err(SchedulerError::config_invalid(format!(
                "unsupported timing type: {other}"
            ))),
        }
    }
}

/// 定时类计划的具体规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timing {
    /// 每隔 `period` 天
    Day { period: u32 },
    /// ISO星期(1..7)，用尽本周后跳过 `period` 周
    Weekday { period: u32, weekdays: Vec<u32> },
    /// 每月的指定日期，0表示1号，32表示当月最后一天
    Monthday { period: u32, monthdays: Vec<u32> },
    /// 每年的指定 `(月, 日)`
    Year { period: u32, dates: Vec<(u32, u32)> },
    /// 明确列出的日期
    Datetime { dates: Vec<NaiveDate> },
}

impl Timing {
    pub fn timing_type(&self) -> TimingType {
        match self {
            Timing::Day { .. } => TimingType::Day,
            Timing::Weekday { .. } => TimingType::Weekday,
            Timing::Monthday { .. } => TimingType::Monthday,
            Timing::Year { .. } => TimingType::Year,
            Timing::Datetime { .. } => TimingType::Datetime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRule {
    Once { start: NaiveDateTime },
    Continuous { start: NaiveDateTime, period_seconds: i64 },
    /// 已规范化为 `cron` 库可解析的表达式
    Crontab { expression: String },
    Timings { time: NaiveTime, timing: Timing },
}

/// 计划配置
///
/// JSON形态与历史数据保持一致:
/// `{"schedule_type": "S", "base_on_now": false, "S": {"period": 60, "schedule_start_time": "..."}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScheduleConfig", into = "RawScheduleConfig")]
pub struct ScheduleConfig {
    pub base_on_now: bool,
    pub nlp_sentence: Option<String>,
    pub rule: ScheduleRule,
}

impl ScheduleConfig {
    pub fn new(rule: ScheduleRule) -> Result<Self, SchedulerError> {
        validate_rule(&rule)?;
        Ok(Self {
            base_on_now: false,
            nlp_sentence: None,
            rule,
        })
    }

    pub fn with_base_on_now(mut self, base_on_now: bool) -> Self {
        self.base_on_now = base_on_now;
        self
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self.rule {
            ScheduleRule::Once { .. } => ScheduleType::Once,
            ScheduleRule::Continuous { .. } => ScheduleType::Continuous,
            ScheduleRule::Crontab { .. } => ScheduleType::Crontab,
            ScheduleRule::Timings { .. } => ScheduleType::Timings,
        }
    }

    /// 配置中声明的起始时间(单次与固定周期计划才有)
    pub fn start_time(&self) -> Option<NaiveDateTime> {
        match self.rule {
            ScheduleRule::Once { start } | ScheduleRule::Continuous { start, .. } => Some(start),
            _ => None,
        }
    }

    /// 从JSON值解析，错误统一为 `ConfigInvalid`
    pub fn from_value(value: serde_json::Value) -> Result<Self, SchedulerError> {
        serde_json::from_value(value).map_err(|e| SchedulerError::config_invalid(e.to_string()))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(RawScheduleConfig::from(self.clone())).unwrap_or_default()
    }
}

fn validate_rule(rule: &ScheduleRule) -> Result<(), SchedulerError> {
    match rule {
        ScheduleRule::Once { .. } => Ok(()),
        ScheduleRule::Continuous { period_seconds, .. } => {
            if *period_seconds == 0 {
                Err(SchedulerError::config_invalid(
                    "period can't be 0 while type is continuous",
                ))
            } else if *period_seconds < 0 {
                Err(SchedulerError::config_invalid(
                    "period must be positive while type is continuous",
                ))
            } else {
                Ok(())
            }
        }
        ScheduleRule::Crontab { expression } => {
            super::engine::parse_cron(expression).map(|_| ())
        }
        ScheduleRule::Timings { timing, .. } => match timing {
            Timing::Day { period }
            | Timing::Weekday { period, .. }
            | Timing::Monthday { period, .. }
            | Timing::Year { period, .. }
                if *period == 0 =>
            {
                Err(SchedulerError::config_invalid(
                    "period can't be 0 while type is timing",
                ))
            }
            Timing::Weekday { weekdays, .. } => {
                if weekdays.is_empty() {
                    return Err(SchedulerError::config_invalid(
                        "weekdays is required while type is timing",
                    ));
                }
                if weekdays.iter().any(|d| !(1..=7).contains(d)) {
                    return Err(SchedulerError::config_invalid(
                        "weekday must be within 1..7",
                    ));
                }
                Ok(())
            }
            Timing::Monthday { monthdays, .. } => {
                if monthdays.is_empty() {
                    return Err(SchedulerError::config_invalid(
                        "monthdays is required while type is timing-monthday",
                    ));
                }
                if monthdays.iter().any(|d| *d > 32) {
                    return Err(SchedulerError::config_invalid(
                        "monthday must be within 0..32",
                    ));
                }
                Ok(())
            }
            Timing::Year { dates, .. } => {
                if dates.is_empty() {
                    return Err(SchedulerError::config_invalid(
                        "year month day is required while type is timing-year",
                    ));
                }
                for (month, day) in dates {
                    // 2000年是闰年，可以校验02-29
                    if NaiveDate::from_ymd_opt(2000, *month, *day).is_none() {
                        return Err(SchedulerError::config_invalid(format!(
                            "invalid month-day: {month:02}-{day:02}"
                        )));
                    }
                }
                Ok(())
            }
            Timing::Datetime { dates } => {
                if dates.is_empty() {
                    return Err(SchedulerError::config_invalid(
                        "datetime is required while type is timing-datetime",
                    ));
                }
                Ok(())
            }
            Timing::Day { .. } => Ok(()),
        },
    }
}

// ---- 序列化形态 ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RawScheduleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule_type: Option<String>,
    #[serde(default)]
    base_on_now: bool,
    #[serde(rename = "nlp-sentence", default, skip_serializing_if = "Option::is_none")]
    nlp_sentence: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    once: Option<RawStart>,
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    continuous: Option<RawContinuous>,
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    crontab: Option<RawCrontab>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    timings: Option<RawTimings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStart {
    schedule_start_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawContinuous {
    period: Option<i64>,
    schedule_start_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCrontab {
    crontab: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawTimings {
    #[serde(rename = "type")]
    timing_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(rename = "DAY", default, skip_serializing_if = "Option::is_none")]
    day: Option<RawPeriod>,
    #[serde(rename = "WEEKDAY", default, skip_serializing_if = "Option::is_none")]
    weekday: Option<RawWeekday>,
    #[serde(rename = "MONTHDAY", default, skip_serializing_if = "Option::is_none")]
    monthday: Option<RawMonthday>,
    #[serde(rename = "YEAR", default, skip_serializing_if = "Option::is_none")]
    year: Option<RawYear>,
    #[serde(rename = "DATETIME", default, skip_serializing_if = "Option::is_none")]
    datetime: Option<RawDatetime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPeriod {
    period: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawWeekday {
    period: Option<u32>,
    #[serde(default)]
    weekday: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMonthday {
    period: Option<u32>,
    #[serde(default)]
    monthday: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawYear {
    period: Option<u32>,
    year: Option<ListOrJoined>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDatetime {
    datetime: Option<ListOrJoined>,
}

/// 列表既可以是JSON数组，也可以是逗号拼接的字符串
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ListOrJoined {
    List(Vec<String>),
    Joined(String),
}

impl ListOrJoined {
    fn items(&self) -> Vec<String> {
        match self {
            ListOrJoined::List(items) => items.iter().map(|s| s.trim().to_string()).collect(),
            ListOrJoined::Joined(s) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

fn required<T>(value: Option<T>, message: &str) -> Result<T, SchedulerError> {
    value.ok_or_else(|| SchedulerError::config_invalid(message))
}

fn required_datetime(value: Option<String>, message: &str) -> Result<NaiveDateTime, SchedulerError> {
    let raw = required(value, message)?;
    parse_datetime(&raw)
        .ok_or_else(|| SchedulerError::config_invalid(format!("invalid datetime: {raw}")))
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M"))
        .map_err(|_| SchedulerError::config_invalid(format!("invalid time: {raw}")))
}

fn sorted_unique<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items.dedup();
    items
}

fn parse_month_day(raw: &str) -> Result<(u32, u32), SchedulerError> {
    let invalid = || SchedulerError::config_invalid(format!("invalid month-day: {raw}"));
    let (month, day) = raw.split_once('-').ok_or_else(invalid)?;
    let month = month.trim().parse().map_err(|_| invalid())?;
    let day = day.trim().parse().map_err(|_| invalid())?;
    Ok((month, day))
}

impl TryFrom<RawScheduleConfig> for ScheduleConfig {
    type Error = SchedulerError;

    fn try_from(raw: RawScheduleConfig) -> Result<Self, Self::Error> {
        let Some(schedule_type) = raw.schedule_type.as_deref() else {
            // 只有自然语言描述时交给解析器
            return match raw.nlp_sentence {
                Some(sentence) => {
                    let mut config = super::nlp::parse_sentence(&sentence)?;
                    config.base_on_now = raw.base_on_now || config.base_on_now;
                    Ok(config)
                }
                None => Err(SchedulerError::config_invalid("schedule_type is required")),
            };
        };
        let rule = match schedule_type.parse::<ScheduleType>()? {
            ScheduleType::Once => {
                let body = required(raw.once, "O is required while type is once")?;
                ScheduleRule::Once {
                    start: required_datetime(
                        body.schedule_start_time,
                        "schedule_start_time is required while type is once",
                    )?,
                }
            }
            ScheduleType::Continuous => {
                let body = required(
                    raw.continuous,
                    "period_schedule is required while type is continuous",
                )?;
                ScheduleRule::Continuous {
                    start: required_datetime(
                        body.schedule_start_time,
                        "schedule_start_time is required while type is continuous",
                    )?,
                    period_seconds: required(
                        body.period,
                        "period is required while type is continuous",
                    )?,
                }
            }
            ScheduleType::Crontab => {
                let body = required(raw.crontab, "crontab is required while type is crontab")?;
                let expression = required(body.crontab, "crontab is required while type is crontab")?;
                if expression.trim().is_empty() {
                    return Err(SchedulerError::config_invalid(
                        "crontab is required while type is crontab",
                    ));
                }
                ScheduleRule::Crontab {
                    expression: expression.split_whitespace().collect::<Vec<_>>().join(" "),
                }
            }
            ScheduleType::Timings => {
                let body = required(raw.timings, "T is required while type is timing")?;
                let timing_type: TimingType =
                    required(body.timing_type, "timing_type is invalid")?.parse()?;
                let time = match (&body.time, timing_type) {
                    (Some(t), _) => parse_time_of_day(t)?,
                    (None, TimingType::Datetime) => NaiveTime::MIN,
                    (None, _) => {
                        return Err(SchedulerError::config_invalid(
                            "time is required while type is timing",
                        ))
                    }
                };
                let missing = |name: &str| format!("{name} is required while type is timing");
                let timing = match timing_type {
                    TimingType::Day => {
                        let day = required(body.day, &missing("DAY"))?;
                        Timing::Day {
                            period: day.period.unwrap_or(1),
                        }
                    }
                    TimingType::Weekday => {
                        let weekday = required(body.weekday, &missing("weekdays"))?;
                        Timing::Weekday {
                            period: weekday.period.unwrap_or(1),
                            weekdays: sorted_unique(weekday.weekday),
                        }
                    }
                    TimingType::Monthday => {
                        let monthday = required(body.monthday, &missing("monthdays"))?;
                        Timing::Monthday {
                            period: monthday.period.unwrap_or(1),
                            monthdays: sorted_unique(monthday.monthday),
                        }
                    }
                    TimingType::Year => {
                        let year = required(body.year, &missing("year"))?;
                        let items = year.year.map(|y| y.items()).unwrap_or_default();
                        let dates = items
                            .iter()
                            .map(|s| parse_month_day(s))
                            .collect::<Result<Vec<_>, _>>()?;
                        Timing::Year {
                            period: year.period.unwrap_or(1),
                            dates: sorted_unique(dates),
                        }
                    }
                    TimingType::Datetime => {
                        let datetime = required(body.datetime, &missing("datetime"))?;
                        let items = datetime.datetime.map(|d| d.items()).unwrap_or_default();
                        let dates = items
                            .iter()
                            .map(|s| {
                                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
                                    SchedulerError::config_invalid(format!("invalid date: {s}"))
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Timing::Datetime {
                            dates: sorted_unique(dates),
                        }
                    }
                };
                ScheduleRule::Timings { time, timing }
            }
        };
        validate_rule(&rule)?;
        Ok(ScheduleConfig {
            base_on_now: raw.base_on_now,
            nlp_sentence: raw.nlp_sentence,
            rule,
        })
    }
}

impl From<ScheduleConfig> for RawScheduleConfig {
    fn from(config: ScheduleConfig) -> Self {
        let mut raw = RawScheduleConfig {
            schedule_type: Some(config.schedule_type().code().to_string()),
            base_on_now: config.base_on_now,
            nlp_sentence: config.nlp_sentence,
            ..Default::default()
        };
        match config.rule {
            ScheduleRule::Once { start } => {
                raw.once = Some(RawStart {
                    schedule_start_time: Some(format_datetime(&start)),
                });
            }
            ScheduleRule::Continuous {
                start,
                period_seconds,
            } => {
                raw.continuous = Some(RawContinuous {
                    period: Some(period_seconds),
                    schedule_start_time: Some(format_datetime(&start)),
                });
            }
            ScheduleRule::Crontab { expression } => {
                raw.crontab = Some(RawCrontab {
                    crontab: Some(expression),
                });
            }
            ScheduleRule::Timings { time, timing } => {
                let mut body = RawTimings {
                    timing_type: Some(timing.timing_type().as_str().to_string()),
                    time: Some(time.format(TIME_FORMAT).to_string()),
                    ..Default::default()
                };
                match timing {
                    Timing::Day { period } => body.day = Some(RawPeriod { period: Some(period) }),
                    Timing::Weekday { period, weekdays } => {
                        body.weekday = Some(RawWeekday {
                            period: Some(period),
                            weekday: weekdays,
                        })
                    }
                    Timing::Monthday { period, monthdays } => {
                        body.monthday = Some(RawMonthday {
                            period: Some(period),
                            monthday: monthdays,
                        })
                    }
                    Timing::Year { period, dates } => {
                        body.year = Some(RawYear {
                            period: Some(period),
                            year: Some(ListOrJoined::List(
                                dates
                                    .iter()
                                    .map(|(m, d)| format!("{m:02}-{d:02}"))
                                    .collect(),
                            )),
                        })
                    }
                    Timing::Datetime { dates } => {
                        body.datetime = Some(RawDatetime {
                            datetime: Some(ListOrJoined::List(
                                dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
                            )),
                        })
                    }
                }
                raw.timings = Some(body);
            }
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_continuous_config() {
        let config = ScheduleConfig::from_value(json!({
            "schedule_type": "S",
            "base_on_now": true,
            "S": {"period": 60, "schedule_start_time": "2023-04-04 15:31:00"}
        }))
        .unwrap();
        assert!(config.base_on_now);
        assert_eq!(config.schedule_type(), ScheduleType::Continuous);
        assert!(matches!(
            config.rule,
            ScheduleRule::Continuous { period_seconds: 60, .. }
        ));
    }

    #[test]
    fn test_lists_are_normalised_and_round_trip() {
        let config = ScheduleConfig::from_value(json!({
            "schedule_type": "T",
            "T": {"type": "YEAR", "time": "08:30:00", "YEAR": {"period": 1, "year": "06-01,01-15,06-01"}}
        }))
        .unwrap();
        match &config.rule {
            ScheduleRule::Timings {
                timing: Timing::Year { dates, .. },
                ..
            } => assert_eq!(dates, &vec![(1, 15), (6, 1)]),
            other => panic!("unexpected rule {other:?}"),
        }
        let again = ScheduleConfig::from_value(config.to_value()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let cases = vec![
            json!({"schedule_type": "C", "C": {}}),
            json!({"schedule_type": "C", "C": {"crontab": "not a cron"}}),
            json!({"schedule_type": "S", "S": {"period": 0, "schedule_start_time": "2024-01-01 00:00:00"}}),
            json!({"schedule_type": "T", "T": {"type": "WEEKDAY", "time": "01:00:00", "WEEKDAY": {"weekday": []}}}),
            json!({"schedule_type": "T", "T": {"type": "MONTHDAY", "time": "01:00:00", "MONTHDAY": {"monthday": []}}}),
            json!({"schedule_type": "T", "T": {"type": "DATETIME", "DATETIME": {"datetime": []}}}),
            json!({"schedule_type": "X"}),
            json!({}),
        ];
        for case in cases {
            let err = ScheduleConfig::from_value(case.clone()).unwrap_err();
            assert!(
                matches!(err, SchedulerError::ConfigInvalid(_)),
                "expected config_invalid for {case}"
            );
        }
    }

    #[test]
    fn test_timing_period_defaults_to_one() {
        let config = ScheduleConfig::from_value(json!({
            "schedule_type": "T",
            "T": {"type": "DAY", "time": "01:00:00", "DAY": {}}
        }))
        .unwrap();
        assert_eq!(
            config.rule,
            ScheduleRule::Timings {
                time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                timing: Timing::Day { period: 1 }
            }
        );
    }

    #[test]
    fn test_sentence_only_config_is_parsed() {
        let config = ScheduleConfig::from_value(json!({"nlp-sentence": "every day at 01:00"})).unwrap();
        assert_eq!(config.schedule_type(), ScheduleType::Timings);
        assert_eq!(config.nlp_sentence.as_deref(), Some("every day at 01:00"));
    }
}
