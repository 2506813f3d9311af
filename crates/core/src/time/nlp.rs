//! 极简的自然语言计划解析器
//!
//! 支持的句式:
//! - `every day at 01:00`、`every 2 days at 01:00:30`
//! - `every 30 seconds`、`every 5 minutes from 2024-01-01 00:00:00`
//! - `every mon,wed at 08:00`、`every 2 weeks on friday at 18:00`
//! - `day 1,15 of every month at 09:00`、`day last of every 2 months at 23:00`
//! - `06-01,12-01 each year at 10:00`
//! - `once at 2024-05-01 10:00:00`
//!
//! 其余句子一律视为配置无效。

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::config::{ScheduleConfig, ScheduleRule, Timing};
use crate::errors::SchedulerError;
use crate::SchedulerResult;

/// 以当前时间为基准解析句子
pub fn parse_sentence(sentence: &str) -> SchedulerResult<ScheduleConfig> {
    parse_sentence_at(sentence, super::now())
}

/// 解析句子，未指定起点的周期计划从 `now` 开始
pub fn parse_sentence_at(sentence: &str, now: NaiveDateTime) -> SchedulerResult<ScheduleConfig> {
    let normalized = sentence.trim().to_lowercase().replace(", ", ",");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let mut cursor = Cursor::new(&tokens, sentence);
    let rule = cursor.parse(now)?;
    let mut config = ScheduleConfig::new(rule)?;
    config.nlp_sentence = Some(sentence.trim().to_string());
    Ok(config)
}

struct Cursor<'a> {
    tokens: &'a [&'a str],
    pos: usize,
    sentence: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [&'a str], sentence: &'a str) -> Self {
        Self {
            tokens,
            pos: 0,
            sentence,
        }
    }

    fn unsupported(&self) -> SchedulerError {
        SchedulerError::config_invalid(format!("unsupported sentence: {}", self.sentence))
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn next_token(&mut self) -> SchedulerResult<&'a str> {
        let token = self.peek().ok_or_else(|| self.unsupported())?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, word: &str) -> SchedulerResult<()> {
        if self.next_token()? == word {
            Ok(())
        } else {
            Err(self.unsupported())
        }
    }

    fn accept(&mut self, word: &str) -> bool {
        if self.peek() == Some(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn finish(&self) -> SchedulerResult<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.unsupported())
        }
    }

    fn number(&mut self) -> Option<u32> {
        let n = self.peek()?.parse().ok()?;
        self.pos += 1;
        Some(n)
    }

    fn time(&mut self) -> SchedulerResult<NaiveTime> {
        let raw = self.next_token()?;
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|_| self.unsupported())
    }

    /// 可选的 `at HH:MM` 尾巴，缺省为零点
    fn optional_at_time(&mut self) -> SchedulerResult<NaiveTime> {
        if self.accept("at") {
            self.time()
        } else {
            Ok(NaiveTime::MIN)
        }
    }

    fn datetime(&mut self) -> SchedulerResult<NaiveDateTime> {
        let date = self.next_token()?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| self.unsupported())?;
        let time = match self.peek() {
            Some(_) => self.time()?,
            None => NaiveTime::MIN,
        };
        Ok(date.and_time(time))
    }

    fn parse(&mut self, now: NaiveDateTime) -> SchedulerResult<ScheduleRule> {
        let rule = match self.peek() {
            Some("once") => {
                self.pos += 1;
                self.expect("at")?;
                ScheduleRule::Once {
                    start: self.datetime()?,
                }
            }
            Some("every") => {
                self.pos += 1;
                self.parse_every(now)?
            }
            Some("day") => {
                self.pos += 1;
                self.parse_monthday()?
            }
            Some(first) if first.contains('-') => {
                self.pos += 1;
                let dates = first
                    .split(',')
                    .map(|item| parse_month_day(item).ok_or_else(|| self.unsupported()))
                    .collect::<SchedulerResult<Vec<_>>>()?;
                self.expect("each")?;
                self.expect("year")?;
                let time = self.optional_at_time()?;
                ScheduleRule::Timings {
                    time,
                    timing: Timing::Year {
                        period: 1,
                        dates: sorted(dates),
                    },
                }
            }
            _ => return Err(self.unsupported()),
        };
        self.finish()?;
        Ok(rule)
    }

    fn parse_every(&mut self, now: NaiveDateTime) -> SchedulerResult<ScheduleRule> {
        let count = self.number();
        let unit = self.next_token()?;
        if let Some(seconds) = unit_seconds(unit) {
            let period = i64::from(count.unwrap_or(1)) * seconds;
            let start = if self.accept("from") {
                self.datetime()?
            } else {
                now
            };
            return Ok(ScheduleRule::Continuous {
                start,
                period_seconds: period,
            });
        }
        match unit {
            "day" | "days" => {
                self.expect("at")?;
                Ok(ScheduleRule::Timings {
                    time: self.time()?,
                    timing: Timing::Day {
                        period: count.unwrap_or(1),
                    },
                })
            }
            "week" | "weeks" => {
                self.expect("on")?;
                let weekdays = self.weekdays()?;
                self.expect("at")?;
                Ok(ScheduleRule::Timings {
                    time: self.time()?,
                    timing: Timing::Weekday {
                        period: count.unwrap_or(1),
                        weekdays,
                    },
                })
            }
            _ if count.is_none() => {
                // every mon,wed at 08:00
                self.pos -= 1;
                let weekdays = self.weekdays()?;
                self.expect("at")?;
                Ok(ScheduleRule::Timings {
                    time: self.time()?,
                    timing: Timing::Weekday { period: 1, weekdays },
                })
            }
            _ => Err(self.unsupported()),
        }
    }

    /// `mon,wed`、`mon and wed`、`monday, friday`
    fn weekdays(&mut self) -> SchedulerResult<Vec<u32>> {
        let mut days = Vec::new();
        while let Some(token) = self.peek() {
            if token == "at" {
                break;
            }
            self.pos += 1;
            if token == "and" {
                continue;
            }
            for name in token.split(',').filter(|s| !s.is_empty()) {
                days.push(weekday_number(name).ok_or_else(|| self.unsupported())?);
            }
        }
        if days.is_empty() {
            return Err(self.unsupported());
        }
        Ok(sorted(days))
    }

    /// `day 1,15 of every [N] month(s) at HH:MM`
    fn parse_monthday(&mut self) -> SchedulerResult<ScheduleRule> {
        let days = self.next_token()?;
        let monthdays = days
            .split(',')
            .map(|d| match d {
                "first" => Some(0),
                "last" => Some(32),
                other => other.parse::<u32>().ok().filter(|n| (1..=31).contains(n)),
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.unsupported())?;
        self.expect("of")?;
        self.expect("every")?;
        let period = self.number().unwrap_or(1);
        match self.next_token()? {
            "month" | "months" => {}
            _ => return Err(self.unsupported()),
        }
        self.expect("at")?;
        Ok(ScheduleRule::Timings {
            time: self.time()?,
            timing: Timing::Monthday {
                period,
                monthdays: sorted(monthdays),
            },
        })
    }
}

fn sorted<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items.dedup();
    items
}

fn unit_seconds(unit: &str) -> Option<i64> {
    match unit {
        "second" | "seconds" => Some(1),
        "minute" | "minutes" => Some(60),
        "hour" | "hours" => Some(3600),
        _ => None,
    }
}

fn weekday_number(name: &str) -> Option<u32> {
    let n = match name {
        "mon" | "monday" => 1,
        "tue" | "tues" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thur" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        "sun" | "sunday" => 7,
        _ => return None,
    };
    Some(n)
}

fn parse_month_day(raw: &str) -> Option<(u32, u32)> {
    let (month, day) = raw.split_once('-')?;
    let (month, day) = (month.parse().ok()?, day.parse().ok()?);
    NaiveDate::from_ymd_opt(2000, month, day).map(|_| (month, day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{parse_datetime, ScheduleType};

    fn now() -> NaiveDateTime {
        parse_datetime("2024-01-01 12:00:00").unwrap()
    }

    #[test]
    fn test_every_day() {
        let config = parse_sentence_at("Every day at 01:00", now()).unwrap();
        assert_eq!(
            config.rule,
            ScheduleRule::Timings {
                time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                timing: Timing::Day { period: 1 }
            }
        );
        assert_eq!(config.nlp_sentence.as_deref(), Some("Every day at 01:00"));
    }

    #[test]
    fn test_every_n_seconds_from() {
        let config =
            parse_sentence_at("every 30 seconds from 2024-01-01 00:00:00", now()).unwrap();
        assert_eq!(
            config.rule,
            ScheduleRule::Continuous {
                start: parse_datetime("2024-01-01 00:00:00").unwrap(),
                period_seconds: 30
            }
        );
        let config = parse_sentence_at("every 5 minutes", now()).unwrap();
        assert_eq!(
            config.rule,
            ScheduleRule::Continuous {
                start: now(),
                period_seconds: 300
            }
        );
    }

    #[test]
    fn test_weekdays() {
        let config = parse_sentence_at("every wed, mon at 08:30", now()).unwrap();
        assert_eq!(
            config.rule,
            ScheduleRule::Timings {
                time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                timing: Timing::Weekday {
                    period: 1,
                    weekdays: vec![1, 3]
                }
            }
        );
        let config = parse_sentence_at("every 2 weeks on friday at 18:00", now()).unwrap();
        assert!(matches!(
            config.rule,
            ScheduleRule::Timings {
                timing: Timing::Weekday { period: 2, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_monthday_and_year() {
        let config = parse_sentence_at("day 15,last of every month at 09:00", now()).unwrap();
        assert!(matches!(
            &config.rule,
            ScheduleRule::Timings { timing: Timing::Monthday { period: 1, monthdays }, .. }
                if monthdays == &vec![15, 32]
        ));
        let config = parse_sentence_at("12-01,06-01 each year at 10:00", now()).unwrap();
        assert!(matches!(
            &config.rule,
            ScheduleRule::Timings { timing: Timing::Year { dates, .. }, .. }
                if dates == &vec![(6, 1), (12, 1)]
        ));
    }

    #[test]
    fn test_once() {
        let config = parse_sentence_at("once at 2024-05-01 10:00:00", now()).unwrap();
        assert_eq!(config.schedule_type(), ScheduleType::Once);
    }

    #[test]
    fn test_unsupported_sentences() {
        for sentence in [
            "",
            "tomorrow morning",
            "every day",
            "every 0 seconds",
            "every blursday at 10:00",
            "day 40 of every month at 01:00",
            "every day at 01:00 please",
        ] {
            assert!(
                matches!(
                    parse_sentence_at(sentence, now()),
                    Err(SchedulerError::ConfigInvalid(_))
                ),
                "{sentence:?} should be rejected"
            );
        }
    }
}
