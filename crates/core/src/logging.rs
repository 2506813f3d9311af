//! 日志初始化
//!
//! 控制台输出按配置选择 JSON 或 pretty 格式；配置了日志目录时，
//! 每个程序(生产者、消费者)额外按 tracing target 写入自己的日志文件。

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::errors::SchedulerError;
use crate::SchedulerResult;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(level: &str) -> SchedulerResult<Self> {
        match level.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(SchedulerError::Configuration(format!(
                "Invalid log level: {level}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 单个程序的日志文件: 只收集 target 以 `target` 开头的事件
#[derive(Debug, Clone)]
pub struct ProgramLogFile {
    pub program: String,
    pub target: String,
    pub path: String,
}

impl ProgramLogFile {
    pub fn new(program: impl Into<String>, target: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: target.into(),
            path: path.into(),
        }
    }
}

/// 以追加方式打开日志文件，必要时创建目录
pub fn open_log_file(path: impl AsRef<Path>) -> std::io::Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

type BaseSubscriber = Layered<EnvFilter, Registry>;

/// 初始化全局日志，只能调用一次
pub fn init_logging(level: &str, format: &str, files: &[ProgramLogFile]) -> anyhow::Result<()> {
    let level = LogLevel::parse(level)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut file_layers: Vec<Box<dyn Layer<BaseSubscriber> + Send + Sync>> = Vec::new();
    for file in files {
        let writer = Arc::new(
            open_log_file(&file.path)
                .with_context(|| format!("打开日志文件失败: {}", file.path))?,
        );
        let target = file.target.clone();
        file_layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter_fn(move |meta| meta.target().starts_with(&target)))
                .boxed(),
        );
    }

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layers);

    match format {
        "json" => registry
            .with(fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {format}")),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(LogLevel::parse("WARNING").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::parse("debug").unwrap().as_str(), "debug");
        assert!(LogLevel::parse("loud").is_err());
    }

    #[test]
    fn test_open_log_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("producer.log");
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "first").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "second").unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
