//! 缓存服务线协议
//!
//! 请求: 命令行、若干参数行(`key=value` 为命名参数，`$value` 为位置参数)、一个空行。
//! 响应: `+<payload>` / `-<error>` / `*-1`，以 `\r\n\r\n` 结尾。
//! 同一端口兼容 HTTP: 首行形如 `GET /<command>?<query> HTTP/1.1` 时按 HTTP 处理。

use serde_json::{json, Value};
use std::time::Duration;

use scheduler_core::{SchedulerError, SchedulerResult};

pub const TERMINATOR: &str = "\r\n\r\n";

/// 目标名称可以用这些命名参数给出
const NAME_ALIASES: [&str; 3] = ["name", "qname", "key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Line,
    Http,
}

/// 解析后的命令
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub command: String,
    pub named: Vec<(String, String)>,
    pub positional: Vec<String>,
}

impl Request {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.named.push((key.to_string(), value.to_string()));
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.positional.extend(values.into_iter().map(Into::into));
        self
    }

    /// 编码为线协议请求文本
    pub fn encode(&self) -> SchedulerResult<String> {
        let mut lines = Vec::with_capacity(1 + self.named.len() + self.positional.len());
        lines.push(self.command.clone());
        for (key, value) in &self.named {
            lines.push(format!("{key}={value}"));
        }
        for value in &self.positional {
            lines.push(format!("${value}"));
        }
        if lines.iter().any(|line| line.contains('\r') || line.contains('\n')) {
            return Err(SchedulerError::Protocol(
                "argument must not contain line breaks".to_string(),
            ));
        }
        Ok(lines.join("\r\n") + TERMINATOR)
    }

    /// 解析线协议请求，`lines` 不含结尾空行
    pub fn parse_lines(lines: &[String]) -> Result<Self, String> {
        let (header, args) = lines.split_first().ok_or("empty request")?;
        let command = header.trim();
        if command.is_empty() {
            return Err("empty command".to_string());
        }
        let mut request = Request::new(command);
        for line in args {
            if let Some(value) = line.strip_prefix('$') {
                request.positional.push(value.to_string());
            } else if let Some((key, value)) = line.split_once('=') {
                request.named.push((key.to_string(), value.to_string()));
            } else {
                request.positional.push(line.clone());
            }
        }
        Ok(request)
    }

    /// 解析 HTTP 请求行，只接受 GET；查询参数 `arg` 为位置参数
    pub fn parse_http(request_line: &str) -> Result<Self, String> {
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let target = parts.next().ok_or("invalid http header")?;
        if method != "GET" {
            return Err(format!("invalid http method {method}"));
        }
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let command = path.trim_matches('/');
        if command.is_empty() {
            return Err("invalid command name".to_string());
        }
        let mut request = Request::new(command);
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "arg" {
                request.positional.push(value.into_owned());
            } else {
                request.named.push((key.into_owned(), value.into_owned()));
            }
        }
        Ok(request)
    }

    pub fn named(&self, key: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 目标名称与剩余的位置参数
    pub fn target(&self) -> (Option<&str>, &[String]) {
        if let Some(name) = NAME_ALIASES.iter().find_map(|alias| self.named(alias)) {
            return (Some(name), &self.positional);
        }
        match self.positional.split_first() {
            Some((first, rest)) => (Some(first.as_str()), rest),
            None => (None, &[]),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.command.as_str(), "qbpop" | "qbrpop" | "bpop")
    }

    /// 阻塞命令的等待时间，零表示一直等待
    pub fn block_timeout(&self) -> Result<Duration, String> {
        match self.named("timeout") {
            None => Ok(Duration::ZERO),
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .map(|t| Duration::from_secs_f64(t.max(0.0)))
                .ok_or_else(|| format!("invalid param timeout, expect number, got {raw}")),
        }
    }

    /// 字符串的过期秒数
    pub fn expire(&self) -> Result<Option<u64>, String> {
        match self.named("expire") {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => Ok(None),
                Ok(seconds) => Ok(Some(seconds)),
                Err(_) => Err(format!("invalid param expire, expect int, got {raw}")),
            },
        }
    }
}

/// 命令结果
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Int(i64),
    Json(Value),
}

impl Payload {
    pub fn render(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Int(n) => n.to_string(),
            Payload::Json(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Payload),
    Nil,
    Error { status: u16, message: String },
}

impl Reply {
    pub fn text(value: impl Into<String>) -> Self {
        Reply::Value(Payload::Text(value.into()))
    }

    pub fn int(n: impl TryInto<i64>) -> Self {
        Reply::Value(Payload::Int(n.try_into().unwrap_or(i64::MAX)))
    }

    pub fn json(value: Value) -> Self {
        Reply::Value(Payload::Json(value))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            status: 500,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Reply::Error {
            status: 408,
            message: "read timeout on server".to_string(),
        }
    }

    pub fn encode(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Line => self.encode_line(),
            Dialect::Http => self.encode_http(),
        }
    }

    pub fn encode_line(&self) -> String {
        match self {
            Reply::Value(payload) => format!("+{}{TERMINATOR}", payload.render()),
            Reply::Nil => format!("*-1{TERMINATOR}"),
            Reply::Error { message, .. } => format!("-{message}{TERMINATOR}"),
        }
    }

    pub fn encode_http(&self) -> String {
        let (status, body) = match self {
            Reply::Value(payload) => (200, payload.render()),
            Reply::Nil => (200, json!({"error": "no content"}).to_string()),
            Reply::Error { status, message } => (*status, json!({"error": message}).to_string()),
        };
        format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            reason_phrase(status),
            body.len()
        )
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        _ => "Internal Server Error",
    }
}

/// 判断首行是否为 HTTP 请求行
pub fn is_http_request_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(_target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    method.chars().all(|c| c.is_ascii_alphabetic()) && version.starts_with("HTTP/1.")
}

/// 客户端解析线协议响应
pub fn decode_reply(raw: &str) -> SchedulerResult<Option<String>> {
    let body = raw.strip_suffix(TERMINATOR).unwrap_or(raw);
    if body == "*-1" {
        return Ok(None);
    }
    if let Some(message) = body.strip_prefix('-') {
        return Err(SchedulerError::Cache(message.to_string()));
    }
    if let Some(value) = body.strip_prefix('+') {
        return Ok(Some(value.to_string()));
    }
    Err(SchedulerError::Protocol(format!("unexpected response: {body}")))
}
