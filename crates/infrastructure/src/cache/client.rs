//! 基于缓存服务协议的客户端
//!
//! 命令编码与结果解析共用 [`CommandClient`]，传输层可以是 TCP 连接，也可以直接是进程内的反应器。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use scheduler_core::config::CacheConfig;
use scheduler_core::traits::CacheService;
use scheduler_core::{SchedulerError, SchedulerResult};

use super::protocol::{decode_reply, Reply, Request};
use super::server::ReactorHandle;

/// 发送一条命令并取回结果文本
#[async_trait]
pub trait CacheTransport: Send + Sync {
    /// `block` 为阻塞命令的服务端等待时间，零表示一直等待
    async fn call(&self, request: Request, block: Option<Duration>) -> SchedulerResult<Option<String>>;
}

/// 每条命令一个 TCP 连接
#[derive(Debug, Clone)]
pub struct SocketTransport {
    address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }
}

#[async_trait]
impl CacheTransport for SocketTransport {
    async fn call(&self, request: Request, block: Option<Duration>) -> SchedulerResult<Option<String>> {
        let payload = request.encode()?;
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SchedulerError::Timeout(format!("连接缓存服务超时: {}", self.address)))?
            .map_err(|e| SchedulerError::Cache(format!("无法连接缓存服务 {}: {}", self.address, e)))?;
        stream.write_all(payload.as_bytes()).await?;

        let mut buf = Vec::new();
        let read = stream.read_to_end(&mut buf);
        match block {
            Some(wait) if wait.is_zero() => {
                read.await?;
            }
            wait => {
                let limit = self.read_timeout + wait.unwrap_or_default();
                timeout(limit, read)
                    .await
                    .map_err(|_| SchedulerError::Timeout(format!("读取缓存服务响应超时: {}", request.command)))??;
            }
        }
        decode_reply(&String::from_utf8_lossy(&buf))
    }
}

#[async_trait]
impl CacheTransport for ReactorHandle {
    async fn call(&self, request: Request, block: Option<Duration>) -> SchedulerResult<Option<String>> {
        match self.execute(request, block.unwrap_or_default()).await {
            Reply::Value(payload) => Ok(Some(payload.render())),
            Reply::Nil => Ok(None),
            Reply::Error { message, .. } => Err(SchedulerError::Cache(message)),
        }
    }
}

/// 缓存服务命令客户端
#[derive(Debug, Clone)]
pub struct CommandClient<T> {
    transport: T,
}

pub type SocketCacheClient = CommandClient<SocketTransport>;
pub type LocalCacheClient = CommandClient<ReactorHandle>;

impl SocketCacheClient {
    pub fn from_config(config: &CacheConfig) -> Self {
        let transport = SocketTransport::new(config.address()).with_timeouts(
            Duration::from_secs(config.connect_timeout_seconds),
            Duration::from_secs(config.read_timeout_seconds),
        );
        Self::new(transport)
    }
}

impl LocalCacheClient {
    /// 进程内缓存，不经过网络
    pub fn spawn() -> Self {
        let (reactor, _task) = ReactorHandle::spawn();
        Self::new(reactor)
    }
}

impl<T: CacheTransport> CommandClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn send(&self, request: Request) -> SchedulerResult<Option<String>> {
        self.transport.call(request, None).await
    }

    async fn send_count(&self, request: Request) -> SchedulerResult<usize> {
        let command = request.command.clone();
        let raw = self.send(request).await?.unwrap_or_default();
        raw.trim()
            .parse::<usize>()
            .map_err(|_| SchedulerError::Protocol(format!("{command} 返回了非数字结果: {raw}")))
    }

    pub async fn ping(&self) -> SchedulerResult<()> {
        self.send(Request::new("ping")).await.map(|_| ())
    }

    /// 队列和缓存清单
    pub async fn list(&self) -> SchedulerResult<Value> {
        let raw = self.send(Request::new("list")).await?.unwrap_or_default();
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn mset(&self, pairs: &HashMap<String, String>, expire_seconds: Option<u64>) -> SchedulerResult<usize> {
        let mut request = Request::new("mset").arg("data", serde_json::to_string(pairs)?);
        if let Some(expire) = expire_seconds {
            request = request.arg("expire", expire);
        }
        self.send_count(request).await
    }
}

#[async_trait]
impl<T: CacheTransport> CacheService for CommandClient<T> {
    #[instrument(skip(self, values), fields(count = values.len()))]
    async fn qpush(&self, name: &str, values: Vec<String>) -> SchedulerResult<usize> {
        self.send_count(Request::new("qpush").arg("name", name).values(values))
            .await
    }

    async fn qpop(&self, name: &str) -> SchedulerResult<Option<String>> {
        self.send(Request::new("qpop").arg("name", name)).await
    }

    async fn qbpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        let request = Request::new("qbpop")
            .arg("name", name)
            .arg("timeout", timeout_seconds);
        debug!("阻塞读取队列 {}，超时 {} 秒", name, timeout_seconds);
        self.transport
            .call(request, Some(Duration::from_secs(timeout_seconds)))
            .await
    }

    async fn qrpop(&self, name: &str) -> SchedulerResult<Option<String>> {
        self.send(Request::new("qrpop").arg("name", name)).await
    }

    async fn qbrpop(&self, name: &str, timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        let request = Request::new("qbrpop")
            .arg("name", name)
            .arg("timeout", timeout_seconds);
        self.transport
            .call(request, Some(Duration::from_secs(timeout_seconds)))
            .await
    }

    async fn llen(&self, name: &str) -> SchedulerResult<usize> {
        self.send_count(Request::new("llen").arg("name", name)).await
    }

    async fn delete(&self, name: &str) -> SchedulerResult<bool> {
        Ok(self.send_count(Request::new("delete").arg("name", name)).await? > 0)
    }

    async fn set(&self, key: &str, value: &str, expire_seconds: Option<u64>) -> SchedulerResult<()> {
        let mut request = Request::new("set").value(key).value(value);
        if let Some(expire) = expire_seconds {
            request = request.arg("expire", expire);
        }
        self.send(request).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        self.send(Request::new("get").value(key)).await
    }

    async fn hset(&self, name: &str, fields: HashMap<String, String>) -> SchedulerResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let data = serde_json::to_string(&fields)?;
        self.send_count(Request::new("hset").arg("name", name).arg("data", data))
            .await
    }

    async fn hget(&self, name: &str, field: &str) -> SchedulerResult<Option<String>> {
        self.send(Request::new("hget").arg("name", name).value(field))
            .await
    }

    async fn hgetall(&self, name: &str) -> SchedulerResult<HashMap<String, String>> {
        let raw = self
            .send(Request::new("hgetall").arg("name", name))
            .await?
            .unwrap_or_else(|| "{}".to_string());
        Ok(serde_json::from_str(&raw)?)
    }

    async fn hdel(&self, name: &str, field: &str) -> SchedulerResult<Option<String>> {
        self.send(Request::new("hdel").arg("name", name).value(field))
            .await
    }
}
