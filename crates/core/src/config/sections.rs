use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 目录数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://scheduler.db".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow!("数据库URL不能为空"));
        }
        if !self.url.starts_with("sqlite:") {
            return Err(anyhow!("数据库URL必须是SQLite格式"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("最大连接数必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEngine {
    Socket,
    Redis,
}

/// 缓存服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub engine: CacheEngine,
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    /// socket引擎下由 `start` 命令在进程内启动缓存服务
    pub embedded: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            engine: CacheEngine::Socket,
            host: "127.0.0.1".to_string(),
            port: 55555,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_seconds: 5,
            read_timeout_seconds: 5,
            embedded: true,
        }
    }
}

impl CacheConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.engine {
            CacheEngine::Socket => {
                if self.host.is_empty() {
                    return Err(anyhow!("缓存服务地址不能为空"));
                }
            }
            CacheEngine::Redis => {
                if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
                    return Err(anyhow!("Redis URL格式无效: {}", self.redis_url));
                }
            }
        }
        if self.connect_timeout_seconds == 0 || self.read_timeout_seconds == 0 {
            return Err(anyhow!("缓存服务超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 生产者循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub tick_interval_ms: u64,
    pub warmup_seconds: u64,
    /// 队列长度达到软上限时本轮跳过该队列
    pub soft_cap: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            warmup_seconds: 5,
            soft_cap: 1000,
        }
    }
}

impl ProducerConfig {
    pub fn hard_cap(&self) -> usize {
        self.soft_cap * 2
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow!("生产者间隔必须大于0"));
        }
        if self.soft_cap == 0 {
            return Err(anyhow!("队列软上限必须大于0"));
        }
        Ok(())
    }
}

/// 分发接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_batch: usize,
    pub require_registration: bool,
    pub consumer_timeout_seconds: u64,
    pub waitlist_ttl_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 1000,
            require_registration: true,
            consumer_timeout_seconds: 60,
            waitlist_ttl_seconds: 30,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_batch == 0 {
            return Err(anyhow!("批量上限必须大于0"));
        }
        if self.waitlist_ttl_seconds == 0 {
            return Err(anyhow!("注册等待时间必须大于0"));
        }
        Ok(())
    }
}

/// 对账器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub max_retry_times: usize,
    pub window_hours: i64,
    pub strict_queues: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retry_times: 5,
            window_hours: 24,
            strict_queues: vec!["opening".to_string()],
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retry_times == 0 {
            return Err(anyhow!("最大重试次数必须大于0"));
        }
        if self.window_hours <= 0 {
            return Err(anyhow!("对账时间窗口必须大于0"));
        }
        if self.strict_queues.iter().any(|queue| queue.trim().is_empty()) {
            return Err(anyhow!("严格模式队列编码不能为空"));
        }
        Ok(())
    }

    /// 去掉重复的严格模式队列，保留首次出现的顺序
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.strict_queues.retain(|queue| seen.insert(queue.clone()));
    }
}

/// 进程内消费者配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub queue: String,
    pub poll_interval_ms: u64,
    /// 设置后通过HTTP拉取计划，否则直接调用进程内的分发服务
    pub dispatch_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue: "opening".to_string(),
            poll_interval_ms: 1000,
            dispatch_url: None,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.is_empty() {
            return Err(anyhow!("消费队列不能为空"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("拉取间隔必须大于0"));
        }
        Ok(())
    }
}

/// HTTP接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let port_ok = self
            .bind_address
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            return Err(anyhow!("无效的绑定地址: {}", self.bind_address));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// 设置后每个程序写入 `<directory>/<program>.log`
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.format.as_str(), "pretty" | "json") {
            return Err(anyhow!("不支持的日志格式: {}", self.format));
        }
        crate::logging::LogLevel::parse(&self.level)?;
        Ok(())
    }

    /// 程序日志文件路径
    pub fn program_log_file(&self, program: &str) -> Option<String> {
        self.directory
            .as_ref()
            .map(|dir| format!("{}/{program}.log", dir.trim_end_matches('/')))
    }
}
