use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use super::sections::{
    ApiConfig, CacheConfig, CacheEngine, DatabaseConfig, DispatchConfig, LoggingConfig,
    ProducerConfig, ReconcilerConfig, WorkerConfig,
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub producer: ProducerConfig,
    pub dispatch: DispatchConfig,
    pub reconciler: ReconcilerConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 内置默认值
    /// 2. 配置文件(TOML)，未指定时依次查找默认路径
    /// 3. 环境变量覆盖(前缀 `SCHEDULER`，层级分隔符 `__`)
    /// 4. 兼容旧部署的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/scheduler/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("reconciler.strict_queues")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.apply_legacy_env(|key| std::env::var(key).ok())?;
        config.reconciler.normalize();
        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.reconciler.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 应用旧部署使用的环境变量
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("SERVER_ADDRESS").filter(|v| !v.is_empty()) {
            self.api.bind_address = address;
        }
        if let Some(flag) = lookup("RUN_MAIN") {
            self.api.enabled = parse_flag(&flag);
        }
        if let Some(flag) = lookup("RUN_CLIENT") {
            self.worker.enabled = parse_flag(&flag);
        }
        if let Some(raw) = lookup("CACHE_SERVICE").filter(|v| !v.trim().is_empty()) {
            let service: Value =
                serde_json::from_str(&raw).context("CACHE_SERVICE 必须是JSON对象")?;
            self.apply_cache_service(&service)?;
        }
        Ok(())
    }

    fn apply_cache_service(&mut self, service: &Value) -> Result<()> {
        let empty = Value::Object(Default::default());
        let settings = service.get("config").unwrap_or(&empty);
        match service.get("engine").and_then(Value::as_str) {
            Some("redis") => {
                self.cache.engine = CacheEngine::Redis;
                if let Some(url) = settings.get("url").and_then(Value::as_str) {
                    self.cache.redis_url = url.to_string();
                } else {
                    let host = settings
                        .get("host")
                        .and_then(Value::as_str)
                        .unwrap_or("127.0.0.1");
                    let port = settings.get("port").and_then(Value::as_u64).unwrap_or(6379);
                    let db = settings.get("db").and_then(Value::as_u64).unwrap_or(0);
                    self.cache.redis_url = format!("redis://{host}:{port}/{db}");
                }
            }
            Some("socket") | None => {
                self.cache.engine = CacheEngine::Socket;
                if let Some(host) = settings.get("host").and_then(Value::as_str) {
                    self.cache.host = host.to_string();
                }
                if let Some(port) = settings.get("port").and_then(Value::as_u64) {
                    self.cache.port =
                        u16::try_from(port).context("CACHE_SERVICE 端口超出范围")?;
                }
            }
            Some(other) => return Err(anyhow::anyhow!("不支持的缓存引擎: {other}")),
        }
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.cache.validate().context("缓存服务配置验证失败")?;
        self.producer.validate().context("生产者配置验证失败")?;
        self.dispatch.validate().context("分发配置验证失败")?;
        self.reconciler.validate().context("对账器配置验证失败")?;
        self.worker.validate().context("消费者配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off" | ""
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.producer.hard_cap(), 2000);
        assert_eq!(config.cache.address(), "127.0.0.1:55555");
        assert_eq!(config.reconciler.strict_queues, vec!["opening".to_string()]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [producer]
            soft_cap = 10

            [logging]
            format = "json"
            directory = "/var/log/scheduler/"
            "#,
        )
        .unwrap();
        assert_eq!(config.producer.soft_cap, 10);
        assert_eq!(config.producer.tick_interval_ms, 1000);
        assert_eq!(config.dispatch.max_batch, 1000);
        assert_eq!(
            config.logging.program_log_file("producer").as_deref(),
            Some("/var/log/scheduler/producer.log")
        );
    }

    #[test]
    fn test_duplicate_strict_queues_are_collapsed() {
        let config = AppConfig::from_toml(
            r#"
            [reconciler]
            strict_queues = ["opening", "test", "opening", "test"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.reconciler.strict_queues,
            vec!["opening".to_string(), "test".to_string()]
        );
        assert!(AppConfig::from_toml("[reconciler]\nstrict_queues = [\"\"]").is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_toml("[database]\nurl = \"postgres://x\"").is_err());
        assert!(AppConfig::from_toml("[logging]\nformat = \"xml\"").is_err());
        assert!(AppConfig::from_toml("[api]\nbind_address = \"nowhere\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[api]\nbind_address = \"127.0.0.1:9000\"").unwrap();
        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_legacy_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SERVER_ADDRESS", "127.0.0.1:8001"),
            ("RUN_MAIN", "false"),
            ("RUN_CLIENT", "0"),
            (
                "CACHE_SERVICE",
                r#"{"engine": "redis", "config": {"host": "cache", "port": 6380, "db": 2}}"#,
            ),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_legacy_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:8001");
        assert!(!config.api.enabled);
        assert!(!config.worker.enabled);
        assert_eq!(config.cache.engine, CacheEngine::Redis);
        assert_eq!(config.cache.redis_url, "redis://cache:6380/2");

        let mut config = AppConfig::default();
        config
            .apply_legacy_env(|key| {
                (key == "CACHE_SERVICE")
                    .then(|| r#"{"engine": "socket", "config": {"port": 6000}}"#.to_string())
            })
            .unwrap();
        assert_eq!(config.cache.engine, CacheEngine::Socket);
        assert_eq!(config.cache.port, 6000);

        let mut config = AppConfig::default();
        assert!(config
            .apply_legacy_env(|key| (key == "CACHE_SERVICE").then(|| "{\"engine\": \"memcached\"}".to_string()))
            .is_err());
    }
}
