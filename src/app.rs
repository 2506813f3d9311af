use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use scheduler_api::{create_app, AppState, Programs};
use scheduler_core::config::{AppConfig, CacheEngine};
use scheduler_core::logging::ProgramLogFile;
use scheduler_dispatcher::{
    Builtins, ConsumerRegistry, DispatchService, Producer, ProgramAgent, ProgramStateHandle,
    Reconciler, PRODUCER_PROGRAM,
};
use scheduler_infrastructure::{
    CacheFactory, CacheServer, CacheServerHandle, DatabaseManager, QueueManager,
};
use scheduler_worker::{ConsumerProgram, HttpSource, LocalSource, ScheduleSource, CONSUMER_PROGRAM};

use crate::cli::InitArgs;
use crate::shutdown::ShutdownManager;

/// 程序日志按 tracing target 分流
pub fn program_log_files(config: &AppConfig) -> Vec<ProgramLogFile> {
    [
        (PRODUCER_PROGRAM, "scheduler_dispatcher::producer"),
        (CONSUMER_PROGRAM, "scheduler_worker"),
    ]
    .into_iter()
    .filter_map(|(program, target)| {
        config
            .logging
            .program_log_file(program)
            .map(|path| ProgramLogFile::new(program, target, path))
    })
    .collect()
}

/// `init` 的全部步骤: 连接目录、迁移、内置记录、管理员
pub async fn initialize(config: &AppConfig, args: &InitArgs) -> Result<DatabaseManager> {
    let database = DatabaseManager::new(&config.database)
        .await
        .with_context(|| format!("连接目录数据库失败: {}", config.database.url))?;
    if args.migrate {
        database.migrate().await.context("数据库迁移失败")?;
    }

    let catalogue = database.catalogue();
    let created = Builtins::initialize(&catalogue)
        .await
        .context("初始化内置记录失败")?;
    info!("内置记录就绪，本次新建 {} 条", created);

    if args.createsuperuser {
        if catalogue.operators.ensure(&args.username).await? {
            info!("管理员 {} 已创建", args.username);
        } else {
            info!("管理员 {} 已存在", args.username);
        }
        if args.password.is_none() {
            warn!("未指定管理员密码，请在管理端设置");
        }
    }
    Ok(database)
}

/// 进程内组装好的调度服务
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    cache_server: Option<CacheServerHandle>,
    dispatch: Arc<DispatchService>,
    reconciler: Arc<Reconciler>,
    producer: Arc<ProgramAgent>,
    consumer: Option<Arc<ProgramAgent>>,
    local_consumer: Option<i64>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn build(mut config: AppConfig, database: DatabaseManager) -> Result<Self> {
        let cache_server = if config.cache.engine == CacheEngine::Socket && config.cache.embedded {
            let server = CacheServer::bind(&config.cache.address())
                .await?
                .with_read_timeout(Duration::from_secs(config.cache.read_timeout_seconds))
                .spawn()?;
            // 端口为0时使用实际监听的端口
            config.cache.port = server.local_addr().port();
            Some(server)
        } else {
            None
        };

        let cache = CacheFactory::create(&config.cache)
            .await
            .context("创建缓存服务客户端失败")?;
        let catalogue = database.catalogue();
        let queues = Arc::new(QueueManager::new(Some(cache.clone())));
        let loaded = queues.reload(catalogue.queues.as_ref()).await?;
        info!("加载 {} 个调度队列", loaded);

        let registry = Arc::new(ConsumerRegistry::new(cache.clone(), &config.dispatch));
        let dispatch = Arc::new(DispatchService::new(
            catalogue.clone(),
            queues.clone(),
            registry,
            config.dispatch.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(dispatch.clone(), config.reconciler.clone()));

        let producer = Producer::new(catalogue, queues, config.producer.clone());
        let producer = Arc::new(ProgramAgent::new(
            Arc::new(producer),
            ProgramStateHandle::new(PRODUCER_PROGRAM, cache.clone()),
            config.logging.program_log_file(PRODUCER_PROGRAM),
        ));

        let (consumer, local_consumer) = if config.worker.enabled {
            let source: Arc<dyn ScheduleSource> = match config.worker.dispatch_url.as_deref() {
                Some(url) => Arc::new(HttpSource::new(url)?),
                None => Arc::new(LocalSource::new(dispatch.clone())),
            };
            let program = ConsumerProgram::new(
                dispatch.clone(),
                source,
                &config.worker,
                config.reconciler.clone(),
            );
            let id = program.consumer_id();
            let agent = ProgramAgent::new(
                Arc::new(program),
                ProgramStateHandle::new(CONSUMER_PROGRAM, cache.clone()),
                config.logging.program_log_file(CONSUMER_PROGRAM),
            );
            (Some(Arc::new(agent)), Some(id))
        } else {
            (None, None)
        };

        let metrics = if config.api.enabled && config.api.metrics_enabled {
            Some(
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("安装Prometheus指标记录器失败")?,
            )
        } else {
            None
        };

        Ok(Self {
            config,
            database,
            cache_server,
            dispatch,
            reconciler,
            producer,
            consumer,
            local_consumer,
            metrics,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &Arc<DispatchService> {
        &self.dispatch
    }

    pub fn producer(&self) -> &Arc<ProgramAgent> {
        &self.producer
    }

    pub fn consumer(&self) -> Option<&Arc<ProgramAgent>> {
        self.consumer.as_ref()
    }

    fn app_state(&self) -> AppState {
        let mut programs = Programs::new().with_agent(self.producer.clone());
        if let (Some(agent), Some(id)) = (&self.consumer, self.local_consumer) {
            programs = programs.with_agent(agent.clone()).with_local_consumer(id);
        }
        AppState {
            dispatch: self.dispatch.clone(),
            reconciler: self.reconciler.clone(),
            programs: Arc::new(programs),
            metrics: self.metrics.clone(),
        }
    }

    /// 启动程序(以及HTTP接口)，直到收到关闭信号
    pub async fn run(self, serve_api: bool, shutdown: ShutdownManager) -> Result<()> {
        let mut stop_rx = shutdown.subscribe().await;

        let server = if serve_api && self.config.api.enabled {
            let address = self.config.api.bind_address.clone();
            let listener = TcpListener::bind(&address)
                .await
                .with_context(|| format!("HTTP服务无法监听 {address}"))?;
            info!("HTTP接口监听于 {}", address);
            let app = create_app(self.app_state(), &self.config.api);
            let mut server_rx = shutdown.subscribe().await;
            Some(tokio::spawn(async move {
                axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                    .with_graceful_shutdown(async move {
                        let _ = server_rx.recv().await;
                    })
                    .await
            }))
        } else {
            None
        };

        self.producer.start().await?;
        if let Some(consumer) = &self.consumer {
            consumer.start().await?;
        }

        let _ = stop_rx.recv().await;
        info!("开始停止调度服务");

        if let Some(consumer) = &self.consumer {
            stop_program(consumer).await;
        }
        stop_program(&self.producer).await;

        if let Some(server) = server {
            match server.await {
                Ok(Ok(())) => info!("HTTP接口已停止"),
                Ok(Err(e)) => error!("HTTP服务异常退出: {e}"),
                Err(e) => error!("HTTP服务任务失败: {e}"),
            }
        }
        if let Some(cache_server) = self.cache_server {
            cache_server.shutdown().await;
        }
        self.database.close().await;
        Ok(())
    }
}

async fn stop_program(agent: &ProgramAgent) {
    if !agent.is_running().await {
        return;
    }
    match agent.stop().await {
        Ok(_) => info!("程序 {} 已停止", agent.name()),
        Err(e) => warn!("停止程序 {} 失败: {}", agent.name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.cache.port = 0;
        config.api.enabled = false;
        config.worker.poll_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let config = test_config();
        let args = InitArgs {
            migrate: true,
            createsuperuser: true,
            username: "ops".to_string(),
            password: None,
        };
        let database = initialize(&config, &args).await.unwrap();
        let catalogue = database.catalogue();
        assert_eq!(catalogue.operators.list().await.unwrap(), vec!["ops".to_string()]);
        assert_eq!(Builtins::initialize(&catalogue).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = test_config();
        let args = InitArgs {
            migrate: true,
            ..InitArgs::default()
        };
        let database = initialize(&config, &args).await.unwrap();
        let app = Application::build(config, database).await.unwrap();
        assert_ne!(app.config().cache.port, 0);
        assert!(app.consumer().is_some());

        let producer = app.producer().clone();
        let shutdown = ShutdownManager::new();
        let trigger = shutdown.clone();
        let handle = tokio::spawn(app.run(false, shutdown));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(producer.is_running().await);
        trigger.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(!producer.is_running().await);
    }

    #[test]
    fn test_program_log_files() {
        let mut config = AppConfig::default();
        assert!(program_log_files(&config).is_empty());

        config.logging.directory = Some("/var/log/scheduler/".to_string());
        let files = program_log_files(&config);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/var/log/scheduler/producer.log");
        assert_eq!(files[1].target, "scheduler_worker");
    }
}
