use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use scheduler_core::config::AppConfig;
use scheduler_core::logging::init_logging;
use task_scheduler::app::{initialize, program_log_files, Application};
use task_scheduler::cli::{Cli, Commands, InitArgs, StartArgs};
use task_scheduler::pidfile::{wait_exit, PidFile};
use task_scheduler::shutdown::{wait_for_signal, ShutdownManager};

const STOP_TIMEOUT_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    init_logging(
        &config.logging.level,
        &config.logging.format,
        &program_log_files(&config),
    )?;

    let pid_file = PidFile::new(&cli.pid_file);
    match cli.command {
        Commands::Init(args) => {
            initialize(&config, &args).await?;
            info!("初始化完成");
        }
        Commands::Start(args) => start(config, &args, &pid_file, true).await?,
        Commands::StartEngine => start(config, &StartArgs::default(), &pid_file, false).await?,
        Commands::Stop => {
            stop(&pid_file).await?;
        }
        Commands::Reload => {
            if let Some(pid) = stop(&pid_file).await? {
                if !wait_exit(pid, Duration::from_secs(STOP_TIMEOUT_SECONDS)).await {
                    anyhow::bail!("进程 {pid} 在 {STOP_TIMEOUT_SECONDS} 秒内没有退出");
                }
            }
            start(config, &StartArgs::default(), &pid_file, true).await?;
        }
    }
    Ok(())
}

async fn start(mut config: AppConfig, args: &StartArgs, pid_file: &PidFile, serve_api: bool) -> Result<()> {
    if let Some(address) = &args.address {
        config.api.bind_address = address.clone();
    }
    let init_args: InitArgs = args.init_args();

    pid_file.write()?;
    let result = run(config, &init_args, serve_api).await;
    pid_file.remove()?;
    result
}

async fn run(config: AppConfig, init_args: &InitArgs, serve_api: bool) -> Result<()> {
    info!("启动调度服务 {}", env!("CARGO_PKG_VERSION"));
    let database = initialize(&config, init_args).await?;
    let app = Application::build(config, database).await?;

    let shutdown = ShutdownManager::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.shutdown().await;
    });

    app.run(serve_api, shutdown).await?;
    info!("调度服务已退出");
    Ok(())
}

async fn stop(pid_file: &PidFile) -> Result<Option<u32>> {
    let pid = pid_file.terminate().await?;
    match pid {
        Some(pid) => info!("已停止调度服务 (pid {pid})"),
        None => warn!("pid文件 {} 不存在，调度服务可能没有运行", pid_file.path().display()),
    }
    Ok(pid)
}
