use clap::{Args, Parser, Subcommand};

/// 分布式任务调度服务
#[derive(Parser, Debug)]
#[command(name = "task-scheduler")]
#[command(version)]
#[command(about = "分布式任务调度服务 - 生产者、调度接口与消费者")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，未指定时依次查找默认位置
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,

    /// pid文件路径
    #[arg(long, global = true, default_value = "task-scheduler.pid")]
    pub pid_file: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 初始化目录数据库和内置记录
    Init(InitArgs),
    /// 启动调度服务
    Start(StartArgs),
    /// 停止正在运行的调度服务
    Stop,
    /// 停止后重新启动
    Reload,
    /// 只启动生产者和消费者，不提供HTTP接口
    #[command(name = "start_engine", alias = "start-engine")]
    StartEngine,
}

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// 执行数据库迁移
    #[arg(long)]
    pub migrate: bool,

    /// 创建管理员账号
    #[arg(long)]
    pub createsuperuser: bool,

    /// 管理员用户名
    #[arg(short, long, default_value = "admin")]
    pub username: String,

    /// 管理员密码，只交给外部管理端，不落库
    #[arg(short, long)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// HTTP监听地址，覆盖配置文件
    #[arg(long, value_name = "HOST:PORT")]
    pub address: Option<String>,

    #[arg(long)]
    pub migrate: bool,

    #[arg(long)]
    pub createsuperuser: bool,
}

impl StartArgs {
    pub fn init_args(&self) -> InitArgs {
        InitArgs {
            migrate: self.migrate,
            createsuperuser: self.createsuperuser,
            username: "admin".to_string(),
            password: None,
        }
    }
}
