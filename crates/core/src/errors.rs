use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 时间引擎拒绝的计划配置
    #[error("计划配置无效: {0}")]
    ConfigInvalid(String),

    #[error("无效的过滤条件: {0}")]
    InvalidFilter(String),

    #[error("队列({0})不存在")]
    QueueMissing(String),

    #[error("计划未找到: {0}")]
    ScheduleMissing(i64),

    #[error("日志未找到: {0}")]
    LogMissing(i64),

    #[error("任务未找到: {0}")]
    TaskMissing(i64),

    #[error("{0}")]
    PermissionDenied(String),

    /// 请求参数不合法，消息直接返回给调用方
    #[error("{0}")]
    InvalidRequest(String),

    #[error("缓存服务错误: {0}")]
    Cache(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    /// 程序控制失败，消息直接返回给操作者
    #[error("{0}")]
    Program(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl SchedulerError {
    pub fn config_invalid(message: impl Into<String>) -> Self {
        SchedulerError::ConfigInvalid(message.into())
    }

    /// 引用类错误(队列、计划、日志缺失)在批量接口中按条目返回，不中断整个调用
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            SchedulerError::QueueMissing(_)
                | SchedulerError::ScheduleMissing(_)
                | SchedulerError::LogMissing(_)
                | SchedulerError::TaskMissing(_)
        )
    }
}
