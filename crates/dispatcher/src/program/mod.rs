//! 程序控制面
//!
//! 生产者和进程内消费者都实现 [`Program`]，由 [`ProgramAgent`] 负责启动、停止、重启和读取日志。

mod agent;
mod log;
mod state;

pub use agent::ProgramAgent;
pub use log::PagedLog;
pub use state::{ProgramState, ProgramStateHandle};

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

use scheduler_core::SchedulerResult;

/// 可由控制面管理的长期运行程序
#[async_trait]
pub trait Program: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// 运行直到 `stop` 变为 `true`
    async fn run(&self, stop: watch::Receiver<bool>, state: ProgramStateHandle) -> SchedulerResult<()>;
}

/// 等待 `duration`，期间收到停止信号则返回 `true`
pub async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
        _ = tokio::time::sleep(duration) => *stop.borrow(),
    }
}
