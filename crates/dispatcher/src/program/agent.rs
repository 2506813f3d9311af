use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use scheduler_core::time::now;
use scheduler_core::{SchedulerError, SchedulerResult};

use super::log::PagedLog;
use super::state::{ProgramState, ProgramStateHandle};
use super::Program;

const ENGINE: &str = "tokio-task";

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<SchedulerResult<()>>,
}

/// 管理一个程序的启停，同一时刻最多一个运行实例
pub struct ProgramAgent {
    program: Arc<dyn Program>,
    state: ProgramStateHandle,
    log_file: Option<String>,
    running: Mutex<Option<Running>>,
}

impl ProgramAgent {
    pub fn new(program: Arc<dyn Program>, state: ProgramStateHandle, log_file: Option<String>) -> Self {
        Self {
            program,
            state,
            log_file,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.program.name()
    }

    pub fn state_handle(&self) -> &ProgramStateHandle {
        &self.state
    }

    fn guard(&self) -> SchedulerResult<MutexGuard<'_, Option<Running>>> {
        self.running.try_lock().map_err(|_| {
            SchedulerError::Program(format!("another action to {} is processing", self.name()))
        })
    }

    pub async fn start(&self) -> SchedulerResult<ProgramState> {
        let mut running = self.guard()?;
        self.start_locked(&mut running).await
    }

    pub async fn stop(&self) -> SchedulerResult<ProgramState> {
        let mut running = self.guard()?;
        self.stop_locked(&mut running).await
    }

    /// 运行中则先停止再启动
    pub async fn restart(&self) -> SchedulerResult<ProgramState> {
        let mut running = self.guard()?;
        if Self::alive(&running) {
            self.stop_locked(&mut running).await?;
        }
        self.start_locked(&mut running).await
    }

    pub async fn is_running(&self) -> bool {
        Self::alive(&*self.running.lock().await)
    }

    pub async fn state(&self) -> SchedulerResult<ProgramState> {
        self.state.pull().await
    }

    pub async fn log(&self, page: u64, page_size: u64) -> SchedulerResult<PagedLog> {
        let path = self
            .log_file
            .as_ref()
            .ok_or_else(|| SchedulerError::Program(format!("{} has no log file", self.name())))?;
        PagedLog::read(path, page, page_size).await
    }

    fn alive(running: &Option<Running>) -> bool {
        running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    async fn start_locked(&self, running: &mut Option<Running>) -> SchedulerResult<ProgramState> {
        if Self::alive(running) {
            return Err(SchedulerError::Program(format!("{} already started", self.name())));
        }

        let ident = Uuid::new_v4().to_string();
        let name = self.name().to_string();
        let log_file = self.log_file.clone();
        let state = self
            .state
            .update(|s| {
                s.ident = Some(ident.clone());
                s.is_running = true;
                s.engine = ENGINE.to_string();
                s.create_time = Some(now());
                s.program_name = name.clone();
                s.log_file = log_file;
            })
            .await?;

        let (stop, stop_rx) = watch::channel(false);
        let program = self.program.clone();
        let handle = self.state.clone();
        let task = tokio::spawn(async move {
            let result = program.run(stop_rx, handle.clone()).await;
            if let Err(e) = &result {
                error!("程序 {} 异常退出: {}", name, e);
            }
            if let Err(e) = handle.update(|s| s.is_running = false).await {
                error!("写入程序 {} 状态失败: {}", name, e);
            }
            result
        });

        info!("程序 {} 已启动, ident={}", self.name(), ident);
        *running = Some(Running { stop, task });
        Ok(state)
    }

    async fn stop_locked(&self, running: &mut Option<Running>) -> SchedulerResult<ProgramState> {
        let current = running
            .take()
            .filter(|r| !r.task.is_finished())
            .ok_or_else(|| SchedulerError::Program(format!("{} have not started", self.name())))?;

        let _ = current.stop.send(true);
        match current.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("程序 {} 停止时返回错误: {}", self.name(), e),
            Err(e) => error!("程序 {} 任务异常: {}", self.name(), e),
        }
        let state = self.state.update(|s| s.is_running = false).await?;
        info!("程序 {} 已停止", self.name());
        Ok(state)
    }
}
