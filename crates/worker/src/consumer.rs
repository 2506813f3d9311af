//! 进程内消费者
//!
//! 注册自身后循环拉取计划，解析执行器种类并执行系统任务，每次执行写一条日志。
//! 停止时删除自己的成员记录。

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use scheduler_core::config::{ReconcilerConfig, WorkerConfig};
use scheduler_core::models::{Consumer, LogStatus, Machine, ProgramSource, ScheduleLog};
use scheduler_core::time::{format_datetime, now};
use scheduler_core::{Catalogue, ExecutorKind, Generator, ScheduleEnvelope, SchedulerResult};
use scheduler_dispatcher::program::{wait_or_stop, Program, ProgramStateHandle};
use scheduler_dispatcher::DispatchService;

use crate::executors::{Execution, SystemExecutors};
use crate::source::ScheduleSource;

pub const CONSUMER_PROGRAM: &str = "consumer";

fn is_failure(status: LogStatus) -> bool {
    matches!(
        status,
        LogStatus::Failed | LogStatus::PartialFailed | LogStatus::Exception | LogStatus::Timeout
    )
}

pub struct ConsumerProgram {
    consumer_id: i64,
    queue: String,
    poll_interval: Duration,
    catalogue: Catalogue,
    source: Arc<dyn ScheduleSource>,
    executors: SystemExecutors,
}

impl ConsumerProgram {
    pub fn new(
        dispatch: Arc<DispatchService>,
        source: Arc<dyn ScheduleSource>,
        worker: &WorkerConfig,
        reconciler: ReconcilerConfig,
    ) -> Self {
        Self {
            consumer_id: Utc::now().timestamp_millis(),
            queue: worker.queue.clone(),
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            catalogue: dispatch.catalogue().clone(),
            source,
            executors: SystemExecutors::new(dispatch, reconciler),
        }
    }

    pub fn consumer_id(&self) -> i64 {
        self.consumer_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 本进程的成员记录
    pub fn record(&self) -> Consumer {
        let mut consumer = Consumer::new(self.consumer_id);
        consumer.machine = Machine {
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default(),
            intranet_ip: "127.0.0.1".to_string(),
            ..Machine::default()
        };
        consumer.program_source = ProgramSource::Report;
        consumer.program = Some(json!({"name": CONSUMER_PROGRAM, "queue": self.queue}));
        consumer
    }

    /// 执行一个信封并记录结果
    pub async fn process(&self, envelope: &ScheduleEnvelope, state: &ProgramStateHandle) -> Execution {
        let kind = ExecutorKind::resolve(&envelope.task);
        let started = now();
        debug!("执行计划 {} ({}), 执行器 {}", envelope.id, envelope.task.name, kind.name());

        let execution = match self.executors.execute(&kind, envelope, started).await {
            Ok(execution) => execution,
            Err(e) => {
                error!("计划 {} 执行异常: {}", envelope.id, e);
                Execution::new(LogStatus::Exception, json!({"error": e.to_string()}))
            }
        };

        let log = ScheduleLog::new(
            envelope.id,
            envelope.queue.clone(),
            envelope.schedule_time,
            execution.status,
            execution.result.clone(),
        );
        if let Err(e) = self.catalogue.logs.create(&log).await {
            error!("写入计划 {} 的执行日志失败: {}", envelope.id, e);
        }
        metrics::counter!("scheduler_consumer_executions_total", "status" => execution.status.as_str())
            .increment(1);

        let line = format!(
            "{} schedule {} at {} -> {}\n",
            format_datetime(&started),
            envelope.id,
            format_datetime(&envelope.schedule_time),
            execution.status
        );
        if let Err(e) = self.source.write_log(self.consumer_id, &line).await {
            debug!("写入消费者日志缓冲失败: {}", e);
        }

        let failed = is_failure(execution.status);
        let updated = state
            .update(|s| {
                if failed {
                    s.failed_count += 1;
                } else {
                    s.succeed_count += 1;
                }
                s.last_process_time = Some(started);
            })
            .await;
        if let Err(e) = updated {
            warn!("写入消费者状态失败: {}", e);
        }
        execution
    }

    async fn register(&self) -> SchedulerResult<()> {
        let consumer = self.source.register(self.record()).await?;
        info!("消费者 {} 已注册，消费队列 {}", consumer.consumer_id, self.queue);
        Ok(())
    }
}

#[async_trait]
impl Program for ConsumerProgram {
    fn name(&self) -> &str {
        CONSUMER_PROGRAM
    }

    async fn run(&self, mut stop: watch::Receiver<bool>, state: ProgramStateHandle) -> SchedulerResult<()> {
        self.register().await?;

        loop {
            if *stop.borrow() {
                break;
            }
            match self.source.next(&self.queue, self.consumer_id).await {
                Ok(Some(envelope)) if envelope.generator == Generator::Register => {
                    if let Err(e) = self.register().await {
                        warn!("消费者 {} 重新注册失败: {}", self.consumer_id, e);
                    }
                    continue;
                }
                Ok(Some(envelope)) => {
                    self.process(&envelope, &state).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("拉取队列 {} 失败: {}", self.queue, e),
            }
            if wait_or_stop(&mut stop, self.poll_interval).await {
                break;
            }
        }

        if let Err(e) = self.source.unregister(self.consumer_id).await {
            warn!("消费者 {} 注销失败: {}", self.consumer_id, e);
        }
        info!("消费者 {} 停止", self.consumer_id);
        Ok(())
    }
}
