use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;

use scheduler_core::builtin_names::{TASK_EXCEPTION_HANDLE, TASK_LOG_CLEANUP, TASK_STRICT_HANDLE};
use scheduler_core::config::{DispatchConfig, ReconcilerConfig, WorkerConfig};
use scheduler_core::envelope::EnvelopeTask;
use scheduler_core::models::{LogStatus, QueueModule, Schedule, ScheduleLog, ScheduleQueue, Task};
use scheduler_core::time::{now, ScheduleConfig};
use scheduler_core::traits::{CacheService, LogQuery};
use scheduler_core::{Catalogue, Generator, ScheduleEnvelope};
use scheduler_dispatcher::program::{ProgramAgent, ProgramStateHandle};
use scheduler_dispatcher::{ConsumerRegistry, DispatchService};
use scheduler_infrastructure::{DatabaseManager, LocalCacheClient, QueueManager};
use scheduler_worker::{ConsumerProgram, LocalSource, CONSUMER_PROGRAM};

struct Fixture {
    catalogue: Catalogue,
    cache: Arc<dyn CacheService>,
    dispatch: Arc<DispatchService>,
}

impl Fixture {
    async fn new() -> Self {
        let catalogue = DatabaseManager::in_memory().await.unwrap().catalogue();
        catalogue
            .queues
            .create(&ScheduleQueue::new("opening", "系统任务队列", QueueModule::MemoryFifo))
            .await
            .unwrap();
        let cache: Arc<dyn CacheService> = Arc::new(LocalCacheClient::spawn());
        let queues = Arc::new(QueueManager::new(Some(cache.clone())));
        queues.reload(catalogue.queues.as_ref()).await.unwrap();
        let config = DispatchConfig::default();
        let registry = Arc::new(ConsumerRegistry::new(cache.clone(), &config));
        let dispatch = Arc::new(DispatchService::new(catalogue.clone(), queues, registry, config));
        Self {
            catalogue,
            cache,
            dispatch,
        }
    }

    fn consumer(&self, poll_interval_ms: u64) -> ConsumerProgram {
        let worker = WorkerConfig {
            poll_interval_ms,
            ..WorkerConfig::default()
        };
        ConsumerProgram::new(
            self.dispatch.clone(),
            Arc::new(LocalSource::new(self.dispatch.clone())),
            &worker,
            ReconcilerConfig::default(),
        )
    }

    fn state(&self) -> ProgramStateHandle {
        ProgramStateHandle::new(CONSUMER_PROGRAM, self.cache.clone())
    }

    /// 建任务与每分钟一次的计划，返回对应的信封
    async fn envelope(&self, name: &str, config: Value) -> ScheduleEnvelope {
        let task = self
            .catalogue
            .tasks
            .create(&Task::new(name).with_config(config))
            .await
            .unwrap();
        let schedule_config = ScheduleConfig::from_value(json!({
            "schedule_type": "S",
            "S": {"period": 60, "schedule_start_time": "2024-01-01 00:00:00"}
        }))
        .unwrap();
        let schedule = self
            .catalogue
            .schedules
            .create(&Schedule::new(task.id, schedule_config, now()).unwrap())
            .await
            .unwrap();
        ScheduleEnvelope::from_schedule(&schedule, EnvelopeTask::new(&task, None, None), "opening", Generator::Auto)
    }

    async fn logs_of(&self, schedule: i64) -> Vec<ScheduleLog> {
        let query = LogQuery::window(now() - Duration::days(365), now() + Duration::minutes(1));
        self.catalogue
            .logs
            .list(&query)
            .await
            .unwrap()
            .into_iter()
            .filter(|log| log.schedule == schedule)
            .collect()
    }
}

#[tokio::test]
async fn test_external_executor_records_no_retry() {
    let fixture = Fixture::new().await;
    let envelope = fixture.envelope("daily-report", json!({})).await;
    let consumer = fixture.consumer(50);
    let state = fixture.state();

    let execution = consumer.process(&envelope, &state).await;
    assert_eq!(execution.status, LogStatus::NoRetry);
    assert_eq!(
        execution.result["message"],
        "executor daily-report is not available on this node"
    );

    let logs = fixture.logs_of(envelope.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::NoRetry);
    assert_eq!(logs[0].schedule_time, envelope.schedule_time);
    assert_eq!(logs[0].queue, "opening");
    assert_eq!(state.snapshot().await.succeed_count, 1);
}

#[tokio::test]
async fn test_exception_handle_with_nothing_to_retry() {
    let fixture = Fixture::new().await;
    let envelope = fixture
        .envelope(TASK_EXCEPTION_HANDLE, json!({"max_retry_times": 5}))
        .await;
    let execution = fixture.consumer(50).process(&envelope, &fixture.state()).await;
    assert_eq!(execution.status, LogStatus::Empty);
    assert_eq!(execution.result["exceptions"], json!([]));
}

#[tokio::test]
async fn test_log_cleanup_respects_retention() {
    let fixture = Fixture::new().await;
    let envelope = fixture.envelope(TASK_LOG_CLEANUP, json!({"retention_days": 7})).await;

    let mut old = ScheduleLog::new(envelope.id, "opening", now(), LogStatus::Succeed, json!({}));
    old.create_time = now() - Duration::days(10);
    fixture.catalogue.logs.create(&old).await.unwrap();
    fixture
        .catalogue
        .logs
        .create(&ScheduleLog::new(envelope.id, "opening", now(), LogStatus::Succeed, json!({})))
        .await
        .unwrap();

    let execution = fixture.consumer(50).process(&envelope, &fixture.state()).await;
    assert_eq!(execution.status, LogStatus::Succeed);
    assert_eq!(execution.result["deleted"], 1);
    assert_eq!(execution.result["retention_days"], 7);
    // 保留的一条加上本次执行写入的一条
    assert_eq!(fixture.logs_of(envelope.id).await.len(), 2);
}

#[tokio::test]
async fn test_strict_handle_reports_missing_queue() {
    let fixture = Fixture::new().await;
    let envelope = fixture
        .envelope(TASK_STRICT_HANDLE, json!({"queues": ["opening", "ghost"]}))
        .await;
    let consumer = fixture.consumer(50);
    let state = fixture.state();

    let execution = consumer.process(&envelope, &state).await;
    assert_eq!(execution.status, LogStatus::Failed);
    assert!(execution.result["failed"]["ghost"].is_string());
    assert_eq!(state.snapshot().await.failed_count, 1);
}

#[tokio::test]
async fn test_consumer_program_drains_queue_and_unregisters() {
    let fixture = Fixture::new().await;
    let envelope = fixture.envelope(TASK_LOG_CLEANUP, json!({})).await;
    let queue = fixture.dispatch.queues().get("opening").await.unwrap();
    queue.push(vec![envelope.to_json().unwrap()]).await.unwrap();

    let program = Arc::new(fixture.consumer(20));
    let consumer_id = program.consumer_id();
    let agent = ProgramAgent::new(program, fixture.state(), None);
    agent.start().await.unwrap();

    let registry = fixture.dispatch.registry();
    let mut processed = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if !fixture.logs_of(envelope.id).await.is_empty() {
            processed = true;
            break;
        }
    }
    assert!(processed);
    assert!(registry.exists(consumer_id).await.unwrap());
    assert!(registry.last_heartbeat(consumer_id).await.unwrap().is_some());
    let buffer = registry.read_log(consumer_id).await.unwrap().unwrap();
    assert!(buffer.contains(&format!("schedule {}", envelope.id)));

    let state = agent.stop().await.unwrap();
    assert!(!state.is_running);
    assert_eq!(state.succeed_count, 1);
    assert!(state.last_process_time.is_some());
    assert!(!registry.exists(consumer_id).await.unwrap());
    assert_eq!(queue.size().await.unwrap(), 0);
}
