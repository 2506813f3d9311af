mod common;

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use common::{dt, period, Fixture};
use scheduler_core::config::DispatchConfig;
use scheduler_core::models::{
    Consumer, LogStatus, QueueModule, QueuePermission, Schedule, ScheduleLog, ScheduleQueue,
};
use scheduler_core::traits::CacheService;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_dispatcher::{DispatchService, NextOutcome};
use scheduler_infrastructure::QueueManager;

/// 连不上的缓存服务，所有命令都失败
struct UnreachableCache;

fn refused() -> SchedulerError {
    SchedulerError::Cache("connection refused".to_string())
}

#[async_trait]
impl CacheService for UnreachableCache {
    async fn qpush(&self, _name: &str, _values: Vec<String>) -> SchedulerResult<usize> {
        Err(refused())
    }
    async fn qpop(&self, _name: &str) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn qbpop(&self, _name: &str, _timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn qrpop(&self, _name: &str) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn qbrpop(&self, _name: &str, _timeout_seconds: u64) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn llen(&self, _name: &str) -> SchedulerResult<usize> {
        Err(refused())
    }
    async fn delete(&self, _name: &str) -> SchedulerResult<bool> {
        Err(refused())
    }
    async fn set(&self, _key: &str, _value: &str, _expire_seconds: Option<u64>) -> SchedulerResult<()> {
        Err(refused())
    }
    async fn get(&self, _key: &str) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn hset(&self, _name: &str, _fields: HashMap<String, String>) -> SchedulerResult<usize> {
        Err(refused())
    }
    async fn hget(&self, _name: &str, _field: &str) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
    async fn hgetall(&self, _name: &str) -> SchedulerResult<HashMap<String, String>> {
        Err(refused())
    }
    async fn hdel(&self, _name: &str, _field: &str) -> SchedulerResult<Option<String>> {
        Err(refused())
    }
}

/// 在预置的内存队列之外再挂一个放在不可用缓存上的 remote 队列
async fn dispatch_with_unreachable_queue(fixture: &Fixture) -> DispatchService {
    let queues = Arc::new(QueueManager::new(Some(Arc::new(UnreachableCache))));
    queues.reload(fixture.catalogue.queues.as_ref()).await.unwrap();
    queues
        .register(ScheduleQueue::new("remote", "远程队列", QueueModule::CacheFifo))
        .await
        .unwrap();
    DispatchService::new(
        fixture.catalogue.clone(),
        queues,
        fixture.registry.clone(),
        DispatchConfig::default(),
    )
}

#[tokio::test]
async fn test_ip_allowlist_guards_queue() {
    let fixture = Fixture::new().await;
    fixture
        .catalogue
        .permissions
        .create(&QueuePermission::ip_allowlist("opening", &["10.0.0.1"]))
        .await
        .unwrap();

    let denied = fixture.dispatch.next("opening", None, "10.0.0.2").await;
    assert!(matches!(
        denied,
        Err(SchedulerError::PermissionDenied(message)) if message == "IP 10.0.0.2 Not Allowed"
    ));
    assert_eq!(
        fixture.dispatch.next("opening", None, "10.0.0.1").await.unwrap(),
        NextOutcome::Empty("opening".to_string())
    );
    // 没有权限配置的队列不限制来源
    assert!(fixture.dispatch.next("test", None, "10.0.0.2").await.is_ok());
}

#[tokio::test]
async fn test_unknown_queue() {
    let fixture = Fixture::new().await;
    assert!(matches!(
        fixture.dispatch.next("missing", None, "127.0.0.1").await,
        Err(SchedulerError::QueueMissing(code)) if code == "missing"
    ));
}

#[tokio::test]
async fn test_registration_handshake() {
    let fixture = Fixture::new().await;
    fixture.queue("opening").await.push(vec!["{}".into()]).await.unwrap();

    let first = fixture.dispatch.next("opening", Some("77"), "127.0.0.1").await.unwrap();
    let raw = match first {
        NextOutcome::Envelope(raw) => raw,
        other => panic!("expected register envelope, got {other:?}"),
    };
    let envelope: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope["generator"], "register");
    assert_eq!(envelope["task"]["config"]["consumer_id"], "77");

    assert_eq!(
        fixture.dispatch.next("opening", Some("77"), "127.0.0.1").await.unwrap(),
        NextOutcome::Registering("77".to_string())
    );

    fixture.registry.register(Consumer::new(77)).await.unwrap();
    let served = fixture.dispatch.next("opening", Some("77"), "127.0.0.1").await.unwrap();
    assert_eq!(served, NextOutcome::Envelope("{}".to_string()));
    assert!(fixture.registry.last_heartbeat(77).await.unwrap().is_some());
}

#[tokio::test]
async fn test_registration_can_be_disabled() {
    let fixture = Fixture::with_dispatch(DispatchConfig {
        require_registration: false,
        ..DispatchConfig::default()
    })
    .await;
    assert_eq!(
        fixture.dispatch.next("opening", Some("5"), "127.0.0.1").await.unwrap(),
        NextOutcome::Empty("opening".to_string())
    );
}

#[tokio::test]
async fn test_put_reports_per_schedule_and_queue() {
    let fixture = Fixture::new().await;
    let task = fixture.task("report").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;

    let results = fixture
        .dispatch
        .put(vec![
            (schedule.id, "opening".into(), "20240101080000".into()),
            (schedule.id, "opening".into(), "20240101090000".into()),
            (schedule.id, "nowhere".into(), "20240101080000".into()),
            (999, "opening".into(), "20240101080000".into()),
        ])
        .await
        .unwrap();

    assert_eq!(results[&schedule.id.to_string()]["opening"], "2 schedule(s) put");
    assert_eq!(results[&schedule.id.to_string()]["nowhere"], "no such queue");
    assert_eq!(results["999"], "no such schedule");

    let envelopes = fixture.drain("opening").await;
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0]["schedule_time"], "2024-01-01 08:00:00");
    assert_eq!(envelopes[1]["schedule_time"], "2024-01-01 09:00:00");
    assert!(envelopes.iter().all(|e| e["generator"] == "put"));
}

#[tokio::test]
async fn test_put_keeps_going_when_a_queue_fails() {
    let fixture = Fixture::new().await;
    let dispatch = dispatch_with_unreachable_queue(&fixture).await;
    let task = fixture.task("report").await;
    let first = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    let second = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;

    let results = dispatch
        .put(vec![
            (first.id, "opening".into(), "20240101080000".into()),
            (first.id, "remote".into(), "20240101080000".into()),
            (second.id, "opening".into(), "20240101080000".into()),
        ])
        .await
        .unwrap();

    assert_eq!(results[&first.id.to_string()]["opening"], "1 schedule(s) put");
    assert_eq!(
        results[&first.id.to_string()]["remote"],
        refused().to_string()
    );
    assert_eq!(results[&second.id.to_string()]["opening"], "1 schedule(s) put");
    let opening = dispatch.queues().get("opening").await.unwrap();
    assert_eq!(opening.size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_retry_keeps_going_when_a_queue_fails() {
    let fixture = Fixture::new().await;
    let dispatch = dispatch_with_unreachable_queue(&fixture).await;
    let task = fixture.task("flaky").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    let mut ids = Vec::new();
    for queue in ["remote", "opening"] {
        let log = fixture
            .catalogue
            .logs
            .create(&ScheduleLog::new(
                schedule.id,
                queue,
                dt("2024-01-01 08:00:00"),
                LogStatus::Exception,
                json!({"error": "boom"}),
            ))
            .await
            .unwrap();
        ids.push(log.id);
    }

    let results = dispatch.retry(&ids).await.unwrap();
    assert_eq!(results[&ids[0].to_string()], refused().to_string());
    assert_eq!(results[&ids[1].to_string()], format!("{}->opening", schedule.id));
    let opening = dispatch.queues().get("opening").await.unwrap();
    assert_eq!(opening.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_put_rejects_bad_time() {
    let fixture = Fixture::new().await;
    let result = fixture
        .dispatch
        .put(vec![(1, "opening".into(), "2024-01-01".into())])
        .await;
    assert!(matches!(result, Err(SchedulerError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_put_raw_checks_required_fields() {
    let fixture = Fixture::new().await;
    let complete = json!({"id": 1, "schedule_time": "2024-01-01 00:00:00", "task": {}, "queue": "opening"});
    let partial = json!({"id": 2, "schedule_time": "2024-01-01 00:00:00", "queue": "opening"});

    let err = fixture
        .dispatch
        .put_raw(vec![complete.clone(), partial], "opening")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "schedule 1 missing field task");
    assert_eq!(fixture.queue("opening").await.size().await.unwrap(), 0);

    let count = fixture
        .dispatch
        .put_raw(vec![complete.clone(), complete], "opening")
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert!(matches!(
        fixture.dispatch.put_raw(vec![], "ghost").await,
        Err(SchedulerError::QueueMissing(_))
    ));
}

#[tokio::test]
async fn test_retry_requeues_with_original_time() {
    let fixture = Fixture::new().await;
    let task = fixture.task("flaky").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    let log = fixture
        .catalogue
        .logs
        .create(&ScheduleLog::new(
            schedule.id,
            "opening",
            dt("2024-01-01 08:00:00"),
            LogStatus::Exception,
            json!({"error": "boom"}),
        ))
        .await
        .unwrap();

    let results = fixture.dispatch.retry(&[log.id, 9999]).await.unwrap();
    assert_eq!(results[&log.id.to_string()], format!("{}->opening", schedule.id));
    assert_eq!(results["9999"], "no such log");

    let envelopes = fixture.drain("opening").await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["generator"], "retry");
    assert_eq!(envelopes[0]["schedule_time"], "2024-01-01 08:00:00");
    assert_eq!(envelopes[0]["last_log"], json!({"error": "boom"}));
}

#[tokio::test]
async fn test_batch_limit() {
    let fixture = Fixture::with_dispatch(DispatchConfig {
        max_batch: 2,
        ..DispatchConfig::default()
    })
    .await;
    assert!(matches!(
        fixture.dispatch.retry(&[1, 2, 3]).await,
        Err(SchedulerError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_status_lists_queue_sizes() {
    let fixture = Fixture::new().await;
    fixture.queue("test").await.push(vec!["a".into(), "b".into()]).await.unwrap();
    let status = fixture.dispatch.status().await;
    assert_eq!(status.get("opening"), Some(&0));
    assert_eq!(status.get("test"), Some(&2));
}

#[tokio::test]
async fn test_exception_report() {
    let fixture = Fixture::new().await;
    let report = fixture
        .dispatch
        .report_exception("traceback".into(), "worker-1".into(), "10.0.0.3".into())
        .await
        .unwrap();
    assert!(report.id > 0);
    assert!(fixture
        .dispatch
        .report_exception(" ".into(), "worker-1".into(), "10.0.0.3".into())
        .await
        .is_err());
}
