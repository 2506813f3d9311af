mod common;

use chrono::Duration;
use serde_json::json;

use common::{daily, dt, period, Fixture};
use scheduler_core::config::ReconcilerConfig;
use scheduler_core::models::{ExceptionReason, LogStatus, Schedule, ScheduleLog};
use scheduler_core::time::now;
use scheduler_dispatcher::Reconciler;

fn reconciler(fixture: &Fixture) -> Reconciler {
    Reconciler::new(fixture.dispatch.clone(), ReconcilerConfig::default())
}

async fn log(fixture: &Fixture, schedule: i64, time: &str, status: LogStatus) -> ScheduleLog {
    fixture
        .catalogue
        .logs
        .create(&ScheduleLog::new(schedule, "opening", dt(time), status, json!({"status": status.as_str()})))
        .await
        .unwrap()
}

async fn strict_daily(fixture: &Fixture) -> Schedule {
    let task = fixture.task("strict").await;
    fixture
        .schedule(
            Schedule::new(task.id, daily("01:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap()
                .strict(),
        )
        .await
}

#[tokio::test]
async fn test_strict_miss_is_reported_once() {
    let fixture = Fixture::new().await;
    let schedule = strict_daily(&fixture).await;
    log(&fixture, schedule.id, "2024-01-01 01:00:00", LogStatus::Succeed).await;
    log(&fixture, schedule.id, "2024-01-03 01:00:00", LogStatus::Succeed).await;

    let now = dt("2024-01-04 02:00:00");
    let misses = reconciler(&fixture).strict_misses("opening", now, None).await.unwrap();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].0.id, schedule.id);
    assert_eq!(misses[0].1, vec![dt("2024-01-02 01:00:00")]);

    let exceptions = reconciler(&fixture)
        .exception_schedules(now - Duration::hours(24), now, None)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].schedule_id, schedule.id);
    assert_eq!(exceptions[0].schedule_time, dt("2024-01-02 01:00:00"));
    assert_eq!(exceptions[0].queue, "opening");
    assert_eq!(exceptions[0].reason, ExceptionReason::ScheduleLogNotFound);
}

#[tokio::test]
async fn test_repeated_strict_queue_reports_each_miss_once() {
    let fixture = Fixture::new().await;
    let schedule = strict_daily(&fixture).await;
    log(&fixture, schedule.id, "2024-01-01 01:00:00", LogStatus::Succeed).await;
    log(&fixture, schedule.id, "2024-01-03 01:00:00", LogStatus::Succeed).await;

    let reconciler = Reconciler::new(
        fixture.dispatch.clone(),
        ReconcilerConfig {
            strict_queues: vec!["opening".to_string(), "opening".to_string()],
            ..ReconcilerConfig::default()
        },
    );
    assert_eq!(reconciler.config().strict_queues, vec!["opening".to_string()]);

    let now = dt("2024-01-04 02:00:00");
    let exceptions = reconciler
        .exception_schedules(now - Duration::hours(72), now, None)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].schedule_time, dt("2024-01-02 01:00:00"));
}

#[tokio::test]
async fn test_non_strict_schedules_never_miss() {
    let fixture = Fixture::new().await;
    let task = fixture.task("loose").await;
    fixture
        .schedule(Schedule::new(task.id, daily("01:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    let misses = reconciler(&fixture)
        .strict_misses("opening", dt("2024-01-10 00:00:00"), None)
        .await
        .unwrap();
    assert!(misses.is_empty());
}

#[tokio::test]
async fn test_strict_schedule_with_too_many_occurrences_is_skipped() {
    let fixture = Fixture::new().await;
    let daily_schedule = strict_daily(&fixture).await;
    let task = fixture.task("every-second").await;
    // 三天多按秒触发，远超单次检查的上限
    fixture
        .schedule(
            Schedule::new(task.id, period(1, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap()
                .strict(),
        )
        .await;

    let misses = reconciler(&fixture)
        .strict_misses("opening", dt("2024-01-04 02:00:00"), None)
        .await
        .unwrap();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].0.id, daily_schedule.id);
    assert_eq!(
        misses[0].1,
        vec![
            dt("2024-01-01 01:00:00"),
            dt("2024-01-02 01:00:00"),
            dt("2024-01-03 01:00:00")
        ]
    );
}

#[tokio::test]
async fn test_process_strict_puts_missing_envelopes() {
    let fixture = Fixture::new().await;
    let schedule = strict_daily(&fixture).await;
    log(&fixture, schedule.id, "2024-01-01 01:00:00", LogStatus::Succeed).await;
    log(&fixture, schedule.id, "2024-01-03 01:00:00", LogStatus::Succeed).await;
    let now = dt("2024-01-04 02:00:00");

    let report = reconciler(&fixture)
        .process_strict(&["opening".to_string(), "ghost".to_string()], now)
        .await
        .unwrap();
    assert_eq!(report.status, LogStatus::PartialFailed);
    assert!(report.failed.contains_key("ghost"));

    let envelopes = fixture.drain("opening").await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["generator"], "put");
    assert_eq!(envelopes[0]["schedule_time"], "2024-01-02 01:00:00");
}

#[tokio::test]
async fn test_process_strict_skips_busy_queue() {
    let fixture = Fixture::new().await;
    strict_daily(&fixture).await;
    fixture.queue("opening").await.push(vec!["x".into()]).await.unwrap();

    let report = reconciler(&fixture)
        .process_strict(&["opening".to_string()], dt("2024-01-04 02:00:00"))
        .await
        .unwrap();
    assert_eq!(report.status, LogStatus::NoRetry);
    assert_eq!(report.no_retry["opening"], "queue opening is not free");
    assert_eq!(fixture.queue("opening").await.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_pass_requeues_retryable_failures() {
    let fixture = Fixture::new().await;
    let task = fixture.task("flaky").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    log(&fixture, schedule.id, "2024-01-01 08:00:00", LogStatus::Exception).await;
    let newest = log(&fixture, schedule.id, "2024-01-01 08:00:00", LogStatus::Timeout).await;
    // 已经成功的触发时间不再重试
    log(&fixture, schedule.id, "2024-01-01 09:00:00", LogStatus::Exception).await;
    log(&fixture, schedule.id, "2024-01-01 09:00:00", LogStatus::Succeed).await;
    let failed = log(&fixture, schedule.id, "2024-01-01 10:00:00", LogStatus::Failed).await;

    let report = reconciler(&fixture)
        .retry_pass(now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.status, LogStatus::Succeed);
    assert_eq!(report.succeeded.len(), 1);
    assert!(report.succeeded.contains_key(&newest.id.to_string()));
    assert_eq!(report.exceptions.len(), 1);
    assert_eq!(report.exceptions[0].reason, ExceptionReason::FailedDirectly);
    assert_eq!(report.exceptions[0].log_id, Some(failed.id));

    let envelopes = fixture.drain("opening").await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["schedule_time"], "2024-01-01 08:00:00");
    assert_eq!(envelopes[0]["last_log"], json!({"status": "timeout"}));
}

#[tokio::test]
async fn test_retry_pass_reports_exhausted_groups() {
    let fixture = Fixture::new().await;
    let task = fixture.task("broken").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    for _ in 0..5 {
        log(&fixture, schedule.id, "2024-01-01 08:00:00", LogStatus::Exception).await;
    }

    let report = reconciler(&fixture)
        .retry_pass(now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.status, LogStatus::Empty);
    assert_eq!(report.exceptions.len(), 1);
    assert_eq!(report.exceptions[0].reason, ExceptionReason::MaximumRetriesExceeded);
    assert_eq!(report.exceptions[0].count, 5);
    assert_eq!(fixture.queue("opening").await.size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_retry_pass_waits_for_busy_queue() {
    let fixture = Fixture::new().await;
    let task = fixture.task("flaky").await;
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00")).unwrap())
        .await;
    log(&fixture, schedule.id, "2024-01-01 08:00:00", LogStatus::Exception).await;
    fixture.queue("opening").await.push(vec!["pending".into()]).await.unwrap();

    let report = reconciler(&fixture)
        .retry_pass(now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.status, LogStatus::Failed);
    assert_eq!(report.no_retry["opening"], "queue opening is not free");
    assert_eq!(fixture.queue("opening").await.size().await.unwrap(), 1);
}
