mod common;

use serde_json::json;
use std::sync::Arc;

use common::{dt, period, Fixture};
use scheduler_core::config::ProducerConfig;
use scheduler_core::models::{Schedule, ScheduleProducer, ScheduleStatus};
use scheduler_core::time::{max_datetime, ScheduleConfig};
use scheduler_dispatcher::program::{ProgramAgent, ProgramStateHandle};
use scheduler_dispatcher::Producer;

async fn default_producer(fixture: &Fixture) {
    fixture
        .catalogue
        .producers
        .create(&ScheduleProducer::new("默认", "opening").with_filter("status", json!("opening")))
        .await
        .unwrap();
}

fn producer(fixture: &Fixture) -> Producer {
    Producer::new(
        fixture.catalogue.clone(),
        fixture.queues.clone(),
        ProducerConfig::default(),
    )
}

#[tokio::test]
async fn test_period_schedule_enqueues_every_due_occurrence() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("hello").await;
    let now = dt("2024-01-01 00:02:30");
    let schedule = fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), now).unwrap())
        .await;

    let report = producer(&fixture).tick(now).await.unwrap();
    assert_eq!(report.total(), 3);
    assert_eq!(report.put_counts.get("opening"), Some(&3));
    assert_eq!(report.last_schedule_time, Some(dt("2024-01-01 00:02:00")));

    let envelopes = fixture.drain("opening").await;
    let times: Vec<&str> = envelopes
        .iter()
        .map(|e| e["schedule_time"].as_str().unwrap())
        .collect();
    assert_eq!(
        times,
        vec!["2024-01-01 00:00:00", "2024-01-01 00:01:00", "2024-01-01 00:02:00"]
    );
    assert!(envelopes.iter().all(|e| e["generator"] == "auto"));
    assert!(envelopes.iter().all(|e| e["queue"] == "opening"));
    assert_eq!(envelopes[0]["task"]["name"], "hello");

    let stored = fixture.catalogue.schedules.get(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.next_schedule_time, dt("2024-01-01 00:03:00"));
    assert_eq!(stored.update_time, schedule.update_time);

    // 同一时刻再执行一次不会重复放入
    let again = producer(&fixture).tick(now).await.unwrap();
    assert_eq!(again.total(), 0);
}

#[tokio::test]
async fn test_hard_cap_stops_mid_schedule() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("busy").await;
    let schedule = fixture
        .schedule(
            Schedule::new(task.id, period(1, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap(),
        )
        .await;

    let queue = fixture.queue("opening").await;
    queue
        .push((0..999).map(|i| format!("preloaded-{i}")).collect())
        .await
        .unwrap();

    let report = producer(&fixture).tick(dt("2024-01-01 01:00:00")).await.unwrap();
    assert_eq!(report.total(), 1001);
    assert_eq!(queue.size().await.unwrap(), 2000);

    let stored = fixture.catalogue.schedules.get(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.next_schedule_time, dt("2024-01-01 00:16:41"));
}

#[tokio::test]
async fn test_soft_cap_skips_queue() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("busy").await;
    let schedule = fixture
        .schedule(
            Schedule::new(task.id, period(1, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap(),
        )
        .await;

    let queue = fixture.queue("opening").await;
    queue
        .push((0..1500).map(|i| format!("preloaded-{i}")).collect())
        .await
        .unwrap();

    let report = producer(&fixture).tick(dt("2024-01-01 01:00:00")).await.unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(queue.size().await.unwrap(), 1500);
    let stored = fixture.catalogue.schedules.get(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.next_schedule_time, schedule.next_schedule_time);
}

#[tokio::test]
async fn test_schedule_past_end_time_becomes_done() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("short").await;
    let schedule = fixture
        .schedule(
            Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap()
                .with_end_time(dt("2024-01-01 00:01:30")),
        )
        .await;

    let report = producer(&fixture).tick(dt("2024-01-01 00:05:00")).await.unwrap();
    assert_eq!(report.total(), 2);
    let stored = fixture.catalogue.schedules.get(schedule.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Done);
    assert_eq!(stored.next_schedule_time, max_datetime());
}

#[tokio::test]
async fn test_invalid_config_marks_error_and_tick_continues() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("mixed").await;
    // 周一、周三各一次，用完本周后要跳过七亿周，超出时间范围
    let overflowing = ScheduleConfig::from_value(json!({
        "schedule_type": "T",
        "T": {"type": "WEEKDAY", "time": "01:00:00", "WEEKDAY": {"period": 700_000_000, "weekday": [1, 3]}}
    }))
    .unwrap();
    let broken = fixture
        .schedule(Schedule::new(task.id, overflowing, dt("2024-01-01 00:30:00")).unwrap())
        .await;
    let healthy = fixture
        .schedule(
            Schedule::new(task.id, period(60, "2024-01-04 23:58:00"), dt("2024-01-04 23:58:00"))
                .unwrap(),
        )
        .await;
    assert_eq!(broken.next_schedule_time, dt("2024-01-01 01:00:00"));

    let report = producer(&fixture).tick(dt("2024-01-05 00:00:00")).await.unwrap();
    assert_eq!(report.errors, vec![broken.id]);
    assert_eq!(report.total(), 5);

    // 出错前已放入的周一、周三两次不会被再次放入
    let stored = fixture.catalogue.schedules.get(broken.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Error);
    assert_eq!(stored.next_schedule_time, dt("2024-01-03 01:00:00"));

    let stored = fixture.catalogue.schedules.get(healthy.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScheduleStatus::Opening);
    assert_eq!(stored.next_schedule_time, dt("2024-01-05 00:01:00"));

    let envelopes = fixture.drain("opening").await;
    let broken_times: Vec<&str> = envelopes
        .iter()
        .filter(|e| e["id"] == broken.id)
        .map(|e| e["schedule_time"].as_str().unwrap())
        .collect();
    assert_eq!(broken_times, vec!["2024-01-01 01:00:00", "2024-01-03 01:00:00"]);
    assert_eq!(envelopes.iter().filter(|e| e["id"] == healthy.id).count(), 3);

    // error 状态的计划不再匹配生产者的过滤条件
    let again = producer(&fixture).tick(dt("2024-01-05 00:00:00")).await.unwrap();
    assert!(again.errors.is_empty());
    assert_eq!(again.total(), 0);
}

#[tokio::test]
async fn test_filters_route_schedules_to_queues() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    fixture
        .catalogue
        .producers
        .create(&ScheduleProducer::new("测试", "test").with_filter("status", json!("test")))
        .await
        .unwrap();
    let task = fixture.task("t").await;
    let now = dt("2024-01-01 00:00:30");
    fixture
        .schedule(Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), now).unwrap())
        .await;
    fixture
        .schedule(
            Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), now)
                .unwrap()
                .with_status(ScheduleStatus::Test),
        )
        .await;
    fixture
        .schedule(
            Schedule::new(task.id, period(60, "2024-01-01 00:00:00"), now)
                .unwrap()
                .with_status(ScheduleStatus::Closed),
        )
        .await;

    let report = producer(&fixture).tick(now).await.unwrap();
    assert_eq!(report.put_counts.get("opening"), Some(&1));
    assert_eq!(report.put_counts.get("test"), Some(&1));
}

#[tokio::test]
async fn test_producer_program_publishes_state() {
    let fixture = Fixture::new().await;
    default_producer(&fixture).await;
    let task = fixture.task("hello").await;
    fixture
        .schedule(
            Schedule::new(task.id, period(86400, "2024-01-01 00:00:00"), dt("2024-01-01 00:00:00"))
                .unwrap(),
        )
        .await;

    let config = ProducerConfig {
        tick_interval_ms: 20,
        warmup_seconds: 0,
        ..ProducerConfig::default()
    };
    let program = Arc::new(Producer::new(fixture.catalogue.clone(), fixture.queues.clone(), config));
    let agent = ProgramAgent::new(
        program,
        ProgramStateHandle::new("producer", fixture.cache.clone()),
        None,
    );
    agent.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let state = agent.stop().await.unwrap();

    assert!(!state.is_running);
    assert!(state.scheduled_count > 0);
    assert_eq!(state.put_counts.get("opening"), Some(&state.scheduled_count));
    assert!(state.last_schedule_time.is_some());
}
