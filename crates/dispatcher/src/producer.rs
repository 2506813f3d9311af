//! 生产者：把到期的计划序列化后放入队列，并推进计划的下一次时间

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use scheduler_core::config::ProducerConfig;
use scheduler_core::models::{Schedule, ScheduleProducer, ScheduleStatus};
use scheduler_core::time::now;
use scheduler_core::traits::{QueueBackend, ScheduleFilter};
use scheduler_core::{Catalogue, Generator, ScheduleEnvelope, SchedulerError, SchedulerResult};
use scheduler_infrastructure::QueueManager;

use crate::program::{wait_or_stop, Program, ProgramStateHandle};
use crate::serializer::EnvelopeBuilder;

pub const PRODUCER_PROGRAM: &str = "producer";

/// 一轮生产的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// 队列编码 → 本轮放入数
    pub put_counts: BTreeMap<String, u64>,
    pub last_schedule_time: Option<NaiveDateTime>,
    /// 因配置无效被标记为 error 的计划
    pub errors: Vec<i64>,
}

impl TickReport {
    pub fn total(&self) -> u64 {
        self.put_counts.values().sum()
    }

    fn record(&mut self, queue: &str, schedule_time: NaiveDateTime) {
        *self.put_counts.entry(queue.to_string()).or_default() += 1;
        if self.last_schedule_time.map_or(true, |t| t < schedule_time) {
            self.last_schedule_time = Some(schedule_time);
        }
    }
}

pub struct Producer {
    catalogue: Catalogue,
    queues: Arc<QueueManager>,
    builder: EnvelopeBuilder,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(catalogue: Catalogue, queues: Arc<QueueManager>, config: ProducerConfig) -> Self {
        Self {
            builder: EnvelopeBuilder::new(catalogue.clone()),
            catalogue,
            queues,
            config,
        }
    }

    /// 对所有启用的生产者执行一轮生产
    pub async fn tick(&self, now: NaiveDateTime) -> SchedulerResult<TickReport> {
        let mut report = TickReport::default();
        for producer in self.catalogue.producers.list_active().await? {
            if let Err(e) = self.produce(&producer, now, &mut report).await {
                warn!("生产者 {} 执行失败: {}", producer.name, e);
            }
        }
        Ok(report)
    }

    async fn produce(
        &self,
        producer: &ScheduleProducer,
        now: NaiveDateTime,
        report: &mut TickReport,
    ) -> SchedulerResult<()> {
        let backend = match self.queues.get(&producer.queue).await {
            Ok(backend) => backend,
            Err(SchedulerError::QueueMissing(code)) => {
                warn!("生产者 {} 的队列({})不存在，跳过", producer.name, code);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let size = backend.size().await?;
        if size >= self.config.soft_cap {
            info!("queue {} is full({}), skip schedule", producer.queue, self.config.soft_cap);
            return Ok(());
        }

        let mut filter = ScheduleFilter::from_producer(&producer.filters)?;
        if producer.lte_now {
            filter = filter.due_before(now);
        }
        let schedules = self.catalogue.schedules.list(&filter).await?;
        debug!("生产者 {} 匹配到 {} 个计划", producer.name, schedules.len());

        for mut schedule in schedules {
            match self
                .produce_schedule(&mut schedule, &producer.queue, backend.as_ref(), now, report)
                .await
            {
                Ok(()) => {}
                Err(SchedulerError::ConfigInvalid(reason)) => {
                    error!("计划 {} 配置无效，标记为error: {}", schedule.id, reason);
                    match self
                        .catalogue
                        .schedules
                        .update_status(schedule.id, ScheduleStatus::Error)
                        .await
                    {
                        Ok(_) => report.errors.push(schedule.id),
                        Err(e) => warn!("计划 {} 标记error失败: {}", schedule.id, e),
                    }
                }
                Err(e) => warn!("计划 {} 生产失败: {}", schedule.id, e),
            }
        }
        Ok(())
    }

    async fn produce_schedule(
        &self,
        schedule: &mut Schedule,
        queue: &str,
        backend: &dyn QueueBackend,
        now: NaiveDateTime,
        report: &mut TickReport,
    ) -> SchedulerResult<()> {
        if schedule.next_schedule_time > now || schedule.is_done() {
            return Ok(());
        }
        let hard_cap = self.config.hard_cap();
        let original_status = schedule.status;
        let task = self.builder.task(schedule.task).await?;
        let mut pushed = 0usize;
        let mut failure = None;

        while schedule.next_schedule_time <= now && !schedule.is_done() {
            let step = async {
                if backend.size().await? >= hard_cap {
                    return Ok(false);
                }
                let envelope =
                    ScheduleEnvelope::from_schedule(schedule, task.clone(), queue, Generator::Auto);
                backend.push(vec![envelope.to_json()?]).await?;
                info!("schedule {} scheduled to {}", schedule.id, queue);
                metrics::counter!("scheduler_schedules_produced_total", "queue" => queue.to_string())
                    .increment(1);
                report.record(queue, envelope.schedule_time);
                schedule.advance(now)?;
                Ok::<_, SchedulerError>(true)
            };
            match step.await {
                Ok(true) => pushed += 1,
                Ok(false) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // 出错之前已经放入的部分也要落盘
        let status = (schedule.status != original_status).then_some(schedule.status);
        if pushed > 0 || status.is_some() {
            self.catalogue
                .schedules
                .update_progress(schedule.id, schedule.next_schedule_time, status)
                .await?;
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Program for Producer {
    fn name(&self) -> &str {
        PRODUCER_PROGRAM
    }

    async fn run(&self, mut stop: watch::Receiver<bool>, state: ProgramStateHandle) -> SchedulerResult<()> {
        info!("生产者启动，{} 秒后开始生产", self.config.warmup_seconds);
        if wait_or_stop(&mut stop, Duration::from_secs(self.config.warmup_seconds)).await {
            return Ok(());
        }

        let interval = Duration::from_millis(self.config.tick_interval_ms);
        loop {
            if let Err(e) = self.queues.reload(self.catalogue.queues.as_ref()).await {
                warn!("重新加载队列失败: {}", e);
            }

            let now = now();
            match self.tick(now).instrument(info_span!("producer_tick", %now)).await {
                Ok(report) if report.total() > 0 => {
                    let summary: Vec<String> = report
                        .put_counts
                        .iter()
                        .map(|(queue, count)| format!("{queue}: {count}"))
                        .collect();
                    info!("本轮放入 {} 个计划 ({})", report.total(), summary.join(", "));
                    let updated = state
                        .update(|s| {
                            s.scheduled_count += report.total();
                            if report.last_schedule_time > s.last_schedule_time {
                                s.last_schedule_time = report.last_schedule_time;
                            }
                            for (queue, count) in &report.put_counts {
                                *s.put_counts.entry(queue.clone()).or_default() += count;
                            }
                        })
                        .await;
                    if let Err(e) = updated {
                        warn!("写入生产者状态失败: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("生产失败: {}", e),
            }

            if wait_or_stop(&mut stop, interval).await {
                info!("生产者停止");
                return Ok(());
            }
        }
    }
}
