use tracing::warn;

use scheduler_core::models::{Schedule, ScheduleLog};
use scheduler_core::{Catalogue, EnvelopeTask, Generator, ScheduleEnvelope, SchedulerError, SchedulerResult};

/// 任务树的最大深度，超过时视为数据环
const MAX_TASK_DEPTH: usize = 16;

/// 把计划序列化为信封：补全任务、分类以及每一级父任务
#[derive(Clone)]
pub struct EnvelopeBuilder {
    catalogue: Catalogue,
}

impl EnvelopeBuilder {
    pub fn new(catalogue: Catalogue) -> Self {
        Self { catalogue }
    }

    pub async fn task(&self, task_id: i64) -> SchedulerResult<EnvelopeTask> {
        let mut chain = Vec::new();
        let mut next = Some(task_id);
        while let Some(id) = next {
            if chain.len() >= MAX_TASK_DEPTH {
                warn!("任务 {} 的父任务层级过深，截断", task_id);
                break;
            }
            let task = self
                .catalogue
                .tasks
                .get(id)
                .await?
                .ok_or(SchedulerError::TaskMissing(id))?;
            let category = match task.category {
                Some(category) => self.catalogue.categories.get(category).await?,
                None => None,
            };
            next = task.parent;
            chain.push((task, category));
        }

        let mut envelope_task: Option<EnvelopeTask> = None;
        for (task, category) in chain.into_iter().rev() {
            envelope_task = Some(EnvelopeTask::new(&task, category.as_ref(), envelope_task));
        }
        envelope_task.ok_or(SchedulerError::TaskMissing(task_id))
    }

    /// 以 `schedule.next_schedule_time` 为触发时间
    pub async fn build(
        &self,
        schedule: &Schedule,
        queue: &str,
        generator: Generator,
    ) -> SchedulerResult<ScheduleEnvelope> {
        let task = self.task(schedule.task).await?;
        Ok(ScheduleEnvelope::from_schedule(schedule, task, queue, generator))
    }

    pub async fn retry(&self, schedule: &Schedule, log: &ScheduleLog) -> SchedulerResult<ScheduleEnvelope> {
        let task = self.task(schedule.task).await?;
        Ok(ScheduleEnvelope::for_retry(schedule, task, log))
    }
}
