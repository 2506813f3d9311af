//! 内置记录初始化
//!
//! 每条记录先按唯一键查找，存在则跳过，因此可以重复执行。

use chrono::NaiveDateTime;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use scheduler_core::builtin_names::*;
use scheduler_core::models::{
    Category, QueueModule, QueuePermission, Schedule, ScheduleProducer, ScheduleQueue,
    ScheduleStatus, Task,
};
use scheduler_core::time::{format_datetime, now, ScheduleConfig};
use scheduler_core::traits::ScheduleFilter;
use scheduler_core::{Catalogue, SchedulerResult};

pub struct Builtins<'a> {
    catalogue: &'a Catalogue,
    now: NaiveDateTime,
    created: usize,
}

impl<'a> Builtins<'a> {
    /// 返回新建的记录数
    #[instrument(skip_all)]
    pub async fn initialize(catalogue: &'a Catalogue) -> SchedulerResult<usize> {
        let mut builtins = Self {
            catalogue,
            now: now(),
            created: 0,
        };
        builtins.seed().await?;
        info!("内置记录初始化完成，新建 {} 条", builtins.created);
        Ok(builtins.created)
    }

    async fn seed(&mut self) -> SchedulerResult<()> {
        let _system = self.category(CATEGORY_SYSTEM).await?;
        let basic = self.category(CATEGORY_BASIC).await?;
        let test = self.category(CATEGORY_TEST).await?;

        self.queue(QUEUE_OPENING, "系统任务队列").await?;
        self.queue(QUEUE_TEST, "测试任务队列").await?;
        self.producer(PRODUCER_DEFAULT, ScheduleStatus::Opening, QUEUE_OPENING).await?;
        self.producer(PRODUCER_TEST, ScheduleStatus::Test, QUEUE_TEST).await?;

        let shell = self.task(TASK_SHELL_EXEC, None, Some(basic), json!({})).await?;
        self.task(TASK_SQL_EXEC, None, Some(basic), json!({})).await?;
        self.task(TASK_SQL_PRODUCE, None, Some(basic), json!({})).await?;
        let strict = self.task(TASK_STRICT_HANDLE, None, Some(basic), json!({})).await?;

        let cleanup = self
            .task(TASK_LOG_CLEANUP, None, Some(basic), json!({"retention_days": 30}))
            .await?;
        let exception = self
            .task(TASK_EXCEPTION_HANDLE, None, Some(basic), json!({"max_retry_times": 5}))
            .await?;
        let strict_child = self
            .task(
                TASK_STRICT_HANDLE_CHILD,
                Some(strict),
                Some(basic),
                json!({"queues": [QUEUE_OPENING]}),
            )
            .await?;
        let test_shell = self
            .task(TASK_TEST_SHELL, Some(shell), Some(test), json!({"script": "echo hello"}))
            .await?;

        let start = format_datetime(&self.now);
        self.schedule(
            cleanup,
            json!({"schedule_type": "T", "base_on_now": true,
                   "T": {"type": "DAY", "time": "01:00:00", "DAY": {"period": 1}}}),
            ScheduleStatus::Opening,
        )
        .await?;
        self.schedule(
            exception,
            json!({"schedule_type": "S", "base_on_now": true,
                   "S": {"period": 60, "schedule_start_time": start}}),
            ScheduleStatus::Opening,
        )
        .await?;
        self.schedule(
            strict_child,
            json!({"schedule_type": "S", "base_on_now": true,
                   "S": {"period": 3600, "schedule_start_time": start}}),
            ScheduleStatus::Opening,
        )
        .await?;
        self.schedule(
            test_shell,
            json!({"schedule_type": "S", "base_on_now": true,
                   "S": {"period": 60, "schedule_start_time": start}}),
            ScheduleStatus::Test,
        )
        .await?;

        if self
            .catalogue
            .permissions
            .active_for_queue(QUEUE_OPENING)
            .await?
            .is_none()
        {
            self.catalogue
                .permissions
                .create(&QueuePermission::ip_allowlist(QUEUE_OPENING, &["127.0.0.1"]))
                .await?;
            self.created += 1;
        }
        Ok(())
    }

    async fn category(&mut self, name: &str) -> SchedulerResult<i64> {
        if let Some(existing) = self.catalogue.categories.find_by_name(name).await? {
            return Ok(existing.id);
        }
        let created = self.catalogue.categories.create(&Category::new(name)).await?;
        debug!("新建分类 {}", name);
        self.created += 1;
        Ok(created.id)
    }

    async fn queue(&mut self, code: &str, name: &str) -> SchedulerResult<()> {
        if self.catalogue.queues.find_by_code(code).await?.is_none() {
            self.catalogue
                .queues
                .create(&ScheduleQueue::new(code, name, QueueModule::MemoryFifo))
                .await?;
            self.created += 1;
        }
        Ok(())
    }

    async fn producer(&mut self, name: &str, status: ScheduleStatus, queue: &str) -> SchedulerResult<()> {
        if self.catalogue.producers.find_by_name(name).await?.is_none() {
            let producer = ScheduleProducer::new(name, queue).with_filter("status", json!(status.as_str()));
            self.catalogue.producers.create(&producer).await?;
            self.created += 1;
        }
        Ok(())
    }

    async fn task(
        &mut self,
        name: &str,
        parent: Option<i64>,
        category: Option<i64>,
        config: Value,
    ) -> SchedulerResult<i64> {
        if let Some(existing) = self.catalogue.tasks.find(name, parent).await? {
            return Ok(existing.id);
        }
        let mut task = Task::new(name).with_config(config);
        task.parent = parent;
        task.category = category;
        let created = self.catalogue.tasks.create(&task).await?;
        debug!("新建任务 {}", name);
        self.created += 1;
        Ok(created.id)
    }

    async fn schedule(&mut self, task: i64, config: Value, status: ScheduleStatus) -> SchedulerResult<()> {
        let filter = ScheduleFilter {
            task_id: Some(task),
            ..Default::default()
        };
        if !self.catalogue.schedules.list(&filter).await?.is_empty() {
            return Ok(());
        }
        let config = ScheduleConfig::from_value(config)?;
        let schedule = Schedule::new(task, config, self.now)?.with_status(status);
        self.catalogue.schedules.create(&schedule).await?;
        self.created += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_infrastructure::DatabaseManager;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let catalogue = DatabaseManager::in_memory().await.unwrap().catalogue();
        let created = Builtins::initialize(&catalogue).await.unwrap();
        assert!(created > 0);
        assert_eq!(Builtins::initialize(&catalogue).await.unwrap(), 0);

        assert_eq!(catalogue.queues.list_active().await.unwrap().len(), 2);
        assert_eq!(catalogue.producers.list_active().await.unwrap().len(), 2);
        let schedules = catalogue.schedules.list(&ScheduleFilter::default()).await.unwrap();
        assert_eq!(schedules.len(), 4);
        assert!(schedules.iter().all(|s| s.config.base_on_now));
        assert_eq!(
            schedules
                .iter()
                .filter(|s| s.status == ScheduleStatus::Test)
                .count(),
            1
        );

        let permission = catalogue
            .permissions
            .active_for_queue(QUEUE_OPENING)
            .await
            .unwrap()
            .unwrap();
        assert!(permission.check_ip("127.0.0.1").is_ok());
    }

    #[tokio::test]
    async fn test_strict_child_task_hangs_under_parent() {
        let catalogue = DatabaseManager::in_memory().await.unwrap().catalogue();
        Builtins::initialize(&catalogue).await.unwrap();
        let parent = catalogue.tasks.find(TASK_STRICT_HANDLE, None).await.unwrap().unwrap();
        let child = catalogue
            .tasks
            .find(TASK_STRICT_HANDLE_CHILD, Some(parent.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.config["queues"], json!([QUEUE_OPENING]));
    }
}
