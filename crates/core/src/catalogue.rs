use std::sync::Arc;

use crate::traits::{
    CategoryRepository, ExceptionReportRepository, OperatorRepository, PermissionRepository,
    ProducerRepository, QueueRepository, ScheduleLogRepository, ScheduleRepository,
    TaskRepository,
};

/// 目录: 所有持久化记录的仓储集合
#[derive(Clone)]
pub struct Catalogue {
    pub categories: Arc<dyn CategoryRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub logs: Arc<dyn ScheduleLogRepository>,
    pub queues: Arc<dyn QueueRepository>,
    pub producers: Arc<dyn ProducerRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub exceptions: Arc<dyn ExceptionReportRepository>,
    pub operators: Arc<dyn OperatorRepository>,
}
