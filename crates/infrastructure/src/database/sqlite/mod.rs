pub mod sqlite_category_repository;
pub mod sqlite_exception_repository;
pub mod sqlite_queue_repository;
pub mod sqlite_schedule_log_repository;
pub mod sqlite_schedule_repository;
pub mod sqlite_task_repository;

pub use sqlite_category_repository::SqliteCategoryRepository;
pub use sqlite_exception_repository::{SqliteExceptionReportRepository, SqliteOperatorRepository};
pub use sqlite_queue_repository::{
    SqlitePermissionRepository, SqliteProducerRepository, SqliteQueueRepository,
};
pub use sqlite_schedule_log_repository::SqliteScheduleLogRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
