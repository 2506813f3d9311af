//! 内置记录的名称

pub const CATEGORY_SYSTEM: &str = "系统任务";
pub const CATEGORY_BASIC: &str = "系统基础";
pub const CATEGORY_TEST: &str = "系统测试";

pub const QUEUE_OPENING: &str = "opening";
pub const QUEUE_TEST: &str = "test";

pub const PRODUCER_DEFAULT: &str = "默认";
pub const PRODUCER_TEST: &str = "测试";

pub const TASK_SQL_EXEC: &str = "SQL执行";
pub const TASK_SQL_PRODUCE: &str = "SQL生产";
pub const TASK_SHELL_EXEC: &str = "Shell执行";
pub const TASK_CUSTOM_PROGRAM: &str = "自定义程序";
pub const TASK_EXCEPTION_HANDLE: &str = "系统异常处理";
pub const TASK_STRICT_HANDLE: &str = "严格模式计划处理";
pub const TASK_STRICT_HANDLE_CHILD: &str = "系统严格模式任务处理";
pub const TASK_LOG_CLEANUP: &str = "系统日志清理";
pub const TASK_TEST_SHELL: &str = "测试Shell执行任务";
