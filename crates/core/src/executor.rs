//! 执行器种类解析
//!
//! 内置执行器是封闭的枚举，其他名称一律视为外部执行器。

use serde_json::Value;

use crate::builtin_names::*;
use crate::envelope::EnvelopeTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorKind {
    SqlExec,
    SqlProduce,
    ShellExec,
    CustomProgram,
    ExceptionHandle,
    StrictScheduleHandle,
    LogCleanup,
    /// 由外部消费者提供的执行器
    External(String),
}

impl ExecutorKind {
    /// 按内置名称匹配
    pub fn builtin(name: &str) -> Option<Self> {
        let kind = match name {
            TASK_SQL_EXEC | "sql_exec" => ExecutorKind::SqlExec,
            TASK_SQL_PRODUCE | "sql_produce" => ExecutorKind::SqlProduce,
            TASK_SHELL_EXEC | "shell_exec" => ExecutorKind::ShellExec,
            TASK_CUSTOM_PROGRAM | "custom_program" => ExecutorKind::CustomProgram,
            TASK_EXCEPTION_HANDLE | "exception_handle" => ExecutorKind::ExceptionHandle,
            TASK_STRICT_HANDLE | "strict_schedule_handle" => ExecutorKind::StrictScheduleHandle,
            TASK_LOG_CLEANUP | "log_cleanup" => ExecutorKind::LogCleanup,
            _ => return None,
        };
        Some(kind)
    }

    /// 解析顺序: `task.config.executor` → 任务名 → 祖先任务名；都不匹配时为外部执行器
    pub fn resolve(task: &EnvelopeTask) -> Self {
        if let Some(executor) = task.config.get("executor").and_then(Value::as_str) {
            return Self::builtin(executor)
                .unwrap_or_else(|| ExecutorKind::External(executor.to_string()));
        }
        task.lineage()
            .into_iter()
            .find_map(Self::builtin)
            .unwrap_or_else(|| ExecutorKind::External(task.name.clone()))
    }

    /// 进程内消费者可直接执行的系统执行器
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            ExecutorKind::ExceptionHandle
                | ExecutorKind::StrictScheduleHandle
                | ExecutorKind::LogCleanup
        )
    }

    pub fn name(&self) -> &str {
        match self {
            ExecutorKind::SqlExec => "sql_exec",
            ExecutorKind::SqlProduce => "sql_produce",
            ExecutorKind::ShellExec => "shell_exec",
            ExecutorKind::CustomProgram => "custom_program",
            ExecutorKind::ExceptionHandle => "exception_handle",
            ExecutorKind::StrictScheduleHandle => "strict_schedule_handle",
            ExecutorKind::LogCleanup => "log_cleanup",
            ExecutorKind::External(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(name: &str, config: Value, parent: Option<EnvelopeTask>) -> EnvelopeTask {
        EnvelopeTask {
            id: 1,
            name: name.to_string(),
            category: None,
            config,
            parent: parent.map(Box::new),
        }
    }

    #[test]
    fn test_resolve_by_parent_name() {
        let parent = task(TASK_STRICT_HANDLE, json!({}), None);
        let child = task(TASK_STRICT_HANDLE_CHILD, json!({}), Some(parent));
        assert_eq!(ExecutorKind::resolve(&child), ExecutorKind::StrictScheduleHandle);
        assert!(ExecutorKind::resolve(&child).is_system());
    }

    #[test]
    fn test_resolve_by_own_name_and_config() {
        assert_eq!(
            ExecutorKind::resolve(&task(TASK_LOG_CLEANUP, json!({}), None)),
            ExecutorKind::LogCleanup
        );
        assert_eq!(
            ExecutorKind::resolve(&task("anything", json!({"executor": "shell_exec"}), None)),
            ExecutorKind::ShellExec
        );
        assert_eq!(
            ExecutorKind::resolve(&task("report", json!({"executor": "spark"}), None)),
            ExecutorKind::External("spark".to_string())
        );
    }

    #[test]
    fn test_unknown_is_external() {
        let kind = ExecutorKind::resolve(&task("daily-report", json!({}), None));
        assert_eq!(kind, ExecutorKind::External("daily-report".to_string()));
        assert!(!kind.is_system());
        assert_eq!(kind.name(), "daily-report");
    }
}
