//! 进程内消费者：拉取计划、解析执行器并执行内置的系统任务

pub mod consumer;
pub mod executors;
pub mod source;

pub use consumer::{ConsumerProgram, CONSUMER_PROGRAM};
pub use executors::{Execution, SystemExecutors};
pub use source::{HttpSource, LocalSource, ScheduleSource};
