//! # 数据模型
//!
//! 调度服务的持久化记录与派生视图。
//!
//! ## 记录
//!
//! - [`Category`] / [`Task`] - 任务分类与任务树
//! - [`Schedule`] - 计划: 何时执行任务以及如何推进下一次时间
//! - [`ScheduleLog`] - 执行日志，只追加
//! - [`ScheduleQueue`] / [`ScheduleProducer`] / [`QueuePermission`] - 队列、生产者、队列权限
//! - [`Consumer`] - 消费者成员信息，保存在缓存服务中
//! - [`ExceptionReport`] - 客户端上报的异常
//!
//! ## 派生视图
//!
//! [`ExceptionSchedule`] 由对账器基于日志计算得出，不落库。
//!
//! 所有跨实体引用都是 id，解引用统一通过仓储接口完成。
//!
//! ## 状态流转
//!
//! ```text
//! Schedule: opening/test/auto ──(超过schedule_end_time)──▶ done
//!                  │
//!                  └──(时间引擎拒绝配置)──▶ error
//! ```

/// 为存储为文本的状态枚举生成 `as_str` / `FromStr` / `Display`
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::SchedulerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::errors::SchedulerError::Serialization(format!(
                        "invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

pub mod consumer;
pub mod exception;
pub mod log;
pub mod queue;
pub mod schedule;
pub mod task;

pub use consumer::*;
pub use exception::*;
pub use log::*;
pub use queue::*;
pub use schedule::*;
pub use task::*;
