//! 调度核心服务
//!
//! 生产者把到期计划放入队列，调度接口把计划分发给消费者，对账器负责重试与补漏，
//! 控制面管理生产者和消费者程序的启停。

pub mod builtins;
pub mod dispatch;
pub mod producer;
pub mod program;
pub mod reconciler;
pub mod registry;
pub mod serializer;

pub use builtins::Builtins;
pub use dispatch::{DispatchService, NextOutcome, PutItem};
pub use producer::{Producer, TickReport, PRODUCER_PROGRAM};
pub use program::{PagedLog, Program, ProgramAgent, ProgramState, ProgramStateHandle};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::{ConsumerListing, ConsumerRegistry};
pub use serializer::EnvelopeBuilder;
