pub mod builtin_names;
pub mod catalogue;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod models;
pub mod time;
pub mod traits;

pub use catalogue::Catalogue;
pub use config::AppConfig;
pub use envelope::{EnvelopeCategory, EnvelopeTask, Generator, ScheduleEnvelope};
pub use errors::*;
pub use executor::ExecutorKind;
pub use traits::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
