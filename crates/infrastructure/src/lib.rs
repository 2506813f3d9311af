//! 调度服务的基础设施：SQLite目录、调度队列和缓存服务

pub mod cache;
pub mod database;
pub mod queue;

pub use cache::*;
pub use database::*;
pub use queue::*;
