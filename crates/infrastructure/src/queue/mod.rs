//! 调度队列后端与队列注册表

pub mod cache;
pub mod manager;
pub mod memory;

pub use cache::CacheQueue;
pub use manager::QueueManager;
pub use memory::{MemoryQueue, PopOrder};
