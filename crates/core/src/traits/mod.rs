pub mod cache;
pub mod queue;
pub mod repository;

pub use cache::*;
pub use queue::*;
pub use repository::*;
