pub mod consumer;
pub mod program;
pub mod schedule;
pub mod system;
