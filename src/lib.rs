//! 调度服务的进程编排：命令行、pid文件、组件装配与优雅关闭

pub mod app;
pub mod cli;
pub mod pidfile;
pub mod shutdown;
