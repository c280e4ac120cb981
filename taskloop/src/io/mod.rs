//! I/O helpers for taskloop commands.

pub mod backlog_store;
pub mod config;
pub mod process;
pub mod progress_log;
pub mod template;
pub mod worker;
