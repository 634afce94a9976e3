//! I/O helpers for the harvester controller.

pub mod agent;
pub mod atomic;
pub mod checkpoint_store;
pub mod config;
pub mod paths;
pub mod process;
pub mod record_store;
pub mod retry;
pub mod session_log;
pub mod summary;
