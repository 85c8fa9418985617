//! Background Tasks Module
//!
//! Periodic work that runs alongside the repositories.
//!
//! # Tasks
//! - TTL Cleanup: removes expired query-cache entries at a fixed interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
