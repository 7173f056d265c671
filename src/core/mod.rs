//! Core RTOS modules
//!
//! Contains kernel, scheduler, task management, time management and
//! direct task notifications.

pub mod config;
pub mod critical;
pub mod error;
pub mod kernel;
pub mod notify;
pub(crate) mod pend;
pub mod prio;
pub mod types;
pub mod task;
pub mod sched;
pub mod time;
