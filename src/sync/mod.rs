//! Synchronization primitives
//!
//! Contains queues, semaphores, mutexes and event groups. Every object is a
//! cheap-to-clone handle; clones refer to the same object, and the object is
//! released when the last handle is dropped.

pub mod channel;

#[cfg(feature = "queue")]
pub mod queue;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "event")]
pub mod event;
