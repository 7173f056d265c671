//! Compile-time configuration
//!
//! These constants control the behavior and resource limits of the kernel.
//! Every pool is sized here; nothing grows after creation.

use crate::types::{OsPrio, OsTick};

/// Maximum number of priority levels
pub const CFG_PRIO_MAX: usize = 32;

/// Size of the task arena (idle and timer service tasks included)
pub const CFG_TASK_MAX: usize = 16;

/// Size of the wait-list arena shared by queues, semaphores, mutexes and event groups
pub const CFG_WAIT_LIST_MAX: usize = 32;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Ticks a task runs before yielding to an equal-priority peer
pub const CFG_TIME_QUANTA_DEFAULT: OsTick = 1;

/// Minimum task stack size
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Number of entries in tick wheel
pub const CFG_TICK_WHEEL_SIZE: usize = 16;

/// Enable round-robin scheduling for same-priority tasks
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Idle task priority
pub const CFG_PRIO_IDLE: OsPrio = 0;

/// Idle task stack size
pub const CFG_IDLE_STK_SIZE: usize = 128;

/// Number of software timers
pub const CFG_TIMER_MAX: usize = 8;

/// Length of the timer service command queue
pub const CFG_TIMER_QUEUE_LEN: usize = 8;

/// Timer service task priority
pub const CFG_TIMER_TASK_PRIO: OsPrio = (CFG_PRIO_MAX - 1) as OsPrio;

/// Timer service task stack size
pub const CFG_TIMER_STK_SIZE: usize = 256;

/// Longest a timer command may wait for room in the command queue
pub const CFG_TIMER_CMD_WAIT_MAX: OsTick = 100;
