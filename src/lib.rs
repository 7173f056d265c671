//! Tick-driven RTOS kernel in Rust
//!
//! A real-time kernel providing:
//! - Priority-based preemptive scheduling with round-robin among equals
//! - Bounded message queues
//! - Binary and counting semaphores, mutexes with priority inheritance
//! - Event groups and direct task notifications
//! - Software timers run by a service task
//! - Deferred hand-off from interrupt handlers to tasks
//!
//! Tasks are `async` bodies. A task runs until it blocks, yields or reaches
//! a preemption point with a more urgent task ready; the dispatcher then
//! picks the highest-priority ready task. Priority numbers grow with
//! urgency and the idle task runs at priority 0.
//!
//! ```ignore
//! let kernel = Kernel::new();
//! let q: Queue<u32, 4> = Queue::create(&kernel, "samples")?;
//!
//! let rx = q.clone();
//! kernel.task_create("consumer", 10, 256, move |_| async move {
//!     while let Ok(sample) = rx.receive(WAIT_FOREVER).await {
//!         // ...
//!     }
//! })?;
//!
//! kernel.start()?;
//! kernel.run();
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;

pub mod core;
pub mod port;
pub mod sync;
#[cfg(feature = "timer")]
pub mod timer;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::error;
pub use crate::core::error::{OsError, OsResult};
pub use crate::core::kernel;
pub use crate::core::kernel::{IsrContext, Kernel, KernelStats};
pub(crate) use crate::core::pend;
pub use crate::core::prio;
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::task;
pub use crate::core::task::TaskStats;
pub use crate::core::sched;
pub use crate::core::time;
pub use crate::core::time::ms_to_ticks;

pub use port::{IrqLatch, Port, TickCounter};
pub use sync::channel::{BlockingChannel, IsrChannel};
#[cfg(feature = "event")]
pub use sync::event::{self, EventGroup};
#[cfg(feature = "mutex")]
pub use sync::mutex::{self, Mutex, MutexGuard};
#[cfg(feature = "queue")]
pub use sync::queue::{self, Queue};
#[cfg(feature = "sem")]
pub use sync::sem::{self, Semaphore};
#[cfg(feature = "timer")]
pub use timer::{Timer, TimerCallback};
