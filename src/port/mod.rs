//! Port layer - CPU-specific glue
//!
//! The kernel itself never touches hardware. A [`Port`] tells
//! [`Kernel::run_with`](crate::kernel::Kernel::run_with) and
//! [`Kernel::start_scheduler`](crate::kernel::Kernel::start_scheduler) how
//! to sleep until something happens, how many ticks elapsed meanwhile, and
//! which interrupt work to run.
//!
//! Exception handlers cannot reach a [`Kernel`](crate::kernel::Kernel): it
//! lives in thread mode. They only record what happened in a
//! [`TickCounter`] or an [`IrqLatch`]. The scheduler collects both before
//! every dispatch and replays the interrupt work inside
//! [`Kernel::interrupt`](crate::kernel::Kernel::interrupt), where the
//! `_from_isr` operations are available.

use portable_atomic::{AtomicU32, Ordering};

use crate::kernel::IsrContext;
use crate::types::OsTick;

#[cfg(target_arch = "arm")]
pub mod cortex_m;

/// Hardware hooks driving the scheduler loop
pub trait Port {
    /// Sleep until an interrupt arrives
    fn wait_for_interrupt(&mut self);

    /// Ticks elapsed since the last call
    fn take_ticks(&mut self) -> OsTick;

    /// Run deferred interrupt work; `_from_isr` operations go through `isr`
    fn dispatch_irqs(&mut self, _isr: &mut IsrContext<'_>) {}
}

/// Ticks raised by the tick interrupt and not yet handed to the kernel
pub struct TickCounter {
    pending: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Call from the tick exception handler
    #[inline(always)]
    pub fn on_tick(&self) {
        self.pending.fetch_add(1, Ordering::Release);
    }

    /// Collect pending ticks
    #[inline]
    pub fn take(&self) -> OsTick {
        self.pending.swap(0, Ordering::Acquire)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt lines that fired and still need their deferred work run
///
/// One bit per line, 0 to 31.
pub struct IrqLatch {
    lines: AtomicU32,
}

impl IrqLatch {
    pub const fn new() -> Self {
        Self {
            lines: AtomicU32::new(0),
        }
    }

    /// Mark `line` as fired; call from its exception handler
    #[inline(always)]
    pub fn pend(&self, line: u8) {
        self.lines.fetch_or(1 << (line & 31), Ordering::Release);
    }

    /// Collect and clear the fired lines
    #[inline]
    pub fn take(&self) -> u32 {
        self.lines.swap(0, Ordering::Acquire)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.lines.load(Ordering::Acquire) != 0
    }
}

impl Default for IrqLatch {
    fn default() -> Self {
        Self::new()
    }
}
