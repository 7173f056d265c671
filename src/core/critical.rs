//! Critical section handling
//!
//! Kernel state lives in [`CsCell`]s: a `critical_section::Mutex` around a
//! `RefCell`. Every access happens with interrupts masked and the borrow is
//! released before the closure returns, so no state is ever held across an
//! `.await`.

use core::cell::RefCell;

use critical_section::Mutex;

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(Mutex<RefCell<T>>);

impl<T> CsCell<T> {
    /// Create a new CsCell
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(Mutex::new(RefCell::new(value)))
    }

    /// Run `f` on the inner value with interrupts disabled
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.0.borrow_ref_mut(cs)))
    }
}

/// Check if currently executing in an exception handler
#[inline]
pub fn in_exception_handler() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}
