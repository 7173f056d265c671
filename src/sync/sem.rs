//! Semaphore implementation
//!
//! Binary and counting semaphores for task synchronization and resource
//! counting. A give with a task waiting hands the token straight to the
//! most urgent waiter; the count only moves when nobody waits.

use alloc::rc::Rc;

use crate::critical::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel};
use crate::sched::Suspend;
use crate::sync::channel::{BlockingChannel, IsrChannel};
use crate::time::Deadline;
use crate::types::{OsSemCtr, OsTick, OverflowPolicy, PendOn, PendStatus, WaitListId};

/// Counting semaphore; a binary semaphore is one with a maximum of 1
pub struct Semaphore {
    inner: Rc<SemInner>,
}

struct SemInner {
    kernel: Kernel,
    name: &'static str,
    count: CsCell<OsSemCtr>,
    max: OsSemCtr,
    policy: OverflowPolicy,
    waiters: WaitListId,
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Semaphore {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for SemInner {
    fn drop(&mut self) {
        self.kernel.with_state(|st| st.wait_list_delete(self.waiters));
    }
}

impl Semaphore {
    /// Create a binary semaphore, initially empty
    ///
    /// Giving a full binary semaphore succeeds and leaves it full.
    pub fn binary(kernel: &Kernel, name: &'static str) -> OsResult<Self> {
        Self::create(kernel, name, 1, 0, OverflowPolicy::Drop)
    }

    /// Create a counting semaphore that rejects gives beyond `max`
    pub fn counting(
        kernel: &Kernel,
        name: &'static str,
        max: OsSemCtr,
        initial: OsSemCtr,
    ) -> OsResult<Self> {
        Self::create(kernel, name, max, initial, OverflowPolicy::Fail)
    }

    /// Create a counting semaphore with an explicit overflow policy
    pub fn counting_with_policy(
        kernel: &Kernel,
        name: &'static str,
        max: OsSemCtr,
        initial: OsSemCtr,
        policy: OverflowPolicy,
    ) -> OsResult<Self> {
        Self::create(kernel, name, max, initial, policy)
    }

    fn create(
        kernel: &Kernel,
        name: &'static str,
        max: OsSemCtr,
        initial: OsSemCtr,
        policy: OverflowPolicy,
    ) -> OsResult<Self> {
        if max == 0 || initial > max {
            return Err(OsError::SemInvalidMax);
        }

        let waiters = kernel.with_state(|st| st.wait_list_create(name))?;

        Ok(Semaphore {
            inner: Rc::new(SemInner {
                kernel: kernel.clone(),
                name,
                count: CsCell::new(initial),
                max,
                policy,
                waiters,
            }),
        })
    }

    /// Signal (post) the semaphore
    fn post(&self) -> OsResult<bool> {
        let inner = &*self.inner;
        inner.kernel.with_state(|st| {
            if let Some(woken) = st.wake_one(inner.waiters, PendStatus::Ok) {
                return Ok(woken);
            }

            inner.count.with(|count| {
                if *count < inner.max {
                    *count += 1;
                    return Ok(false);
                }
                match inner.policy {
                    OverflowPolicy::Drop => Ok(false),
                    OverflowPolicy::Fail => {
                        crate::warn!("semaphore {} overflow at {}", inner.name, inner.max);
                        Err(OsError::SemaphoreOverflow)
                    }
                }
            })
        })
    }

    /// Take a unit if one is available
    fn accept(&self) -> OsResult<()> {
        self.inner.count.with(|count| {
            if *count > 0 {
                *count -= 1;
                Ok(())
            } else {
                Err(OsError::QueueEmpty)
            }
        })
    }

    /// Give the semaphore
    ///
    /// # Returns
    /// * `Err(OsError::SemaphoreOverflow)` - already at its maximum count
    pub async fn give(&self) -> OsResult<()> {
        self.inner.kernel.check_task_context()?;
        self.post()?;
        self.inner.kernel.preemption_point().await;
        Ok(())
    }

    /// Give without suspending the caller
    pub fn try_give(&self) -> OsResult<()> {
        self.inner.kernel.check_task_context()?;
        self.post().map(|_| ())
    }

    /// Give from an interrupt handler
    pub fn give_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<()> {
        let woken = self.post()?;
        isr.request_switch(woken);
        Ok(())
    }

    /// Wait on (pend) the semaphore
    ///
    /// A waiter released by its timeout retries once before giving up, so a
    /// give that lands between the timeout and the waiter running is not
    /// lost.
    ///
    /// # Returns
    /// * `Err(OsError::QueueEmpty)` - nothing to take before the timeout
    pub async fn take(&self, timeout: OsTick) -> OsResult<()> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let mut deadline = None;
        loop {
            let blocked = inner.kernel.with_state(|st| {
                if self.accept().is_ok() {
                    return Ok(false);
                }

                let now = st.tick;
                let deadline = *deadline.get_or_insert_with(|| Deadline::new(now, timeout));
                match deadline.remaining(now) {
                    Some(ticks) => {
                        st.block_current(PendOn::Object(inner.waiters), ticks)?;
                        Ok(true)
                    }
                    None => Err(OsError::QueueEmpty),
                }
            })?;

            if !blocked {
                return Ok(());
            }
            Suspend::new().await;

            // A give handed the token straight to us
            if inner.kernel.with_state(|st| st.current_pend_status())? == PendStatus::Ok {
                return Ok(());
            }
        }
    }

    /// Take without blocking
    pub fn try_take(&self) -> OsResult<()> {
        self.inner.kernel.check_task_context()?;
        self.accept()
    }

    /// Take from an interrupt handler
    pub fn take_from_isr(&self, _isr: &mut IsrContext<'_>) -> OsResult<()> {
        self.accept()
    }

    /// Get current semaphore count
    pub fn count(&self) -> OsSemCtr {
        self.inner.count.with(|count| *count)
    }

    pub fn max_count(&self) -> OsSemCtr {
        self.inner.max
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

impl BlockingChannel for Semaphore {
    type Item = ();

    async fn send(&self, _item: (), _timeout: OsTick) -> OsResult<()> {
        self.give().await
    }

    async fn receive(&self, timeout: OsTick) -> OsResult<()> {
        self.take(timeout).await
    }
}

impl IsrChannel for Semaphore {
    type Item = ();

    fn send_from_isr(&self, isr: &mut IsrContext<'_>, _item: ()) -> OsResult<()> {
        self.give_from_isr(isr)
    }

    fn receive_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<()> {
        self.take_from_isr(isr)
    }
}
