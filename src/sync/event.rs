//! Event groups
//!
//! A group of event bits tasks can wait on, for any or all of a set of bits,
//! plus a rendezvous operation where several tasks each set their own bit
//! and wait for everyone else's.

use alloc::rc::Rc;

use crate::config::CFG_TASK_MAX;
use crate::critical::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel, KernelState};
use crate::sched::Suspend;
use crate::task::EventWait;
use crate::types::{OsFlags, OsTick, PendOn, PendStatus, TaskHandle, WaitListId, NO_WAIT};

/// Event flag group
pub struct EventGroup {
    inner: Rc<EventInner>,
}

struct EventInner {
    kernel: Kernel,
    name: &'static str,
    bits: CsCell<OsFlags>,
    waiters: WaitListId,
}

impl Clone for EventGroup {
    fn clone(&self) -> Self {
        EventGroup {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for EventInner {
    fn drop(&mut self) {
        self.kernel.with_state(|st| st.wait_list_delete(self.waiters));
    }
}

impl EventWait {
    #[inline]
    fn satisfied_by(&self, bits: OsFlags) -> bool {
        if self.all {
            bits & self.bits == self.bits
        } else {
            bits & self.bits != 0
        }
    }
}

impl EventGroup {
    pub fn create(kernel: &Kernel, name: &'static str) -> OsResult<Self> {
        let waiters = kernel.with_state(|st| st.wait_list_create(name))?;

        Ok(EventGroup {
            inner: Rc::new(EventInner {
                kernel: kernel.clone(),
                name,
                bits: CsCell::new(0),
                waiters,
            }),
        })
    }

    /// OR bits into the group and release every waiter now satisfied
    ///
    /// Returns the bits after clear-on-exit waiters consumed theirs, and
    /// whether a more urgent task was released.
    fn post(&self, st: &mut KernelState, set: OsFlags) -> (OsFlags, bool) {
        let inner = &*self.inner;
        inner.bits.with(|bits| {
            *bits |= set;

            let mut release: heapless::Vec<TaskHandle, CFG_TASK_MAX> = heapless::Vec::new();
            let mut clear: OsFlags = 0;
            for id in st.wait_lists[inner.waiters.index()].list.iter(&st.tasks) {
                let wait = st.tasks[id.index()].event_wait;
                if wait.satisfied_by(*bits) {
                    if wait.clear {
                        clear |= wait.bits;
                    }
                    // Capacity matches the task arena
                    let _ = release.push(id);
                }
            }

            let mut woken = false;
            for id in release {
                st.tasks[id.index()].event_value = *bits;
                woken |= st.ready_task(id, PendStatus::Ok);
            }

            *bits &= !clear;
            (*bits, woken)
        })
    }

    /// Set bits
    ///
    /// Returns the group's value once every released waiter has consumed
    /// its clear-on-exit bits.
    pub async fn set_bits(&self, bits: OsFlags) -> OsResult<OsFlags> {
        let value = self.try_set_bits(bits)?;
        self.inner.kernel.preemption_point().await;
        Ok(value)
    }

    /// Set bits without suspending the caller
    pub fn try_set_bits(&self, bits: OsFlags) -> OsResult<OsFlags> {
        self.inner.kernel.check_task_context()?;
        Ok(self.inner.kernel.with_state(|st| self.post(st, bits).0))
    }

    /// Set bits from an interrupt handler
    pub fn set_bits_from_isr(&self, isr: &mut IsrContext<'_>, bits: OsFlags) -> OsResult<OsFlags> {
        let (value, woken) = self.inner.kernel.with_state(|st| self.post(st, bits));
        isr.request_switch(woken);
        Ok(value)
    }

    /// Clear bits, returning the value before clearing
    pub fn clear_bits(&self, bits: OsFlags) -> OsFlags {
        self.inner.bits.with(|cur| {
            let old = *cur;
            *cur &= !bits;
            old
        })
    }

    /// Current value of the group
    pub fn bits(&self) -> OsFlags {
        self.inner.bits.with(|cur| *cur)
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Block on a prepared condition and collect the releasing value
    async fn pend(&self) -> OsResult<OsFlags> {
        Suspend::new().await;

        self.inner.kernel.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let tcb = &st.tasks[id.index()];
            match tcb.pend_status {
                PendStatus::Ok => Ok(tcb.event_value),
                _ => Err(OsError::DeadlineMissed),
            }
        })
    }

    /// Wait for bits
    ///
    /// With `wait_all` every bit of `bits` must be set, otherwise any one
    /// will do. Returns the group's value at the moment the condition was
    /// met; with `clear_on_exit` the waited-for bits are then cleared.
    ///
    /// # Returns
    /// * `Err(OsError::DeadlineMissed)` - the condition was not met in time
    pub async fn wait_bits(
        &self,
        bits: OsFlags,
        clear_on_exit: bool,
        wait_all: bool,
        timeout: OsTick,
    ) -> OsResult<OsFlags> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let wait = EventWait {
            bits,
            all: wait_all,
            clear: clear_on_exit,
        };

        let ready = inner.kernel.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let now = inner.bits.with(|cur| {
                let value = *cur;
                if wait.satisfied_by(value) {
                    if clear_on_exit {
                        *cur &= !bits;
                    }
                    Some(value)
                } else {
                    None
                }
            });
            if now.is_some() {
                return Ok(now);
            }
            if timeout == NO_WAIT {
                return Err(OsError::DeadlineMissed);
            }

            st.tasks[id.index()].event_wait = wait;
            st.block_current(PendOn::Object(inner.waiters), timeout)?;
            Ok(None)
        })?;

        match ready {
            Some(value) => Ok(value),
            None => self.pend().await,
        }
    }

    /// Rendezvous
    ///
    /// Sets `set` and waits until every bit of `wait_for` is set. The last
    /// task to arrive releases the others; all of them see the full value
    /// and the `wait_for` bits are cleared.
    pub async fn sync(&self, set: OsFlags, wait_for: OsFlags, timeout: OsTick) -> OsResult<OsFlags> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let ready = inner.kernel.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let original = inner.bits.with(|cur| *cur);
            self.post(st, set);

            if (original | set) & wait_for == wait_for {
                let value = original | set;
                inner.bits.with(|cur| *cur &= !wait_for);
                return Ok(Some(value));
            }
            if timeout == NO_WAIT {
                return Err(OsError::DeadlineMissed);
            }

            st.tasks[id.index()].event_wait = EventWait {
                bits: wait_for,
                all: true,
                clear: true,
            };
            st.block_current(PendOn::Object(inner.waiters), timeout)?;
            Ok(None)
        })?;

        match ready {
            Some(value) => {
                inner.kernel.preemption_point().await;
                Ok(value)
            }
            None => self.pend().await,
        }
    }
}
