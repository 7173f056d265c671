//! Mutex implementation with priority inheritance
//!
//! Mutexes provide mutual exclusion with automatic priority boosting
//! to prevent priority inversion. The protected value is reached through a
//! [`MutexGuard`]; dropping the guard releases the mutex and hands it to
//! the most urgent waiter.

use alloc::rc::Rc;
use core::cell::{RefCell, RefMut};
use core::ops::{Deref, DerefMut};

use crate::critical::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, KernelState};
use crate::sched::Suspend;
use crate::types::{OsPrio, OsTick, PendOn, PendStatus, TaskHandle, WaitListId, NO_WAIT};

/// Mutex with priority inheritance
pub struct Mutex<T> {
    inner: Rc<MutexInner<T>>,
}

struct MutexInner<T> {
    kernel: Kernel,
    name: &'static str,
    owner: CsCell<Option<TaskHandle>>,
    waiters: WaitListId,
    data: RefCell<T>,
}

impl<T> Clone for Mutex<T> {
    fn clone(&self) -> Self {
        Mutex {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for MutexInner<T> {
    fn drop(&mut self) {
        self.kernel.with_state(|st| st.wait_list_delete(self.waiters));
    }
}

/// Exclusive access to the value behind a [`Mutex`]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    data: RefMut<'a, T>,
}

enum Acquire {
    Owned,
    Busy,
    Wait,
}

impl<T> Mutex<T> {
    /// Create a mutex protecting `value`
    pub fn create(kernel: &Kernel, name: &'static str, value: T) -> OsResult<Self> {
        let waiters = kernel.with_state(|st| st.wait_list_create(name))?;

        Ok(Mutex {
            inner: Rc::new(MutexInner {
                kernel: kernel.clone(),
                name,
                owner: CsCell::new(None),
                waiters,
                data: RefCell::new(value),
            }),
        })
    }

    /// Acquire the mutex
    ///
    /// If the mutex is owned by a lower-priority task, the owner's priority
    /// is temporarily boosted to prevent priority inversion.
    ///
    /// # Returns
    /// * `Err(OsError::MutexOwner)` - the caller already holds it
    /// * `Err(OsError::DeadlineMissed)` - not released before the timeout
    pub async fn lock(&self, timeout: OsTick) -> OsResult<MutexGuard<'_, T>> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let step = inner.kernel.with_state(|st| {
            let me = st.polling.ok_or(OsError::NotInTask)?;
            inner.owner.with(|owner| match *owner {
                None => {
                    *owner = Some(me);
                    Ok(Acquire::Owned)
                }
                // Check if current task already owns it
                Some(o) if o == me => Err(OsError::MutexOwner),
                Some(_) if timeout == NO_WAIT => Ok(Acquire::Busy),
                Some(o) => {
                    // Priority inheritance
                    let my_prio = st.tasks[me.index()].prio;
                    if my_prio > st.tasks[o.index()].prio {
                        crate::debug!("mutex {}: owner boosted to {}", inner.name, my_prio);
                        st.set_prio(o, my_prio);
                    }

                    st.block_current(PendOn::Object(inner.waiters), timeout)?;
                    Ok(Acquire::Wait)
                }
            })
        })?;

        match step {
            Acquire::Owned => {}
            Acquire::Busy => return Err(OsError::DeadlineMissed),
            Acquire::Wait => {
                Suspend::new().await;

                let status = inner.kernel.with_state(|st| {
                    let status = st.current_pend_status()?;
                    if status != PendStatus::Ok {
                        if let Some(o) = inner.owner.with(|owner| *owner) {
                            self.disinherit(st, o);
                        }
                    }
                    Ok(status)
                })?;
                // The releasing task made us the owner
                if status != PendStatus::Ok {
                    return Err(OsError::DeadlineMissed);
                }
            }
        }

        Ok(MutexGuard {
            mutex: self,
            data: inner.data.borrow_mut(),
        })
    }

    /// Acquire the mutex only if it is free
    pub fn try_lock(&self) -> OsResult<MutexGuard<'_, T>> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        inner.kernel.with_state(|st| {
            let me = st.polling.ok_or(OsError::NotInTask)?;
            inner.owner.with(|owner| match *owner {
                None => {
                    *owner = Some(me);
                    Ok(())
                }
                Some(o) if o == me => Err(OsError::MutexOwner),
                Some(_) => Err(OsError::DeadlineMissed),
            })
        })?;

        Ok(MutexGuard {
            mutex: self,
            data: inner.data.borrow_mut(),
        })
    }

    /// Drop an inherited boost that no remaining waiter justifies
    fn disinherit(&self, st: &mut KernelState, owner: TaskHandle) {
        let base = st.tasks[owner.index()].base_prio;
        let want = st
            .wait_list_head_prio(self.inner.waiters)
            .map_or(base, |p| p.max(base));
        st.set_prio(owner, want);
    }

    /// Release the mutex
    ///
    /// If the current task's priority was boosted due to priority
    /// inheritance, it is restored to its base priority.
    fn release(&self) {
        let inner = &*self.inner;
        inner.kernel.with_state(|st| {
            inner.owner.with(|owner| {
                let Some(me) = *owner else {
                    return;
                };

                let base = st.tasks[me.index()].base_prio;
                st.set_prio(me, base);

                match st.wait_list_head(inner.waiters) {
                    Some(next) => {
                        *owner = Some(next);
                        st.ready_task(next, PendStatus::Ok);
                        // Waiters left behind still boost the new owner
                        if let Some(p) = st.wait_list_head_prio(inner.waiters) {
                            if p > st.tasks[next.index()].prio {
                                st.set_prio(next, p);
                            }
                        }
                    }
                    None => *owner = None,
                }
            })
        });
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<TaskHandle> {
        self.inner.owner.with(|owner| *owner)
    }

    /// Check if mutex is owned
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }

    /// Get owner's priority
    pub fn owner_prio(&self) -> Option<OsPrio> {
        let owner = self.owner()?;
        self.inner.kernel.task_priority(owner).ok()
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

impl<'a, T> MutexGuard<'a, T> {
    /// Release the mutex and give the CPU to the new owner if it is more
    /// urgent than the caller
    pub async fn unlock(self) {
        let kernel = self.mutex.inner.kernel.clone();
        drop(self);
        kernel.preemption_point().await;
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
