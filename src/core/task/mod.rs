//! Task management module
//!
//! Provides task creation, deletion, and control functions.
//!
//! A task body is an `async` block. It runs until it suspends at an
//! `.await` on a kernel operation; returning from the body deletes the task.

mod tcb;

pub(crate) use tcb::{EventWait, Tcb};

use alloc::boxed::Box;
use core::future::Future;

use crate::config::{CFG_PRIO_MAX, CFG_STK_SIZE_MIN, CFG_TASK_MAX};
use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel, KernelState};
use crate::sched::Suspend;
use crate::types::{OsPrio, PendOn, TaskHandle, TaskState};

/// Snapshot of one task for run-time statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStats {
    pub handle: TaskHandle,
    pub name: &'static str,
    /// Effective priority, including any inherited boost
    pub prio: OsPrio,
    pub base_prio: OsPrio,
    pub state: TaskState,
    pub stack_size: usize,
    /// Ticks during which the task held the CPU
    pub run_ticks: u32,
    /// Number of times the task was dispatched
    pub dispatches: u32,
}

impl KernelState {
    /// Allocate and ready a TCB
    ///
    /// Slots of deleted tasks are never reused, so a handle to a deleted
    /// task keeps failing with [`OsError::TaskInvalid`].
    pub(crate) fn task_alloc(
        &mut self,
        name: &'static str,
        prio: OsPrio,
        stk_size: usize,
    ) -> OsResult<TaskHandle> {
        let id = TaskHandle(self.tasks.len() as u16);
        self.tasks
            .push(Tcb::new(name, prio, stk_size))
            .map_err(|_| {
                crate::error!("task pool exhausted ({} tasks)", CFG_TASK_MAX);
                OsError::ResourceCreationFailed
            })?;

        self.rdy_insert(id);
        self.preempts_current(id);

        crate::debug!("task {} created at prio {}", name, prio);
        Ok(id)
    }

    /// Look up a live task
    pub(crate) fn tcb(&self, id: TaskHandle) -> OsResult<&Tcb> {
        match self.tasks.get(id.index()) {
            Some(tcb) if tcb.state != TaskState::Deleted => Ok(tcb),
            _ => Err(OsError::TaskInvalid),
        }
    }

    /// Unlink a task from every list and mark it deleted
    pub(crate) fn task_remove(&mut self, id: TaskHandle) -> OsResult<()> {
        let state = self.tcb(id)?.state;
        if Some(id) == self.idle {
            return Err(OsError::TaskDelIdle);
        }

        match state {
            TaskState::Ready | TaskState::Running => self.rdy_remove(id),
            TaskState::Blocked | TaskState::BlockedSuspended => {
                if let PendOn::Object(w) = self.tasks[id.index()].pend_on {
                    self.wait_lists[w.index()]
                        .list
                        .remove(&mut self.tasks, id);
                }
                self.tick_wheel_remove(id);
            }
            TaskState::Suspended | TaskState::Deleted => {}
        }

        let tcb = &mut self.tasks[id.index()];
        tcb.state = TaskState::Deleted;
        tcb.pend_on = PendOn::Nothing;

        // If deleting current task, trigger reschedule
        if self.cur == Some(id) {
            self.switch_pending = true;
        }

        crate::debug!("task {} deleted", self.tasks[id.index()].name);
        Ok(())
    }

    fn task_suspend_inner(&mut self, id: TaskHandle) -> OsResult<()> {
        let state = self.tcb(id)?.state;
        if Some(id) == self.idle {
            return Err(OsError::TaskSuspendIdle);
        }

        match state {
            TaskState::Ready | TaskState::Running => {
                self.rdy_remove(id);
                self.tasks[id.index()].state = TaskState::Suspended;
            }
            TaskState::Blocked => {
                self.tasks[id.index()].state = TaskState::BlockedSuspended;
            }
            // Already suspended
            _ => {}
        }

        // Reschedule if suspended current task
        if self.cur == Some(id) {
            self.switch_pending = true;
        }
        Ok(())
    }

    fn task_resume_inner(&mut self, id: TaskHandle) -> OsResult<bool> {
        match self.tcb(id)?.state {
            TaskState::Suspended => {
                self.tasks[id.index()].state = TaskState::Ready;
                self.rdy_insert(id);
                Ok(self.preempts_current(id))
            }
            TaskState::BlockedSuspended => {
                self.tasks[id.index()].state = TaskState::Blocked;
                Ok(false)
            }
            _ => Err(OsError::TaskNotSuspended),
        }
    }
}

impl Kernel {
    /// Create a new task
    ///
    /// `body` receives a handle to this kernel and returns the future the
    /// task runs. The task is ready immediately; if it outranks the caller,
    /// it runs at the caller's next suspension point.
    ///
    /// # Arguments
    /// * `name` - Task name for debugging
    /// * `prio` - Task priority (higher value = more urgent)
    /// * `stk_size` - Nominal stack size, recorded for statistics
    /// * `body` - Task entry point
    ///
    /// # Example
    /// ```ignore
    /// let kernel = Kernel::new();
    /// kernel.task_create("blinky", 2, 256, |k| async move {
    ///     loop {
    ///         toggle_led();
    ///         k.delay(500).await.ok();
    ///     }
    /// })?;
    /// ```
    pub fn task_create<F, Fut>(
        &self,
        name: &'static str,
        prio: OsPrio,
        stk_size: usize,
        body: F,
    ) -> OsResult<TaskHandle>
    where
        F: FnOnce(Kernel) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.check_task_context()?;

        if prio as usize >= CFG_PRIO_MAX {
            return Err(OsError::PrioInvalid);
        }
        if stk_size < CFG_STK_SIZE_MIN {
            return Err(OsError::StkSizeInvalid);
        }

        let fut = Box::pin(body(self.clone()));
        self.spawn(name, prio, stk_size, Some(fut))
    }

    /// Delete a task
    ///
    /// A task deleting itself stops at its next suspension point.
    pub fn task_delete(&self, task: TaskHandle) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| st.task_remove(task))?;

        let body = self
            .inner
            .futures
            .borrow_mut()
            .get_mut(task.index())
            .and_then(Option::take);
        drop(body);
        Ok(())
    }

    /// Suspend another task
    ///
    /// A blocked task stays blocked until resumed, even if its wait ends.
    ///
    /// # Returns
    /// * `Err(OsError::TaskRunning)` - `task` is the caller; use [`Kernel::suspend_self`]
    /// * `Err(OsError::TaskSuspendIdle)` - the idle task cannot be suspended
    pub fn task_suspend(&self, task: TaskHandle) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| {
            if st.polling == Some(task) {
                return Err(OsError::TaskRunning);
            }
            st.task_suspend_inner(task)
        })
    }

    /// Suspend the calling task until another context resumes it
    pub async fn suspend_self(&self) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            st.task_suspend_inner(id)
        })?;
        Suspend::new().await;
        Ok(())
    }

    /// Resume a suspended task
    pub async fn task_resume(&self, task: TaskHandle) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| st.task_resume_inner(task))?;
        self.preemption_point().await;
        Ok(())
    }

    /// Resume a suspended task without suspending the caller
    pub fn try_task_resume(&self, task: TaskHandle) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| st.task_resume_inner(task)).map(|_| ())
    }

    /// Resume a suspended task from an interrupt
    pub fn task_resume_from_isr(&self, isr: &mut IsrContext<'_>, task: TaskHandle) -> OsResult<()> {
        let woken = self.with_state(|st| st.task_resume_inner(task))?;
        isr.request_switch(woken);
        Ok(())
    }

    /// Give the CPU to the next ready task of equal priority
    pub async fn yield_now(&self) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let prio = st.tasks[id.index()].prio;
            let rdy_list = &mut st.rdy_list[prio as usize];
            if rdy_list.head() == Some(id) {
                rdy_list.rotate(&mut st.tasks);
            }
            let tick = st.tick;
            st.tasks[id.index()].yielded_at = Some(tick);
            Ok(())
        })?;
        Suspend::new().await;
        Ok(())
    }

    /// Handle of the calling task, or of the task owning the CPU when
    /// called from outside a task
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.with_state(|st| st.polling.or(st.cur))
    }

    pub fn task_state(&self, task: TaskHandle) -> OsResult<TaskState> {
        self.with_state(|st| match st.tasks.get(task.index()) {
            Some(tcb) => Ok(tcb.state),
            None => Err(OsError::TaskInvalid),
        })
    }

    pub fn task_name(&self, task: TaskHandle) -> OsResult<&'static str> {
        self.with_state(|st| st.tcb(task).map(|t| t.name))
    }

    /// Effective priority of a task
    pub fn task_priority(&self, task: TaskHandle) -> OsResult<OsPrio> {
        self.with_state(|st| st.tcb(task).map(|t| t.prio))
    }

    /// Change the base priority of a task
    ///
    /// A priority inherited through a mutex is kept until the mutex is
    /// released.
    pub fn set_task_priority(&self, task: TaskHandle, prio: OsPrio) -> OsResult<()> {
        self.check_task_context()?;
        if prio as usize >= CFG_PRIO_MAX {
            return Err(OsError::PrioInvalid);
        }

        self.with_state(|st| {
            let (cur_prio, base_prio) = {
                let tcb = st.tcb(task)?;
                (tcb.prio, tcb.base_prio)
            };
            let inherited = cur_prio > base_prio;
            let effective = if inherited { cur_prio.max(prio) } else { prio };

            st.tasks[task.index()].base_prio = prio;
            st.set_prio(task, effective);

            if st.tasks[task.index()].is_ready() {
                st.preempts_current(task);
            }
            // Lowering the running task may hand the CPU to a peer
            if st.cur == Some(task) {
                st.switch_pending = true;
            }
            Ok(())
        })
    }

    /// Run-time statistics of every live task
    pub fn task_stats(&self) -> heapless::Vec<TaskStats, CFG_TASK_MAX> {
        self.with_state(|st| {
            st.tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.state != TaskState::Deleted)
                .map(|(i, t)| TaskStats {
                    handle: TaskHandle(i as u16),
                    name: t.name,
                    prio: t.prio,
                    base_prio: t.base_prio,
                    state: t.state,
                    stack_size: t.stk_size,
                    run_ticks: t.run_ticks,
                    dispatches: t.dispatches,
                })
                .collect()
        })
    }
}
