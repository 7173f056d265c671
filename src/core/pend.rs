//! Wait lists
//!
//! Every blocking kernel object owns one or two wait lists allocated from a
//! fixed arena in the kernel state. A wait list is a priority-ordered
//! doubly-linked list threaded through the pend links of the TCBs, FIFO
//! among equal priorities.

use crate::error::{OsError, OsResult};
use crate::kernel::KernelState;
use crate::task::Tcb;
use crate::types::{
    OsPrio, OsTick, PendOn, PendStatus, TaskHandle, TaskState, WaitListId, WAIT_FOREVER,
};

/// Pend list ordered by priority
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendList {
    head: Option<TaskHandle>,
    tail: Option<TaskHandle>,
}

impl PendList {
    pub const fn new() -> Self {
        PendList {
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskHandle> {
        self.head
    }

    /// Insert by priority, after every task of the same priority
    pub fn insert_by_prio(&mut self, tasks: &mut [Tcb], id: TaskHandle) {
        let prio = tasks[id.index()].prio;

        // Find the first task that is strictly less urgent
        let mut cur = self.head;
        while let Some(c) = cur {
            if prio > tasks[c.index()].prio {
                break;
            }
            cur = tasks[c.index()].pend_next;
        }

        match cur {
            Some(before) => {
                let prev = tasks[before.index()].pend_prev;
                {
                    let tcb = &mut tasks[id.index()];
                    tcb.pend_next = Some(before);
                    tcb.pend_prev = prev;
                }
                tasks[before.index()].pend_prev = Some(id);
                match prev {
                    Some(p) => tasks[p.index()].pend_next = Some(id),
                    None => self.head = Some(id),
                }
            }
            None => {
                {
                    let tcb = &mut tasks[id.index()];
                    tcb.pend_next = None;
                    tcb.pend_prev = self.tail;
                }
                match self.tail {
                    Some(t) => tasks[t.index()].pend_next = Some(id),
                    None => self.head = Some(id),
                }
                self.tail = Some(id);
            }
        }
    }

    /// Remove from pend list
    pub fn remove(&mut self, tasks: &mut [Tcb], id: TaskHandle) {
        let (prev, next) = {
            let tcb = &tasks[id.index()];
            (tcb.pend_prev, tcb.pend_next)
        };

        match prev {
            Some(p) => tasks[p.index()].pend_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => tasks[n.index()].pend_prev = prev,
            None => self.tail = prev,
        }

        let tcb = &mut tasks[id.index()];
        tcb.pend_next = None;
        tcb.pend_prev = None;
    }

    /// Iterate over the waiters, most urgent first
    pub fn iter<'a>(&self, tasks: &'a [Tcb]) -> impl Iterator<Item = TaskHandle> + 'a {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            let id = cur?;
            cur = tasks[id.index()].pend_next;
            Some(id)
        })
    }
}

/// One entry of the wait-list arena
pub(crate) struct WaitSlot {
    pub name: &'static str,
    pub in_use: bool,
    pub list: PendList,
}

impl KernelState {
    /// Allocate a wait list for a new kernel object
    pub(crate) fn wait_list_create(&mut self, name: &'static str) -> OsResult<WaitListId> {
        if let Some(idx) = self.wait_lists.iter().position(|slot| !slot.in_use) {
            let slot = &mut self.wait_lists[idx];
            slot.name = name;
            slot.in_use = true;
            slot.list = PendList::new();
            return Ok(WaitListId(idx as u16));
        }

        let id = WaitListId(self.wait_lists.len() as u16);
        self.wait_lists
            .push(WaitSlot {
                name,
                in_use: true,
                list: PendList::new(),
            })
            .map_err(|_| {
                crate::error!(
                    "wait list pool exhausted ({} slots)",
                    crate::config::CFG_WAIT_LIST_MAX
                );
                OsError::ResourceCreationFailed
            })?;
        Ok(id)
    }

    /// Return a wait list to the arena
    ///
    /// Tasks still waiting are released with a timeout status.
    pub(crate) fn wait_list_delete(&mut self, id: WaitListId) {
        while let Some(waiter) = self.wait_lists[id.index()].list.head() {
            self.ready_task(waiter, PendStatus::Timeout);
        }
        self.wait_lists[id.index()].in_use = false;
    }

    #[inline]
    pub(crate) fn wait_list_head(&self, id: WaitListId) -> Option<TaskHandle> {
        self.wait_lists[id.index()].list.head()
    }

    /// Priority of the most urgent waiter
    #[inline]
    pub(crate) fn wait_list_head_prio(&self, id: WaitListId) -> Option<OsPrio> {
        self.wait_list_head(id).map(|w| self.tasks[w.index()].prio)
    }

    /// Block the task being polled
    ///
    /// The task leaves the ready list, joins the object's wait list (if any)
    /// and, unless `ticks` is [`WAIT_FOREVER`], the tick wheel. The caller
    /// must suspend its future right after this returns.
    pub(crate) fn block_current(&mut self, pend_on: PendOn, ticks: OsTick) -> OsResult<()> {
        let id = self.polling.ok_or(OsError::NotInTask)?;
        if !self.tasks[id.index()].is_ready() {
            return Err(OsError::TaskInvalid);
        }

        self.rdy_remove(id);
        {
            let tcb = &mut self.tasks[id.index()];
            tcb.state = TaskState::Blocked;
            tcb.pend_on = pend_on;
            tcb.pend_status = PendStatus::Pending;
        }

        if let PendOn::Object(w) = pend_on {
            self.wait_lists[w.index()]
                .list
                .insert_by_prio(&mut self.tasks, id);
        }

        if ticks != WAIT_FOREVER {
            let wake = self.tick.wrapping_add(ticks);
            self.tick_wheel_insert(id, wake);
        }

        Ok(())
    }

    /// Release a blocked task
    ///
    /// Returns `true` if the released task is more urgent than the one
    /// currently running; a switch is then pending.
    pub(crate) fn ready_task(&mut self, id: TaskHandle, status: PendStatus) -> bool {
        let pend_on = self.tasks[id.index()].pend_on;
        if let PendOn::Object(w) = pend_on {
            self.wait_lists[w.index()].list.remove(&mut self.tasks, id);
        }
        if self.tasks[id.index()].wake_tick.is_some() {
            self.tick_wheel_remove(id);
        }

        let state = {
            let tcb = &mut self.tasks[id.index()];
            tcb.pend_on = PendOn::Nothing;
            tcb.pend_status = status;
            tcb.state
        };

        match state {
            TaskState::Blocked => {
                self.tasks[id.index()].state = TaskState::Ready;
                self.rdy_insert(id);
                self.preempts_current(id)
            }
            TaskState::BlockedSuspended => {
                self.tasks[id.index()].state = TaskState::Suspended;
                false
            }
            _ => false,
        }
    }

    /// Release the most urgent waiter of a wait list
    ///
    /// Returns `None` if nobody was waiting.
    pub(crate) fn wake_one(&mut self, id: WaitListId, status: PendStatus) -> Option<bool> {
        let waiter = self.wait_list_head(id)?;
        Some(self.ready_task(waiter, status))
    }

    /// Pend status of the task being polled
    pub(crate) fn current_pend_status(&self) -> OsResult<PendStatus> {
        let id = self.polling.ok_or(OsError::NotInTask)?;
        Ok(self.tasks[id.index()].pend_status)
    }
}
