//! Scheduler module
//!
//! Priority-based preemptive scheduler with round-robin for same priority.
//!
//! The dispatcher always polls the head of the most urgent non-empty ready
//! list. A task gives up the CPU only by suspending its future, so every
//! kernel call that may wake a more urgent task ends in a preemption point.

mod rdy_list;

pub(crate) use rdy_list::ReadyList;

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use crate::config::{CFG_PRIO_IDLE, CFG_SCHED_ROUND_ROBIN_EN};
use crate::kernel::KernelState;
use crate::types::{OsPrio, PendOn, TaskHandle, TaskState};

impl KernelState {
    /// Make a task ready
    pub(crate) fn rdy_insert(&mut self, id: TaskHandle) {
        let prio = self.tasks[id.index()].prio;
        self.rdy_list[prio as usize].insert_tail(&mut self.tasks, id);
        self.prio_tbl.insert(prio);
    }

    /// Remove a task from ready list
    pub(crate) fn rdy_remove(&mut self, id: TaskHandle) {
        let prio = self.tasks[id.index()].prio;
        let rdy_list = &mut self.rdy_list[prio as usize];
        rdy_list.remove(&mut self.tasks, id);

        if rdy_list.is_empty() {
            self.prio_tbl.remove(prio);
        }
    }

    /// Change the effective priority of a task wherever it is queued
    pub(crate) fn set_prio(&mut self, id: TaskHandle, new_prio: OsPrio) {
        let (old_prio, ready, pend_on) = {
            let tcb = &self.tasks[id.index()];
            (tcb.prio, tcb.is_ready(), tcb.pend_on)
        };
        if old_prio == new_prio {
            return;
        }

        if ready {
            self.rdy_remove(id);
            self.tasks[id.index()].prio = new_prio;
            self.rdy_insert(id);
        } else {
            self.tasks[id.index()].prio = new_prio;
            // Re-sort within the wait list
            if let PendOn::Object(w) = pend_on {
                let list = &mut self.wait_lists[w.index()].list;
                list.remove(&mut self.tasks, id);
                list.insert_by_prio(&mut self.tasks, id);
            }
        }
    }

    /// Head of the most urgent non-empty ready list
    #[inline]
    pub(crate) fn highest_ready(&self) -> Option<TaskHandle> {
        let prio = self.prio_tbl.get_highest()?;
        self.rdy_list[prio as usize].head()
    }

    /// Priority of the task that currently owns the CPU
    #[inline]
    pub(crate) fn running_prio(&self) -> Option<OsPrio> {
        self.cur.map(|c| self.tasks[c.index()].prio)
    }

    /// Check whether a ready task outranks the running one
    ///
    /// Marks a switch as pending when it does.
    pub(crate) fn preempts_current(&mut self, id: TaskHandle) -> bool {
        let prio = self.tasks[id.index()].prio;
        match self.running_prio() {
            Some(cur_prio) if prio > cur_prio => {
                self.switch_pending = true;
                true
            }
            _ => false,
        }
    }

    /// Preemption check for the task being polled
    ///
    /// Returns `true` if a more urgent task is ready; the caller must then
    /// suspend without being treated as a voluntary yield.
    pub(crate) fn preempt_check(&mut self) -> bool {
        let Some(id) = self.polling else {
            return false;
        };
        let prio = self.tasks[id.index()].prio;
        match self.prio_tbl.get_highest() {
            Some(high) if high > prio => {
                self.preempted = true;
                true
            }
            _ => false,
        }
    }

    /// Round-robin scheduling for tasks at the same priority
    ///
    /// Called once per tick. Returns `true` if the running task was rotated
    /// behind a peer.
    pub(crate) fn round_robin(&mut self) -> bool {
        if !CFG_SCHED_ROUND_ROBIN_EN {
            return false;
        }

        let Some(cur) = self.cur else {
            return false;
        };

        let prio = {
            let tcb = &mut self.tasks[cur.index()];
            if !tcb.is_ready() {
                return false;
            }

            if tcb.time_quanta_ctr > 0 {
                tcb.time_quanta_ctr -= 1;
            }
            if tcb.time_quanta_ctr > 0 {
                return false;
            }
            tcb.time_quanta_ctr = tcb.time_quanta;
            tcb.prio
        };

        let rdy_list = &mut self.rdy_list[prio as usize];
        // Only rotate if more than one task at this priority
        if rdy_list.head() == Some(cur) && rdy_list.rotate(&mut self.tasks) {
            self.switch_pending = true;
            return true;
        }
        false
    }

    /// Pick the next task to poll
    ///
    /// The chosen task becomes the running one. Returns `None` when the CPU
    /// should go idle: the idle task won, or the winner already yielded
    /// during the current tick.
    pub(crate) fn select_next(&mut self) -> Option<TaskHandle> {
        self.switch_pending = false;

        let mut next = self.highest_ready()?;

        // Idle never holds the CPU against an application task of its level
        if Some(next) == self.idle {
            let idle_list = &mut self.rdy_list[CFG_PRIO_IDLE as usize];
            if idle_list.rotate(&mut self.tasks) {
                next = idle_list.head()?;
            }
        }

        self.set_current(next);

        if Some(next) == self.idle {
            return None;
        }
        if self.tasks[next.index()].yielded_at == Some(self.tick) {
            return None;
        }

        self.tasks[next.index()].dispatches += 1;
        self.polling = Some(next);
        Some(next)
    }

    fn set_current(&mut self, next: TaskHandle) {
        if self.cur == Some(next) {
            self.tasks[next.index()].state = TaskState::Running;
            return;
        }

        if let Some(prev) = self.cur {
            let tcb = &mut self.tasks[prev.index()];
            if tcb.state == TaskState::Running {
                tcb.state = TaskState::Ready;
            }
        }

        self.tasks[next.index()].state = TaskState::Running;
        self.cur = Some(next);
        self.stats.context_switches = self.stats.context_switches.wrapping_add(1);
        crate::trace!("switch to {}", self.tasks[next.index()].name);
    }

    /// Book-keeping after a task future returned
    ///
    /// Returns `true` if the future must be kept for another poll.
    pub(crate) fn finish_poll(&mut self, id: TaskHandle, done: bool) -> bool {
        self.polling = None;
        let preempted = core::mem::take(&mut self.preempted);

        if done {
            crate::debug!("task {} returned", self.tasks[id.index()].name);
            let _ = self.task_remove(id);
            return false;
        }

        let tick = self.tick;
        let tcb = &mut self.tasks[id.index()];
        match tcb.state {
            TaskState::Deleted => false,
            TaskState::Ready | TaskState::Running => {
                if !preempted {
                    tcb.yielded_at = Some(tick);
                }
                true
            }
            _ => true,
        }
    }
}

/// Future that returns `Pending` exactly once
///
/// Awaiting it hands the CPU back to the dispatcher; the task resumes the
/// next time the dispatcher selects it.
pub(crate) struct Suspend {
    done: bool,
}

impl Suspend {
    pub(crate) const fn new() -> Self {
        Suspend { done: false }
    }
}

impl Future for Suspend {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.done {
            Poll::Ready(())
        } else {
            self.done = true;
            Poll::Pending
        }
    }
}
