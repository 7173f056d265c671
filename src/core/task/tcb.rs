//! Task Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a task. TCBs live
//! in the kernel's task arena and link to each other by [`TaskHandle`].

use crate::config::CFG_TIME_QUANTA_DEFAULT;
use crate::types::{
    NotifyState, OsFlags, OsNotifyValue, OsPrio, OsTick, PendOn, PendStatus, TaskHandle,
    TaskState,
};

/// Event-group condition a blocked task is waiting for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EventWait {
    pub bits: OsFlags,
    pub all: bool,
    pub clear: bool,
}

/// Task Control Block
pub(crate) struct Tcb {
    // ============ Task identification ============
    /// Task name
    pub name: &'static str,
    /// Requested stack size, kept for statistics
    pub stk_size: usize,

    // ============ Ready list links ============
    pub next: Option<TaskHandle>,
    pub prev: Option<TaskHandle>,

    // ============ Pend list links ============
    pub pend_next: Option<TaskHandle>,
    pub pend_prev: Option<TaskHandle>,
    /// What the task is pending on
    pub pend_on: PendOn,
    /// Result of pend operation
    pub pend_status: PendStatus,

    // ============ Tick wheel links ============
    pub tick_next: Option<TaskHandle>,
    pub tick_prev: Option<TaskHandle>,
    /// Absolute wake-up tick while in the tick wheel
    pub wake_tick: Option<OsTick>,

    // ============ Priority ============
    /// Current priority
    pub prio: OsPrio,
    /// Base priority
    pub base_prio: OsPrio,

    // ============ State ============
    pub state: TaskState,

    // ============ Time slicing ============
    pub time_quanta: OsTick,
    pub time_quanta_ctr: OsTick,
    /// Tick at which the task last gave up the CPU voluntarily
    pub yielded_at: Option<OsTick>,

    // ============ Notification ============
    pub notify_value: OsNotifyValue,
    pub notify_state: NotifyState,

    // ============ Event flags ============
    /// Flags being waited for
    pub event_wait: EventWait,
    /// Flags that made the task ready
    pub event_value: OsFlags,

    // ============ Statistics ============
    pub run_ticks: u32,
    pub dispatches: u32,
}

impl Tcb {
    pub fn new(name: &'static str, prio: OsPrio, stk_size: usize) -> Self {
        Tcb {
            name,
            stk_size,

            next: None,
            prev: None,

            pend_next: None,
            pend_prev: None,
            pend_on: PendOn::Nothing,
            pend_status: PendStatus::Ok,

            tick_next: None,
            tick_prev: None,
            wake_tick: None,

            prio,
            base_prio: prio,

            state: TaskState::Ready,

            time_quanta: CFG_TIME_QUANTA_DEFAULT,
            time_quanta_ctr: CFG_TIME_QUANTA_DEFAULT,
            yielded_at: None,

            notify_value: 0,
            notify_state: NotifyState::NotWaiting,

            event_wait: EventWait::default(),
            event_value: 0,

            run_ticks: 0,
            dispatches: 0,
        }
    }

    /// Check if task is ready to run
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}
