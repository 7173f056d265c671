//! Kernel state, dispatcher and interrupt bracketing
//!
//! A [`Kernel`] owns the task arena, the ready lists, the tick wheel and the
//! wait-list arena. Task bodies are futures; the suspended future of a task
//! is its saved context and the dispatcher in [`Kernel::run`] is the context
//! switch.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, RawWaker, RawWakerVTable, Waker};

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::config::{
    CFG_IDLE_STK_SIZE, CFG_PRIO_IDLE, CFG_PRIO_MAX, CFG_TASK_MAX, CFG_TICK_WHEEL_SIZE,
    CFG_WAIT_LIST_MAX,
};
use crate::critical::{in_exception_handler, CsCell};
use crate::error::{OsError, OsResult};
use crate::pend::WaitSlot;
use crate::port::Port;
use crate::prio::PrioTable;
use crate::sched::{ReadyList, Suspend};
use crate::task::Tcb;
use crate::types::{OsNestingCtr, OsPrio, OsTick, TaskHandle};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

// ============ Kernel State Structures ============

/// Atomic kernel flags
///
/// Readable from interrupt handlers without entering a critical section.
pub struct KernelFlags {
    running: AtomicBool,
    int_nesting: AtomicU8,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
        }
    }

    /// Check if the OS is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Set running flag
    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Enter ISR
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting < OsNestingCtr::MAX {
            self.int_nesting.store(nesting + 1, Ordering::Relaxed);
        }
    }

    /// Decrement int nesting
    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        if nesting > 0 {
            self.int_nesting.store(nesting - 1, Ordering::Relaxed);
        }
        nesting.saturating_sub(1)
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelStats {
    /// Number of times the running task changed
    pub context_switches: u32,
    /// Interrupts that ended with a switch request
    pub isr_switch_requests: u32,
}

/// Everything the kernel mutates inside critical sections
pub(crate) struct KernelState {
    pub(crate) tick: OsTick,
    pub(crate) tasks: heapless::Vec<Tcb, CFG_TASK_MAX>,
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) tick_wheel: [Option<TaskHandle>; CFG_TICK_WHEEL_SIZE],
    pub(crate) wait_lists: heapless::Vec<WaitSlot, CFG_WAIT_LIST_MAX>,
    /// Task owning the CPU
    pub(crate) cur: Option<TaskHandle>,
    /// Task whose future is being polled right now
    pub(crate) polling: Option<TaskHandle>,
    pub(crate) idle: Option<TaskHandle>,
    /// A more urgent task became ready since the last dispatch
    pub(crate) switch_pending: bool,
    /// The polled task suspended at a preemption point
    pub(crate) preempted: bool,
    pub(crate) stats: KernelStats,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            tick: 0,
            tasks: heapless::Vec::new(),
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_MAX],
            tick_wheel: [None; CFG_TICK_WHEEL_SIZE],
            wait_lists: heapless::Vec::new(),
            cur: None,
            polling: None,
            idle: None,
            switch_pending: false,
            preempted: false,
            stats: KernelStats {
                context_switches: 0,
                isr_switch_requests: 0,
            },
        }
    }
}

pub(crate) struct KernelInner {
    pub(crate) flags: KernelFlags,
    pub(crate) state: CsCell<KernelState>,
    /// Task bodies, indexed like the task arena
    pub(crate) futures: RefCell<heapless::Vec<Option<TaskFuture>, CFG_TASK_MAX>>,
    idle_hook: RefCell<Option<Box<dyn FnMut()>>>,
    #[cfg(feature = "timer")]
    pub(crate) timers: core::cell::OnceCell<Rc<crate::timer::TimerService>>,
}

/// Handle to a kernel instance
///
/// Cloning is cheap; every clone refers to the same kernel.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Rc<KernelInner>,
}

/// Context handed to code running in an interrupt
///
/// `_from_isr` operations take it so they can record whether they readied a
/// task more urgent than the interrupted one.
pub struct IsrContext<'k> {
    kernel: &'k Kernel,
    woken: bool,
}

impl<'k> IsrContext<'k> {
    /// Kernel the interrupt belongs to
    #[inline]
    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    /// Whether an operation in this interrupt readied a more urgent task
    #[inline]
    pub fn higher_priority_task_woken(&self) -> bool {
        self.woken
    }

    #[inline]
    pub(crate) fn request_switch(&mut self, woken: bool) {
        self.woken |= woken;
    }
}

// ============ Waker ============

/// Wakers are never used for scheduling: readiness lives in the ready lists.
static NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(
    |x| RawWaker::new(x, &NOOP_VTABLE), // clone
    |_| (),                             // wake
    |_| (),                             // wake_by_ref
    |_| (),                             // drop
);

fn noop_waker() -> Waker {
    // Safety: the vtable functions do nothing and ignore the data pointer.
    unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &NOOP_VTABLE)) }
}

// ============ Public API ============

impl Kernel {
    /// Create a kernel with empty pools
    pub fn new() -> Self {
        Kernel {
            inner: Rc::new(KernelInner {
                flags: KernelFlags::new(),
                state: CsCell::new(KernelState::new()),
                futures: RefCell::new(heapless::Vec::new()),
                idle_hook: RefCell::new(None),
                #[cfg(feature = "timer")]
                timers: core::cell::OnceCell::new(),
            }),
        }
    }

    /// Check if the scheduler has been started
    #[inline]
    pub fn is_running(&self) -> bool {
        self.inner.flags.is_running()
    }

    /// Check if executing in interrupt context
    #[inline]
    pub fn in_isr(&self) -> bool {
        self.inner.flags.int_nesting() > 0 || in_exception_handler()
    }

    /// Scheduler counters
    pub fn stats(&self) -> KernelStats {
        self.with_state(|st| st.stats)
    }

    /// Install the function the idle task runs each time it gets the CPU
    pub fn set_idle_hook(&self, hook: impl FnMut() + 'static) {
        *self.inner.idle_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Start multitasking
    ///
    /// Creates the idle task (and the timer service task when timers are
    /// enabled) and marks the kernel running. Tasks are dispatched by
    /// [`Kernel::run`].
    ///
    /// # Returns
    /// * `Err(OsError::OsRunning)` - already started
    /// * `Err(OsError::ResourceCreationFailed)` - no room for the system tasks
    pub fn start(&self) -> OsResult<()> {
        if self.is_running() {
            return Err(OsError::OsRunning);
        }
        self.check_task_context()?;

        let idle = self.spawn(
            "Idle",
            CFG_PRIO_IDLE,
            CFG_IDLE_STK_SIZE,
            None,
        )?;

        #[cfg(feature = "timer")]
        crate::timer::TimerService::spawn(self)?;

        self.with_state(|st| {
            st.idle = Some(idle);
            if let Some(first) = st.highest_ready() {
                st.cur = Some(first);
            }
        });
        self.inner.flags.set_running(true);

        crate::info!("kernel started");
        Ok(())
    }

    /// Start the kernel and drive it from a hardware port
    ///
    /// Only returns if the kernel could not be started.
    pub fn start_scheduler<P: Port>(&self, port: &mut P) -> OsError {
        if let Err(err) = self.start() {
            crate::error!("scheduler start failed: {}", err);
            return err;
        }

        loop {
            self.run_with(port);
            port.wait_for_interrupt();
        }
    }

    /// Dispatch tasks until the CPU would go idle
    ///
    /// Polls the most urgent ready task until it blocks or yields, then
    /// re-selects; stops once the idle task (or a task that already yielded
    /// in this tick) is selected.
    pub fn run(&self) {
        self.dispatch(|_| {});
    }

    /// Like [`Kernel::run`], but collects the port's ticks and deferred
    /// interrupts before every dispatch
    ///
    /// A tick or interrupt that readies a more urgent task therefore takes
    /// effect at the next task switch, not only once the CPU goes idle.
    pub fn run_with<P: Port>(&self, port: &mut P) {
        self.dispatch(|k| {
            for _ in 0..port.take_ticks() {
                k.tick();
            }
            k.interrupt(|isr| port.dispatch_irqs(isr));
        });
    }

    fn dispatch(&self, mut service: impl FnMut(&Kernel)) {
        if !self.is_running() || self.in_isr() {
            return;
        }
        if self.with_state(|st| st.polling.is_some()) {
            return;
        }

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        loop {
            service(self);
            let Some(id) = self.with_state(|st| st.select_next()) else {
                break;
            };

            let fut = self
                .inner
                .futures
                .borrow_mut()
                .get_mut(id.index())
                .and_then(Option::take);

            let Some(mut fut) = fut else {
                // A ready task always has a body; retire a broken slot
                crate::error!("task {} has no body", id.index());
                self.with_state(|st| st.finish_poll(id, true));
                continue;
            };

            let done = fut.as_mut().poll(&mut cx).is_ready();

            if self.with_state(|st| st.finish_poll(id, done)) {
                if let Some(slot) = self.inner.futures.borrow_mut().get_mut(id.index()) {
                    *slot = Some(fut);
                }
            } else {
                drop(fut);
            }
        }

        // A busy task that already yielded this tick does not count as idle
        if self.with_state(|st| st.cur.is_some() && st.cur == st.idle) {
            self.run_idle_hook();
        }
    }

    /// Advance the clock by one tick
    ///
    /// Runs as an interrupt: expired waits are released and round-robin
    /// rotation happens. Call [`Kernel::run`] afterwards to dispatch.
    pub fn tick(&self) {
        if !self.is_running() {
            return;
        }
        self.interrupt(|isr| {
            let woken = isr.kernel().with_state(|st| st.tick_handler());
            isr.request_switch(woken);
        });
    }

    /// Simulate `ticks` timer interrupts, dispatching after each
    pub fn advance(&self, ticks: OsTick) {
        for _ in 0..ticks {
            self.tick();
            self.run();
        }
    }

    /// Run `f` as an interrupt handler
    ///
    /// On the way out a context switch is requested if any `_from_isr`
    /// operation inside `f` readied a more urgent task.
    pub fn interrupt<R>(&self, f: impl FnOnce(&mut IsrContext<'_>) -> R) -> R {
        self.inner.flags.int_enter();

        let mut isr = IsrContext {
            kernel: self,
            woken: false,
        };
        let ret = f(&mut isr);
        let woken = isr.woken;

        self.int_exit(woken);
        ret
    }

    /// Exit ISR
    fn int_exit(&self, woken: bool) {
        let nesting = self.inner.flags.int_nesting_dec();
        if nesting == 0 && woken {
            self.with_state(|st| {
                st.switch_pending = true;
                st.stats.isr_switch_requests = st.stats.isr_switch_requests.wrapping_add(1);
            });
        }
    }

    /// Whether a more urgent task is waiting for the CPU
    pub fn switch_pending(&self) -> bool {
        self.with_state(|st| st.switch_pending)
    }

    fn run_idle_hook(&self) {
        let hook = self.inner.idle_hook.borrow_mut().take();
        if let Some(mut hook) = hook {
            hook();
            let mut slot = self.inner.idle_hook.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
    }

    // ============ Internal helpers ============

    #[inline]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        self.inner.state.with(f)
    }

    /// Reject calls made from interrupt context
    #[inline]
    pub(crate) fn check_task_context(&self) -> OsResult<()> {
        if self.in_isr() {
            Err(OsError::CalledFromIsr)
        } else {
            Ok(())
        }
    }

    /// Create a TCB and, when given, store its body
    pub(crate) fn spawn(
        &self,
        name: &'static str,
        prio: OsPrio,
        stk_size: usize,
        body: Option<TaskFuture>,
    ) -> OsResult<TaskHandle> {
        let id = self.with_state(|st| st.task_alloc(name, prio, stk_size))?;

        self.inner
            .futures
            .borrow_mut()
            .push(body)
            .map_err(|_| OsError::ResourceCreationFailed)?;
        Ok(id)
    }

    /// Give the CPU away if a more urgent task is ready
    pub(crate) async fn preemption_point(&self) {
        if self.with_state(|st| st.preempt_check()) {
            Suspend::new().await;
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
