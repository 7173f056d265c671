//! Software timers
//!
//! Timers are run by a service task at [`CFG_TIMER_TASK_PRIO`]. Every
//! operation on a timer is a command posted to the service's queue, stamped
//! with the tick at which it was issued, so timing does not depend on when
//! the service gets around to it. The service keeps the active timers
//! sorted by expiry and sleeps on its queue until the nearest one is due.
//!
//! Callbacks run in the service task. They must not block; they may post
//! to queues, give semaphores or send notifications with the `try_`
//! operations.
//!
//! A deleted timer's slot is recycled once the service has processed the
//! delete. Handles carry the generation of their slot, so a handle to a
//! deleted timer keeps failing with [`OsError::TmrInvalid`].

use alloc::boxed::Box;
use alloc::rc::Rc;

use crate::config::{
    CFG_TIMER_CMD_WAIT_MAX, CFG_TIMER_MAX, CFG_TIMER_QUEUE_LEN, CFG_TIMER_STK_SIZE,
    CFG_TIMER_TASK_PRIO,
};
use crate::critical::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel};
use crate::sync::queue::Queue;
use crate::types::{OsTick, TimerMode, WAIT_FOREVER};

/// Timer callback, called with the timer that expired
pub type TimerCallback = Box<dyn FnMut(&Timer)>;

type ActiveList = heapless::Vec<usize, CFG_TIMER_MAX>;

/// Pool slot of a timer and the generation it was created in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct TimerId {
    index: u16,
    gen: u16,
}

impl TimerId {
    #[inline]
    fn index(self) -> usize {
        self.index as usize
    }
}

/// Request to the timer service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerCommand {
    Start { id: TimerId, at: OsTick },
    Reset { id: TimerId, at: OsTick },
    Stop { id: TimerId },
    ChangePeriod { id: TimerId, period: OsTick, at: OsTick },
    Delete { id: TimerId },
}

/// Timer control block
struct TimerCb {
    name: &'static str,
    gen: u16,
    period: OsTick,
    mode: TimerMode,
    /// Start of the running period
    armed_at: OsTick,
    active: bool,
    deleted: bool,
    callback: Option<TimerCallback>,
}

impl TimerCb {
    fn new(
        name: &'static str,
        gen: u16,
        period: OsTick,
        mode: TimerMode,
        callback: TimerCallback,
    ) -> Self {
        TimerCb {
            name,
            gen,
            period,
            mode,
            armed_at: 0,
            active: false,
            deleted: false,
            callback: Some(callback),
        }
    }

    /// Ticks until expiry, zero once due
    fn remaining(&self, now: OsTick) -> OsTick {
        self.period.saturating_sub(now.wrapping_sub(self.armed_at))
    }
}

pub(crate) struct TimerService {
    kernel: Kernel,
    queue: Queue<TimerCommand, CFG_TIMER_QUEUE_LEN>,
    timers: CsCell<heapless::Vec<TimerCb, CFG_TIMER_MAX>>,
}

impl TimerService {
    /// Get the kernel's timer service, creating it on first use
    fn get(kernel: &Kernel) -> OsResult<Rc<TimerService>> {
        if let Some(service) = kernel.inner.timers.get() {
            return Ok(service.clone());
        }

        let service = Rc::new(TimerService {
            kernel: kernel.clone(),
            queue: Queue::create(kernel, "TmrQ")?,
            timers: CsCell::new(heapless::Vec::new()),
        });
        let _ = kernel.inner.timers.set(service.clone());
        Ok(service)
    }

    /// Create the service task
    pub(crate) fn spawn(kernel: &Kernel) -> OsResult<()> {
        let service = Self::get(kernel)?;
        kernel.task_create(
            "Tmr Svc",
            CFG_TIMER_TASK_PRIO,
            CFG_TIMER_STK_SIZE,
            move |_| service.run(),
        )?;
        Ok(())
    }

    async fn run(self: Rc<Self>) {
        let mut active = ActiveList::new();

        loop {
            let timeout = self.next_timeout(&active);

            if let Ok(cmd) = self.queue.receive(timeout).await {
                self.process(cmd, &mut active);
                while let Ok(cmd) = self.queue.try_receive() {
                    self.process(cmd, &mut active);
                }
            }

            self.process_expired(&mut active);
        }
    }

    /// Run `f` on a timer that has not been deleted
    fn with_live<R>(&self, id: TimerId, f: impl FnOnce(&mut TimerCb) -> R) -> Option<R> {
        self.timers.with(|timers| match timers.get_mut(id.index()) {
            Some(tmr) if tmr.gen == id.gen && !tmr.deleted => Some(f(tmr)),
            _ => None,
        })
    }

    /// Ticks until the nearest expiry
    fn next_timeout(&self, active: &ActiveList) -> OsTick {
        let Some(&idx) = active.first() else {
            return WAIT_FOREVER;
        };
        let now = self.kernel.tick_count();
        self.timers.with(|t| t[idx].remaining(now))
    }

    /// Insert into the active list, after timers expiring at the same tick
    fn insert_active(&self, active: &mut ActiveList, idx: usize) {
        let now = self.kernel.tick_count();
        self.timers.with(|timers| {
            let key = |i: usize| timers[i].remaining(now);

            active.retain(|&a| a != idx);
            if active.push(idx).is_err() {
                return;
            }

            let k = key(idx);
            let mut i = active.len() - 1;
            while i > 0 && key(active[i - 1]) > k {
                active.swap(i - 1, i);
                i -= 1;
            }
        });
    }

    /// Arm a timer to expire one period after `at`
    fn arm(&self, active: &mut ActiveList, id: TimerId, at: OsTick, period: Option<OsTick>) {
        let armed = self.with_live(id, |tmr| {
            if let Some(period) = period {
                tmr.period = period;
            }
            tmr.armed_at = at;
            tmr.active = true;
        });

        if armed.is_some() {
            self.insert_active(active, id.index());
        }
    }

    fn process(&self, cmd: TimerCommand, active: &mut ActiveList) {
        crate::trace!("timer command {}", cmd);

        match cmd {
            TimerCommand::Start { id, at } | TimerCommand::Reset { id, at } => {
                self.arm(active, id, at, None);
            }
            TimerCommand::ChangePeriod { id, period, at } => {
                self.arm(active, id, at, Some(period));
            }
            TimerCommand::Stop { id } => {
                if self.with_live(id, |tmr| tmr.active = false).is_some() {
                    active.retain(|&a| a != id.index());
                }
            }
            TimerCommand::Delete { id } => {
                let callback = self.with_live(id, |tmr| {
                    tmr.active = false;
                    tmr.deleted = true;
                    tmr.callback.take()
                });
                if callback.is_some() {
                    active.retain(|&a| a != id.index());
                }
                drop(callback);
            }
        }
    }

    /// Fire every timer whose expiry has been reached, in expiry order
    fn process_expired(self: &Rc<Self>, active: &mut ActiveList) {
        loop {
            let Some(&idx) = active.first() else {
                break;
            };
            let now = self.kernel.tick_count();

            let fired = self.timers.with(|timers| {
                let tmr = &mut timers[idx];
                if tmr.remaining(now) > 0 {
                    return None;
                }
                match tmr.mode {
                    TimerMode::AutoReload => tmr.armed_at = tmr.armed_at.wrapping_add(tmr.period),
                    TimerMode::OneShot => tmr.active = false,
                }
                Some((tmr.gen, tmr.mode, tmr.callback.take()))
            });
            let Some((gen, mode, callback)) = fired else {
                break;
            };

            crate::trace!("timer #{} expired at {}", idx, now);
            active.retain(|&a| a != idx);
            if mode == TimerMode::AutoReload {
                self.insert_active(active, idx);
            }

            if let Some(mut callback) = callback {
                let timer = Timer {
                    id: TimerId {
                        index: idx as u16,
                        gen,
                    },
                    service: self.clone(),
                };
                callback(&timer);

                self.timers.with(|timers| {
                    let tmr = &mut timers[idx];
                    if tmr.gen == gen && !tmr.deleted && tmr.callback.is_none() {
                        tmr.callback = Some(callback);
                    }
                });
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TimerCommand {
    fn format(&self, f: defmt::Formatter) {
        match *self {
            TimerCommand::Start { id, at } => defmt::write!(f, "start {} @{}", id, at),
            TimerCommand::Reset { id, at } => defmt::write!(f, "reset {} @{}", id, at),
            TimerCommand::Stop { id } => defmt::write!(f, "stop {}", id),
            TimerCommand::ChangePeriod { id, period, at } => {
                defmt::write!(f, "period {} = {} @{}", id, period, at)
            }
            TimerCommand::Delete { id } => defmt::write!(f, "delete {}", id),
        }
    }
}

/// Handle to a software timer
#[derive(Clone)]
pub struct Timer {
    id: TimerId,
    service: Rc<TimerService>,
}

impl Timer {
    /// Create a dormant timer
    ///
    /// # Returns
    /// * `Err(OsError::TmrInvalidPeriod)` - `period` is zero
    /// * `Err(OsError::ResourceCreationFailed)` - timer pool exhausted
    pub fn create(
        kernel: &Kernel,
        name: &'static str,
        period: OsTick,
        mode: TimerMode,
        callback: impl FnMut(&Timer) + 'static,
    ) -> OsResult<Timer> {
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }

        let service = TimerService::get(kernel)?;
        let callback: TimerCallback = Box::new(callback);
        let id = service.timers.with(|timers| {
            // Reuse the slot of a timer the service has already deleted
            if let Some(idx) = timers.iter().position(|t| t.deleted) {
                let gen = timers[idx].gen.wrapping_add(1);
                timers[idx] = TimerCb::new(name, gen, period, mode, callback);
                return Ok(TimerId {
                    index: idx as u16,
                    gen,
                });
            }

            let idx = timers.len();
            timers
                .push(TimerCb::new(name, 0, period, mode, callback))
                .map(|_| TimerId {
                    index: idx as u16,
                    gen: 0,
                })
                .map_err(|_| {
                    crate::error!("timer pool exhausted ({} timers)", CFG_TIMER_MAX);
                    OsError::ResourceCreationFailed
                })
        })?;

        crate::debug!("timer {} created, period {}", name, period);
        Ok(Timer { id, service })
    }

    fn command(&self, make: impl FnOnce(TimerId, OsTick) -> TimerCommand) -> OsResult<TimerCommand> {
        self.service
            .with_live(self.id, |_| ())
            .ok_or(OsError::TmrInvalid)?;
        Ok(make(self.id, self.service.kernel.tick_count()))
    }

    async fn post(&self, cmd: TimerCommand, timeout: OsTick) -> OsResult<()> {
        self.service
            .queue
            .send(cmd, timeout.min(CFG_TIMER_CMD_WAIT_MAX))
            .await
    }

    /// Start the timer; it expires one period after this call
    ///
    /// Waits up to `timeout` ticks (at most [`CFG_TIMER_CMD_WAIT_MAX`]) for
    /// room in the command queue.
    pub async fn start(&self, timeout: OsTick) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Start { id, at })?;
        self.post(cmd, timeout).await
    }

    pub fn try_start(&self) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Start { id, at })?;
        self.service.queue.try_send(cmd)
    }

    pub fn start_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Start { id, at })?;
        self.service.queue.send_from_isr(isr, cmd)
    }

    /// Stop the timer; a stopped timer keeps its period
    pub async fn stop(&self, timeout: OsTick) -> OsResult<()> {
        let cmd = self.command(|id, _| TimerCommand::Stop { id })?;
        self.post(cmd, timeout).await
    }

    pub fn try_stop(&self) -> OsResult<()> {
        let cmd = self.command(|id, _| TimerCommand::Stop { id })?;
        self.service.queue.try_send(cmd)
    }

    pub fn stop_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<()> {
        let cmd = self.command(|id, _| TimerCommand::Stop { id })?;
        self.service.queue.send_from_isr(isr, cmd)
    }

    /// Restart the period from now, starting the timer if dormant
    pub async fn reset(&self, timeout: OsTick) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Reset { id, at })?;
        self.post(cmd, timeout).await
    }

    pub fn try_reset(&self) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Reset { id, at })?;
        self.service.queue.try_send(cmd)
    }

    pub fn reset_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<()> {
        let cmd = self.command(|id, at| TimerCommand::Reset { id, at })?;
        self.service.queue.send_from_isr(isr, cmd)
    }

    /// Change the period and restart the timer from now
    pub async fn change_period(&self, period: OsTick, timeout: OsTick) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }
        let cmd = self.command(|id, at| TimerCommand::ChangePeriod { id, period, at })?;
        self.post(cmd, timeout).await
    }

    pub fn try_change_period(&self, period: OsTick) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }
        let cmd = self.command(|id, at| TimerCommand::ChangePeriod { id, period, at })?;
        self.service.queue.try_send(cmd)
    }

    pub fn change_period_from_isr(&self, isr: &mut IsrContext<'_>, period: OsTick) -> OsResult<()> {
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }
        let cmd = self.command(|id, at| TimerCommand::ChangePeriod { id, period, at })?;
        self.service.queue.send_from_isr(isr, cmd)
    }

    /// Delete the timer; its callback is dropped by the service
    pub async fn delete(&self, timeout: OsTick) -> OsResult<()> {
        let cmd = self.command(|id, _| TimerCommand::Delete { id })?;
        self.post(cmd, timeout).await
    }

    pub fn try_delete(&self) -> OsResult<()> {
        let cmd = self.command(|id, _| TimerCommand::Delete { id })?;
        self.service.queue.try_send(cmd)
    }

    /// Whether the service has the timer armed
    pub fn is_active(&self) -> bool {
        self.service
            .with_live(self.id, |tmr| tmr.active)
            .unwrap_or(false)
    }

    /// Tick of the next expiry while active
    pub fn expiry(&self) -> Option<OsTick> {
        self.service
            .with_live(self.id, |tmr| {
                tmr.active.then(|| tmr.armed_at.wrapping_add(tmr.period))
            })
            .flatten()
    }

    pub fn period(&self) -> OsResult<OsTick> {
        self.service
            .with_live(self.id, |tmr| tmr.period)
            .ok_or(OsError::TmrInvalid)
    }

    pub fn mode(&self) -> OsResult<TimerMode> {
        self.service
            .with_live(self.id, |tmr| tmr.mode)
            .ok_or(OsError::TmrInvalid)
    }

    pub fn name(&self) -> OsResult<&'static str> {
        self.service
            .with_live(self.id, |tmr| tmr.name)
            .ok_or(OsError::TmrInvalid)
    }

    /// Kernel the timer belongs to
    pub fn kernel(&self) -> &Kernel {
        &self.service.kernel
    }
}
