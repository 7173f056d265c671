//! Time management module
//!
//! Provides tick handling, time delays, and timeout management.
//!
//! Blocked tasks with a deadline sit in a tick wheel: the slot is the wake
//! tick modulo [`CFG_TICK_WHEEL_SIZE`], and each tick only the matching
//! slot is scanned.

use crate::config::{CFG_TICK_RATE_HZ, CFG_TICK_WHEEL_SIZE};
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, KernelState};
use crate::sched::Suspend;
use crate::types::{OsTick, PendOn, PendStatus, TaskHandle, TaskState, NO_WAIT, WAIT_FOREVER};

/// Convert milliseconds to ticks, rounding down
#[inline]
pub const fn ms_to_ticks(ms: u32) -> OsTick {
    ((ms as u64 * CFG_TICK_RATE_HZ as u64) / 1000) as OsTick
}

/// Time budget of a blocking call
///
/// Fixed on entry so that a task woken and forced to retry only waits for
/// what is left of its original timeout. Elapsed time is measured from the
/// start tick, so any finite timeout up to `WAIT_FOREVER - 1` is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline {
    start: OsTick,
    timeout: OsTick,
}

impl Deadline {
    pub(crate) fn new(now: OsTick, timeout: OsTick) -> Self {
        Deadline {
            start: now,
            timeout,
        }
    }

    /// Ticks left to wait, `None` once expired
    pub(crate) fn remaining(&self, now: OsTick) -> Option<OsTick> {
        match self.timeout {
            NO_WAIT => None,
            WAIT_FOREVER => Some(WAIT_FOREVER),
            t => {
                let elapsed = now.wrapping_sub(self.start);
                (elapsed < t).then(|| t - elapsed)
            }
        }
    }
}

impl KernelState {
    /// Get the tick wheel slot
    #[inline(always)]
    fn tick_wheel_slot(tick: OsTick) -> usize {
        (tick as usize) % CFG_TICK_WHEEL_SIZE
    }

    /// Add task to tick wheel
    pub(crate) fn tick_wheel_insert(&mut self, id: TaskHandle, wake_tick: OsTick) {
        let slot = Self::tick_wheel_slot(wake_tick);
        let old_head = self.tick_wheel[slot];

        {
            let tcb = &mut self.tasks[id.index()];
            tcb.wake_tick = Some(wake_tick);
            // Insert at head of slot
            tcb.tick_next = old_head;
            tcb.tick_prev = None;
        }

        if let Some(old) = old_head {
            self.tasks[old.index()].tick_prev = Some(id);
        }
        self.tick_wheel[slot] = Some(id);
    }

    /// Remove task from tick wheel
    pub(crate) fn tick_wheel_remove(&mut self, id: TaskHandle) {
        let (prev, next, wake_tick) = {
            let tcb = &self.tasks[id.index()];
            (tcb.tick_prev, tcb.tick_next, tcb.wake_tick)
        };
        let Some(wake_tick) = wake_tick else {
            return;
        };

        match prev {
            Some(p) => self.tasks[p.index()].tick_next = next,
            None => self.tick_wheel[Self::tick_wheel_slot(wake_tick)] = next,
        }
        if let Some(n) = next {
            self.tasks[n.index()].tick_prev = prev;
        }

        let tcb = &mut self.tasks[id.index()];
        tcb.tick_next = None;
        tcb.tick_prev = None;
        tcb.wake_tick = None;
    }

    /// Tick handler
    ///
    /// Returns `true` if a task more urgent than the running one was
    /// released or the running task was rotated.
    pub(crate) fn tick_handler(&mut self) -> bool {
        self.tick = self.tick.wrapping_add(1);
        let now = self.tick;

        if let Some(cur) = self.cur {
            let tcb = &mut self.tasks[cur.index()];
            if tcb.state == TaskState::Running {
                tcb.run_ticks = tcb.run_ticks.wrapping_add(1);
            }
        }

        // Process delayed tasks in the current tick wheel slot
        let mut woken = false;
        let mut current = self.tick_wheel[Self::tick_wheel_slot(now)];
        while let Some(id) = current {
            current = self.tasks[id.index()].tick_next;
            if self.tasks[id.index()].wake_tick == Some(now) {
                woken |= self.ready_task(id, PendStatus::Timeout);
            }
        }

        // Round-robin time slicing
        woken |= self.round_robin();
        woken
    }
}

impl Kernel {
    /// Get current tick count
    #[inline]
    pub fn tick_count(&self) -> OsTick {
        self.with_state(|st| st.tick)
    }

    /// Time delay in ticks
    ///
    /// Delays the calling task for the specified number of system ticks.
    /// A delay of zero yields to ready tasks of equal priority.
    ///
    /// # Returns
    /// * `Err(OsError::CalledFromIsr)` - cannot delay from ISR
    /// * `Err(OsError::NotInTask)` - not called from a task
    pub async fn delay(&self, ticks: OsTick) -> OsResult<()> {
        self.check_task_context()?;

        if ticks == 0 {
            return self.yield_now().await;
        }

        self.with_state(|st| st.block_current(PendOn::Nothing, ticks))?;
        Suspend::new().await;
        Ok(())
    }

    /// Time delay in milliseconds
    pub async fn delay_ms(&self, ms: u32) -> OsResult<()> {
        self.delay(ms_to_ticks(ms)).await
    }

    /// Periodic delay
    ///
    /// Blocks until `*last_wake + period`, then advances `*last_wake` by
    /// `period`. The period does not drift with the time spent working.
    ///
    /// Returns `Ok(false)` when the next release time had already passed
    /// and the task was not blocked.
    pub async fn delay_until(&self, last_wake: &mut OsTick, period: OsTick) -> OsResult<bool> {
        self.check_task_context()?;
        if period == 0 {
            return Err(OsError::TmrInvalidPeriod);
        }

        let blocked = self.with_state(|st| {
            let now = st.tick;
            let target = last_wake.wrapping_add(period);
            let elapsed = now.wrapping_sub(*last_wake);
            *last_wake = target;

            if elapsed < period {
                st.block_current(PendOn::Nothing, target.wrapping_sub(now))?;
                Ok(true)
            } else {
                Ok(false)
            }
        })?;

        if blocked {
            Suspend::new().await;
        } else {
            self.yield_now().await?;
        }
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_remaining() {
        let d = Deadline::new(10, 40);
        assert_eq!(d.remaining(10), Some(40));
        assert_eq!(d.remaining(30), Some(20));
        assert_eq!(d.remaining(50), None);
        assert_eq!(d.remaining(51), None);

        assert_eq!(Deadline::new(5, NO_WAIT).remaining(5), None);
        assert_eq!(Deadline::new(5, WAIT_FOREVER).remaining(1_000), Some(WAIT_FOREVER));
    }

    #[test]
    fn test_deadline_wraps() {
        let d = Deadline::new(OsTick::MAX - 5, 10);
        assert_eq!(d.remaining(OsTick::MAX), Some(5));
        assert_eq!(d.remaining(4), None);
    }

    #[test]
    fn test_deadline_beyond_half_range() {
        let d = Deadline::new(0, 0xC000_0000);
        assert_eq!(d.remaining(0), Some(0xC000_0000));
        assert_eq!(d.remaining(0x8000_0000), Some(0x4000_0000));
        assert_eq!(d.remaining(0xC000_0000), None);
    }

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(250), 250 * CFG_TICK_RATE_HZ / 1000);
    }
}
