//! Direct task notifications
//!
//! Every task carries a 32-bit notification word and a pending flag. A
//! notification can set bits, count, or deliver a value without any
//! intermediate kernel object.

use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel, KernelState};
use crate::sched::Suspend;
use crate::types::{
    NotifyAction, NotifyState, OsNotifyValue, OsTick, PendOn, PendStatus, TaskHandle, NO_WAIT,
};

impl KernelState {
    /// Apply a notification to a task
    ///
    /// Returns `true` if it released a task more urgent than the running one.
    pub(crate) fn notify_task(&mut self, id: TaskHandle, action: NotifyAction) -> OsResult<bool> {
        self.tcb(id)?;

        let tcb = &mut self.tasks[id.index()];
        let prev_state = tcb.notify_state;

        match action {
            NotifyAction::NoAction => {}
            NotifyAction::SetBits(bits) => tcb.notify_value |= bits,
            NotifyAction::Increment => tcb.notify_value = tcb.notify_value.wrapping_add(1),
            NotifyAction::SetValueWithOverwrite(value) => tcb.notify_value = value,
            NotifyAction::SetValueWithoutOverwrite(value) => {
                if prev_state == NotifyState::Received {
                    crate::warn!("notification to {} dropped: value still pending", tcb.name);
                    return Err(OsError::NotificationOverwritten);
                }
                tcb.notify_value = value;
            }
        }
        tcb.notify_state = NotifyState::Received;

        if prev_state == NotifyState::Waiting && tcb.pend_on == PendOn::Notification {
            Ok(self.ready_task(id, PendStatus::Ok))
        } else {
            Ok(false)
        }
    }

    /// Enter the notification wait of the polled task
    ///
    /// Returns `true` if the task blocked.
    fn notify_pend(
        &mut self,
        clear_on_entry: OsNotifyValue,
        block_while: impl FnOnce(&crate::task::Tcb) -> bool,
        timeout: OsTick,
    ) -> OsResult<bool> {
        let id = self.polling.ok_or(OsError::NotInTask)?;

        let tcb = &mut self.tasks[id.index()];
        if !block_while(tcb) {
            return Ok(false);
        }

        tcb.notify_value &= !clear_on_entry;
        tcb.notify_state = NotifyState::Waiting;
        if timeout == NO_WAIT {
            return Ok(false);
        }

        self.block_current(PendOn::Notification, timeout)?;
        Ok(true)
    }
}

impl Kernel {
    /// Notify a task
    ///
    /// # Returns
    /// * `Err(OsError::NotificationOverwritten)` - `SetValueWithoutOverwrite`
    ///   while a previous value was still pending; nothing was changed
    /// * `Err(OsError::TaskInvalid)` - no such task
    pub async fn notify(&self, task: TaskHandle, action: NotifyAction) -> OsResult<()> {
        self.try_notify(task, action)?;
        self.preemption_point().await;
        Ok(())
    }

    /// Notify a task without suspending the caller
    pub fn try_notify(&self, task: TaskHandle, action: NotifyAction) -> OsResult<()> {
        self.check_task_context()?;
        self.with_state(|st| st.notify_task(task, action)).map(|_| ())
    }

    /// Notify a task from an interrupt
    pub fn notify_from_isr(
        &self,
        isr: &mut IsrContext<'_>,
        task: TaskHandle,
        action: NotifyAction,
    ) -> OsResult<()> {
        let woken = self.with_state(|st| st.notify_task(task, action))?;
        isr.request_switch(woken);
        Ok(())
    }

    /// Counting-semaphore style notify: increment the target's value
    pub async fn notify_give(&self, task: TaskHandle) -> OsResult<()> {
        self.notify(task, NotifyAction::Increment).await
    }

    pub fn notify_give_from_isr(&self, isr: &mut IsrContext<'_>, task: TaskHandle) -> OsResult<()> {
        self.notify_from_isr(isr, task, NotifyAction::Increment)
    }

    /// Wait for a notification to the calling task
    ///
    /// If none is pending, the bits in `clear_on_entry` are cleared and the
    /// task blocks for up to `timeout` ticks. On success the value is
    /// returned and the bits in `clear_on_exit` are cleared.
    ///
    /// # Returns
    /// * `Err(OsError::DeadlineMissed)` - no notification arrived in time
    pub async fn notify_wait(
        &self,
        clear_on_entry: OsNotifyValue,
        clear_on_exit: OsNotifyValue,
        timeout: OsTick,
    ) -> OsResult<OsNotifyValue> {
        self.check_task_context()?;

        let blocked = self.with_state(|st| {
            st.notify_pend(
                clear_on_entry,
                |tcb| tcb.notify_state != NotifyState::Received,
                timeout,
            )
        })?;
        if blocked {
            Suspend::new().await;
        }

        self.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let tcb = &mut st.tasks[id.index()];

            let ret = if tcb.notify_state == NotifyState::Received {
                let value = tcb.notify_value;
                tcb.notify_value &= !clear_on_exit;
                Ok(value)
            } else {
                Err(OsError::DeadlineMissed)
            };
            tcb.notify_state = NotifyState::NotWaiting;
            ret
        })
    }

    /// Take from the calling task's notification count
    ///
    /// Blocks while the value is zero. Returns the value before it was
    /// decremented, or zeroed when `clear_on_exit` is set.
    pub async fn notify_take(&self, clear_on_exit: bool, timeout: OsTick) -> OsResult<OsNotifyValue> {
        self.check_task_context()?;

        let blocked = self.with_state(|st| {
            st.notify_pend(0, |tcb| tcb.notify_value == 0, timeout)
        })?;
        if blocked {
            Suspend::new().await;
        }

        self.with_state(|st| {
            let id = st.polling.ok_or(OsError::NotInTask)?;
            let tcb = &mut st.tasks[id.index()];

            let value = tcb.notify_value;
            tcb.notify_state = NotifyState::NotWaiting;
            if value == 0 {
                return Err(OsError::DeadlineMissed);
            }
            tcb.notify_value = if clear_on_exit { 0 } else { value - 1 };
            Ok(value)
        })
    }
}
