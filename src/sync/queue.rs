//! Message queue implementation
//!
//! Fixed-capacity FIFO of copyable items. Senders block while the queue is
//! full and receivers while it is empty; each side waits in priority order.
//! A woken task retries its operation against what is left of its original
//! timeout, so a slot taken by someone else in the meantime is not an error.

use alloc::rc::Rc;

use heapless::Deque;

use crate::critical::CsCell;
use crate::error::{OsError, OsResult};
use crate::kernel::{IsrContext, Kernel};
use crate::sched::Suspend;
use crate::sync::channel::{BlockingChannel, IsrChannel};
use crate::time::Deadline;
use crate::types::{OsTick, PendOn, PendStatus, WaitListId};

/// Bounded FIFO queue of `N` items of type `T`
pub struct Queue<T: Copy, const N: usize> {
    inner: Rc<QueueInner<T, N>>,
}

struct QueueInner<T, const N: usize> {
    kernel: Kernel,
    name: &'static str,
    items: CsCell<Deque<T, N>>,
    /// Tasks waiting for room
    senders: WaitListId,
    /// Tasks waiting for an item
    receivers: WaitListId,
}

impl<T: Copy, const N: usize> Clone for Queue<T, N> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T, const N: usize> Drop for QueueInner<T, N> {
    fn drop(&mut self) {
        self.kernel.with_state(|st| {
            st.wait_list_delete(self.senders);
            st.wait_list_delete(self.receivers);
        });
    }
}

impl<T: Copy, const N: usize> Queue<T, N> {
    /// Create a queue
    ///
    /// # Returns
    /// * `Err(OsError::QueueSizeInvalid)` - `N` is zero
    /// * `Err(OsError::ResourceCreationFailed)` - wait-list pool exhausted
    pub fn create(kernel: &Kernel, name: &'static str) -> OsResult<Self> {
        if N == 0 {
            return Err(OsError::QueueSizeInvalid);
        }

        let (senders, receivers) = kernel.with_state(|st| {
            let senders = st.wait_list_create(name)?;
            match st.wait_list_create(name) {
                Ok(receivers) => Ok((senders, receivers)),
                Err(err) => {
                    st.wait_list_delete(senders);
                    Err(err)
                }
            }
        })?;

        crate::debug!("queue {} created, {} slots", name, N);
        Ok(Queue {
            inner: Rc::new(QueueInner {
                kernel: kernel.clone(),
                name,
                items: CsCell::new(Deque::new()),
                senders,
                receivers,
            }),
        })
    }

    /// Append an item and release the most urgent receiver
    fn push(&self, item: T) -> OsResult<bool> {
        let inner = &*self.inner;
        inner.kernel.with_state(|st| {
            inner
                .items
                .with(|q| q.push_back(item))
                .map_err(|_| OsError::QueueFull)?;
            Ok(st.wake_one(inner.receivers, PendStatus::Ok).unwrap_or(false))
        })
    }

    /// Remove the oldest item and release the most urgent sender
    fn pop(&self) -> OsResult<(T, bool)> {
        let inner = &*self.inner;
        inner.kernel.with_state(|st| {
            let item = inner
                .items
                .with(|q| q.pop_front())
                .ok_or(OsError::QueueEmpty)?;
            Ok((item, st.wake_one(inner.senders, PendStatus::Ok).unwrap_or(false)))
        })
    }

    /// Send an item, waiting up to `timeout` ticks for room
    ///
    /// # Returns
    /// * `Err(OsError::QueueFull)` - still full when the timeout expired
    pub async fn send(&self, item: T, timeout: OsTick) -> OsResult<()> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let mut deadline = None;
        loop {
            let blocked = inner.kernel.with_state(|st| {
                let pushed = inner.items.with(|q| q.push_back(item).is_ok());
                if pushed {
                    st.wake_one(inner.receivers, PendStatus::Ok);
                    return Ok(false);
                }

                let now = st.tick;
                let deadline = *deadline.get_or_insert_with(|| Deadline::new(now, timeout));
                match deadline.remaining(now) {
                    Some(ticks) => {
                        st.block_current(PendOn::Object(inner.senders), ticks)?;
                        Ok(true)
                    }
                    None => Err(OsError::QueueFull),
                }
            })?;

            if !blocked {
                break;
            }
            Suspend::new().await;
        }

        inner.kernel.preemption_point().await;
        Ok(())
    }

    /// Receive an item, waiting up to `timeout` ticks for one
    ///
    /// # Returns
    /// * `Err(OsError::QueueEmpty)` - still empty when the timeout expired
    pub async fn receive(&self, timeout: OsTick) -> OsResult<T> {
        let inner = &*self.inner;
        inner.kernel.check_task_context()?;

        let mut deadline = None;
        let item = loop {
            let item = inner.kernel.with_state(|st| {
                if let Some(item) = inner.items.with(|q| q.pop_front()) {
                    st.wake_one(inner.senders, PendStatus::Ok);
                    return Ok(Some(item));
                }

                let now = st.tick;
                let deadline = *deadline.get_or_insert_with(|| Deadline::new(now, timeout));
                match deadline.remaining(now) {
                    Some(ticks) => {
                        st.block_current(PendOn::Object(inner.receivers), ticks)?;
                        Ok(None)
                    }
                    None => Err(OsError::QueueEmpty),
                }
            })?;

            match item {
                Some(item) => break item,
                None => Suspend::new().await,
            }
        };

        inner.kernel.preemption_point().await;
        Ok(item)
    }

    /// Send without blocking
    pub fn try_send(&self, item: T) -> OsResult<()> {
        self.inner.kernel.check_task_context()?;
        self.push(item).map(|_| ())
    }

    /// Receive without blocking
    pub fn try_receive(&self) -> OsResult<T> {
        self.inner.kernel.check_task_context()?;
        self.pop().map(|(item, _)| item)
    }

    /// Send from an interrupt handler
    pub fn send_from_isr(&self, isr: &mut IsrContext<'_>, item: T) -> OsResult<()> {
        let woken = self.push(item)?;
        isr.request_switch(woken);
        Ok(())
    }

    /// Receive from an interrupt handler
    pub fn receive_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<T> {
        let (item, woken) = self.pop()?;
        isr.request_switch(woken);
        Ok(item)
    }

    /// Copy of the oldest item, left in place
    pub fn peek(&self) -> Option<T> {
        self.inner.items.with(|q| q.front().copied())
    }

    /// Discard every queued item
    pub fn reset(&self) {
        let inner = &*self.inner;
        inner.kernel.with_state(|st| {
            inner.items.with(|q| q.clear());
            st.wake_one(inner.senders, PendStatus::Ok);
        });
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.inner.items.with(|q| q.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Free slots
    pub fn spaces_available(&self) -> usize {
        N - self.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

impl<T: Copy, const N: usize> BlockingChannel for Queue<T, N> {
    type Item = T;

    async fn send(&self, item: T, timeout: OsTick) -> OsResult<()> {
        Queue::send(self, item, timeout).await
    }

    async fn receive(&self, timeout: OsTick) -> OsResult<T> {
        Queue::receive(self, timeout).await
    }
}

impl<T: Copy, const N: usize> IsrChannel for Queue<T, N> {
    type Item = T;

    fn send_from_isr(&self, isr: &mut IsrContext<'_>, item: T) -> OsResult<()> {
        Queue::send_from_isr(self, isr, item)
    }

    fn receive_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<T> {
        Queue::receive_from_isr(self, isr)
    }
}
