//! Channel abstractions shared by queues and semaphores
//!
//! A semaphore behaves like a queue of `()` items, so code that only moves
//! tokens or values between contexts can be written once against these
//! traits.

use crate::error::OsResult;
use crate::kernel::IsrContext;
use crate::types::OsTick;

/// Blocking operations available to tasks
#[allow(async_fn_in_trait)]
pub trait BlockingChannel {
    type Item;

    /// Put an item in, waiting up to `timeout` ticks for room
    async fn send(&self, item: Self::Item, timeout: OsTick) -> OsResult<()>;

    /// Take an item out, waiting up to `timeout` ticks for one to arrive
    async fn receive(&self, timeout: OsTick) -> OsResult<Self::Item>;
}

/// Non-blocking operations available to interrupt handlers
pub trait IsrChannel {
    type Item;

    fn send_from_isr(&self, isr: &mut IsrContext<'_>, item: Self::Item) -> OsResult<()>;

    fn receive_from_isr(&self, isr: &mut IsrContext<'_>) -> OsResult<Self::Item>;
}
