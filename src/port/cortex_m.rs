//! Cortex-M port
//!
//! SysTick provides the tick. Its exception handler only bumps a
//! [`TickCounter`]; the scheduler loop collects the ticks and runs the
//! kernel's tick processing in thread mode. Peripheral handlers pend their
//! line in an [`IrqLatch`] and a closure passed to [`SysTickPort::on_irqs`]
//! does the `_from_isr` work.

use alloc::boxed::Box;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

use super::{IrqLatch, Port, TickCounter};
use crate::config::CFG_TICK_RATE_HZ;
use crate::kernel::IsrContext;
use crate::types::OsTick;

/// Deferred interrupt work, called with the fired lines
pub type IrqHandler = Box<dyn FnMut(u32, &mut IsrContext<'_>)>;

/// Port running the kernel off SysTick
pub struct SysTickPort {
    _syst: SYST,
    ticks: &'static TickCounter,
    irqs: Option<(&'static IrqLatch, IrqHandler)>,
}

impl SysTickPort {
    /// Configure SysTick for [`CFG_TICK_RATE_HZ`]
    ///
    /// # Example
    /// For a 16MHz core clock at 1000Hz the reload value is 16_000 - 1.
    pub fn new(mut syst: SYST, core_clock_hz: u32, ticks: &'static TickCounter) -> Self {
        let cnts = core_clock_hz / CFG_TICK_RATE_HZ;

        syst.set_reload(cnts.saturating_sub(1));
        syst.clear_current();
        syst.set_clock_source(SystClkSource::Core);
        syst.enable_interrupt();
        syst.enable_counter();

        crate::info!("systick: {} Hz from {} Hz core", CFG_TICK_RATE_HZ, core_clock_hz);
        Self {
            _syst: syst,
            ticks,
            irqs: None,
        }
    }

    /// Run `handler` for the lines pended in `latch`
    pub fn on_irqs(
        mut self,
        latch: &'static IrqLatch,
        handler: impl FnMut(u32, &mut IsrContext<'_>) + 'static,
    ) -> Self {
        self.irqs = Some((latch, Box::new(handler)));
        self
    }

    fn irq_pending(&self) -> bool {
        self.irqs
            .as_ref()
            .is_some_and(|(latch, _)| latch.is_pending())
    }
}

impl Port for SysTickPort {
    fn wait_for_interrupt(&mut self) {
        // Interrupts stay masked between the check and WFI so a tick
        // arriving in between still wakes the core.
        cortex_m::interrupt::free(|_| {
            if !self.ticks.is_pending() && !self.irq_pending() {
                cortex_m::asm::wfi();
            }
        });
    }

    fn take_ticks(&mut self) -> OsTick {
        self.ticks.take()
    }

    fn dispatch_irqs(&mut self, isr: &mut IsrContext<'_>) {
        if let Some((latch, handler)) = self.irqs.as_mut() {
            let lines = latch.take();
            if lines != 0 {
                handler(lines, isr);
            }
        }
    }
}
