//! Event processing and the interrupt lines of the CPU.
use crate::system::{
    System,
    peripherals::{mi, si},
    scheduler::Event,
};
use r4300::cop0::{Exception, IP_RCP, IP_TIMER};
use tracing::{debug, trace};

/// Ticks between two COMPARE interrupts when Compare is left untouched.
const COMPARE_PERIOD: u64 = 1 << 32;

impl System {
    /// Raises the given MI interrupt lines.
    pub fn raise_mi_interrupt(&mut self, bits: u32) {
        self.bus.regs.mi[mi::INTR] |= bits;
        self.update_mi_interrupt();
    }

    /// Lowers the given MI interrupt lines.
    pub fn lower_mi_interrupt(&mut self, bits: u32) {
        self.bus.regs.mi[mi::INTR] &= !bits;
        self.update_mi_interrupt();
    }

    /// Propagates the MI interrupt lines to Cause.IP2 and requests a check of pending interrupts.
    pub fn update_mi_interrupt(&mut self) {
        let regs = &self.bus.regs;
        if regs.mi[mi::INTR] & regs.mi[mi::INTR_MASK] != 0 {
            self.cpu.cop0.raise_pending(IP_RCP);
        } else {
            self.cpu.cop0.lower_pending(IP_RCP);
        }

        self.request_interrupt_check();
    }

    /// Schedules a re-evaluation of pending interrupts at the current time.
    pub fn request_interrupt_check(&mut self) {
        if !self.scheduler.contains(Event::CheckInterrupt) {
            self.scheduler.schedule_now(Event::CheckInterrupt);
        }
    }

    /// Reschedules the COMPARE event for the current values of Count and Compare.
    pub fn schedule_compare(&mut self) {
        let cop0 = &self.cpu.cop0;
        let delta = match cop0.compare().wrapping_sub(cop0.count()) {
            0 => COMPARE_PERIOD,
            delta => delta as u64,
        };

        self.scheduler.cancel(Event::Compare);
        self.scheduler.schedule(Event::Compare, delta);
    }

    /// Takes an interrupt exception if an unmasked interrupt is pending and interrupts are
    /// accepted. Returns whether the exception was taken.
    pub fn check_interrupts(&mut self) -> bool {
        let cop0 = &self.cpu.cop0;
        if cop0.pending_interrupts() == 0 || cop0.regs[r4300::cop0::reg::STATUS] & 7 != 1 {
            return false;
        }

        trace!(pending = cop0.pending_interrupts(), pc = ?self.cpu.pc, "taking interrupt");
        self.raise_exception(Exception::Interrupt);
        true
    }

    /// Processes the given event.
    pub fn process(&mut self, event: Event) {
        trace!(?event, "processing event");
        match event {
            Event::Vi => {
                self.vi_field ^= 1;
                self.raise_mi_interrupt(mi::VI);
                self.vcr.frame();
                self.scheduler
                    .schedule(Event::Vi, self.config.vi_period.max(1) as u64);
            }
            Event::Compare => {
                self.cpu.cop0.raise_pending(IP_TIMER);
                self.scheduler.schedule(Event::Compare, COMPARE_PERIOD);
            }
            Event::CheckInterrupt => (),
            Event::Si => {
                self.bus.regs.si[si::STATUS] |= si::STATUS_INTERRUPT;
                self.raise_mi_interrupt(mi::SI);
            }
            Event::Pi => self.raise_mi_interrupt(mi::PI),
            Event::Ai => self.raise_mi_interrupt(mi::AI),
            Event::Sp => self.raise_mi_interrupt(mi::SP),
            Event::Dp => self.raise_mi_interrupt(mi::DP),
        }
    }

    /// Processes all due events, then takes a pending interrupt if possible. Returns whether an
    /// interrupt exception was taken.
    pub fn process_events(&mut self) -> bool {
        let mut processed = false;
        while let Some(event) = self.scheduler.pop() {
            self.process(event);
            processed = true;
        }

        if !processed {
            return false;
        }

        let taken = self.check_interrupts();
        if taken {
            debug!(epc = ?self.cpu.cop0.regs[r4300::cop0::reg::EPC], "interrupt taken");
        }

        taken
    }
}
