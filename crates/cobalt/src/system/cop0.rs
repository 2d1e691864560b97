//! Moves to and from COP0 registers.
use crate::system::System;
use r4300::cop0::{IP_TIMER, NAMES, reg};
use tracing::{error, warn};

impl System {
    /// Reads a COP0 register, as done by `mfc0`.
    pub fn mfc0(&mut self, index: usize) -> u32 {
        if index == reg::RANDOM {
            error!("mfc0 reading unimplemented Random register");
            self.request_stop();
        }

        self.cpu.cop0.regs[index & 0x1F]
    }

    /// Writes a COP0 register, as done by `mtc0`.
    pub fn mtc0(&mut self, index: usize, value: u32) {
        let regs = &mut self.cpu.cop0.regs;
        match index {
            reg::INDEX => {
                regs[reg::INDEX] = value & 0x8000_003F;
                if value & 0x3F > 31 {
                    error!("mtc0 writing Index with TLB index {} > 31", value & 0x3F);
                }
            }
            reg::RANDOM | reg::BAD_VADDR | reg::PREV_ID | reg::CACHE_ERR => (),
            reg::ENTRY_LO0 | reg::ENTRY_LO1 => regs[index] = value & 0x3FFF_FFFF,
            reg::CONTEXT => {
                regs[reg::CONTEXT] = (value & 0xFF80_0000) | (regs[reg::CONTEXT] & 0x007F_FFF0);
            }
            reg::PAGE_MASK => regs[reg::PAGE_MASK] = value & 0x01FF_E000,
            reg::WIRED => {
                regs[reg::WIRED] = value;
                regs[reg::RANDOM] = 31;
            }
            reg::COUNT => {
                regs[reg::COUNT] = value;
                self.schedule_compare();
            }
            reg::ENTRY_HI => regs[reg::ENTRY_HI] = value & 0xFFFF_E0FF,
            reg::COMPARE => {
                regs[reg::COMPARE] = value;
                self.cpu.cop0.lower_pending(IP_TIMER);
                self.schedule_compare();
            }
            reg::STATUS => {
                let old_fr = self.cpu.fr();
                self.cpu.cop0.regs[reg::STATUS] = value;

                let new_fr = self.cpu.fr();
                if old_fr != new_fr {
                    self.cpu.cop1.switch_mode(old_fr, new_fr);
                }

                self.request_interrupt_check();
            }
            reg::CAUSE => {
                if value != 0 {
                    error!("mtc0 writing Cause with non-zero value 0x{value:08X}");
                    self.request_stop();
                } else {
                    regs[reg::CAUSE] = 0;
                }
            }
            reg::EPC | reg::CONFIG | reg::WATCH_LO | reg::WATCH_HI => regs[index] = value,
            reg::TAG_LO => regs[reg::TAG_LO] = value & 0x0FFF_FFC0,
            reg::TAG_HI => regs[reg::TAG_HI] = 0,
            _ => {
                warn!("mtc0 writing 0x{value:08X} to unknown register {}", NAMES[index & 0x1F]);
                regs[index & 0x1F] = value;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, scheduler::Event};

    #[test]
    fn write_masks() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop0.regs[reg::CONTEXT] = 0x007F_FFF0;

        sys.mtc0(reg::INDEX, 0xFFFF_FFFF);
        sys.mtc0(reg::ENTRY_LO0, 0xFFFF_FFFF);
        sys.mtc0(reg::CONTEXT, 0xFFFF_FFFF);
        sys.mtc0(reg::PAGE_MASK, 0xFFFF_FFFF);
        sys.mtc0(reg::ENTRY_HI, 0xFFFF_FFFF);
        sys.mtc0(reg::TAG_LO, 0xFFFF_FFFF);
        sys.mtc0(reg::TAG_HI, 0xFFFF_FFFF);

        let regs = &sys.cpu.cop0.regs;
        assert_eq!(regs[reg::INDEX], 0x8000_003F);
        assert_eq!(regs[reg::ENTRY_LO0], 0x3FFF_FFFF);
        assert_eq!(regs[reg::CONTEXT], 0xFFFF_FFF0);
        assert_eq!(regs[reg::PAGE_MASK], 0x01FF_E000);
        assert_eq!(regs[reg::ENTRY_HI], 0xFFFF_E0FF);
        assert_eq!(regs[reg::TAG_LO], 0x0FFF_FFC0);
        assert_eq!(regs[reg::TAG_HI], 0);
        assert!(!sys.stopped);
    }

    #[test]
    fn wired_resets_random() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop0.regs[reg::RANDOM] = 5;
        sys.mtc0(reg::WIRED, 4);
        assert_eq!(sys.cpu.cop0.regs[reg::RANDOM], 31);
    }

    #[test]
    fn compare_clears_timer_and_reschedules() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop0.raise_pending(IP_TIMER);
        sys.cpu.cop0.set_count(1000);
        sys.mtc0(reg::COMPARE, 1500);

        assert_eq!(sys.cpu.cop0.cause().interrupt_pending() & IP_TIMER, 0);
        assert_eq!(sys.scheduler.until(Event::Compare), Some(500));

        sys.mtc0(reg::COUNT, 1400);
        assert_eq!(sys.scheduler.until(Event::Compare), Some(100));
    }

    #[test]
    fn nonzero_cause_and_random_read_stop() {
        let mut sys = System::new(Config::default());
        sys.mtc0(reg::CAUSE, 0);
        assert!(!sys.stopped);
        sys.mtc0(reg::CAUSE, 0x100);
        assert!(sys.stopped);

        let mut sys = System::new(Config::default());
        sys.mfc0(reg::RANDOM);
        assert!(sys.stopped);
    }

    #[test]
    fn status_fr_switch_moves_registers() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop1.set_single(1, false, 2.5);
        sys.mtc0(reg::STATUS, 0x0400_0000);
        assert!(sys.cpu.fr());
        assert_eq!(sys.cpu.cop1.single(1, true).to_bits(), 2.5f32.to_bits());
    }
}
