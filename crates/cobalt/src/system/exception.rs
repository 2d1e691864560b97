//! Guest exceptions.
use crate::system::System;
use r4300::{
    Address,
    bitos::integer::u2,
    cop0::{Exception, reg},
    tlb::Miss,
};
use tracing::trace;

/// General exception vector.
pub const GENERAL_VECTOR: u32 = 0x8000_0180;
/// TLB refill vector, used when EXL is clear.
pub const REFILL_VECTOR: u32 = 0x8000_0000;

/// Kind of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Fetch,
    Read,
    Write,
}

impl System {
    fn enter_exception(&mut self, exception: Exception, vector: u32) {
        trace!(?exception, pc = ?self.cpu.pc, "raising exception");

        let cop0 = &mut self.cpu.cop0;
        let mut cause = cop0.cause().with_exception_code(exception.code());

        if self.cpu.delay_slot {
            cop0.regs[reg::EPC] = self.cpu.pc.value().wrapping_sub(4);
            cause.set_branch_delay(true);
        } else {
            cop0.regs[reg::EPC] = self.cpu.pc.value();
            cause.set_branch_delay(false);
        }

        cop0.set_cause(cause);
        cop0.set_status(cop0.status().with_exception_level(true));

        self.cpu.delay_slot = false;
        self.cpu.pc = Address(vector);
    }

    /// Raises a general exception for the instruction at `cpu.pc`. If `cpu.delay_slot` is set,
    /// EPC points to the branch instead and Cause.BD is set.
    pub fn raise_exception(&mut self, exception: Exception) {
        self.enter_exception(exception, GENERAL_VECTOR);
    }

    /// Raises a coprocessor unusable exception for coprocessor `cop`.
    pub fn raise_coprocessor_unusable(&mut self, cop: u8) {
        let cause = self
            .cpu
            .cop0
            .cause()
            .with_coprocessor(u2::new(cop & 0b11));
        self.cpu.cop0.set_cause(cause);
        self.raise_exception(Exception::CoprocessorUnusable);
    }

    /// Raises the exception matching a failed translation of `addr`.
    pub fn raise_tlb_miss(&mut self, addr: Address, miss: Miss, access: Access) {
        let cop0 = &mut self.cpu.cop0;
        let vaddr = addr.value();

        cop0.regs[reg::BAD_VADDR] = vaddr;
        cop0.regs[reg::CONTEXT] = (cop0.regs[reg::CONTEXT] & 0xFF80_0000) | ((vaddr >> 13) << 4);
        cop0.regs[reg::ENTRY_HI] = (vaddr & 0xFFFF_E000) | cop0.asid() as u32;

        let exception = match (miss, access) {
            (Miss::Modified, _) => Exception::TlbModification,
            (_, Access::Write) => Exception::TlbStore,
            _ => Exception::TlbLoad,
        };

        let vector = if miss == Miss::Refill && !cop0.status().exception_level() {
            REFILL_VECTOR
        } else {
            GENERAL_VECTOR
        };

        self.enter_exception(exception, vector);
    }

    /// Raises an address error for a misaligned access to `addr`.
    pub fn raise_address_error(&mut self, addr: Address, access: Access) {
        self.cpu.cop0.regs[reg::BAD_VADDR] = addr.value();
        let exception = match access {
            Access::Write => Exception::AddressStore,
            _ => Exception::AddressLoad,
        };

        self.raise_exception(exception);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::Config;

    #[test]
    fn delay_slot_exception_points_at_branch() {
        let mut sys = System::new(Config::default());
        sys.cpu.pc = Address(0x8000_0404);
        sys.cpu.delay_slot = true;
        sys.raise_exception(Exception::Syscall);

        let cause = sys.cpu.cop0.cause();
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], 0x8000_0400);
        assert!(cause.branch_delay());
        assert_eq!(cause.exception_code().value(), 8);
        assert!(sys.cpu.cop0.status().exception_level());
        assert_eq!(sys.cpu.pc, Address(GENERAL_VECTOR));
        assert!(!sys.cpu.delay_slot);
    }

    #[test]
    fn refill_with_exl_uses_general_vector() {
        let mut sys = System::new(Config::default());
        let status = sys.cpu.cop0.status().with_exception_level(true);
        sys.cpu.cop0.set_status(status);
        sys.cpu.cop0.regs[reg::ENTRY_HI] = 0x42;

        sys.raise_tlb_miss(Address(0x0123_4567), Miss::Refill, Access::Write);
        assert_eq!(sys.cpu.pc, Address(GENERAL_VECTOR));
        assert_eq!(sys.cpu.cop0.regs[reg::ENTRY_HI], 0x0123_4042);
        assert_eq!(sys.cpu.cop0.regs[reg::CONTEXT], (0x0123_4567 >> 13) << 4);
        assert_eq!(sys.cpu.cop0.cause().exception_code().value(), 3);
    }
}
