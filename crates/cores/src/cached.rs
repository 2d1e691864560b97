//! Executes Basic Blocks of pre-decoded instructions.
//!
//! Blocks are keyed by their start address and grouped by page. Before control enters a page
//! whose code changed, every block of that page is dropped and decoded again.
use crate::page_instructions;
use cobalt::{
    cores::{CpuCore, Executed, ExecutionMode},
    system::System,
};
use r4300::{Address, Ins, Opcode};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

/// Decodes instructions from `start` up to and including the first control transfer. A block
/// never crosses a page boundary, so a delay slot in the next page is fetched when it runs.
fn decode(sys: &System, start: Address) -> Vec<Ins> {
    let mut code = Vec::new();
    let mut instructions = page_instructions(sys, start);
    while let Some(ins) = instructions.next() {
        code.push(ins);
        if ins.op.has_delay_slot() {
            code.extend(instructions.next());
            break;
        }

        if ins.op == Opcode::Eret {
            break;
        }
    }

    code
}

#[derive(Default)]
pub struct Core {
    blocks: FxHashMap<Address, Arc<[Ins]>>,
    pages: FxHashMap<usize, Vec<Address>>,
}

impl Core {
    /// Drops every block of `page`.
    fn drop_page(&mut self, page: usize) {
        let Some(starts) = self.pages.remove(&page) else {
            return;
        };

        trace!(page, blocks = starts.len(), "dropping stale blocks");
        for start in starts {
            self.blocks.remove(&start);
        }
    }

    /// Returns the block at `pc`, decoding it if needed. Returns `None` if `pc` does not
    /// translate.
    fn block(&mut self, sys: &mut System, pc: Address) -> Option<Arc<[Ins]>> {
        let page = pc.page();
        if !sys.is_code_valid(pc) {
            self.drop_page(page);
            sys.validate_code(pc);
        }

        if let Some(block) = self.blocks.get(&pc) {
            return Some(block.clone());
        }

        let code = decode(sys, pc);
        if code.is_empty() {
            return None;
        }

        trace!(?pc, instructions = code.len(), "decoded block");
        let block: Arc<[Ins]> = code.into();
        self.blocks.insert(pc, block.clone());
        self.pages.entry(page).or_default().push(pc);

        Some(block)
    }

    /// Runs `block` until control leaves it. Returns the retired instruction count.
    fn run(sys: &mut System, block: &[Ins]) -> u64 {
        let mut retired = 0;
        let mut index = 0;
        while let Some(&ins) = block.get(index) {
            let slot = block.get(index + 1).copied();
            let step = r4300int::step_with(sys, ins, |sys| {
                slot.or_else(|| sys.fetch(sys.cpu.pc).map(Ins::new))
            });

            retired += step.retired as u64;
            if step.transfer || sys.stopped {
                break;
            }

            index += 1;
        }

        retired
    }
}

impl CpuCore for Core {
    fn exec(&mut self, sys: &mut System, cycles: u64) -> Executed {
        let start = sys.scheduler.elapsed();
        let mut instructions = 0;
        while sys.scheduler.elapsed() - start < cycles && !sys.stopped {
            // the shim must see the instruction exactly as fetched
            if sys.legacy_beq_shim {
                instructions += r4300int::step(sys).retired as u64;
                continue;
            }

            instructions += match self.block(sys, sys.cpu.pc) {
                Some(block) => Self::run(sys, &block),
                None => r4300int::step(sys).retired as u64,
            };
        }

        Executed {
            instructions,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn step(&mut self, sys: &mut System) -> Executed {
        let start = sys.scheduler.elapsed();
        let step = r4300int::step(sys);

        Executed {
            instructions: step.retired as u64,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::CachedInterpreter
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cobalt::system::Config;

    const BASE: u32 = 0x8000_1000;

    fn system(program: &[u32]) -> System {
        let mut sys = System::new(Config {
            cache_blocks: true,
            ..Config::default()
        });

        let bytes: Vec<u8> = program.iter().flat_map(|w| w.to_be_bytes()).collect();
        sys.bus.mem.rdram[0x1000..0x1000 + bytes.len()].copy_from_slice(&bytes);
        sys.cpu.pc = Address(BASE);
        sys
    }

    fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u16 as u32
    }

    fn beq(rs: u32, rt: u32, offset: i16) -> u32 {
        (0x04 << 26) | (rs << 21) | (rt << 16) | offset as u16 as u32
    }

    fn sw(rt: u32, base: u32, offset: i16) -> u32 {
        (0x2B << 26) | (base << 21) | (rt << 16) | offset as u16 as u32
    }

    #[test]
    fn decoding_stops_after_delay_slot() {
        let sys = system(&[addiu(1, 0, 1), beq(0, 0, -2), addiu(2, 0, 2), addiu(3, 0, 3)]);
        let code = decode(&sys, Address(BASE));
        assert_eq!(code.len(), 3);
        assert_eq!(code[1].op, Opcode::Beq);
    }

    #[test]
    fn decoding_stops_at_page_end() {
        let mut sys = system(&[]);
        sys.bus.mem.rdram[0x1FFC..0x2000].copy_from_slice(&beq(0, 0, 0).to_be_bytes());
        let code = decode(&sys, Address(BASE + 0xFFC));
        assert_eq!(code.len(), 1);
    }

    #[test]
    fn stores_into_running_page_rebuild_blocks() {
        // overwrite the addiu at BASE + 0x10 with one that adds 5 instead of 1
        let program = [
            sw(4, 5, 0x10),
            beq(0, 0, 2),
            0,
            0,
            addiu(1, 1, 1),
            beq(0, 0, -6),
            0,
        ];

        let mut sys = system(&program);
        sys.cpu.gpr[4] = addiu(1, 1, 5) as u64;
        sys.cpu.gpr[5] = BASE as u64 | 0xFFFF_FFFF_0000_0000;

        let mut core = Core::default();
        let first = core.block(&mut sys, Address(BASE + 0x10));
        assert_eq!(first.map(|b| b[0].op), Some(Opcode::Addiu));

        // store, then branch to the patched code and run it
        for _ in 0..3 {
            core.step(&mut sys);
        }
        assert!(!sys.code.is_valid(Address(BASE).page()));

        let block = core.block(&mut sys, Address(BASE + 0x10));
        assert_eq!(block.map(|b| b[0].imm()), Some(5));
        assert!(sys.code.is_valid(Address(BASE).page()));
    }

    /// Maps virtual 0x0040_0000 onto physical 0x0010_0000.
    fn map_code(sys: &mut System) {
        use r4300::cop0::reg;

        let regs = &mut sys.cpu.cop0.regs;
        regs[reg::INDEX] = 0;
        regs[reg::PAGE_MASK] = 0;
        regs[reg::ENTRY_HI] = 0x0040_0000;
        regs[reg::ENTRY_LO0] = (0x100 << 6) | 0b111;
        regs[reg::ENTRY_LO1] = (0x101 << 6) | 0b111;
        sys.tlbwi();
    }

    #[test]
    fn mapped_code_is_rebuilt_after_fixed_store() {
        let mut sys = system(&[]);
        map_code(&mut sys);
        sys.bus.mem.rdram[0x0010_0000..0x0010_0004].copy_from_slice(&addiu(1, 1, 1).to_be_bytes());

        let mut core = Core::default();
        let mapped = Address(0x0040_0000);
        let block = core.block(&mut sys, mapped);
        assert_eq!(block.map(|b| b[0].imm()), Some(1));

        assert!(sys.write(Address(0x8010_0000), addiu(1, 1, 5)));
        let block = core.block(&mut sys, mapped);
        assert_eq!(block.map(|b| b[0].imm()), Some(5));
    }

    #[test]
    fn exec_runs_until_cycles_elapse() {
        let mut sys = system(&[addiu(1, 1, 1), beq(0, 0, -2), 0]);
        let mut core = Core::default();

        let executed = core.exec(&mut sys, 60);
        assert!(executed.cycles >= 60);
        assert_eq!(executed.instructions, executed.cycles / 2);
        assert_eq!(sys.cpu.gpr[1], executed.instructions / 3);
    }
}
