//! Instruction words and their decoding.
use crate::Address;
use bitos::BitUtils;
use strum::VariantArray;

/// The tables an opcode can be dispatched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Table {
    /// Indexed by bits 26..32.
    Primary,
    /// Primary `0x00`, indexed by the function field.
    Special,
    /// Primary `0x01`, indexed by the rt field.
    Regimm,
    /// Primary `0x10`, indexed by the rs field.
    Cop0,
    /// COP0 with rs `0x10`, indexed by the function field.
    Tlb,
    /// Primary `0x11`, indexed by the rs field.
    Cop1,
    /// COP1 with rs `0x08`, indexed by the low two bits of rt.
    Bc,
    /// COP1 with rs `0x10`, indexed by the function field.
    FmtS,
    /// COP1 with rs `0x11`, indexed by the function field.
    FmtD,
    /// COP1 with rs `0x14`, indexed by the function field.
    FmtW,
    /// COP1 with rs `0x15`, indexed by the function field.
    FmtL,
}

macro_rules! opcode {
    (
        $e:ident;
        $($name:ident = $mnemonic:literal in $table:ident[$index:literal]),*
        $(,)?
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, VariantArray)]
        pub enum $e {
            $(
                $name,
            )*
            Illegal,
        }

        impl $e {
            /// The assembly mnemonic of this opcode.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(
                        Self::$name => $mnemonic,
                    )*
                    Self::Illegal => "illegal",
                }
            }

            /// Builds the dispatch table for `table`, leaving unassigned slots as `Illegal`.
            const fn table(table: Table) -> [Self; 64] {
                let mut result = [Self::Illegal; 64];
                $(
                    if Table::$table as u8 == table as u8 {
                        assert!(matches!(result[$index], Self::Illegal), "slot assigned twice");
                        result[$index] = Self::$name;
                    }
                )*

                result
            }

            #[cfg(test)]
            fn slot(self) -> Option<(Table, usize)> {
                match self {
                    $(
                        Self::$name => Some((Table::$table, $index)),
                    )*
                    Self::Illegal => None,
                }
            }
        }
    };
}

opcode! {
    Opcode;

    // special
    Sll = "sll" in Special[0],
    Srl = "srl" in Special[2],
    Sra = "sra" in Special[3],
    Sllv = "sllv" in Special[4],
    Srlv = "srlv" in Special[6],
    Srav = "srav" in Special[7],
    Jr = "jr" in Special[8],
    Jalr = "jalr" in Special[9],
    Syscall = "syscall" in Special[12],
    Break = "break" in Special[13],
    Sync = "sync" in Special[15],
    Mfhi = "mfhi" in Special[16],
    Mthi = "mthi" in Special[17],
    Mflo = "mflo" in Special[18],
    Mtlo = "mtlo" in Special[19],
    Dsllv = "dsllv" in Special[20],
    Dsrlv = "dsrlv" in Special[22],
    Dsrav = "dsrav" in Special[23],
    Mult = "mult" in Special[24],
    Multu = "multu" in Special[25],
    Div = "div" in Special[26],
    Divu = "divu" in Special[27],
    Dmult = "dmult" in Special[28],
    Dmultu = "dmultu" in Special[29],
    Ddiv = "ddiv" in Special[30],
    Ddivu = "ddivu" in Special[31],
    Add = "add" in Special[32],
    Addu = "addu" in Special[33],
    Sub = "sub" in Special[34],
    Subu = "subu" in Special[35],
    And = "and" in Special[36],
    Or = "or" in Special[37],
    Xor = "xor" in Special[38],
    Nor = "nor" in Special[39],
    Slt = "slt" in Special[42],
    Sltu = "sltu" in Special[43],
    Dadd = "dadd" in Special[44],
    Daddu = "daddu" in Special[45],
    Dsub = "dsub" in Special[46],
    Dsubu = "dsubu" in Special[47],
    Teq = "teq" in Special[52],
    Dsll = "dsll" in Special[56],
    Dsrl = "dsrl" in Special[58],
    Dsra = "dsra" in Special[59],
    Dsll32 = "dsll32" in Special[60],
    Dsrl32 = "dsrl32" in Special[62],
    Dsra32 = "dsra32" in Special[63],

    // regimm
    Bltz = "bltz" in Regimm[0],
    Bgez = "bgez" in Regimm[1],
    Bltzl = "bltzl" in Regimm[2],
    Bgezl = "bgezl" in Regimm[3],
    Bltzal = "bltzal" in Regimm[16],
    Bgezal = "bgezal" in Regimm[17],
    Bltzall = "bltzall" in Regimm[18],
    Bgezall = "bgezall" in Regimm[19],

    // primary
    J = "j" in Primary[2],
    Jal = "jal" in Primary[3],
    Beq = "beq" in Primary[4],
    Bne = "bne" in Primary[5],
    Blez = "blez" in Primary[6],
    Bgtz = "bgtz" in Primary[7],
    Addi = "addi" in Primary[8],
    Addiu = "addiu" in Primary[9],
    Slti = "slti" in Primary[10],
    Sltiu = "sltiu" in Primary[11],
    Andi = "andi" in Primary[12],
    Ori = "ori" in Primary[13],
    Xori = "xori" in Primary[14],
    Lui = "lui" in Primary[15],
    Beql = "beql" in Primary[20],
    Bnel = "bnel" in Primary[21],
    Blezl = "blezl" in Primary[22],
    Bgtzl = "bgtzl" in Primary[23],
    Daddi = "daddi" in Primary[24],
    Daddiu = "daddiu" in Primary[25],
    Ldl = "ldl" in Primary[26],
    Ldr = "ldr" in Primary[27],
    Lb = "lb" in Primary[32],
    Lh = "lh" in Primary[33],
    Lwl = "lwl" in Primary[34],
    Lw = "lw" in Primary[35],
    Lbu = "lbu" in Primary[36],
    Lhu = "lhu" in Primary[37],
    Lwr = "lwr" in Primary[38],
    Lwu = "lwu" in Primary[39],
    Sb = "sb" in Primary[40],
    Sh = "sh" in Primary[41],
    Swl = "swl" in Primary[42],
    Sw = "sw" in Primary[43],
    Sdl = "sdl" in Primary[44],
    Sdr = "sdr" in Primary[45],
    Swr = "swr" in Primary[46],
    Cache = "cache" in Primary[47],
    Ll = "ll" in Primary[48],
    Lwc1 = "lwc1" in Primary[49],
    Ldc1 = "ldc1" in Primary[53],
    Ld = "ld" in Primary[55],
    Sc = "sc" in Primary[56],
    Swc1 = "swc1" in Primary[57],
    Sdc1 = "sdc1" in Primary[61],
    Sd = "sd" in Primary[63],

    // cop0
    Mfc0 = "mfc0" in Cop0[0],
    Mtc0 = "mtc0" in Cop0[4],
    Tlbr = "tlbr" in Tlb[1],
    Tlbwi = "tlbwi" in Tlb[2],
    Tlbwr = "tlbwr" in Tlb[6],
    Tlbp = "tlbp" in Tlb[8],
    Eret = "eret" in Tlb[24],

    // cop1
    Mfc1 = "mfc1" in Cop1[0],
    Dmfc1 = "dmfc1" in Cop1[1],
    Cfc1 = "cfc1" in Cop1[2],
    Mtc1 = "mtc1" in Cop1[4],
    Dmtc1 = "dmtc1" in Cop1[5],
    Ctc1 = "ctc1" in Cop1[6],
    Bc1f = "bc1f" in Bc[0],
    Bc1t = "bc1t" in Bc[1],
    Bc1fl = "bc1fl" in Bc[2],
    Bc1tl = "bc1tl" in Bc[3],

    // cop1 single
    AddS = "add.s" in FmtS[0],
    SubS = "sub.s" in FmtS[1],
    MulS = "mul.s" in FmtS[2],
    DivS = "div.s" in FmtS[3],
    SqrtS = "sqrt.s" in FmtS[4],
    AbsS = "abs.s" in FmtS[5],
    MovS = "mov.s" in FmtS[6],
    NegS = "neg.s" in FmtS[7],
    RoundLS = "round.l.s" in FmtS[8],
    TruncLS = "trunc.l.s" in FmtS[9],
    CeilLS = "ceil.l.s" in FmtS[10],
    FloorLS = "floor.l.s" in FmtS[11],
    RoundWS = "round.w.s" in FmtS[12],
    TruncWS = "trunc.w.s" in FmtS[13],
    CeilWS = "ceil.w.s" in FmtS[14],
    FloorWS = "floor.w.s" in FmtS[15],
    CvtDS = "cvt.d.s" in FmtS[33],
    CvtWS = "cvt.w.s" in FmtS[36],
    CvtLS = "cvt.l.s" in FmtS[37],
    CFS = "c.f.s" in FmtS[48],
    CUnS = "c.un.s" in FmtS[49],
    CEqS = "c.eq.s" in FmtS[50],
    CUeqS = "c.ueq.s" in FmtS[51],
    COltS = "c.olt.s" in FmtS[52],
    CUltS = "c.ult.s" in FmtS[53],
    COleS = "c.ole.s" in FmtS[54],
    CUleS = "c.ule.s" in FmtS[55],
    CSfS = "c.sf.s" in FmtS[56],
    CNgleS = "c.ngle.s" in FmtS[57],
    CSeqS = "c.seq.s" in FmtS[58],
    CNglS = "c.ngl.s" in FmtS[59],
    CLtS = "c.lt.s" in FmtS[60],
    CNgeS = "c.nge.s" in FmtS[61],
    CLeS = "c.le.s" in FmtS[62],
    CNgtS = "c.ngt.s" in FmtS[63],

    // cop1 double
    AddD = "add.d" in FmtD[0],
    SubD = "sub.d" in FmtD[1],
    MulD = "mul.d" in FmtD[2],
    DivD = "div.d" in FmtD[3],
    SqrtD = "sqrt.d" in FmtD[4],
    AbsD = "abs.d" in FmtD[5],
    MovD = "mov.d" in FmtD[6],
    NegD = "neg.d" in FmtD[7],
    RoundLD = "round.l.d" in FmtD[8],
    TruncLD = "trunc.l.d" in FmtD[9],
    CeilLD = "ceil.l.d" in FmtD[10],
    FloorLD = "floor.l.d" in FmtD[11],
    RoundWD = "round.w.d" in FmtD[12],
    TruncWD = "trunc.w.d" in FmtD[13],
    CeilWD = "ceil.w.d" in FmtD[14],
    FloorWD = "floor.w.d" in FmtD[15],
    CvtSD = "cvt.s.d" in FmtD[32],
    CvtWD = "cvt.w.d" in FmtD[36],
    CvtLD = "cvt.l.d" in FmtD[37],
    CFD = "c.f.d" in FmtD[48],
    CUnD = "c.un.d" in FmtD[49],
    CEqD = "c.eq.d" in FmtD[50],
    CUeqD = "c.ueq.d" in FmtD[51],
    COltD = "c.olt.d" in FmtD[52],
    CUltD = "c.ult.d" in FmtD[53],
    COleD = "c.ole.d" in FmtD[54],
    CUleD = "c.ule.d" in FmtD[55],
    CSfD = "c.sf.d" in FmtD[56],
    CNgleD = "c.ngle.d" in FmtD[57],
    CSeqD = "c.seq.d" in FmtD[58],
    CNglD = "c.ngl.d" in FmtD[59],
    CLtD = "c.lt.d" in FmtD[60],
    CNgeD = "c.nge.d" in FmtD[61],
    CLeD = "c.le.d" in FmtD[62],
    CNgtD = "c.ngt.d" in FmtD[63],

    // cop1 word and long
    CvtSW = "cvt.s.w" in FmtW[32],
    CvtDW = "cvt.d.w" in FmtW[33],
    CvtSL = "cvt.s.l" in FmtL[32],
    CvtDL = "cvt.d.l" in FmtL[33],
}

const PRIMARY: [Opcode; 64] = Opcode::table(Table::Primary);
const SPECIAL: [Opcode; 64] = Opcode::table(Table::Special);
const REGIMM: [Opcode; 64] = Opcode::table(Table::Regimm);
const COP0: [Opcode; 64] = Opcode::table(Table::Cop0);
const TLB: [Opcode; 64] = Opcode::table(Table::Tlb);
const COP1: [Opcode; 64] = Opcode::table(Table::Cop1);
const BC: [Opcode; 64] = Opcode::table(Table::Bc);
const FMT_S: [Opcode; 64] = Opcode::table(Table::FmtS);
const FMT_D: [Opcode; 64] = Opcode::table(Table::FmtD);
const FMT_W: [Opcode; 64] = Opcode::table(Table::FmtW);
const FMT_L: [Opcode; 64] = Opcode::table(Table::FmtL);

/// The operand layout of an instruction, i.e. which fields of the word are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `rs`, `rt`, `rd` and `sa`. Floating point arithmetic also uses this shape, with `ft`, `fs`
    /// and `fd` in place of `rt`, `rd` and `sa`.
    Register,
    /// `rs`, `rt` and a 16 bit immediate.
    Immediate,
    /// A 26 bit jump target.
    Jump,
    /// `base`, `ft` and a 16 bit offset.
    FloatMemory,
    /// `fs`, `ft` and a condition.
    FloatCompare,
    /// No decoded operands.
    Other,
}

impl Opcode {
    /// Decodes the opcode of an instruction word.
    pub fn decode(code: u32) -> Self {
        let primary = code.bits(26, 32) as usize;
        let rs = code.bits(21, 26) as usize;
        let rt = code.bits(16, 21) as usize;
        let funct = code.bits(0, 6) as usize;

        match primary {
            0x00 => SPECIAL[funct],
            0x01 => REGIMM[rt],
            0x10 => match rs {
                0x10 => TLB[funct],
                _ => COP0[rs],
            },
            0x11 => match rs {
                0x08 => BC[rt & 0b11],
                0x10 => FMT_S[funct],
                0x11 => FMT_D[funct],
                0x14 => FMT_W[funct],
                0x15 => FMT_L[funct],
                _ => COP1[rs],
            },
            _ => PRIMARY[primary],
        }
    }

    /// Whether this opcode is a branch or jump, i.e. has a delay slot.
    pub fn has_delay_slot(self) -> bool {
        self.is_conditional_branch() || self.is_jump()
    }

    /// Whether this is an unconditional jump.
    pub fn is_jump(self) -> bool {
        matches!(self, Self::J | Self::Jal | Self::Jr | Self::Jalr)
    }

    /// Whether this is a jump to a register.
    pub fn is_register_jump(self) -> bool {
        matches!(self, Self::Jr | Self::Jalr)
    }

    /// Whether this is a conditional PC-relative branch.
    pub fn is_conditional_branch(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Beq | Bne
                | Blez
                | Bgtz
                | Beql
                | Bnel
                | Blezl
                | Bgtzl
                | Bltz
                | Bgez
                | Bltzl
                | Bgezl
                | Bltzal
                | Bgezal
                | Bltzall
                | Bgezall
                | Bc1f
                | Bc1t
                | Bc1fl
                | Bc1tl
        )
    }

    /// Whether this is a "likely" branch, which skips its delay slot when not taken.
    pub fn is_likely(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Beql | Bnel | Blezl | Bgtzl | Bltzl | Bgezl | Bltzall | Bgezall | Bc1fl | Bc1tl
        )
    }

    /// Whether this branch or jump writes a return address to `ra` (or `rd` for `jalr`).
    pub fn is_link(self) -> bool {
        use Opcode::*;
        matches!(self, Jal | Jalr | Bltzal | Bgezal | Bltzall | Bgezall)
    }

    /// Whether this opcode can only be executed with COP1 usable.
    pub fn uses_cop1(self) -> bool {
        use Opcode::*;
        self.is_float_arith()
            || matches!(
                self,
                Mfc1 | Dmfc1
                    | Cfc1
                    | Mtc1
                    | Dmtc1
                    | Ctc1
                    | Bc1f
                    | Bc1t
                    | Bc1fl
                    | Bc1tl
                    | Lwc1
                    | Ldc1
                    | Swc1
                    | Sdc1
            )
    }

    /// Whether this is a COP1 arithmetic, conversion or compare opcode.
    pub fn is_float_arith(self) -> bool {
        let index = self as usize;
        (Self::AddS as usize..=Self::CvtDL as usize).contains(&index)
    }

    /// Whether this is a COP1 compare.
    pub fn is_float_compare(self) -> bool {
        let index = self as usize;
        (Self::CFS as usize..=Self::CNgtS as usize).contains(&index)
            || (Self::CFD as usize..=Self::CNgtD as usize).contains(&index)
    }

    /// Whether this opcode reads guest memory.
    pub fn is_load(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Lwl | Lwr | Ld | Ldl | Ldr | Ll | Lwc1 | Ldc1
        )
    }

    /// Whether this opcode writes guest memory.
    pub fn is_store(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Sb | Sh | Sw | Swl | Swr | Sd | Sdl | Sdr | Sc | Swc1 | Sdc1
        )
    }

    /// The operand layout of this opcode.
    pub fn shape(self) -> Shape {
        use Opcode::*;
        match self {
            J | Jal => Shape::Jump,
            Lwc1 | Ldc1 | Swc1 | Sdc1 => Shape::FloatMemory,
            _ if self.is_float_compare() => Shape::FloatCompare,
            _ if self.is_float_arith() => Shape::Register,
            Sll | Srl | Sra | Sllv | Srlv | Srav | Jr | Jalr | Mfhi | Mthi | Mflo | Mtlo
            | Dsllv | Dsrlv | Dsrav | Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv
            | Ddivu | Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd
            | Daddu | Dsub | Dsubu | Teq | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32
            | Mfc0 | Mtc0 | Mfc1 | Dmfc1 | Cfc1 | Mtc1 | Dmtc1 | Ctc1 => Shape::Register,
            Syscall | Break | Sync | Tlbr | Tlbwi | Tlbwr | Tlbp | Eret | Illegal => Shape::Other,
            _ => Shape::Immediate,
        }
    }
}

/// A decoded instruction: the raw word together with its opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ins {
    pub code: u32,
    pub op: Opcode,
}

impl std::fmt::Debug for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X} ({})", self.code, self)
    }
}

impl Ins {
    /// The canonical no-op, `sll zero, zero, 0`.
    pub const NOP: Self = Self {
        code: 0,
        op: Opcode::Sll,
    };

    #[inline(always)]
    pub fn new(code: u32) -> Self {
        Self {
            code,
            op: Opcode::decode(code),
        }
    }

    /// Whether this is the all-zero word.
    #[inline(always)]
    pub fn is_nop(self) -> bool {
        self.code == 0
    }

    #[inline(always)]
    pub fn primary(self) -> u8 {
        self.code.bits(26, 32) as u8
    }

    #[inline(always)]
    pub fn rs(self) -> u8 {
        self.code.bits(21, 26) as u8
    }

    #[inline(always)]
    pub fn rt(self) -> u8 {
        self.code.bits(16, 21) as u8
    }

    #[inline(always)]
    pub fn rd(self) -> u8 {
        self.code.bits(11, 16) as u8
    }

    #[inline(always)]
    pub fn sa(self) -> u8 {
        self.code.bits(6, 11) as u8
    }

    #[inline(always)]
    pub fn funct(self) -> u8 {
        self.code.bits(0, 6) as u8
    }

    /// The 16 bit immediate, zero extended.
    #[inline(always)]
    pub fn imm(self) -> u16 {
        self.code as u16
    }

    /// The 16 bit immediate, sign extended.
    #[inline(always)]
    pub fn simm(self) -> i16 {
        self.code as u16 as i16
    }

    /// The immediate sign extended to 64 bits.
    #[inline(always)]
    pub fn simm64(self) -> u64 {
        util::sext16(self.imm())
    }

    /// The 26 bit jump target field.
    #[inline(always)]
    pub fn target(self) -> u32 {
        self.code.bits(0, 26)
    }

    #[inline(always)]
    pub fn base(self) -> u8 {
        self.rs()
    }

    #[inline(always)]
    pub fn ft(self) -> u8 {
        self.rt()
    }

    #[inline(always)]
    pub fn fs(self) -> u8 {
        self.rd()
    }

    #[inline(always)]
    pub fn fd(self) -> u8 {
        self.sa()
    }

    /// Condition of a floating point compare (low 4 bits of the function field).
    #[inline(always)]
    pub fn cond(self) -> u8 {
        self.code.bits(0, 4) as u8
    }

    /// Offset of a PC-relative branch, relative to the delay slot.
    #[inline(always)]
    pub fn branch_offset(self) -> i32 {
        (self.simm() as i32) << 2
    }

    /// Target of a PC-relative branch located at `pc`.
    #[inline(always)]
    pub fn branch_target(self, pc: Address) -> Address {
        pc + 4u32 + self.branch_offset()
    }

    /// Target of a `j`/`jal` located at `pc`.
    #[inline(always)]
    pub fn jump_target(self, pc: Address) -> Address {
        Address(((pc.value().wrapping_add(4)) & 0xF000_0000) | (self.target() << 2))
    }

    /// Whether this instruction, located at `pc`, branches to itself. Together with a no-op in its
    /// delay slot this is a busy-wait loop.
    #[inline(always)]
    pub fn branches_to_self(self, pc: Address) -> bool {
        match self.op {
            Opcode::J | Opcode::Jal => self.jump_target(pc) == pc,
            op if op.is_conditional_branch() => self.simm() == -1,
            _ => false,
        }
    }

    #[inline(always)]
    pub fn shape(self) -> Shape {
        self.op.shape()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_opcode_is_reachable() {
        for op in Opcode::VARIANTS.iter().copied() {
            let Some((table, index)) = op.slot() else {
                continue;
            };

            let index = index as u32;
            let code = match table {
                Table::Primary => index << 26,
                Table::Special => index,
                Table::Regimm => (0x01 << 26) | (index << 16),
                Table::Cop0 => (0x10 << 26) | (index << 21),
                Table::Tlb => (0x10 << 26) | (0x10 << 21) | index,
                Table::Cop1 => (0x11 << 26) | (index << 21),
                Table::Bc => (0x11 << 26) | (0x08 << 21) | (index << 16),
                Table::FmtS => (0x11 << 26) | (0x10 << 21) | index,
                Table::FmtD => (0x11 << 26) | (0x11 << 21) | index,
                Table::FmtW => (0x11 << 26) | (0x14 << 21) | index,
                Table::FmtL => (0x11 << 26) | (0x15 << 21) | index,
            };

            assert_eq!(Opcode::decode(code), op, "{}", op.mnemonic());
        }
    }

    #[test]
    fn reserved_encodings_are_illegal() {
        // lld, cop2, special 0x01 and special 0x30 (tge)
        for code in [0xD000_0000, 0x4800_0000, 0x0000_0001, 0x0000_0030] {
            assert_eq!(Opcode::decode(code), Opcode::Illegal);
        }

        // cop0 with an unimplemented rs and cop1 .s with an unassigned function
        assert_eq!(Opcode::decode(0x4040_0000), Opcode::Illegal);
        assert_eq!(Opcode::decode(0x4600_0010), Opcode::Illegal);
    }

    #[test]
    fn fields() {
        // addiu sp, sp, -0x20
        let ins = Ins::new(0x27BD_FFE0);
        assert_eq!(ins.op, Opcode::Addiu);
        assert_eq!(ins.rs(), 29);
        assert_eq!(ins.rt(), 29);
        assert_eq!(ins.simm(), -0x20);
        assert_eq!(ins.simm64(), (-0x20i64) as u64);
        assert_eq!(ins.shape(), Shape::Immediate);

        // jal 0x80001234
        let ins = Ins::new(0x0C00_048D);
        assert_eq!(ins.op, Opcode::Jal);
        assert_eq!(ins.jump_target(Address(0x8000_0400)), Address(0x8000_1234));
        assert_eq!(ins.shape(), Shape::Jump);

        // beq zero, zero, -1
        let ins = Ins::new(0x1000_FFFF);
        assert!(ins.branches_to_self(Address(0x8000_0000)));
        assert_eq!(ins.branch_target(Address(0x8000_0000)), Address(0x8000_0000));
    }

    #[test]
    fn classification() {
        assert!(Opcode::Beql.is_likely());
        assert!(Opcode::Beql.has_delay_slot());
        assert!(!Opcode::Beql.is_jump());
        assert!(Opcode::Jalr.is_link());
        assert!(Opcode::CvtDL.is_float_arith());
        assert!(Opcode::CNgtD.is_float_compare());
        assert!(!Opcode::MovD.is_float_compare());
        assert!(Opcode::Ldc1.uses_cop1());
        assert_eq!(Opcode::CEqS.shape(), Shape::FloatCompare);
        assert_eq!(Opcode::Swc1.shape(), Shape::FloatMemory);
        assert_eq!(Opcode::Eret.shape(), Shape::Other);
    }
}
