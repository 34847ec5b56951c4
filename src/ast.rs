//! Components relating to the abstract syntax trees (ASTs)
//! used in representing Thumb instructions.
//!
//! These components together are used to construct...
//! - [`Operand`] (a classified operand token),
//! - [`Opcode`] and [`Cond`] (the operation an instruction performs),
//! - and [`Instruction`] (a validated instruction, ready for execution).

use std::fmt::Write as _;
use std::num::TryFromIntError;

use serde::Serialize;

/// A register. Must be between 0 and 15.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// ## Examples
///
/// ```text
/// ADD r0, r1, #1
///     ~~  ~~
/// LDR r2, [sp, #4]
///     ~~   ~~
/// PUSH {r4, lr}
///       ~~  ~~
/// ```
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register in the register file.
    pub const R0: Reg = Reg(0);
    /// The 1st register in the register file.
    pub const R1: Reg = Reg(1);
    /// The 2nd register in the register file.
    pub const R2: Reg = Reg(2);
    /// The 3rd register in the register file.
    pub const R3: Reg = Reg(3);
    /// The 4th register in the register file.
    pub const R4: Reg = Reg(4);
    /// The 5th register in the register file.
    pub const R5: Reg = Reg(5);
    /// The 6th register in the register file.
    pub const R6: Reg = Reg(6);
    /// The 7th register in the register file.
    pub const R7: Reg = Reg(7);
    /// The stack pointer (`r13`).
    pub const SP: Reg = Reg(13);
    /// The link register (`r14`).
    pub const LR: Reg = Reg(14);
    /// The program counter (`r15`).
    pub const PC: Reg = Reg(15);
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 15.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Whether this is one of the low registers (`r0`-`r7`).
    pub fn is_low(self) -> bool {
        self.0 < 8
    }

    /// Classifies this register into its operand kind.
    pub fn kind(self) -> OperandKind {
        match self.0 {
            0..=7  => OperandKind::LowRegister(self),
            8..=12 => OperandKind::HighRegister(self),
            13     => OperandKind::SpRegister,
            14     => OperandKind::LrRegister,
            _      => OperandKind::PcRegister,
        }
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=15 => Ok(Reg(value)),
            // HACKy, but there's no other way to create this error
            _      => u8::try_from(256).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// The offset part of an indirect memory operand.
///
/// ```text
/// LDR r0, [r1, r2]
///              ~~
/// STR r0, [sp, #8]
///              ~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
pub enum Offset {
    /// A low register holding the offset.
    Reg(Reg),
    /// An immediate offset. `[rN]` is an immediate offset of 0.
    Imm(u32),
}

/// An indirect memory operand (e.g., `[r1, #4]`, `[sp]`).
///
/// The base is always a low register or `sp`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
pub struct Indirect {
    /// The base register.
    pub base: Reg,
    /// The offset added to the base.
    pub offset: Offset,
}

/// The semantic kind of an operand.
///
/// The kind is derived solely from the lexical shape of an operand,
/// never from the instruction it appears in.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum OperandKind {
    /// `r0`-`r7`
    LowRegister(Reg),
    /// `r8`-`r12`
    HighRegister(Reg),
    /// `sp`, `r13`
    SpRegister,
    /// `lr`, `r14`
    LrRegister,
    /// `pc`, `r15`
    PcRegister,
    /// `#0x..`
    HexImmediate(u32),
    /// `#..`
    DecImmediate(u32),
    /// `[base]`, `[base, offset]`
    IndirectMemory(Indirect),
    /// `{r0, r1, ...}`
    RegisterList(Vec<Reg>),
    /// `#label`, `=label`
    LabelRef(String),
}
impl OperandKind {
    /// Gets the register if this operand is a register of any class.
    pub fn as_reg(&self) -> Option<Reg> {
        match *self {
            OperandKind::LowRegister(r) | OperandKind::HighRegister(r) => Some(r),
            OperandKind::SpRegister => Some(reg_consts::SP),
            OperandKind::LrRegister => Some(reg_consts::LR),
            OperandKind::PcRegister => Some(reg_consts::PC),
            _ => None
        }
    }

    /// Gets the low register if this operand is a low register.
    pub fn as_low_reg(&self) -> Option<Reg> {
        match *self {
            OperandKind::LowRegister(r) => Some(r),
            _ => None
        }
    }

    /// Gets the value of this operand if it is an immediate.
    pub fn as_imm(&self) -> Option<u32> {
        match *self {
            OperandKind::HexImmediate(n) | OperandKind::DecImmediate(n) => Some(n),
            _ => None
        }
    }
}
impl std::fmt::Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowRegister(r) | Self::HighRegister(r) => r.fmt(f),
            Self::SpRegister      => reg_consts::SP.fmt(f),
            Self::LrRegister      => reg_consts::LR.fmt(f),
            Self::PcRegister      => reg_consts::PC.fmt(f),
            Self::HexImmediate(n) => write!(f, "#{n:#x}"),
            Self::DecImmediate(n) => write!(f, "#{n}"),
            Self::IndirectMemory(Indirect { base, offset }) => match offset {
                Offset::Reg(r) => write!(f, "[{base}, {r}]"),
                Offset::Imm(0) => write!(f, "[{base}]"),
                Offset::Imm(n) => write!(f, "[{base}, #{n}]"),
            },
            Self::RegisterList(regs) => {
                f.write_char('{')?;
                for (i, r) in regs.iter().enumerate() {
                    if i != 0 { f.write_str(", ")?; }
                    r.fmt(f)?;
                }
                f.write_char('}')
            },
            Self::LabelRef(label) => f.write_str(label),
        }
    }
}

/// A classified operand of an instruction.
///
/// The raw text is the canonical rendering of the operand
/// (`sp`, `lr`, and `pc` are written `r13`, `r14`, and `r15`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct Operand {
    /// The kind of this operand.
    pub kind: OperandKind,
    /// The normalized text of this operand.
    pub raw: String,
}
impl Operand {
    /// Creates a new operand, computing its normalized text.
    pub fn new(kind: OperandKind) -> Self {
        let raw = kind.to_string();
        Self { kind, raw }
    }
}
impl From<OperandKind> for Operand {
    fn from(value: OperandKind) -> Self {
        Operand::new(value)
    }
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The operation an instruction performs.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Opcode {
    Mov, Add, Sub, Neg, Mul, Cmp, Cmn,
    And, Bic, Orr, Eor, Mvn, Tst,
    Lsl, Lsr, Asr, Ror,
    Ldr, Ldrh, Ldrb, Ldrsh, Ldrsb,
    Str, Strh, Strb,
    Push, Pop,
    B, Bl,
    Wfi,
}
impl Opcode {
    /// Looks up an opcode by its exact (lowercase) mnemonic.
    ///
    /// Conditional branches (e.g., `beq`) are not handled here.
    pub fn from_name(name: &str) -> Option<Self> {
        let opcode = match name {
            "mov"   => Self::Mov,
            "add"   => Self::Add,
            "sub"   => Self::Sub,
            "neg"   => Self::Neg,
            "mul"   => Self::Mul,
            "cmp"   => Self::Cmp,
            "cmn"   => Self::Cmn,
            "and"   => Self::And,
            "bic"   => Self::Bic,
            "orr"   => Self::Orr,
            "eor"   => Self::Eor,
            "mvn"   => Self::Mvn,
            "tst"   => Self::Tst,
            "lsl"   => Self::Lsl,
            "lsr"   => Self::Lsr,
            "asr"   => Self::Asr,
            "ror"   => Self::Ror,
            "ldr"   => Self::Ldr,
            "ldrh"  => Self::Ldrh,
            "ldrb"  => Self::Ldrb,
            "ldrsh" => Self::Ldrsh,
            "ldrsb" => Self::Ldrsb,
            "str"   => Self::Str,
            "strh"  => Self::Strh,
            "strb"  => Self::Strb,
            "push"  => Self::Push,
            "pop"   => Self::Pop,
            "b"     => Self::B,
            "bl"    => Self::Bl,
            "wfi"   => Self::Wfi,
            _ => return None
        };

        Some(opcode)
    }
}

/// A branch condition suffix (`b<cond>`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Cond {
    Eq, Ne, Cs, Cc, Mi, Pl, Vs, Vc, Hi, Ls, Ge, Lt, Gt, Le
}
impl Cond {
    /// Looks up a condition by its two-letter suffix.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let cond = match suffix {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "cs" => Self::Cs,
            "cc" => Self::Cc,
            "mi" => Self::Mi,
            "pl" => Self::Pl,
            "vs" => Self::Vs,
            "vc" => Self::Vc,
            "hi" => Self::Hi,
            "ls" => Self::Ls,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "gt" => Self::Gt,
            "le" => Self::Le,
            _ => return None
        };

        Some(cond)
    }

    /// Tests this condition against the given flag values.
    pub fn holds(self, n: bool, z: bool, c: bool, v: bool) -> bool {
        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
        }
    }
}

/// A validated Thumb instruction.
///
/// Instructions can only be created by the assembler,
/// so the operand count and kinds of an instruction always match its opcode.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct Instruction {
    opcode: Opcode,
    cond: Option<Cond>,
    mnemonic: String,
    operands: Vec<Operand>,
    label: Option<String>,
    breakpoint: bool,
    line: usize,
    #[serde(skip)]
    sets_flags: bool,
}
impl Instruction {
    pub(crate) fn new(opcode: Opcode, cond: Option<Cond>, mnemonic: &str, operands: Vec<Operand>, line: usize, sets_flags: bool) -> Self {
        Self {
            opcode,
            cond,
            mnemonic: mnemonic.to_string(),
            operands,
            label: None,
            breakpoint: false,
            line,
            sets_flags
        }
    }

    /// The operation of this instruction.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
    /// The branch condition (only present on conditional `B`).
    pub fn cond(&self) -> Option<Cond> {
        self.cond
    }
    /// The mnemonic as written (lowercased).
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }
    /// The operands of this instruction.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }
    /// The label attached to this instruction's address.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    /// Whether a breakpoint is set on this instruction.
    pub fn breakpoint(&self) -> bool {
        self.breakpoint
    }
    /// The 1-based source line of this instruction.
    pub fn line(&self) -> usize {
        self.line
    }
    /// Whether this instruction's form updates the N and Z flags.
    pub fn sets_flags(&self) -> bool {
        self.sets_flags
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.label.replace(label);
    }
    pub(crate) fn set_breakpoint(&mut self, on: bool) {
        self.breakpoint = on;
    }
}
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            op.fmt(f)?;
        }
        Ok(())
    }
}
