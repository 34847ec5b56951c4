//! Assembling Thumb source into a program and a data image.
//!
//! This module is used to convert source text into an [`Assembly`]
//! that can be loaded and executed by the simulator.
//!
//! The assembler module notably consists of:
//! - [`compile_assembly`]: The main function which assembles source text.
//! - [`AssemblerContext`]: the state of one assembly (section, symbols, data image, program), which
//!     is created fresh for every call to [`compile_assembly`].
//! - [`directive`]: the directive processor, the constant [`SymbolTable`], and the [`DataImage`].
//! - [`instr`]: the per-opcode instruction validator.
//! - [`CompileErr`]: the error raised by the first invalid line.

pub mod directive;
pub mod instr;

use std::collections::HashSet;

use serde::ser::SerializeStruct;
use serde::Serialize;

use crate::ast::{Instruction, Opcode, OperandKind};
use crate::parse::{parse_line, LineBody};
use crate::parse::lex::LexErr;
pub use directive::{DataImage, Directive, SymbolTable};

/// Assembles source text into a program and its data image.
///
/// Assembly stops at the first invalid line,
/// and the error reports the 1-based line it occurred on.
///
/// # Example
/// ```
/// use thumbulator::asm::compile_assembly;
///
/// let src = "
///     .data
///     value: .word 0x1234
///     .text
///     ldr r1, =value
///     ldr r0, [r1]
///     wfi
/// ";
/// let asm = compile_assembly(src).unwrap();
/// assert_eq!(asm.program.len(), 3);
/// assert_eq!(asm.data.words(), [0x1234]);
///
/// let err = compile_assembly("mov r0, #1\nadd sp, #3").unwrap_err();
/// assert_eq!(err.line, 2);
/// ```
pub fn compile_assembly(src: &str) -> Result<Assembly, CompileErr> {
    let mut ctx = AssemblerContext::new();
    for (i, line) in src.lines().enumerate() {
        ctx.feed_line(line, i + 1)
            .map_err(|kind| CompileErr::new(kind, i + 1))?;
    }
    ctx.finish()
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`CompileErr`] for this error type with line information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum CompileErrKind {
    /// A token could not be lexed.
    Lex(LexErr),
    /// A line started with something that is not a label, mnemonic, or directive.
    UnexpectedToken(String),
    /// There was nothing between two commas (or after the last one).
    EmptyOperand,
    /// The mnemonic is not a known instruction.
    UnknownMnemonic(String),
    /// The directive is not a known directive.
    UnknownDirective(String),
    /// A `b<cond>` suffix is not one of the 14 conditions.
    InvalidCondition(String),
    /// The instruction has the wrong number of operands.
    WrongOperandCount {
        /// The accepted counts.
        expected: &'static str,
        /// The number of operands provided.
        found: usize
    },
    /// The directive has the wrong number of arguments.
    WrongArgCount(usize),
    /// An operand did not have the shape of any operand or is not accepted in this position.
    InvalidOperand(String),
    /// The destination cannot be used with this instruction.
    InvalidDestination(String),
    /// A register was expected.
    ExpectedReg(String),
    /// A low register (`r0`-`r7`) was expected.
    ExpectedLowReg(String),
    /// Immediate is larger than the instruction form allows.
    ImmOutOfRange {
        /// The immediate.
        value: u32,
        /// The largest accepted immediate.
        max: u32
    },
    /// Immediate is not a multiple of the required alignment.
    UnalignedImm {
        /// The immediate.
        value: u32,
        /// The required alignment.
        align: u32
    },
    /// An immediate was used where this form only accepts registers.
    ImmNotAllowed(String),
    /// The destination register must be one of the source registers.
    MustAlias,
    /// `sp` cannot be the base of a signed load.
    SpBaseNotAllowed,
    /// An indirect memory operand (`[rN, ...]`) was expected.
    ExpectedIndirect(String),
    /// A register list (`{rN, ...}`) was expected.
    ExpectedRegList(String),
    /// A label was expected.
    ExpectedLabel(String),
    /// A directive argument was malformed.
    InvalidArgument(String),
    /// An instruction appeared in the data section.
    InstrInData(String),
    /// A data directive appeared in the text section.
    DataInText(String),
    /// A label was defined more than once.
    DuplicateLabel(String),
    /// A second label was defined before the first could be attached to an instruction.
    StackedLabel(String),
    /// An `.equiv`/`.eqv` constant was already defined.
    SymbolDefined(String),
    /// A register alias was used as a constant name.
    ReservedName(String),
    /// A constant was used before it was defined.
    UnknownSymbol(String),
    /// `.align` exponent was larger than 15.
    AlignTooLarge(i128),
    /// `.balign` modulus was not a power of two.
    NotPowerOfTwo(i128),
    /// A branch or literal load refers to a label which was never defined.
    UnknownLabel(String),
}
impl std::fmt::Display for CompileErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)                  => e.fmt(f),
            Self::UnexpectedToken(t)      => write!(f, "unexpected '{t}'"),
            Self::EmptyOperand            => f.write_str("expected operand"),
            Self::UnknownMnemonic(m)      => write!(f, "unknown instruction '{m}'"),
            Self::UnknownDirective(d)     => write!(f, "unknown directive '.{d}'"),
            Self::InvalidCondition(c)     => write!(f, "invalid condition '{c}'"),
            Self::WrongOperandCount { expected, found } => write!(f, "expected {expected} operand(s), found {found}"),
            Self::WrongArgCount(n)        => write!(f, "wrong number of arguments ({n})"),
            Self::InvalidOperand(o)       => write!(f, "invalid operand '{o}'"),
            Self::InvalidDestination(o)   => write!(f, "invalid destination '{o}'"),
            Self::ExpectedReg(o)          => write!(f, "expected register, found '{o}'"),
            Self::ExpectedLowReg(o)       => write!(f, "expected low register, found '{o}'"),
            Self::ImmOutOfRange { value, max } => write!(f, "immediate {value} out of range (0-{max})"),
            Self::UnalignedImm { value, align } => write!(f, "immediate {value} is not a multiple of {align}"),
            Self::ImmNotAllowed(o)        => write!(f, "immediate '{o}' not allowed here"),
            Self::MustAlias               => f.write_str("destination must be one of the source registers"),
            Self::SpBaseNotAllowed        => f.write_str("sp cannot be used as base for signed loads"),
            Self::ExpectedIndirect(o)     => write!(f, "expected memory operand, found '{o}'"),
            Self::ExpectedRegList(o)      => write!(f, "expected register list, found '{o}'"),
            Self::ExpectedLabel(o)        => write!(f, "expected label, found '{o}'"),
            Self::InvalidArgument(a)      => write!(f, "invalid argument '{a}'"),
            Self::InstrInData(m)          => write!(f, "instruction '{m}' in data section"),
            Self::DataInText(d)           => write!(f, "directive '.{d}' in text section"),
            Self::DuplicateLabel(l)       => write!(f, "label '{l}' already defined"),
            Self::StackedLabel(l)         => write!(f, "label '{l}' follows a label with no instruction"),
            Self::SymbolDefined(s)        => write!(f, "symbol '{s}' already defined"),
            Self::ReservedName(s)         => write!(f, "'{s}' cannot be used as a symbol name"),
            Self::UnknownSymbol(s)        => write!(f, "unknown symbol '{s}'"),
            Self::AlignTooLarge(n)        => write!(f, "alignment {n} too large"),
            Self::NotPowerOfTwo(n)        => write!(f, "alignment {n} is not a power of two"),
            Self::UnknownLabel(l)         => write!(f, "unknown label '{l}'"),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CompileErr {
    /// The kind of error.
    pub kind: CompileErrKind,
    /// The 1-based source line the error was raised at.
    pub line: usize
}
impl CompileErr {
    /// Creates a new [`CompileErr`].
    pub fn new(kind: CompileErrKind, line: usize) -> Self {
        CompileErr { kind, line }
    }
}
impl std::fmt::Display for CompileErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for CompileErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CompileErrKind::Lex(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for CompileErr {
    fn line(&self) -> Option<usize> {
        Some(self.line)
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            CompileErrKind::Lex(e) => crate::err::Error::help(e),
            CompileErrKind::UnknownMnemonic(_) => Some("check the spelling of the instruction".into()),
            CompileErrKind::InvalidCondition(_) => Some("conditions are eq, ne, cs, cc, mi, pl, vs, vc, hi, ls, ge, lt, gt, le".into()),
            CompileErrKind::ExpectedLowReg(_) => Some("this form only accepts r0-r7".into()),
            CompileErrKind::MustAlias => Some("use the destination as the first or second source".into()),
            CompileErrKind::InstrInData(_) => Some("add a .text directive before this instruction".into()),
            CompileErrKind::DataInText(_) => Some("add a .data directive before this directive".into()),
            CompileErrKind::StackedLabel(_) => Some("an instruction can only carry one label".into()),
            CompileErrKind::SymbolDefined(_) => Some("use .equ or .set to redefine a symbol".into()),
            CompileErrKind::UnknownLabel(_) => Some("define this label on an instruction (or on data, for ldr =label)".into()),
            _ => None
        }
    }
}
impl Serialize for CompileErr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("CompileErr", 2)?;
        s.serialize_field("message", &self.to_string())?;
        s.serialize_field("line", &self.line)?;
        s.end()
    }
}

/// The section lines are currently assembled into.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum Section {
    /// Instructions (`.text`). This is the initial section.
    #[default]
    Text,
    /// Data directives (`.data`).
    Data,
}

/// The result of assembling a source file.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize)]
pub struct Assembly {
    /// The instructions, where the instruction at index `i` is at byte address `2i`.
    pub program: Vec<Instruction>,
    /// The data image produced by the data section.
    pub data: DataImage,
}

/// The state of one run of the assembler.
///
/// Lines are fed in order with [`AssemblerContext::feed_line`],
/// and then the labels are resolved with [`AssemblerContext::finish`].
#[derive(Debug, Default)]
pub struct AssemblerContext {
    section: Section,
    symbols: SymbolTable,
    data: DataImage,
    program: Vec<Instruction>,
    labels: HashSet<String>,
    pending_label: Option<String>,
}
impl AssemblerContext {
    /// Creates a fresh context (text section, no symbols, no data).
    pub fn new() -> Self {
        Default::default()
    }

    /// The section the next line is assembled into.
    pub fn section(&self) -> Section {
        self.section
    }

    /// Assembles one line of source.
    ///
    /// `line_no` is the 1-based line number recorded on the instruction (if any).
    pub fn feed_line(&mut self, src: &str, line_no: usize) -> Result<(), CompileErrKind> {
        let line = parse_line(src)?;
        if let Some(label) = line.label {
            self.define_label(label)?;
        }

        match line.body {
            None => Ok(()),
            Some(LineBody::Instr { mnemonic, mut operands }) => {
                if self.section == Section::Data {
                    return Err(CompileErrKind::InstrInData(mnemonic));
                }
                // branch targets name labels, never constants
                let (opcode, _) = instr::lookup_mnemonic(&mnemonic)?;
                if !matches!(opcode, Opcode::B | Opcode::Bl) {
                    for op in &mut operands {
                        self.symbols.substitute(&mut op.tokens);
                    }
                }

                let mut ins = instr::build(&mnemonic, &operands, line_no)?;
                if let Some(label) = self.pending_label.take() {
                    ins.set_label(label);
                }
                self.program.push(ins);
                Ok(())
            },
            Some(LineBody::Directive { name, args }) => {
                let directive = Directive::from_name(&name)
                    .ok_or_else(|| CompileErrKind::UnknownDirective(name.clone()))?;

                match directive {
                    Directive::Text => self.section = Section::Text,
                    Directive::Data => self.section = Section::Data,
                    d if d.is_data() && self.section == Section::Text => return Err(CompileErrKind::DataInText(name)),
                    _ => {}
                }
                directive::process(directive, &args, &mut self.symbols, &mut self.data)
            },
        }
    }

    fn define_label(&mut self, label: String) -> Result<(), CompileErrKind> {
        if !self.labels.insert(label.clone()) {
            return Err(CompileErrKind::DuplicateLabel(label));
        }

        match self.section {
            Section::Text if self.pending_label.is_some() => Err(CompileErrKind::StackedLabel(label)),
            Section::Text => {
                self.pending_label.replace(label);
                Ok(())
            },
            Section::Data => self.data.bind(&label),
        }
    }

    /// Checks that every branch and literal load refers to a defined label,
    /// then produces the assembly.
    pub fn finish(self) -> Result<Assembly, CompileErr> {
        let targets: HashSet<_> = self.program.iter()
            .filter_map(Instruction::label)
            .collect();

        for ins in &self.program {
            let label = match (ins.opcode(), ins.operands()) {
                (Opcode::B | Opcode::Bl, [op]) => match &op.kind {
                    OperandKind::LabelRef(l) if !targets.contains(l.as_str()) => l,
                    _ => continue,
                },
                (Opcode::Ldr, [_, op]) => match &op.kind {
                    OperandKind::LabelRef(l) if self.data.lookup(l).is_none() => l,
                    _ => continue,
                },
                _ => continue,
            };

            return Err(CompileErr::new(CompileErrKind::UnknownLabel(label.clone()), ins.line()));
        }

        Ok(Assembly { program: self.program, data: self.data })
    }
}
