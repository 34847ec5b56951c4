//! Simulating and execution for Thumb assembly.
//!
//! This module is focused on executing assembled code (i.e., [`Assembly`]).
//!
//! This module consists of:
//! - [`Cpu`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling the register file, flags, and memory.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Cpu and load source into it:
//!
//! ```
//! use thumbulator::sim::Cpu;
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_assembly("mov r0, #7\nwfi").unwrap();
//! cpu.run();
//! assert_eq!(cpu.reg("r0"), Some(7));
//! ```
//!
//! ## Configuration
//!
//! Here, we define `cpu` to have the default configuration (64 data words and 64 stack words).
//! The memory can be sized differently like so:
//!
//! ```
//! # use thumbulator::sim::{Cpu, CpuConfig};
//! let cpu = Cpu::new(CpuConfig { memory_size: 4, ..Default::default() });
//! assert_eq!(cpu.reg("sp"), Some(16));
//! ```
//!
//! ## Execution
//!
//! Beyond the basic [`Cpu::run`] (which runs until halting or until a breakpoint),
//! there are also:
//! - [`Cpu::step`]: manual step-by-step simulation
//! - [`Cpu::run_while`], [`Cpu::run_with_limit`]: more advanced programmatic execution
//!
//! ```
//! use thumbulator::sim::Cpu;
//!
//! let src = "
//!     mov r0, #0
//!     add r0, #1
//!     add r0, #1
//!     wfi
//! ";
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_assembly(src).unwrap();
//!
//! // Running step by step:
//! cpu.step();
//! assert_eq!(cpu.reg("r0"), Some(0));
//! cpu.step();
//! assert_eq!(cpu.reg("r0"), Some(1));
//! cpu.step();
//! assert_eq!(cpu.reg("r0"), Some(2));
//!
//! // The program has finished; further steps do nothing:
//! assert!(cpu.is_halted());
//! cpu.step();
//! assert_eq!(cpu.reg("pc"), Some(6));
//! ```
//!
//! ## Breakpoints
//!
//! Breakpoints are set by instruction index. [`Cpu::run`] stops *before*
//! executing an instruction with a breakpoint, and clears that breakpoint.
//!
//! ```
//! use thumbulator::sim::Cpu;
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_assembly("mov r0, #1\nmov r0, #2\nwfi").unwrap();
//! cpu.set_breakpoint(1, true);
//!
//! cpu.run();
//! assert!(cpu.hit_breakpoint());
//! assert_eq!(cpu.reg("r0"), Some(1));
//!
//! cpu.run();
//! assert!(cpu.hit_halt());
//! assert_eq!(cpu.reg("r0"), Some(2));
//! ```

pub mod mem;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::asm::{compile_assembly, Assembly, CompileErr};
use crate::ast::{reg_consts, Instruction, Offset, Opcode, Operand, OperandKind, Reg};
use crate::parse::classify_str;
use mem::{Flags, Memory, RegFile};

/// Largest value considered non-negative in a signed reading of a register.
const MAX_POS: u32 = 0x7FFF_FFFF;

/// Reason for why execution paused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Program reached a `WFI` or ran past its last instruction.
    Halt,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program has not paused yet.
    #[default]
    Unstarted
}

/// Configuration for [`Cpu`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CpuConfig {
    /// Number of 32-bit words in the data region.
    ///
    /// This grows if a loaded data image is larger.
    ///
    /// By default, this is `64`.
    pub memory_size: usize,

    /// Number of 32-bit words in the stack region (after the data region).
    ///
    /// This grows if a `PUSH` goes past the end of memory.
    ///
    /// By default, this is `64`.
    pub stack_size: usize,
}
impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            memory_size: 64,
            stack_size: 64
        }
    }
}

/// What the program counter does after an instruction.
enum Flow {
    /// Move to the next instruction.
    Next,
    /// Jump to a byte address.
    Jump(u32),
    /// Stay on this instruction.
    Stay,
}

/// Executes Thumb programs.
#[derive(Debug)]
pub struct Cpu {
    /// The register file.
    ///
    /// `r15` (pc) always holds `2 ×` the index of the next instruction to execute.
    pub regs: RegFile,
    /// The condition flags.
    pub flags: Flags,
    /// The memory (data image followed by the stack region).
    pub mem: Memory,

    program: Vec<Instruction>,
    error: Option<CompileErr>,
    data_symbols: BTreeMap<String, u32>,

    /// The number of instructions successfully run since this `Cpu` was last reset.
    instructions_run: u64,
    pause_condition: PauseCondition,
}

impl Cpu {
    /// Creates a new CPU with the provided configuration,
    /// with no program loaded.
    pub fn new(config: CpuConfig) -> Self {
        let mut cpu = Self {
            regs: RegFile::new(),
            flags: Flags::default(),
            mem: Memory::new(config.memory_size, config.stack_size),
            program: vec![],
            error: None,
            data_symbols: BTreeMap::new(),
            instructions_run: 0,
            pause_condition: Default::default(),
        };
        cpu.reset();
        cpu
    }

    /// Resets the CPU.
    ///
    /// This zeroes the registers (except `sp`, which points past the data region),
    /// the flags, and memory, and unloads the program.
    /// The memory sizes are kept.
    pub fn reset(&mut self) {
        self.regs = RegFile::new();
        self.flags = Flags::default();
        self.mem.clear();
        self.regs[reg_consts::SP] = self.mem.stack_base();

        self.program.clear();
        self.error.take();
        self.data_symbols.clear();
        self.instructions_run = 0;
        self.pause_condition = Default::default();
    }

    /// Assembles source and loads it into the CPU.
    ///
    /// The CPU is reset first. If assembly fails, the error is stored
    /// (see [`Cpu::error`]) and returned, and the CPU stays reset.
    pub fn load_assembly(&mut self, src: &str) -> Result<(), CompileErr> {
        self.reset();

        match compile_assembly(src) {
            Ok(asm) => {
                self.load(asm);
                Ok(())
            },
            Err(e) => {
                tracing::warn!(line = e.line, "failed to assemble: {e}");
                self.error.replace(e.clone());
                Err(e)
            }
        }
    }

    /// Loads an assembled program and its data image into the CPU.
    ///
    /// This does not reset registers or flags (see [`Cpu::load_assembly`]).
    pub fn load(&mut self, asm: Assembly) {
        let Assembly { program, data } = asm;

        self.mem.load_image(data.words());
        self.regs[reg_consts::SP] = self.mem.stack_base();
        self.data_symbols = data.symbols().clone();
        self.program = program;

        tracing::debug!(
            instructions = self.program.len(),
            data_words = data.words().len(),
            mem_size = self.mem.mem_size,
            "loaded program"
        );
    }

    /// The loaded program.
    pub fn program(&self) -> &[Instruction] {
        &self.program
    }

    /// The error from the last [`Cpu::load_assembly`], if it failed.
    pub fn error(&self) -> Option<&CompileErr> {
        self.error.as_ref()
    }

    /// The byte offsets of the labels in the data section.
    pub fn data_symbols(&self) -> &BTreeMap<String, u32> {
        &self.data_symbols
    }

    /// The number of instructions run since the last reset.
    pub fn instructions_run(&self) -> u64 {
        self.instructions_run
    }

    /// The instruction at the program counter (if there is one).
    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.program.get(self.current_index())
    }

    fn current_index(&self) -> usize {
        (self.regs[reg_consts::PC] / 2) as usize
    }

    /// Whether the program is finished:
    /// the program counter is past the end of the program or is at a `WFI`.
    pub fn is_halted(&self) -> bool {
        self.current_instruction()
            .map_or(true, |ins| ins.opcode() == Opcode::Wfi)
    }

    /// Whether the last run paused because the program finished.
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    /// Whether the last run paused because of a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Reads a register by name (`r0`-`r15`, `sp`, `lr`, `pc`).
    pub fn reg(&self, name: &str) -> Option<u32> {
        parse_reg(name).map(|r| self.regs[r])
    }

    /// Writes a register by name (`r0`-`r15`, `sp`, `lr`, `pc`).
    ///
    /// This returns false if `name` is not a register.
    pub fn set_reg(&mut self, name: &str, value: u32) -> bool {
        match parse_reg(name) {
            Some(r) => {
                self.regs[r] = value;
                true
            },
            None => false,
        }
    }

    /// Reads a memory word by word index.
    pub fn mem_word(&self, index: usize) -> Option<u32> {
        self.mem.memory.get(index).copied()
    }

    /// Writes a memory word by word index.
    ///
    /// This returns false if the index is out of range.
    pub fn set_mem_word(&mut self, index: usize, value: u32) -> bool {
        match self.mem.memory.get_mut(index) {
            Some(word) => {
                *word = value;
                true
            },
            None => false,
        }
    }

    /// Sets or clears the breakpoint on the instruction at an index.
    ///
    /// This returns false if there is no instruction at that index.
    pub fn set_breakpoint(&mut self, index: usize, on: bool) -> bool {
        match self.program.get_mut(index) {
            Some(ins) => {
                ins.set_breakpoint(on);
                true
            },
            None => false,
        }
    }

    /// Flips the breakpoint on the instruction at an index,
    /// returning whether the breakpoint is now set.
    pub fn toggle_breakpoint(&mut self, index: usize) -> Option<bool> {
        let ins = self.program.get_mut(index)?;
        let on = !ins.breakpoint();
        ins.set_breakpoint(on);
        Some(on)
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the program is finished (`WFI` or past the last instruction)
    /// - the next instruction has a breakpoint (which is cleared)
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Cpu) -> bool) {
        // run until:
        // 1. the program halts
        // 2. a breakpoint is hit
        // 3. the tripwire condition returns false
        let condition = loop {
            if self.is_halted() {
                tracing::debug!(pc = self.regs[reg_consts::PC], "halted");
                break PauseCondition::Halt;
            }

            let index = self.current_index();
            if self.program[index].breakpoint() {
                self.program[index].set_breakpoint(false);
                tracing::debug!(index, "hit breakpoint");
                break PauseCondition::Breakpoint;
            }

            if !tripwire(self) {
                break PauseCondition::Tripwire;
            }

            self.step_inner();
        };
        self.pause_condition = condition;
    }

    /// Executes the program.
    ///
    /// This blocks until the program finishes or reaches a breakpoint.
    /// A program which loops forever never returns.
    /// If you would like to limit the maximum number of steps to execute, consider [`Cpu::run_with_limit`].
    pub fn run(&mut self) {
        self.run_while(|_| true)
    }

    /// Executes the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program finishes, reaches a breakpoint, or the number of steps has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) {
        let i = self.instructions_run;
        self.run_while(|cpu| cpu.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Executes one instruction.
    ///
    /// If the program is finished, this does nothing.
    pub fn step(&mut self) {
        if self.is_halted() {
            tracing::debug!(pc = self.regs[reg_consts::PC], "program finished");
            self.pause_condition = PauseCondition::Halt;
            return;
        }

        self.step_inner();
    }

    /// Executes the instruction at the program counter.
    /// The caller must ensure there is one.
    fn step_inner(&mut self) {
        let index = self.current_index();
        let Cpu { regs, flags, mem, program, data_symbols, .. } = &mut *self;
        let ins = &program[index];

        tracing::trace!(pc = regs[reg_consts::PC], "{ins}");
        let flow = execute(ins, program, data_symbols, regs, flags, mem);

        let pc = &mut regs[reg_consts::PC];
        match flow {
            Flow::Next    => *pc = pc.wrapping_add(2),
            Flow::Jump(t) => *pc = t,
            Flow::Stay    => {},
        }
        self.instructions_run += 1;
    }

    /// Produces a structural JSON dump of the CPU
    /// (registers, flags, memory, program, and error).
    ///
    /// The dump is the same for the same loaded source and the same steps.
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            regs: &'a RegFile,
            #[serde(flatten)]
            flags: &'a Flags,
            #[serde(flatten)]
            mem: &'a Memory,
            program: &'a [Instruction],
            error: Option<&'a CompileErr>,
        }

        serde_json::to_string_pretty(&Snapshot {
            regs: &self.regs,
            flags: &self.flags,
            mem: &self.mem,
            program: &self.program,
            error: self.error.as_ref(),
        })
    }
}
impl Default for Cpu {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

fn parse_reg(name: &str) -> Option<Reg> {
    classify_str(name)?.as_reg()
}

fn reg_of(op: &Operand) -> Reg {
    match op.kind.as_reg() {
        Some(r) => r,
        None => unreachable!("operand {op} should have been validated as a register"),
    }
}

/// The value of a register or immediate operand.
fn value_of(regs: &RegFile, op: &Operand) -> u32 {
    match op.kind.as_imm() {
        Some(n) => n,
        None => regs[reg_of(op)],
    }
}

fn find_label(program: &[Instruction], label: &str) -> Option<u32> {
    program.iter()
        .position(|ins| ins.label() == Some(label))
        .map(|i| (i as u32).wrapping_mul(2))
}

fn add_with_flags(a: u32, b: u32, flags: &mut Flags, update_nzv: bool) -> u32 {
    let sum = u64::from(a) + u64::from(b);
    let result = sum as u32;

    flags.c = sum > u64::from(u32::MAX);
    if update_nzv {
        flags.set_nz(result);
        flags.v = a <= MAX_POS && sum > u64::from(MAX_POS);
    }
    result
}

fn shift(opcode: Opcode, value: u32, count: u32, flags: &mut Flags) -> u32 {
    let bit = |n: u32| (value >> n) & 1 != 0;

    let (result, carry) = match (opcode, count) {
        (_, 0) => (value, false),
        (Opcode::Lsl, n) => match n.min(33) {
            n @ 1..=31 => (value << n, bit(32 - n)),
            32 => (0, bit(0)),
            _ => (0, false),
        },
        (Opcode::Lsr, n) => match n.min(33) {
            n @ 1..=31 => (value >> n, bit(n - 1)),
            32 => (0, bit(31)),
            _ => (0, false),
        },
        (Opcode::Asr, n) => match n.min(32) {
            n @ 1..=31 => (((value as i32) >> n) as u32, bit(n - 1)),
            _ => (((value as i32) >> 31) as u32, bit(31)),
        },
        (Opcode::Ror, n) => {
            let result = value.rotate_right((n - 1) % 32 + 1);
            (result, result >> 31 != 0)
        },
        _ => unreachable!("{opcode:?} is not a shift"),
    };

    flags.c = carry;
    flags.set_nz(result);
    result
}

/// Computes the byte address of a memory operand.
fn address(regs: &RegFile, op: &Operand) -> u64 {
    let OperandKind::IndirectMemory(ind) = &op.kind else {
        unreachable!("operand {op} should have been validated as a memory operand")
    };
    let offset = match ind.offset {
        Offset::Reg(r) => regs[r],
        Offset::Imm(n) => n,
    };
    u64::from(regs[ind.base]) + u64::from(offset)
}

/// Executes one instruction, returning what the program counter should do next.
fn execute(
    ins: &Instruction,
    program: &[Instruction],
    data_symbols: &BTreeMap<String, u32>,
    regs: &mut RegFile,
    flags: &mut Flags,
    mem: &mut Memory
) -> Flow {
    let ops = ins.operands();

    match ins.opcode() {
        Opcode::Mov => {
            let value = value_of(regs, &ops[1]);
            regs[reg_of(&ops[0])] = value;
            if ins.sets_flags() {
                flags.set_nz(value);
            }
        },
        Opcode::Add => {
            let rd = reg_of(&ops[0]);
            let (a, b) = match ops {
                [_, x] => (regs[rd], value_of(regs, x)),
                [_, rn, x] => (regs[reg_of(rn)], value_of(regs, x)),
                _ => unreachable!("add should have 2 or 3 operands"),
            };
            regs[rd] = add_with_flags(a, b, flags, ins.sets_flags());
        },
        Opcode::Sub => {
            let rd = reg_of(&ops[0]);
            let (a, b) = match ops {
                [_, x] => (regs[rd], value_of(regs, x)),
                [_, rn, x] => (regs[reg_of(rn)], value_of(regs, x)),
                _ => unreachable!("sub should have 2 or 3 operands"),
            };
            let result = a.wrapping_sub(b);
            regs[rd] = result;

            if ins.sets_flags() {
                flags.set_nz(result);
                flags.c = a >= b;
                if ops.len() == 2 {
                    flags.v = a > MAX_POS && i64::from(a) - i64::from(b) <= i64::from(MAX_POS);
                }
            }
        },
        Opcode::Neg => {
            let result = 0u32.wrapping_sub(regs[reg_of(&ops[1])]);
            regs[reg_of(&ops[0])] = result;
            flags.set_nz(result);
            flags.c = result == 0;
        },
        Opcode::Mul => {
            let rd = reg_of(&ops[0]);
            let (a, b) = match ops {
                [_, rm] => (regs[rd], regs[reg_of(rm)]),
                [_, rn, rm] => (regs[reg_of(rn)], regs[reg_of(rm)]),
                _ => unreachable!("mul should have 2 or 3 operands"),
            };
            let result = a.wrapping_mul(b);
            regs[rd] = result;
            flags.set_nz(result);
        },
        Opcode::Cmp => {
            let a = regs[reg_of(&ops[0])];
            let b = value_of(regs, &ops[1]);
            flags.set_nz(a.wrapping_sub(b));
            flags.c = a >= b;
        },
        Opcode::Cmn => {
            let a = regs[reg_of(&ops[0])];
            let b = regs[reg_of(&ops[1])];
            add_with_flags(a, b, flags, true);
        },
        Opcode::And | Opcode::Bic | Opcode::Orr | Opcode::Eor | Opcode::Mvn | Opcode::Tst => {
            let rd = reg_of(&ops[0]);
            let (d, m) = (regs[rd], regs[reg_of(&ops[1])]);
            let result = match ins.opcode() {
                Opcode::And | Opcode::Tst => d & m,
                Opcode::Bic => d & !m,
                Opcode::Orr => d | m,
                Opcode::Eor => d ^ m,
                _ => !m,
            };
            if ins.opcode() != Opcode::Tst {
                regs[rd] = result;
            }
            flags.set_nz(result);
        },
        Opcode::Lsl | Opcode::Lsr | Opcode::Asr | Opcode::Ror => {
            let (rd, rm, count) = match ops {
                [rd, count] => (reg_of(rd), reg_of(rd), count),
                [rd, rm, count] => (reg_of(rd), reg_of(rm), count),
                _ => unreachable!("shifts should have 2 or 3 operands"),
            };
            let count = value_of(regs, count);
            regs[rd] = shift(ins.opcode(), regs[rm], count, flags);
        },
        Opcode::Ldr | Opcode::Ldrh | Opcode::Ldrb | Opcode::Ldrsh | Opcode::Ldrsb => {
            let rt = reg_of(&ops[0]);
            let value = match (&ops[1].kind, ins.opcode()) {
                (OperandKind::LabelRef(label), _) => data_symbols.get(label).copied().unwrap_or(0),
                (_, Opcode::Ldr)   => mem.load_word(address(regs, &ops[1])),
                (_, Opcode::Ldrh)  => u32::from(mem.load_half(address(regs, &ops[1]))),
                (_, Opcode::Ldrb)  => u32::from(mem.load_byte(address(regs, &ops[1]))),
                (_, Opcode::Ldrsh) => mem.load_half(address(regs, &ops[1])) as i16 as u32,
                (_, _)             => mem.load_byte(address(regs, &ops[1])) as i8 as u32,
            };
            regs[rt] = value;
        },
        Opcode::Str | Opcode::Strh | Opcode::Strb => {
            let value = regs[reg_of(&ops[0])];
            let addr = address(regs, &ops[1]);
            match ins.opcode() {
                Opcode::Str  => mem.store_word(addr, value),
                Opcode::Strh => mem.store_half(addr, value as u16),
                _            => mem.store_byte(addr, value as u8),
            }
        },
        Opcode::Push | Opcode::Pop => {
            let OperandKind::RegisterList(list) = &ops[0].kind else {
                unreachable!("push/pop should have a register list")
            };

            let mut jumped = false;
            for &r in list {
                let sp = regs[reg_consts::SP];
                if ins.opcode() == Opcode::Push {
                    regs[reg_consts::SP] = mem.push(sp, regs[r]);
                } else {
                    // the register is written before sp drops, so `pop {r13}` yields value - 4
                    let (value, _) = mem.pop(sp);
                    regs[r] = value;
                    regs[reg_consts::SP] = regs[reg_consts::SP].wrapping_sub(4);
                    jumped |= r == reg_consts::PC;
                }
            }

            if jumped {
                return Flow::Jump(regs[reg_consts::PC]);
            }
        },
        Opcode::B | Opcode::Bl => {
            let OperandKind::LabelRef(label) = &ops[0].kind else {
                unreachable!("branches should have a label")
            };
            if let Some(cond) = ins.cond() {
                if !flags.satisfies(cond) {
                    return Flow::Next;
                }
            }

            let Some(target) = find_label(program, label) else { return Flow::Next };
            if ins.opcode() == Opcode::Bl {
                regs[reg_consts::LR] = regs[reg_consts::PC].wrapping_add(2);
            }
            return Flow::Jump(target);
        },
        Opcode::Wfi => return Flow::Stay,
    }

    Flow::Next
}
