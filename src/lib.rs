//! An ARM Thumb subset assembler and CPU emulator.
//!
//! This is meant to be a teaching suite for Thumb assembly:
//! source is assembled into a list of validated instructions and a data image,
//! which a simulated 16-register CPU then executes step by step.
//!
//! # Usage
//!
//! To convert Thumb source code into a program, it must be assembled:
//! ```
//! use thumbulator::asm::{compile_assembly, Assembly};
//!
//! let code = "
//!     .data
//!     nums: .word 3, 4
//!     .text
//!     ldr r2, =nums
//!     ldr r0, [r2]
//!     ldr r1, [r2, #4]
//!     add r0, r1
//!     wfi
//! ";
//! let asm: Assembly = compile_assembly(code).unwrap();
//! assert_eq!(asm.program.len(), 5);
//! ```
//!
//! Invalid source reports the first error along with its line:
//! ```
//! use thumbulator::asm::compile_assembly;
//!
//! let err = compile_assembly("mov r0, #256").unwrap_err();
//! assert_eq!(err.line, 1);
//! assert_eq!(err.to_string(), "immediate 256 out of range (0-255)");
//! ```
//!
//! Source can be assembled and loaded into the simulator in one call:
//! ```
//! # let code = ".data\nnums: .word 3, 4\n.text\nldr r2, =nums\nldr r0, [r2]\nldr r1, [r2, #4]\nadd r0, r1\nwfi";
//! use thumbulator::sim::Cpu;
//!
//! let mut cpu = Cpu::new(Default::default());
//! cpu.load_assembly(code).unwrap();
//! cpu.run();
//! assert_eq!(cpu.reg("r0"), Some(7));
//! ```
//!
//! If more granularity is needed for simulation, there are also step and breakpoint functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;
