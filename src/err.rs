//! Error interface for this crate.
//!
//! This module re-exports the errors that can occur while assembling
//! Thumb source ([`LexErr`], [`CompileErr`]) and declares the [`Error`] trait
//! which every error of this crate implements.

use std::borrow::Cow;

pub use crate::parse::lex::LexErr;
pub use crate::asm::{CompileErr, CompileErrKind};

/// Unified error interface for all errors in this crate.
///
/// Note that the [`std::fmt::Display`] implementation is used for the brief message
/// shown to the user.
pub trait Error: std::error::Error {
    /// The 1-based source line this error was raised at (if one is known).
    fn line(&self) -> Option<usize> {
        None
    }

    /// A clarifying message to help aid someone in how to fix the message.
    ///
    /// By default this is `None`.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}
