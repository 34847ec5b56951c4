//! Tokenizing Thumb assembly.
//!
//! This module holds the tokens that characterize a line of Thumb assembly ([`Token`]).
//! This module is used by the line parser and the operand classifier to
//! break each source line into lexical units.
//!
//! The module's key data structure is the [`Token`] enum,
//! which lists all of the tokens that can appear in a line.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A `#`-prefixed numeric immediate (e.g., `#14`, `#0x7F`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Imm {
    /// The value of the immediate.
    pub value: u32,
    /// Whether this immediate was written in hexadecimal (`#0x..`).
    pub hex: bool
}

/// A unit of information in a line of Thumb assembly.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\f]+", error = LexErr)]
pub enum Token {
    // Note, these regexes span over tokens that are technically invalid
    // (e.g., #23trst matches for an immediate even though it shouldn't).
    // This is intended.
    // These regexes collect what would be considered one discernable unit
    // and validates it using the validator function.

    /// An immediate value (e.g., `#9`, `#0x7F`).
    #[regex(r"#\d\w*", lex_imm)]
    #[regex(r"#-\w*", lex_imm)]
    Imm(Imm),

    /// A bare numeric value, used by directives (e.g., `9`, `0x7F`, `-3`).
    #[regex(r"\d\w*", lex_num)]
    #[regex(r"-\w*", lex_num)]
    Num(i128),

    /// A numbered register (i.e., `r0`-`r15`).
    ///
    /// The aliases `sp`, `lr`, and `pc` are lexed as identifiers.
    #[regex(r"[Rr]\d+", lex_reg)]
    Reg(u8),

    /// An identifier.
    ///
    /// This can refer to either:
    /// - a label (e.g., `loop`, `end_if`)
    /// - a mnemonic (e.g., `add`, `beq`)
    /// - a register alias (`sp`, `lr`, `pc`)
    /// - a constant defined with `.equ` and friends
    ///
    /// Identifiers are case-insensitive and are stored in lowercase.
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_ascii_lowercase())]
    Ident(String),

    /// An identifier with a `#` in front (e.g., `#SIZE`).
    #[regex(r"#[A-Za-z_]\w*", |lx| lx.slice()[1..].to_ascii_lowercase())]
    HashIdent(String),

    /// An identifier with a `=` in front (e.g., `=buffer`).
    #[regex(r"=[A-Za-z_]\w*", |lx| lx.slice()[1..].to_ascii_lowercase())]
    LitIdent(String),

    /// A directive (e.g., `.text`, `.word`).
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_ascii_lowercase())]
    Directive(String),

    /// A string literal (e.g., `"Hello!"`)
    #[token(r#"""#, lex_str_literal)]
    String(String),

    /// A colon, which appears after labels
    #[token(":")]
    Colon,

    /// A comma, which delineate operands of an instruction
    #[token(",")]
    Comma,

    /// Opening bracket of an indirect memory operand
    #[token("[")]
    LBracket,

    /// Closing bracket of an indirect memory operand
    #[token("]")]
    RBracket,

    /// Opening brace of a register list
    #[token("{")]
    LBrace,

    /// Closing brace of a register list
    #[token("}")]
    RBrace,

    /// A comment, which starts with a semicolon or an at sign and spans the remaining part of the line.
    #[regex(r"[;@].*")]
    Comment,
}
impl Token {
    /// Gets the register number if this token names a register
    /// (either `rN` or one of the aliases `sp`, `lr`, `pc`).
    pub fn as_reg(&self) -> Option<u8> {
        match self {
            Token::Reg(r) => Some(*r),
            Token::Ident(id) => match id.as_str() {
                "sp" => Some(13),
                "lr" => Some(14),
                "pc" => Some(15),
                _ => None
            },
            _ => None
        }
    }
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal cannot fit within the range of a 32-bit integer
    DoesNotFit32,
    /// Numeric directive literal cannot fit within the range of a 64-bit integer
    DoesNotFit64,
    /// Hex literal (starting with 0x) has invalid hex digits
    InvalidHex,
    /// Numeric literal could not be parsed as a decimal literal because it has invalid digits (i.e., not 0-9)
    InvalidNumeric,
    /// Hex literal (starting with 0x) doesn't have digits after it.
    InvalidHexEmpty,
    /// Numeric literal could not be parsed as a decimal literal because there are no digits in it (it's just `-`)
    InvalidDecEmpty,
    /// Immediate was written with a minus sign.
    NegativeImm,
    /// Int parsing failed but the reason why is unknown
    UnknownIntErr,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// Token had the format r\d, but \d isn't 0-15.
    InvalidReg,
    /// A symbol was used which is not allowed in Thumb assembly files
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFit32    => f.write_str("numeric token does not fit 32-bit integer"),
            LexErr::DoesNotFit64    => f.write_str("numeric token does not fit 64-bit integer"),
            LexErr::InvalidHex      => f.write_str("invalid hex literal"),
            LexErr::InvalidNumeric  => f.write_str("invalid decimal literal"),
            LexErr::InvalidHexEmpty => f.write_str("invalid hex literal"),
            LexErr::InvalidDecEmpty => f.write_str("invalid decimal literal"),
            LexErr::NegativeImm     => f.write_str("invalid immediate"),
            LexErr::UnknownIntErr   => f.write_str("could not parse integer"),
            LexErr::UnclosedStrLit  => f.write_str("unclosed string literal"),
            LexErr::InvalidReg      => f.write_str("invalid register"),
            LexErr::InvalidSymbol   => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFit32    => Some(format!("the range for a 32-bit unsigned integer is [{}, {}]", u32::MIN, u32::MAX).into()),
            LexErr::DoesNotFit64    => Some(format!("directive values must lie within [{}, {}]", i64::MIN, u64::MAX).into()),
            LexErr::InvalidHex      => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidNumeric  => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::InvalidHexEmpty => Some("there should be hex digits (0-9, A-F) here".into()),
            LexErr::InvalidDecEmpty => Some("there should be digits (0-9) here".into()),
            LexErr::NegativeImm     => Some("immediates are unsigned, expected #0x[0-F] or #[0-9]".into()),
            LexErr::UnknownIntErr   => None,
            LexErr::UnclosedStrLit  => Some("add a quote to the end of the string literal".into()),
            LexErr::InvalidReg      => Some("this must be r0-r15".into()),
            LexErr::InvalidSymbol   => Some("this char does not occur in any token in Thumb assembly".into()),
        }
    }
}
/// Helper that converts an int error kind to its corresponding LexErr, based on the provided inputs.
fn convert_int_error(
    e: &std::num::IntErrorKind,
    invalid_digits_err: LexErr,
    empty_err: LexErr,
    overflow_err: LexErr,
) -> LexErr {
    match e {
        IntErrorKind::Empty        => empty_err,
        IntErrorKind::InvalidDigit => invalid_digits_err,
        IntErrorKind::PosOverflow  => overflow_err,
        IntErrorKind::NegOverflow  => overflow_err,
        _ => LexErr::UnknownIntErr,
    }
}
/// Parses an unsigned literal that may be written in decimal or with a `0x` prefix.
fn parse_u32_literal(string: &str) -> Result<(u32, bool), LexErr> {
    match string.strip_prefix("0x").or_else(|| string.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)
            .map(|n| (n, true))
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, LexErr::DoesNotFit32)),
        None => string.parse::<u32>()
            .map(|n| (n, false))
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidDecEmpty, LexErr::DoesNotFit32)),
    }
}
fn lex_imm(lx: &Lexer<'_, Token>) -> Result<Imm, LexErr> {
    let string = &lx.slice()[1..];
    if string.starts_with('-') {
        return Err(LexErr::NegativeImm);
    }

    parse_u32_literal(string)
        .map(|(value, hex)| Imm { value, hex })
}
fn lex_num(lx: &Lexer<'_, Token>) -> Result<i128, LexErr> {
    let slice = lx.slice();
    let (negative, string) = match slice.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, slice)
    };

    let magnitude = match string.strip_prefix("0x").or_else(|| string.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, LexErr::DoesNotFit64))?,
        None => string.parse::<u64>()
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidDecEmpty, LexErr::DoesNotFit64))?,
    };

    let value = i128::from(magnitude);
    match negative {
        true if value > -i128::from(i64::MIN) => Err(LexErr::DoesNotFit64),
        true  => Ok(-value),
        false => Ok(value),
    }
}
fn lex_reg(lx: &Lexer<'_, Token>) -> Result<u8, LexErr> {
    lx.slice()[1..].parse::<u8>().ok()
        .filter(|&r| r < 16)
        .ok_or(LexErr::InvalidReg)
}
fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let rem = lx.remainder()
        .lines()
        .next()
        .unwrap_or("");

    // calculate the length of the string literal ignoring the quotes
    // consume tokens up to the end of the literal and including the unescaped quote
    let mut chars = rem.char_indices();
    let mut mlen = None;
    while let Some((n, c)) = chars.next() {
        match c {
            '\\' => { chars.next(); },
            '"' => {
                mlen = Some(n);
                break;
            },
            _ => {}
        }
    }

    match mlen {
        Some(len) => lx.bump(len + 1),
        None => {
            lx.bump(rem.len());
            return Err(LexErr::UnclosedStrLit);
        }
    }

    // get the string inside quotes:
    let mut remaining = &lx.slice()[1..(lx.slice().len() - 1)];
    let mut buf = String::with_capacity(remaining.len());

    // Look for escapes. Only a simple group of escapes are implemented.
    // (e.g., `\n`, `\r`, etc.)
    while let Some((left, right)) = remaining.split_once('\\') {
        buf.push_str(left);

        // this character is part of the escape:
        let Some(esc) = right.chars().next() else {
            // there always has to be one, cause last character is not \
            unreachable!("expected character after escape")
        };
        match esc {
            'n'  => buf.push('\n'),
            'r'  => buf.push('\r'),
            't'  => buf.push('\t'),
            '\\' => buf.push('\\'),
            '0'  => buf.push('\0'),
            '"'  => buf.push('\"'),
            c => {
                buf.push('\\');
                buf.push(c);
            }
        }

        remaining = &right[esc.len_utf8()..];
    }
    buf.push_str(remaining);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use crate::err::LexErr;
    use crate::parse::lex::{Imm, Token};

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }
    fn directive(s: &str) -> Token {
        Token::Directive(s.to_string())
    }
    fn str_literal(s: &str) -> Token {
        Token::String(s.to_string())
    }
    fn dec(value: u32) -> Token {
        Token::Imm(Imm { value, hex: false })
    }
    fn hex(value: u32) -> Token {
        Token::Imm(Imm { value, hex: true })
    }

    #[test]
    fn test_imm_success() {
        let mut tokens = Token::lexer("#0 #123 #255 #4294967295");
        assert_eq!(tokens.next(), Some(Ok(dec(0))));
        assert_eq!(tokens.next(), Some(Ok(dec(123))));
        assert_eq!(tokens.next(), Some(Ok(dec(255))));
        assert_eq!(tokens.next(), Some(Ok(dec(u32::MAX))));
        assert_eq!(tokens.next(), None);

        let mut tokens = Token::lexer("#0x0 #0xff #0XAB #0xdeadBEEF");
        assert_eq!(tokens.next(), Some(Ok(hex(0))));
        assert_eq!(tokens.next(), Some(Ok(hex(0xFF))));
        assert_eq!(tokens.next(), Some(Ok(hex(0xAB))));
        assert_eq!(tokens.next(), Some(Ok(hex(0xDEADBEEF))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_imm_invalid() {
        assert_eq!(Token::lexer("#4294967296").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("#0x100000000").next(), Some(Err(LexErr::DoesNotFit32)));
        assert_eq!(Token::lexer("#12ab").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(Token::lexer("#0xzz").next(), Some(Err(LexErr::InvalidHex)));
        assert_eq!(Token::lexer("#0x").next(), Some(Err(LexErr::InvalidHexEmpty)));
        assert_eq!(Token::lexer("#-1").next(), Some(Err(LexErr::NegativeImm)));
    }

    #[test]
    fn test_num() {
        let mut tokens = Token::lexer("0 17 0xAABBCCDD -1 -0x80 0xFFFFFFFFFFFFFFFF");
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(17))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0xAABBCCDD))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(-1))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(-0x80))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0xFFFF_FFFF_FFFF_FFFF))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("-").next(), Some(Err(LexErr::InvalidDecEmpty)));
        assert_eq!(Token::lexer("3q").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(Token::lexer("0x10000000000000000").next(), Some(Err(LexErr::DoesNotFit64)));
    }

    #[test]
    fn test_regs() {
        let mut tokens = Token::lexer("r0 R7 r8 r12 r13 R15");
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(7))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(8))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(12))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(13))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(15))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("r16").next(), Some(Err(LexErr::InvalidReg)));
        assert_eq!(Token::lexer("r99999999").next(), Some(Err(LexErr::InvalidReg)));

        // longer identifiers win over registers
        assert_eq!(Token::lexer("r1x").next(), Some(Ok(ident("r1x"))));
        assert_eq!(Token::lexer("result").next(), Some(Ok(ident("result"))));
    }

    #[test]
    fn test_reg_aliases() {
        let aliases: Vec<_> = Token::lexer("sp LR Pc r13 spx")
            .map(|t| t.unwrap().as_reg())
            .collect();
        assert_eq!(aliases, [Some(13), Some(14), Some(15), Some(13), None]);
    }

    #[test]
    fn test_idents() {
        let mut tokens = Token::lexer("MOV Loop #SIZE =buffer .WORD");
        assert_eq!(tokens.next(), Some(Ok(ident("mov"))));
        assert_eq!(tokens.next(), Some(Ok(ident("loop"))));
        assert_eq!(tokens.next(), Some(Ok(Token::HashIdent("size".to_string()))));
        assert_eq!(tokens.next(), Some(Ok(Token::LitIdent("buffer".to_string()))));
        assert_eq!(tokens.next(), Some(Ok(directive("word"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str() {
        let mut tokens = Token::lexer(r#" " " "abc" "Hello, World;" "" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal(" "))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("Hello, World;"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_escape() {
        let mut tokens = Token::lexer(r#" "\n" "\r" "\t" "\\" "\"" "\0" "\e" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("\n"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\r"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\t"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\0"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\e"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_trailing_backslash() {
        let mut tokens = Token::lexer(r#" "a\\" "\\" "x" "\\\"" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("a\\"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("x"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\\""))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_unclosed() {
        assert_eq!(Token::lexer(r#"""#).next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(Token::lexer(r#""abc"#).next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(Token::lexer(r#""abc\""#).next(), Some(Err(LexErr::UnclosedStrLit)));
    }

    #[test]
    fn test_punct() {
        let mut tokens = Token::lexer("loop: ldr r0, [sp, #4] ; trailing");
        assert_eq!(tokens.next(), Some(Ok(ident("loop"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Colon)));
        assert_eq!(tokens.next(), Some(Ok(ident("ldr"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::LBracket)));
        assert_eq!(tokens.next(), Some(Ok(ident("sp"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(dec(4))));
        assert_eq!(tokens.next(), Some(Ok(Token::RBracket)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comment)));
        assert_eq!(tokens.next(), None);

        let mut tokens = Token::lexer("push {r0, r1} @ gas style");
        assert_eq!(tokens.next(), Some(Ok(ident("push"))));
        assert_eq!(tokens.next(), Some(Ok(Token::LBrace)));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(1))));
        assert_eq!(tokens.next(), Some(Ok(Token::RBrace)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comment)));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_invalid_symbol() {
        for c in ['$', '%', '&', '*', '(', ')', '+', '/', '<', '>', '?', '^', '`', '|', '~', '!', '\''] {
            let string = c.to_string();
            assert_eq!(
                Token::lexer(&string).next(),
                Some(Err(LexErr::InvalidSymbol)),
                "Expected {string:?} to be an invalid symbol"
            );
        }
    }
}
