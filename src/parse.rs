//! Parsing lines of Thumb assembly.
//!
//! This module is used to break a source line into its label, its mnemonic or directive,
//! and its operand token groups (see [`parse_line`]),
//! and to classify operand token groups into [`OperandKind`]s (see [`classify`]).
//!
//! The lexer lives in [`lex`].

pub mod lex;

use logos::Logos;

use crate::asm::CompileErrKind;
use crate::ast::{Indirect, Offset, OperandKind, Reg};
use lex::Token;

/// The tokens of one comma-separated operand, along with the text they were lexed from.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OperandTokens {
    /// The tokens of this operand.
    pub tokens: Vec<Token>,
    /// The source text this operand spans (trimmed).
    pub text: String,
}

/// What a line does after its (optional) label.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum LineBody {
    /// An instruction (e.g., `add r0, #1`).
    Instr {
        /// The lowercased mnemonic.
        mnemonic: String,
        /// The operands.
        operands: Vec<OperandTokens>
    },
    /// A directive (e.g., `.word 1, 2`).
    Directive {
        /// The lowercased directive name (without the `.`).
        name: String,
        /// The arguments.
        args: Vec<OperandTokens>
    },
}

/// A line of Thumb assembly, broken into its parts.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Line {
    /// The label defined on this line (e.g., `loop:`).
    pub label: Option<String>,
    /// The instruction or directive on this line.
    pub body: Option<LineBody>,
}
impl Line {
    /// Whether this line has neither label nor content.
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.body.is_none()
    }
}

/// Parses one line of source.
///
/// Comments are stripped and blank lines produce an empty [`Line`].
///
/// # Example
/// ```
/// use thumbulator::parse::{parse_line, LineBody};
///
/// let line = parse_line("loop: add r0, r0, #1 ; count up").unwrap();
/// assert_eq!(line.label.as_deref(), Some("loop"));
///
/// let Some(LineBody::Instr { mnemonic, operands }) = line.body else { unreachable!() };
/// assert_eq!(mnemonic, "add");
/// assert_eq!(operands.len(), 3);
/// assert_eq!(operands[2].text, "#1");
/// ```
pub fn parse_line(src: &str) -> Result<Line, CompileErrKind> {
    let mut tokens = vec![];
    for (result, span) in Token::lexer(src).spanned() {
        match result {
            Ok(Token::Comment) => break,
            Ok(t) => tokens.push((t, span)),
            Err(e) => return Err(CompileErrKind::Lex(e)),
        }
    }

    let mut rest = &tokens[..];
    let mut line = Line::default();

    if let [(Token::Ident(label), _), (Token::Colon, _), tail @ ..] = rest {
        line.label.replace(label.clone());
        rest = tail;
    }

    let Some(((head, head_span), tail)) = rest.split_first() else {
        return Ok(line);
    };
    let groups = split_operands(src, tail)?;
    let body = match head {
        Token::Ident(mnemonic)  => LineBody::Instr { mnemonic: mnemonic.clone(), operands: groups },
        Token::Directive(name)  => LineBody::Directive { name: name.clone(), args: groups },
        _ => return Err(CompileErrKind::UnexpectedToken(src[head_span.clone()].to_string()))
    };
    line.body.replace(body);

    Ok(line)
}

/// Splits the tokens after a mnemonic into operands by the commas
/// which are not enclosed in brackets or braces.
fn split_operands(src: &str, tokens: &[(Token, logos::Span)]) -> Result<Vec<OperandTokens>, CompileErrKind> {
    if tokens.is_empty() {
        return Ok(vec![]);
    }

    let mut groups = vec![];
    let mut depth = 0usize;
    let mut start = 0;

    let mut push_group = |group: &[(Token, logos::Span)]| {
        let (Some((_, first)), Some((_, last))) = (group.first(), group.last()) else {
            return Err(CompileErrKind::EmptyOperand);
        };
        groups.push(OperandTokens {
            tokens: group.iter().map(|(t, _)| t.clone()).collect(),
            text: src[first.start..last.end].trim().to_string()
        });
        Ok(())
    };

    for (i, (token, _)) in tokens.iter().enumerate() {
        match token {
            Token::LBracket | Token::LBrace => depth += 1,
            Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                push_group(&tokens[start..i])?;
                start = i + 1;
            },
            _ => {}
        }
    }
    push_group(&tokens[start..])?;

    Ok(groups)
}

/// Classifies an operand's tokens into an [`OperandKind`].
///
/// This returns `None` if the tokens do not have the shape of any operand.
/// A bare identifier is not an operand on its own (see [`crate::asm`] for how branch labels are handled).
///
/// # Example
/// ```
/// use thumbulator::parse::classify_str;
/// use thumbulator::ast::OperandKind;
///
/// assert_eq!(classify_str("sp"), Some(OperandKind::SpRegister));
/// assert_eq!(classify_str("#0x1F"), Some(OperandKind::HexImmediate(0x1F)));
/// assert!(matches!(classify_str("[r1, #4]"), Some(OperandKind::IndirectMemory(_))));
/// assert_eq!(classify_str("{r0, r8}").map(|k| k.to_string()), Some("{r0, r8}".to_string()));
/// assert_eq!(classify_str("r16"), None);
/// ```
pub fn classify(tokens: &[Token]) -> Option<OperandKind> {
    match tokens {
        [t] if t.as_reg().is_some() => t.as_reg().map(|r| Reg(r).kind()),
        [Token::Imm(imm)] if imm.hex => Some(OperandKind::HexImmediate(imm.value)),
        [Token::Imm(imm)] => Some(OperandKind::DecImmediate(imm.value)),
        [Token::LBracket, base, Token::RBracket] => {
            let base = indirect_base(base)?;
            Some(OperandKind::IndirectMemory(Indirect { base, offset: Offset::Imm(0) }))
        },
        [Token::LBracket, base, Token::Comma, offset, Token::RBracket] => {
            let base = indirect_base(base)?;
            let offset = match offset {
                Token::Imm(imm) => Offset::Imm(imm.value),
                t => Offset::Reg(Reg(t.as_reg().filter(|&r| r < 8)?)),
            };
            Some(OperandKind::IndirectMemory(Indirect { base, offset }))
        },
        [Token::LBrace, inner @ .., Token::RBrace] => {
            let mut regs = vec![];
            for (i, t) in inner.iter().enumerate() {
                match (i % 2, t) {
                    (0, Token::Reg(r)) => regs.push(Reg(*r)),
                    (1, Token::Comma) => {},
                    _ => return None
                }
            }
            // an empty list and a trailing comma are both invalid
            match inner.len() % 2 {
                1 => Some(OperandKind::RegisterList(regs)),
                _ => None
            }
        },
        [Token::HashIdent(label)] | [Token::LitIdent(label)] => Some(OperandKind::LabelRef(label.clone())),
        _ => None
    }
}

/// Lexes and classifies a single operand.
///
/// This returns `None` if the operand does not lex or does not have the shape of any operand.
pub fn classify_str(src: &str) -> Option<OperandKind> {
    let tokens: Vec<_> = Token::lexer(src)
        .filter(|t| t != &Ok(Token::Comment))
        .collect::<Result<_, _>>()
        .ok()?;

    classify(&tokens)
}

fn indirect_base(t: &Token) -> Option<Reg> {
    t.as_reg()
        .filter(|&r| r < 8 || r == 13)
        .map(Reg)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{classify_str, parse_line, LineBody};
    use crate::asm::CompileErrKind;
    use crate::ast::reg_consts::{R0, R1, R2, R7, SP};
    use crate::ast::{Indirect, Offset, OperandKind, Reg};
    use crate::err::LexErr;

    fn texts(src: &str) -> (Option<String>, String, Vec<String>) {
        let line = parse_line(src).unwrap();
        let (head, ops) = match line.body.unwrap() {
            LineBody::Instr { mnemonic, operands } => (mnemonic, operands),
            LineBody::Directive { name, args } => (format!(".{name}"), args),
        };
        (line.label, head, ops.into_iter().map(|o| o.text).collect())
    }

    #[test]
    fn classify_registers() {
        assert_eq!(classify_str("r0"), Some(OperandKind::LowRegister(R0)));
        assert_eq!(classify_str("R7"), Some(OperandKind::LowRegister(R7)));
        assert_eq!(classify_str("r8"), Some(OperandKind::HighRegister(Reg(8))));
        assert_eq!(classify_str("r12"), Some(OperandKind::HighRegister(Reg(12))));
        assert_eq!(classify_str("r13"), Some(OperandKind::SpRegister));
        assert_eq!(classify_str("r14"), Some(OperandKind::LrRegister));
        assert_eq!(classify_str("r15"), Some(OperandKind::PcRegister));
        assert_eq!(classify_str("SP"), Some(OperandKind::SpRegister));
        assert_eq!(classify_str("lr"), Some(OperandKind::LrRegister));
        assert_eq!(classify_str("Pc"), Some(OperandKind::PcRegister));
        assert_eq!(classify_str("r16"), None);
        assert_eq!(classify_str("rx"), None);
    }

    #[test]
    fn classify_immediates() {
        assert_eq!(classify_str("#0"), Some(OperandKind::DecImmediate(0)));
        assert_eq!(classify_str("#255"), Some(OperandKind::DecImmediate(255)));
        assert_eq!(classify_str("#0x10"), Some(OperandKind::HexImmediate(16)));
        assert_eq!(classify_str("#-1"), None);
        assert_eq!(classify_str("#1a"), None);
        assert_eq!(classify_str("5"), None);
    }

    #[test]
    fn classify_indirect() {
        let ind = |base, offset| Some(OperandKind::IndirectMemory(Indirect { base, offset }));

        assert_eq!(classify_str("[r1]"), ind(R1, Offset::Imm(0)));
        assert_eq!(classify_str("[ r1 , #4 ]"), ind(R1, Offset::Imm(4)));
        assert_eq!(classify_str("[sp, #0x10]"), ind(SP, Offset::Imm(16)));
        assert_eq!(classify_str("[r1, r2]"), ind(R1, Offset::Reg(R2)));
        assert_eq!(classify_str("[r8]"), None);
        assert_eq!(classify_str("[r1, r8]"), None);
        assert_eq!(classify_str("[pc, #4]"), None);
        assert_eq!(classify_str("[r1, foo]"), None);
        assert_eq!(classify_str("[r1, #4"), None);
    }

    #[test]
    fn classify_reg_lists() {
        assert_eq!(classify_str("{r0}"), Some(OperandKind::RegisterList(vec![R0])));
        assert_eq!(classify_str("{r0, r1, r14}"), Some(OperandKind::RegisterList(vec![R0, R1, Reg(14)])));
        assert_eq!(classify_str("{}"), None);
        assert_eq!(classify_str("{r0,}"), None);
        assert_eq!(classify_str("{r0 r1}"), None);
        assert_eq!(classify_str("{r0, lr}"), None);
        assert_eq!(classify_str("{r0, #1}"), None);
    }

    #[test]
    fn classify_labels() {
        assert_eq!(classify_str("#buffer"), Some(OperandKind::LabelRef("buffer".to_string())));
        assert_eq!(classify_str("=Buffer"), Some(OperandKind::LabelRef("buffer".to_string())));
        assert_eq!(classify_str("buffer"), None);
    }

    #[test]
    fn lines() {
        assert_eq!(texts("add r0, r1"), (None, "add".to_string(), vec!["r0".to_string(), "r1".to_string()]));
        assert_eq!(
            texts("Loop:   LDR r0, [sp, #4]   @ load"),
            (Some("loop".to_string()), "ldr".to_string(), vec!["r0".to_string(), "[sp, #4]".to_string()])
        );
        assert_eq!(
            texts("push {r0, r1, r2}"),
            (None, "push".to_string(), vec!["{r0, r1, r2}".to_string()])
        );
        assert_eq!(
            texts(".word 0xAABBCCDD, -1"),
            (None, ".word".to_string(), vec!["0xAABBCCDD".to_string(), "-1".to_string()])
        );
        assert_eq!(
            texts(r#"msg: .asciz "a, b""#),
            (Some("msg".to_string()), ".asciz".to_string(), vec![r#""a, b""#.to_string()])
        );
        assert_eq!(texts("wfi"), (None, "wfi".to_string(), vec![]));
    }

    #[test]
    fn blank_and_label_only() {
        assert!(parse_line("").unwrap().is_empty());
        assert!(parse_line("   ; just a comment").unwrap().is_empty());
        assert!(parse_line("@ another comment").unwrap().is_empty());

        let line = parse_line("end:").unwrap();
        assert_eq!(line.label.as_deref(), Some("end"));
        assert_eq!(line.body, None);
    }

    #[test]
    fn line_errors() {
        assert_eq!(parse_line("add r0,, r1"), Err(CompileErrKind::EmptyOperand));
        assert_eq!(parse_line("add r0,"), Err(CompileErrKind::EmptyOperand));
        assert_eq!(parse_line("mov r0, $1"), Err(CompileErrKind::Lex(LexErr::InvalidSymbol)));
        assert_eq!(parse_line("mov r99, #1"), Err(CompileErrKind::Lex(LexErr::InvalidReg)));
        assert_eq!(parse_line("5 r0"), Err(CompileErrKind::UnexpectedToken("5".to_string())));
    }
}
