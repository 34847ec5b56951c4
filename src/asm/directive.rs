//! Directives, the symbol table, and the data image.
//!
//! Directives either switch the current section (`.text`, `.data`),
//! define a constant in the [`SymbolTable`] (`.equ`, `.set`, `.equiv`, `.eqv`),
//! or append bytes to the [`DataImage`].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::parse::lex::Token;
use crate::parse::OperandTokens;

use super::CompileErrKind;

/// The largest number of bytes a single `.space` may reserve.
const MAX_SPACE: i128 = 1 << 16;

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Directive {
    /// `.align n`: pad to a multiple of 2<sup>n</sup> bytes.
    Align,
    /// `.balign n`: pad to a multiple of n bytes.
    Balign,
    /// `.ascii "str"`: the bytes of a string.
    Ascii,
    /// `.asciz "str"`: the bytes of a string with a NUL terminator.
    Asciz,
    /// `.text`: switch to the text section.
    Text,
    /// `.data`: switch to the data section.
    Data,
    /// `.byte n, ...`
    Byte,
    /// `.hword n, ...`
    Hword,
    /// `.word n, ...`
    Word,
    /// `.quad n, ...`
    Quad,
    /// `.space n[, fill]`
    Space,
    /// `.equiv NAME, value`: define a constant which cannot be redefined.
    Equiv,
    /// `.eqv NAME, value`: alias of `.equiv`.
    Eqv,
    /// `.equ NAME, value`: define a constant which can be redefined.
    Equ,
    /// `.set NAME, value`: alias of `.equ`.
    Set,
}
impl Directive {
    /// Looks up a directive by its (lowercase) name, without the leading `.`.
    pub fn from_name(name: &str) -> Option<Self> {
        let directive = match name {
            "align"  => Self::Align,
            "balign" => Self::Balign,
            "ascii"  => Self::Ascii,
            "asciz"  => Self::Asciz,
            "text"   => Self::Text,
            "data"   => Self::Data,
            "byte"   => Self::Byte,
            "hword"  => Self::Hword,
            "word"   => Self::Word,
            "quad"   => Self::Quad,
            "space"  => Self::Space,
            "equiv"  => Self::Equiv,
            "eqv"    => Self::Eqv,
            "equ"    => Self::Equ,
            "set"    => Self::Set,
            _ => return None
        };

        Some(directive)
    }

    /// Whether this directive writes to the data image
    /// (and therefore can only appear in the data section).
    pub fn is_data(self) -> bool {
        matches!(self,
            Self::Align | Self::Balign
            | Self::Ascii | Self::Asciz
            | Self::Byte | Self::Hword | Self::Word | Self::Quad
            | Self::Space
        )
    }
}

/// The table of constants defined by `.equ` and friends.
///
/// Constants are substituted into operands before they are classified.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SymbolTable {
    consts: HashMap<String, u32>
}
impl SymbolTable {
    /// Creates an empty symbol table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the value of a constant.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.consts.get(name).copied()
    }

    /// Defines a constant.
    ///
    /// If `redefine` is false, this fails when the constant already exists.
    pub fn define(&mut self, name: &str, value: u32, redefine: bool) -> Result<(), CompileErrKind> {
        if matches!(name, "sp" | "lr" | "pc") {
            return Err(CompileErrKind::ReservedName(name.to_string()));
        }
        if !redefine && self.consts.contains_key(name) {
            return Err(CompileErrKind::SymbolDefined(name.to_string()));
        }

        self.consts.insert(name.to_string(), value);
        Ok(())
    }

    /// Replaces every identifier (or `#identifier`) which names a constant
    /// with the constant's value as a decimal immediate.
    ///
    /// The assembler does not apply this to `B`/`BL` operands, which always name labels.
    pub fn substitute(&self, tokens: &mut [Token]) {
        for token in tokens {
            let (Token::Ident(name) | Token::HashIdent(name)) = &*token else { continue };
            if let Some(value) = self.get(name) {
                *token = Token::Imm(crate::parse::lex::Imm { value, hex: false });
            }
        }
    }
}

/// The pre-computed memory contents produced by data directives.
///
/// Bytes are packed little-endian into 32-bit words through a cursor which only increases.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize)]
pub struct DataImage {
    symbols: BTreeMap<String, u32>,
    words: Vec<u32>,
    #[serde(skip)]
    cursor: u32,
}
impl DataImage {
    /// Creates an empty data image.
    pub fn new() -> Self {
        Default::default()
    }

    /// The mapping from data labels to their byte offsets.
    pub fn symbols(&self) -> &BTreeMap<String, u32> {
        &self.symbols
    }
    /// The words of this image.
    pub fn words(&self) -> &[u32] {
        &self.words
    }
    /// The byte offset the next byte will be written to.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }
    /// Looks up the byte offset of a data label.
    pub fn lookup(&self, label: &str) -> Option<u32> {
        self.symbols.get(label).copied()
    }

    /// Binds a label to the current cursor.
    pub(crate) fn bind(&mut self, label: &str) -> Result<(), CompileErrKind> {
        if self.symbols.contains_key(label) {
            return Err(CompileErrKind::DuplicateLabel(label.to_string()));
        }
        self.symbols.insert(label.to_string(), self.cursor);
        Ok(())
    }

    /// Writes one byte at the cursor and advances the cursor.
    pub(crate) fn push_byte(&mut self, byte: u8) {
        let index = (self.cursor / 4) as usize;
        let shift = (self.cursor % 4) * 8;
        if index >= self.words.len() {
            self.words.resize(index + 1, 0);
        }

        let word = &mut self.words[index];
        *word = (*word & !(0xFF << shift)) | (u32::from(byte) << shift);
        self.cursor += 1;
    }

    /// Writes the low `width` bytes of `value` in little-endian order.
    pub(crate) fn push_le(&mut self, value: u64, width: usize) {
        for &b in &value.to_le_bytes()[..width] {
            self.push_byte(b);
        }
    }

    /// Writes zero bytes until the cursor is a multiple of `modulus`.
    pub(crate) fn pad_to(&mut self, modulus: u32) {
        let rem = self.cursor % modulus;
        if rem == 0 {
            return;
        }

        // bytes past the cursor are always zero
        self.cursor += modulus - rem;
        let len = (self.cursor as usize + 3) / 4;
        if len > self.words.len() {
            self.words.resize(len, 0);
        }
    }
}

/// Applies a directive which defines a constant or writes data.
///
/// Section switching (`.text`, `.data`) is handled by the assembler driver.
pub(crate) fn process(
    directive: Directive,
    args: &[OperandTokens],
    symbols: &mut SymbolTable,
    data: &mut DataImage
) -> Result<(), CompileErrKind> {
    match directive {
        Directive::Text | Directive::Data => expect_args(args, 0, 0),
        Directive::Equ | Directive::Set | Directive::Equiv | Directive::Eqv => {
            expect_args(args, 2, 2)?;
            let redefine = matches!(directive, Directive::Equ | Directive::Set);

            let [OperandTokens { tokens: name_tokens, text: name_text }, value] = args else { unreachable!("args should have had 2 elements") };
            let [Token::Ident(name)] = &name_tokens[..] else {
                return Err(CompileErrKind::InvalidArgument(name_text.clone()));
            };
            let value = numeric_arg(value, symbols)?;
            let value = match u32::try_from(value) {
                Ok(n) => n,
                Err(_) if value >= i128::from(i32::MIN) => value as i32 as u32,
                Err(_) => return Err(CompileErrKind::InvalidArgument(args[1].text.clone())),
            };

            symbols.define(name, value, redefine)
        },
        Directive::Byte | Directive::Hword | Directive::Word | Directive::Quad => {
            expect_args(args, 1, usize::MAX)?;
            let width = match directive {
                Directive::Byte  => 1,
                Directive::Hword => 2,
                Directive::Word  => 4,
                _ => 8,
            };

            for arg in args {
                let value = numeric_arg(arg, symbols)?;
                // two's complement truncation to the directive's width
                data.push_le(value as u64, width);
            }
            Ok(())
        },
        Directive::Ascii | Directive::Asciz => {
            expect_args(args, 1, usize::MAX)?;

            for arg in args {
                let [Token::String(s)] = &arg.tokens[..] else {
                    return Err(CompileErrKind::InvalidArgument(arg.text.clone()));
                };
                // character codes, truncated to a byte
                s.chars().for_each(|c| data.push_byte(c as u8));
                if directive == Directive::Asciz {
                    data.push_byte(0);
                }
            }
            Ok(())
        },
        Directive::Space => {
            expect_args(args, 1, 2)?;

            let len = numeric_arg(&args[0], symbols)?;
            if !(0..=MAX_SPACE).contains(&len) {
                return Err(CompileErrKind::InvalidArgument(args[0].text.clone()));
            }
            let fill = match args.get(1) {
                Some(arg) => numeric_arg(arg, symbols)? as u8,
                None => 0,
            };

            (0..len).for_each(|_| data.push_byte(fill));
            Ok(())
        },
        Directive::Align => {
            expect_args(args, 1, 1)?;

            let n = numeric_arg(&args[0], symbols)?;
            if !(0..=15).contains(&n) {
                return Err(CompileErrKind::AlignTooLarge(n));
            }
            data.pad_to(1 << n);
            Ok(())
        },
        Directive::Balign => {
            expect_args(args, 1, 1)?;

            let n = numeric_arg(&args[0], symbols)?;
            let modulus = u32::try_from(n).ok()
                .filter(|m| m.is_power_of_two())
                .ok_or(CompileErrKind::NotPowerOfTwo(n))?;
            if i128::from(modulus) > MAX_SPACE {
                return Err(CompileErrKind::InvalidArgument(args[0].text.clone()));
            }
            data.pad_to(modulus);
            Ok(())
        },
    }
}

fn expect_args(args: &[OperandTokens], min: usize, max: usize) -> Result<(), CompileErrKind> {
    match (min..=max).contains(&args.len()) {
        true  => Ok(()),
        false => Err(CompileErrKind::WrongArgCount(args.len())),
    }
}

/// Reads a numeric directive argument: a number, an immediate, or a defined constant.
fn numeric_arg(arg: &OperandTokens, symbols: &SymbolTable) -> Result<i128, CompileErrKind> {
    match &arg.tokens[..] {
        [Token::Num(n)] => Ok(*n),
        [Token::Imm(imm)] => Ok(i128::from(imm.value)),
        [Token::Ident(name) | Token::HashIdent(name)] => symbols.get(name)
            .map(i128::from)
            .ok_or_else(|| CompileErrKind::UnknownSymbol(name.clone())),
        _ => Err(CompileErrKind::InvalidArgument(arg.text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{process, DataImage, Directive, SymbolTable};
    use crate::asm::CompileErrKind;
    use crate::parse::{parse_line, LineBody};

    /// Runs directive lines against a fresh symbol table and data image.
    fn run(lines: &[&str]) -> Result<(SymbolTable, DataImage), CompileErrKind> {
        let mut symbols = SymbolTable::new();
        let mut data = DataImage::new();

        for line in lines {
            let line = parse_line(line)?;
            if let Some(label) = line.label {
                data.bind(&label)?;
            }
            let Some(LineBody::Directive { name, args }) = line.body else {
                panic!("expected directive")
            };
            let directive = Directive::from_name(&name).unwrap();
            process(directive, &args, &mut symbols, &mut data)?;
        }

        Ok((symbols, data))
    }
    fn words(lines: &[&str]) -> Vec<u32> {
        run(lines).unwrap().1.words().to_vec()
    }

    #[test]
    fn byte_then_word() {
        assert_eq!(words(&[".byte 1,2,3,4", ".word 0xAABBCCDD"]), [0x04030201, 0xAABBCCDD]);
    }

    #[test]
    fn partial_words() {
        assert_eq!(words(&[".byte 0x11"]), [0x11]);
        assert_eq!(words(&[".byte 0x11", ".hword 0x3322"]), [0x332211]);
        assert_eq!(words(&[".hword 1, 2, 3"]), [0x0002_0001, 0x0000_0003]);
        // unaligned words straddle
        assert_eq!(words(&[".byte 0xFF", ".word 0x44332211"]), [0x332211FF, 0x44]);
        assert_eq!(words(&[".quad 0x1122334455667788"]), [0x55667788, 0x11223344]);
    }

    #[test]
    fn negative_and_truncated() {
        assert_eq!(words(&[".byte -1, 0x1FF"]), [0xFFFF]);
        assert_eq!(words(&[".word -2"]), [0xFFFFFFFE]);
        assert_eq!(words(&[".hword -1", ".hword 0"]), [0x0000FFFF]);
    }

    #[test]
    fn strings() {
        assert_eq!(words(&[r#".ascii "abc""#]), [0x00636261]);
        assert_eq!(words(&[r#".asciz "abcd""#]), [0x64636261, 0]);
        assert_eq!(words(&[r#".ascii "ab", "cd""#]), [0x64636261]);

        let (_, data) = run(&[r#".asciz "hi""#]).unwrap();
        assert_eq!(data.cursor(), 3);

        assert_eq!(words(&[r#".asciz "\\""#]), [0x005C]);
        assert_eq!(words(&[r#".ascii "a\\", "b""#]), [0x00625C61]);
    }

    #[test]
    fn space_and_align() {
        let (_, data) = run(&[".space 5"]).unwrap();
        assert_eq!(data.cursor(), 5);
        assert_eq!(data.words(), [0, 0]);

        assert_eq!(words(&[".space 2, 0xAB"]), [0xABAB]);

        let (_, data) = run(&[".byte 1", ".align 2", ".byte 2"]).unwrap();
        assert_eq!(data.words(), [1, 2]);

        let (_, data) = run(&[".byte 1", ".balign 8", "here: .byte 2"]).unwrap();
        assert_eq!(data.words(), [1, 0, 2]);
        assert_eq!(data.lookup("here"), Some(8));

        // already aligned
        let (_, data) = run(&[".word 1", ".align 2"]).unwrap();
        assert_eq!(data.cursor(), 4);

        assert_eq!(run(&[".align 16"]).unwrap_err(), CompileErrKind::AlignTooLarge(16));
        assert_eq!(run(&[".balign 6"]).unwrap_err(), CompileErrKind::NotPowerOfTwo(6));
        assert_eq!(run(&[".balign 0"]).unwrap_err(), CompileErrKind::NotPowerOfTwo(0));
    }

    #[test]
    fn balign_bounds() {
        let (_, data) = run(&[".byte 1", ".balign 65536"]).unwrap();
        assert_eq!(data.cursor(), 65536);
        assert_eq!(data.words().len(), 16384);
        assert_eq!(data.words()[0], 1);

        let (_, data) = run(&[".byte 1, 2, 3, 4, 5", ".balign 4", "x: .byte 9"]).unwrap();
        assert_eq!(data.words(), [0x04030201, 5, 9]);
        assert_eq!(data.lookup("x"), Some(8));

        assert_eq!(
            run(&[".byte 1", ".balign 0x20000"]).unwrap_err(),
            CompileErrKind::InvalidArgument("0x20000".to_string())
        );
        assert_eq!(
            run(&[".balign 0x80000000"]).unwrap_err(),
            CompileErrKind::InvalidArgument("0x80000000".to_string())
        );
    }

    #[test]
    fn labels_bind_before_directive() {
        let (_, data) = run(&["a: .byte 1, 2", "b: .word 7", "c: .asciz \"x\""]).unwrap();
        assert_eq!(data.lookup("a"), Some(0));
        assert_eq!(data.lookup("b"), Some(2));
        assert_eq!(data.lookup("c"), Some(6));

        assert_eq!(
            run(&["a: .byte 1", "a: .byte 2"]).unwrap_err(),
            CompileErrKind::DuplicateLabel("a".to_string())
        );
    }

    #[test]
    fn constants() {
        let (symbols, data) = run(&[".equ SIZE, 4", ".equ size, 8", ".word SIZE", ".eqv TWICE, size", ".byte twice"]).unwrap();
        assert_eq!(symbols.get("size"), Some(8));
        assert_eq!(symbols.get("twice"), Some(8));
        assert_eq!(data.words(), [8, 8]);

        assert_eq!(
            run(&[".equiv a, 1", ".equiv a, 2"]).unwrap_err(),
            CompileErrKind::SymbolDefined("a".to_string())
        );
        assert_eq!(
            run(&[".eqv a, 1", ".set a, 2"]).map(|(s, _)| s.get("a")),
            Ok(Some(2))
        );
        assert_eq!(
            run(&[".equ x, undefined"]).unwrap_err(),
            CompileErrKind::UnknownSymbol("undefined".to_string())
        );
        assert_eq!(
            run(&[".equ sp, 1"]).unwrap_err(),
            CompileErrKind::ReservedName("sp".to_string())
        );
        assert_eq!(run(&[".equ x"]).unwrap_err(), CompileErrKind::WrongArgCount(1));
    }

    #[test]
    fn substitution() {
        let mut symbols = SymbolTable::new();
        symbols.define("off", 8, false).unwrap();

        let line = parse_line("ldr r0, [r1, #OFF]").unwrap();
        let Some(LineBody::Instr { mut operands, .. }) = line.body else { unreachable!() };
        symbols.substitute(&mut operands[1].tokens);
        assert_eq!(
            crate::parse::classify(&operands[1].tokens).map(|k| k.to_string()),
            Some("[r1, #8]".to_string())
        );
    }
}
