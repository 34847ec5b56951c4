//! Validating and building instructions.
//!
//! Each instruction line is checked against the operand shapes its opcode permits:
//! operand count, register classes, and immediate ranges and alignments.
//! Only lines that pass become an [`Instruction`].

use crate::ast::{reg_consts, Cond, Indirect, Instruction, Offset, Opcode, Operand, OperandKind, Reg};
use crate::parse::lex::Token;
use crate::parse::{classify, OperandTokens};

use super::CompileErrKind;

/// Splits a mnemonic into its opcode and (for `B`) its condition.
pub fn lookup_mnemonic(mnemonic: &str) -> Result<(Opcode, Option<Cond>), CompileErrKind> {
    if let Some(opcode) = Opcode::from_name(mnemonic) {
        return Ok((opcode, None));
    }

    match mnemonic.strip_prefix('b') {
        Some(suffix) if suffix.len() == 2 => Cond::from_suffix(suffix)
            .map(|c| (Opcode::B, Some(c)))
            .ok_or_else(|| CompileErrKind::InvalidCondition(suffix.to_string())),
        _ => Err(CompileErrKind::UnknownMnemonic(mnemonic.to_string()))
    }
}

/// Validates an instruction line and builds the instruction.
///
/// Constants should already have been substituted into the operand tokens.
pub(crate) fn build(mnemonic: &str, groups: &[OperandTokens], line: usize) -> Result<Instruction, CompileErrKind> {
    let (opcode, cond) = lookup_mnemonic(mnemonic)?;

    let operands = match opcode {
        Opcode::B | Opcode::Bl => groups.iter()
            .map(classify_label)
            .collect::<Result<Vec<_>, _>>()?,
        _ => groups.iter()
            .map(|g| classify(&g.tokens).map(Operand::new).ok_or_else(|| CompileErrKind::InvalidOperand(g.text.clone())))
            .collect::<Result<Vec<_>, _>>()?
    };
    let sets_flags = validate(opcode, &operands)?;

    Ok(Instruction::new(opcode, cond, mnemonic, operands, line, sets_flags))
}

/// Branch targets are written as bare identifiers.
fn classify_label(group: &OperandTokens) -> Result<Operand, CompileErrKind> {
    match &group.tokens[..] {
        [Token::Ident(label)] if !matches!(label.as_str(), "sp" | "lr" | "pc") => {
            Ok(Operand::new(OperandKind::LabelRef(label.clone())))
        },
        _ => Err(CompileErrKind::ExpectedLabel(group.text.clone()))
    }
}

/// Checks the operands of an opcode,
/// returning whether the accepted form updates the condition flags.
fn validate(opcode: Opcode, ops: &[Operand]) -> Result<bool, CompileErrKind> {
    match opcode {
        Opcode::Mov => {
            let [rd, src] = expect_ops::<2>(ops)?;
            let rd_reg = match rd.kind {
                OperandKind::LowRegister(r) | OperandKind::HighRegister(r) => r,
                _ => return Err(CompileErrKind::InvalidDestination(rd.raw.clone())),
            };
            match (&src.kind, src.kind.as_imm()) {
                (k, None) if k.as_reg().is_some() => Ok(rd_reg.is_low() && k.as_low_reg().is_some()),
                (_, Some(n)) if rd_reg.is_low() => imm_range(n, 255, 1).map(|_| true),
                (_, Some(_)) => Err(CompileErrKind::ImmNotAllowed(src.raw.clone())),
                _ => Err(CompileErrKind::InvalidOperand(src.raw.clone())),
            }
        },
        Opcode::Add => match ops {
            [rd, src] => validate_add_short(rd, src),
            [rd, rn, x] => validate_add_long(rd, rn, x),
            _ => Err(count_err("2 or 3", ops)),
        },
        Opcode::Sub => match ops {
            [rd, x] => match (&rd.kind, x.kind.as_imm()) {
                (OperandKind::SpRegister, Some(n)) => imm_range(n, 508, 4).map(|_| false),
                (OperandKind::SpRegister, None) => Err(CompileErrKind::InvalidOperand(x.raw.clone())),
                _ => {
                    low(rd)?;
                    match x.kind.as_imm() {
                        Some(n) => imm_range(n, 255, 1)?,
                        None => { low(x)?; },
                    }
                    Ok(true)
                }
            },
            [rd, rn, x] => match (&rd.kind, &rn.kind, x.kind.as_imm()) {
                (OperandKind::SpRegister, OperandKind::SpRegister, Some(n)) => imm_range(n, 508, 4).map(|_| false),
                _ => {
                    let (d, n) = (low(rd)?, low(rn)?);
                    match x.kind.as_imm() {
                        Some(imm) => imm_range(imm, if d == n { 255 } else { 7 }, 1)?,
                        None => { low(x)?; },
                    }
                    Ok(true)
                }
            },
            _ => Err(count_err("2 or 3", ops)),
        },
        Opcode::Neg => {
            let [rd, rm] = expect_ops::<2>(ops)?;
            low(rd)?;
            low(rm)?;
            Ok(true)
        },
        Opcode::Mul => match ops {
            [rd, rm] => {
                low(rd)?;
                low(rm)?;
                Ok(true)
            },
            [rd, rn, rm] => {
                let (d, n, m) = (low(rd)?, low(rn)?, low(rm)?);
                if d != n && d != m {
                    return Err(CompileErrKind::MustAlias);
                }
                Ok(true)
            },
            _ => Err(count_err("2 or 3", ops)),
        },
        Opcode::Cmp => {
            let [rn, x] = expect_ops::<2>(ops)?;
            let rn_reg = match rn.kind {
                OperandKind::PcRegister => return Err(CompileErrKind::InvalidOperand(rn.raw.clone())),
                ref k => k.as_reg().ok_or_else(|| CompileErrKind::ExpectedReg(rn.raw.clone()))?,
            };
            match (&x.kind, x.kind.as_imm()) {
                (_, Some(n)) if rn_reg.is_low() => imm_range(n, 255, 1).map(|_| true),
                (_, Some(_)) => Err(CompileErrKind::ImmNotAllowed(x.raw.clone())),
                (OperandKind::PcRegister, None) => Err(CompileErrKind::InvalidOperand(x.raw.clone())),
                (k, None) if k.as_reg().is_some() => Ok(true),
                _ => Err(CompileErrKind::InvalidOperand(x.raw.clone())),
            }
        },
        | Opcode::Cmn
        | Opcode::And
        | Opcode::Bic
        | Opcode::Orr
        | Opcode::Eor
        | Opcode::Mvn
        | Opcode::Tst => {
            let [rd, rm] = expect_ops::<2>(ops)?;
            low(rd)?;
            low(rm)?;
            Ok(true)
        },
        Opcode::Lsl | Opcode::Lsr | Opcode::Asr | Opcode::Ror => {
            let (rd, rm, shift) = match ops {
                [rd, shift] => (rd, rd, shift),
                [rd, rm, shift] => (rd, rm, shift),
                _ => return Err(count_err("2 or 3", ops)),
            };
            low(rd)?;
            low(rm)?;
            match shift.kind.as_imm() {
                Some(_) if opcode == Opcode::Ror => return Err(CompileErrKind::ImmNotAllowed(shift.raw.clone())),
                Some(n) => imm_range(n, 31, 1)?,
                None => { low(shift)?; },
            }
            Ok(true)
        },
        | Opcode::Ldr
        | Opcode::Ldrh
        | Opcode::Ldrb
        | Opcode::Ldrsh
        | Opcode::Ldrsb
        | Opcode::Str
        | Opcode::Strh
        | Opcode::Strb => {
            let [rt, addr] = expect_ops::<2>(ops)?;
            low(rt)?;
            match addr.kind {
                OperandKind::IndirectMemory(ind) => validate_indirect(opcode, ind)?,
                OperandKind::LabelRef(_) if opcode == Opcode::Ldr => {},
                _ => return Err(CompileErrKind::ExpectedIndirect(addr.raw.clone())),
            }
            Ok(false)
        },
        Opcode::Push | Opcode::Pop => {
            let [list] = expect_ops::<1>(ops)?;
            match list.kind {
                OperandKind::RegisterList(_) => Ok(false),
                _ => Err(CompileErrKind::ExpectedRegList(list.raw.clone())),
            }
        },
        Opcode::B | Opcode::Bl => expect_ops::<1>(ops).map(|_| false),
        Opcode::Wfi => expect_ops::<0>(ops).map(|_| false),
    }
}

fn validate_add_short(rd: &Operand, src: &Operand) -> Result<bool, CompileErrKind> {
    match (&rd.kind, src.kind.as_imm()) {
        (OperandKind::PcRegister, _) => Err(CompileErrKind::InvalidDestination(rd.raw.clone())),
        (OperandKind::LowRegister(_), Some(n)) => imm_range(n, 255, 1).map(|_| true),
        (OperandKind::SpRegister, Some(n)) => imm_range(n, 508, 4).map(|_| false),
        (_, Some(_)) => Err(CompileErrKind::ImmNotAllowed(src.raw.clone())),
        (k, None) => {
            let Some(src_reg) = src.kind.as_reg() else {
                return Err(CompileErrKind::InvalidOperand(src.raw.clone()));
            };
            let rd_reg = k.as_reg().ok_or_else(|| CompileErrKind::ExpectedReg(rd.raw.clone()))?;
            Ok(rd_reg.is_low() && src_reg.is_low())
        }
    }
}

fn validate_add_long(rd: &Operand, rn: &Operand, x: &Operand) -> Result<bool, CompileErrKind> {
    if rd.kind == OperandKind::PcRegister {
        return Err(CompileErrKind::InvalidDestination(rd.raw.clone()));
    }
    let d = rd.kind.as_reg().ok_or_else(|| CompileErrKind::ExpectedReg(rd.raw.clone()))?;
    let n = rn.kind.as_reg().ok_or_else(|| CompileErrKind::ExpectedReg(rn.raw.clone()))?;

    match x.kind.as_imm() {
        Some(imm) => match (d.is_low(), n.is_low(), n == reg_consts::SP) {
            (true, true, _) => imm_range(imm, if d == n { 255 } else { 7 }, 1).map(|_| true),
            (true, false, true) => imm_range(imm, 1020, 4).map(|_| false),
            _ if d == reg_consts::SP && n == reg_consts::SP => imm_range(imm, 1020, 4).map(|_| false),
            _ if d != n => Err(CompileErrKind::MustAlias),
            _ => Err(CompileErrKind::ImmNotAllowed(x.raw.clone())),
        },
        None => {
            let m = x.kind.as_reg().ok_or_else(|| CompileErrKind::InvalidOperand(x.raw.clone()))?;
            let aliased = d == n || d == m;
            match d.is_low() && n.is_low() && m.is_low() {
                true => Ok(aliased),
                false if aliased => Ok(false),
                false => Err(CompileErrKind::MustAlias),
            }
        }
    }
}

fn validate_indirect(opcode: Opcode, Indirect { base, offset }: Indirect) -> Result<(), CompileErrKind> {
    let sp_base = base == reg_consts::SP;
    if sp_base && matches!(opcode, Opcode::Ldrsh | Opcode::Ldrsb) {
        return Err(CompileErrKind::SpBaseNotAllowed);
    }

    let Offset::Imm(n) = offset else { return Ok(()) };
    match opcode {
        Opcode::Ldr | Opcode::Str if sp_base => imm_range(n, 1020, 4),
        Opcode::Ldr | Opcode::Str => imm_range(n, 124, 4),
        Opcode::Ldrh | Opcode::Ldrsh | Opcode::Strh => imm_range(n, 62, 2),
        _ => imm_range(n, 31, 1),
    }
}

fn expect_ops<const N: usize>(ops: &[Operand]) -> Result<&[Operand; N], CompileErrKind> {
    ops.try_into().map_err(|_| count_err(match N {
        0 => "0",
        1 => "1",
        2 => "2",
        _ => "3",
    }, ops))
}
fn count_err(expected: &'static str, ops: &[Operand]) -> CompileErrKind {
    CompileErrKind::WrongOperandCount { expected, found: ops.len() }
}
fn low(op: &Operand) -> Result<Reg, CompileErrKind> {
    op.kind.as_low_reg().ok_or_else(|| CompileErrKind::ExpectedLowReg(op.raw.clone()))
}
fn imm_range(value: u32, max: u32, align: u32) -> Result<(), CompileErrKind> {
    if value > max {
        return Err(CompileErrKind::ImmOutOfRange { value, max });
    }
    if value % align != 0 {
        return Err(CompileErrKind::UnalignedImm { value, align });
    }
    Ok(())
}
