//! Instruction encoding: form selection and byte emission.
//!
//! The entry point is `encode`, which picks the cheapest legal form for an
//! opcode and operand list and appends the instruction to a `CodeBuffer`.
//! Branch suffixes can also be emitted separately, because forward
//! branches are usually sized only after the code they skip has been
//! emitted.

use crate::binemit::CodeBuffer;
use crate::isa::opcodes::{Opcode, OpcodeClass};
use crate::isa::{Operand, TYPE_OMITTED};
use crate::result::{CodegenError, CodegenResult};
use crate::version::Version;

/// A branch suffix: polarity plus the already-computed offset.
///
/// Offsets 0 and 1 do not transfer control; they mean "return false" and
/// "return true" respectively. All other targets obey
/// `target = pc_after_branch + offset - 2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    /// Branch when the condition is true (`1`) or when it is false (`0`).
    pub on_true: bool,
    /// The signed branch offset.
    pub offset: i32,
}

impl Branch {
    /// The offset value encoding "return false from the current routine".
    pub const RFALSE: i32 = 0;
    /// The offset value encoding "return true from the current routine".
    pub const RTRUE: i32 = 1;

    /// Does this offset fit the one-byte form? The six-bit field is
    /// unsigned, so anything negative needs the long form.
    pub fn is_short(offset: i32) -> bool {
        (0..=63).contains(&offset)
    }

    /// Encoded size in bytes for a given offset.
    pub fn len_for(offset: i32) -> u32 {
        if Self::is_short(offset) {
            1
        } else {
            2
        }
    }

    /// Append the branch byte or bytes.
    pub fn emit(self, buf: &mut CodeBuffer) -> CodegenResult<()> {
        let sense = if self.on_true { 0x80 } else { 0x00 };
        if Self::is_short(self.offset) {
            buf.put1(sense | 0x40 | self.offset as u8);
        } else {
            if self.offset < -8192 || self.offset > 8191 {
                return Err(CodegenError::BranchOutOfRange(self.offset));
            }
            let off = (self.offset as u16) & 0x3FFF;
            buf.put1(sense | (off >> 8) as u8);
            buf.put1(off as u8);
        }
        Ok(())
    }
}

/// The signed displacement a `jump` operand must carry to land on
/// `target` when the instruction ends at `pc_after`.
pub fn jump_displacement(pc_after: u32, target: u32) -> i64 {
    i64::from(target) - i64::from(pc_after) + 2
}

/// Encode one instruction into `buf`.
///
/// `store` and `branch` must match what the opcode requires in `version`;
/// passing `branch: None` for a branch opcode is allowed so the caller can
/// append the branch bytes itself once the offset is known.
pub fn encode(
    buf: &mut CodeBuffer,
    version: Version,
    op: Opcode,
    operands: &[Operand],
    store: Option<u8>,
    branch: Option<Branch>,
) -> CodegenResult<()> {
    match op.class() {
        OpcodeClass::Zero => {
            if !operands.is_empty() {
                return Err(CodegenError::TooManyOperands(operands.len(), "short 0OP"));
            }
            buf.put1(0xB0 | (op.number() & 0x0F));
        }
        OpcodeClass::One => {
            if operands.len() != 1 {
                return Err(CodegenError::BadOperandCount(operands.len()));
            }
            buf.put1(0x80 | (operands[0].type_bits() << 4) | (op.number() & 0x0F));
            emit_operands(buf, operands);
        }
        OpcodeClass::Two => {
            if operands.len() == 2 && operands.iter().all(|o| o.fits_long_form()) {
                // Long form: one type bit per operand, 0 = small constant,
                // 1 = variable.
                let mut byte = op.number() & 0x1F;
                if let Operand::Variable(_) = operands[0] {
                    byte |= 0x40;
                }
                if let Operand::Variable(_) = operands[1] {
                    byte |= 0x20;
                }
                buf.put1(byte);
                emit_operands(buf, operands);
            } else {
                // A large constant, or a count other than two, forces the
                // variable form with the 2OP bit clear.
                if operands.is_empty() || operands.len() > 4 {
                    return Err(CodegenError::BadOperandCount(operands.len()));
                }
                buf.put1(0xC0 | (op.number() & 0x1F));
                emit_type_byte(buf, operands);
                emit_operands(buf, operands);
            }
        }
        OpcodeClass::Var => {
            let limit = if op.has_double_type_byte() { 8 } else { 4 };
            if operands.len() > limit {
                return Err(CodegenError::TooManyOperands(operands.len(), "variable"));
            }
            buf.put1(0xE0 | (op.number() & 0x1F));
            if op.has_double_type_byte() {
                emit_type_byte(buf, &operands[..operands.len().min(4)]);
                emit_type_byte(buf, if operands.len() > 4 { &operands[4..] } else { &[] });
            } else {
                emit_type_byte(buf, operands);
            }
            emit_operands(buf, operands);
        }
        OpcodeClass::Ext => {
            if !version.at_least(5) {
                return Err(CodegenError::ExtendedForm(version));
            }
            if operands.len() > 4 {
                return Err(CodegenError::TooManyOperands(operands.len(), "extended"));
            }
            buf.put1(0xBE);
            buf.put1(op.number());
            emit_type_byte(buf, operands);
            emit_operands(buf, operands);
        }
    }

    if let Some(var) = store {
        buf.put1(var);
    }
    if let Some(b) = branch {
        b.emit(buf)?;
    }
    Ok(())
}

/// Pack up to four two-bit operand type fields into one byte, filling the
/// tail with the "omitted" tag.
fn emit_type_byte(buf: &mut CodeBuffer, operands: &[Operand]) {
    debug_assert!(operands.len() <= 4);
    let mut byte = 0;
    for i in 0..4 {
        let bits = operands
            .get(i)
            .map(|o| o.type_bits())
            .unwrap_or(TYPE_OMITTED);
        byte = (byte << 2) | bits;
    }
    buf.put1(byte);
}

fn emit_operands(buf: &mut CodeBuffer, operands: &[Operand]) {
    for op in operands {
        match *op {
            Operand::Large(v) => buf.put2(v),
            Operand::Small(v) => buf.put1(v),
            Operand::Variable(v) => buf.put1(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: u8) -> Version {
        Version::new(n).unwrap()
    }

    #[test]
    fn short_0op() {
        let mut buf = CodeBuffer::new();
        encode(&mut buf, v(3), Opcode::Quit, &[], None, None).unwrap();
        encode(&mut buf, v(3), Opcode::NewLine, &[], None, None).unwrap();
        assert_eq!(buf.bytes(), &[0xBA, 0xBB]);
    }

    #[test]
    fn long_2op() {
        // add #2,#3 -> sp
        let mut buf = CodeBuffer::new();
        encode(
            &mut buf,
            v(3),
            Opcode::Add,
            &[Operand::Small(2), Operand::Small(3)],
            Some(0),
            None,
        )
        .unwrap();
        assert_eq!(buf.bytes(), &[0x14, 0x02, 0x03, 0x00]);

        // add local1,G10 -> sp: both variables set the type bits.
        let mut buf = CodeBuffer::new();
        encode(
            &mut buf,
            v(3),
            Opcode::Add,
            &[Operand::Variable(1), Operand::Variable(0x10)],
            Some(0),
            None,
        )
        .unwrap();
        assert_eq!(buf.bytes(), &[0x74, 0x01, 0x10, 0x00]);
    }

    #[test]
    fn large_const_promotes_2op_to_var() {
        // je local1, #0x1234 ?~label
        let mut buf = CodeBuffer::new();
        encode(
            &mut buf,
            v(3),
            Opcode::Je,
            &[Operand::Variable(1), Operand::Large(0x1234)],
            None,
            Some(Branch {
                on_true: false,
                offset: 5,
            }),
        )
        .unwrap();
        // 11 0 00001, types 10 00 11 11, var slot, word, short branch.
        assert_eq!(buf.bytes(), &[0xC1, 0x8F, 0x01, 0x12, 0x34, 0x45]);
    }

    #[test]
    fn true_var_form() {
        // call_vs #0x0102, #5 -> sp
        let mut buf = CodeBuffer::new();
        encode(
            &mut buf,
            v(3),
            Opcode::CallVs,
            &[Operand::Large(0x0102), Operand::Small(5)],
            Some(0),
            None,
        )
        .unwrap();
        assert_eq!(buf.bytes(), &[0xE0, 0x1F, 0x01, 0x02, 0x05, 0x00]);
    }

    #[test]
    fn double_type_byte_call() {
        let ops: Vec<Operand> = (0..8).map(|i| Operand::Small(i as u8)).collect();
        let mut buf = CodeBuffer::new();
        encode(&mut buf, v(5), Opcode::CallVs2, &ops, Some(0), None).unwrap();
        // 8 small constants: both type bytes are 01 01 01 01.
        assert_eq!(buf.bytes()[0], 0xEC);
        assert_eq!(buf.bytes()[1], 0x55);
        assert_eq!(buf.bytes()[2], 0x55);
        assert_eq!(buf.bytes().len(), 3 + 8 + 1);
    }

    #[test]
    fn extended_form() {
        let mut buf = CodeBuffer::new();
        encode(
            &mut buf,
            v(5),
            Opcode::LogShift,
            &[Operand::Variable(1), Operand::Small(4)],
            Some(0),
            None,
        )
        .unwrap();
        assert_eq!(buf.bytes(), &[0xBE, 0x02, 0x9F, 0x01, 0x04, 0x00]);

        let mut buf = CodeBuffer::new();
        let err = encode(&mut buf, v(4), Opcode::LogShift, &[], None, None);
        assert!(err.is_err());
    }

    #[test]
    fn branch_forms() {
        // Short positive offsets use one byte; everything else two.
        let mut buf = CodeBuffer::new();
        Branch {
            on_true: true,
            offset: 2,
        }
        .emit(&mut buf)
        .unwrap();
        assert_eq!(buf.bytes(), &[0xC2]);

        let mut buf = CodeBuffer::new();
        Branch {
            on_true: true,
            offset: 64,
        }
        .emit(&mut buf)
        .unwrap();
        assert_eq!(buf.bytes(), &[0x80, 0x40]);

        let mut buf = CodeBuffer::new();
        Branch {
            on_true: false,
            offset: -2,
        }
        .emit(&mut buf)
        .unwrap();
        assert_eq!(buf.bytes(), &[0x3F, 0xFE]);

        assert!(Branch {
            on_true: true,
            offset: 9000,
        }
        .emit(&mut CodeBuffer::new())
        .is_err());
    }

    #[test]
    fn branch_rfalse_rtrue_are_short() {
        let mut buf = CodeBuffer::new();
        Branch {
            on_true: true,
            offset: Branch::RTRUE,
        }
        .emit(&mut buf)
        .unwrap();
        Branch {
            on_true: false,
            offset: Branch::RFALSE,
        }
        .emit(&mut buf)
        .unwrap();
        assert_eq!(buf.bytes(), &[0xC1, 0x40]);
    }
}
