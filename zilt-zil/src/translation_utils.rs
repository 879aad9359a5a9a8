//! Helper functions shared by the translators: operand classification,
//! compile-time folding, and branch reservation.

use crate::ast::Expr;
use crate::code_translator::{translate_form, FormValue};
use crate::environ::ZilResult;
use crate::program_translator::ProgramTranslator;
use crate::state::TranslationState;
use zilt_codegen::binemit::{CodeBuffer, CodeOffset};
use zilt_codegen::isa::{encode, Opcode, Operand};
use zilt_codegen::text::zscii;
use zilt_codegen::CodegenError;

/// Truncate a source integer into the Z-machine's 16-bit world.
pub fn word_of(n: i32) -> u16 {
    n as u16
}

/// The operand for a known integer: small when it fits a byte,
/// large otherwise. Negative values are two's-complemented into 16 bits
/// first, so they are always large.
pub fn operand_for_number(n: i32) -> Operand {
    let word = word_of(n);
    if word <= 0xFF {
        Operand::Small(word as u8)
    } else {
        Operand::Large(word)
    }
}

/// Map an AST node to a classified operand, emitting evaluation code for
/// nested expressions first.
///
/// Name resolution falls back through the scopes in a fixed order.
/// A `.NAME` that is not a local is diagnosed and retried as a global,
/// constant or object; a bare atom tries constant, object, global and
/// finally routine. Whatever matches nothing at all becomes a default
/// value with a warning, keeping the compilation alive for diagnosis.
pub fn classify_operand(
    expr: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<Operand> {
    match expr {
        Expr::Number(n) => Ok(operand_for_number(*n)),
        Expr::Char(c) => Ok(Operand::Small(zscii(*c).unwrap_or(b'?'))),
        Expr::LocalVar(name) => {
            if let Some(slot) = state.local(name) {
                return Ok(Operand::Variable(slot));
            }
            if let Some(slot) = env.global_slot(name) {
                env.diags.warn(
                    "ZIL0204",
                    format!(
                        "in {}: .{} is not a local, using global",
                        state.routine_name, name
                    ),
                )?;
                return Ok(Operand::Variable(slot));
            }
            if let Some(value) = env.constant(name) {
                env.diags.warn(
                    "ZIL0204",
                    format!(
                        "in {}: .{} is not a local, using constant",
                        state.routine_name, name
                    ),
                )?;
                return Ok(operand_for_number(value));
            }
            if let Some(number) = env.object_number(name) {
                env.diags.warn(
                    "ZIL0204",
                    format!(
                        "in {}: .{} is not a local, using object",
                        state.routine_name, name
                    ),
                )?;
                return Ok(operand_for_number(i32::from(number)));
            }
            env.diags.warn(
                "ZIL0204",
                format!("in {}: .{} is not defined, using 1", state.routine_name, name),
            )?;
            Ok(Operand::Small(1))
        }
        Expr::GlobalVar(name) => {
            if let Some(slot) = env.global_slot(name) {
                return Ok(Operand::Variable(slot));
            }
            if let Some(number) = env.object_number(name) {
                return Ok(operand_for_number(i32::from(number)));
            }
            if let Some(value) = env.constant(name) {
                return Ok(operand_for_number(value));
            }
            // Whatever is left is taken to be a routine. If it never gets
            // defined, the placeholder resolves to FALSE and the missing
            // set says so at the end of the compilation.
            env.routine_operand(name)
        }
        Expr::Atom(name) => {
            if let Some(value) = env.constant(name) {
                return Ok(operand_for_number(value));
            }
            if let Some(number) = env.object_number(name) {
                return Ok(operand_for_number(i32::from(number)));
            }
            if let Some(slot) = env.global_slot(name) {
                return Ok(Operand::Variable(slot));
            }
            if env.is_routine(name) {
                return env.routine_operand(name);
            }
            env.diags.warn(
                "ZIL0506",
                format!(
                    "in {}: {} is not defined, using 0",
                    state.routine_name, name
                ),
            )?;
            Ok(Operand::Small(0))
        }
        Expr::Str(text) => {
            let string = env.intern_string(text)?;
            Ok(Operand::Large(
                zilt_codegen::binemit::string_placeholder(string),
            ))
        }
        Expr::Table(table) => {
            let table = crate::table_translator::translate_table(table, env)?;
            Ok(Operand::Large(zilt_codegen::binemit::table_placeholder(
                table,
            )))
        }
        Expr::Form(form) => {
            // A fully constant form classifies as its folded value, so
            // downstream encoding cannot tell it from the literal.
            if let Some(value) = fold_form(form, env) {
                return Ok(operand_for_number(value));
            }
            match translate_form(form, buf, state, env)? {
                FormValue::Stack => Ok(Operand::Variable(0)),
                FormValue::Slot(slot) => Ok(Operand::Variable(slot)),
                // A void operation's value is defined to be true.
                FormValue::Void => Ok(Operand::Small(1)),
            }
        }
        Expr::Cond(cond) => {
            crate::code_translator::translate_cond_node(cond, buf, state, env)?;
            Ok(Operand::Variable(0))
        }
        Expr::Repeat(repeat) => {
            crate::code_translator::translate_repeat_node(repeat, buf, state, env)?;
            Ok(Operand::Variable(0))
        }
        Expr::List(_) => {
            env.diags.warn(
                "ZIL0506",
                format!("in {}: list in operand position, using 0", state.routine_name),
            )?;
            Ok(Operand::Small(0))
        }
    }
}

/// Evaluate an expression so its value is on the stack.
pub fn translate_expr_to_stack(
    expr: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let operand = classify_operand(expr, buf, state, env)?;
    push_value(operand, buf, env)
}

/// Push an already-classified value onto the stack. A stack operand is
/// already there.
pub fn push_value(
    operand: Operand,
    buf: &mut CodeBuffer,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    if operand == Operand::Variable(0) {
        return Ok(());
    }
    encode(
        buf,
        env.options.version,
        Opcode::Add,
        &[Operand::Small(0), operand],
        Some(0),
        None,
    )?;
    Ok(())
}

/// Fold an expression to a compile-time integer, when every leaf is a
/// constant. Folding is local: it never looks through variables.
pub fn const_value(expr: &Expr, env: &ProgramTranslator) -> Option<i32> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Char(c) => zscii(*c).map(i32::from),
        Expr::Atom(name) | Expr::GlobalVar(name) => env.constant(name),
        Expr::Form(form) => fold_form(form, env),
        _ => None,
    }
}

/// Fold a form to a compile-time integer when all of its operands fold.
pub fn fold_form(form: &crate::ast::FormNode, env: &ProgramTranslator) -> Option<i32> {
    let vals: Vec<i32> = {
        let mut vals = Vec::with_capacity(form.operands.len());
        for operand in &form.operands {
            vals.push(const_value(operand, env)?);
        }
        vals
    };
    match form.op.as_str() {
        "+" | "ADD" => Some(reduce(&vals, 0, |a, b| a.wrapping_add(b))),
        "*" | "MUL" => Some(reduce(&vals, 1, |a, b| a.wrapping_mul(b))),
        "-" | "SUB" => match vals.len() {
            1 => Some(truncate(vals[0].wrapping_neg())),
            _ => Some(reduce(&vals, 0, |a, b| a.wrapping_sub(b))),
        },
        "/" | "DIV" => match vals.len() {
            0 => Some(1),
            // Integer reciprocal: only +-1 survive.
            1 => match vals[0] {
                0 => None,
                n => Some(1 / n),
            },
            _ => vals[1..].iter().try_fold(vals[0], |a, &b| {
                if b == 0 {
                    None
                } else {
                    Some(truncate(a / b))
                }
            }),
        },
        "MOD" => {
            if vals.len() == 2 && vals[1] != 0 {
                Some(truncate(vals[0] % vals[1]))
            } else {
                None
            }
        }
        "MIN" => vals.into_iter().min(),
        "MAX" => vals.into_iter().max(),
        "ABS" if vals.len() == 1 => Some(truncate(vals[0].wrapping_abs())),
        "BCOM" if vals.len() == 1 => Some(truncate(!vals[0])),
        "XOR" | "BXOR" if vals.len() == 2 => Some(truncate(vals[0] ^ vals[1])),
        "BAND" | "ANDB" => Some(reduce(&vals, -1, |a, b| a & b)),
        "BOR" | "ORB" => Some(reduce(&vals, 0, |a, b| a | b)),
        _ => None,
    }
}

fn reduce(vals: &[i32], identity: i32, f: fn(i32, i32) -> i32) -> i32 {
    match vals.split_first() {
        None => identity,
        Some((&first, rest)) => rest.iter().fold(first, |a, &b| truncate(f(a, b))),
    }
}

fn truncate(n: i32) -> i32 {
    i32::from(n as i16)
}

/// Reserve a two-byte (long form) branch whose offset is patched later
/// with `bind_branch`. Returns the offset of the reserved bytes.
pub fn reserve_branch(buf: &mut CodeBuffer, on_true: bool) -> CodeOffset {
    let at = buf.len();
    buf.put1(if on_true { 0x80 } else { 0x00 });
    buf.put1(0);
    at
}

/// Point a reserved branch at `target`.
pub fn bind_branch(buf: &mut CodeBuffer, at: CodeOffset, target: CodeOffset) -> ZilResult<()> {
    let disp = i64::from(target) - i64::from(at + 2) + 2;
    if disp < -8192 || disp > 8191 {
        return Err(CodegenError::BranchOutOfRange(disp as i32).into());
    }
    let off = (disp as i16 as u16) & 0x3FFF;
    let sense = buf.byte_at(at) & 0x80;
    buf.patch1(at, sense | (off >> 8) as u8);
    buf.patch1(at + 1, off as u8);
    Ok(())
}

/// Is this statement a control transfer after which nothing runs?
pub fn is_terminator(expr: &Expr) -> bool {
    match expr.form_name() {
        Some(name) => match name {
            "RTRUE" | "RFALSE" | "RETURN" | "AGAIN" | "QUIT" | "RESTART" | "RSTACK"
            | "PRINTR" => true,
            _ => false,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_classification() {
        assert_eq!(operand_for_number(0), Operand::Small(0));
        assert_eq!(operand_for_number(255), Operand::Small(255));
        assert_eq!(operand_for_number(256), Operand::Large(256));
        assert_eq!(operand_for_number(-1), Operand::Large(0xFFFF));
        assert_eq!(operand_for_number(-300), Operand::Large(0xFED4));
    }

    #[test]
    fn branch_reserve_and_bind() {
        let mut buf = CodeBuffer::new();
        buf.put1(0xAA);
        let at = reserve_branch(&mut buf, true);
        buf.put_slice(&[0, 0, 0, 0]);
        let target = buf.len();
        bind_branch(&mut buf, at, target).unwrap();
        // Branch ends at 3; target 7; offset 7 - 3 + 2 = 6, long form,
        // sense preserved.
        assert_eq!(&buf.bytes()[1..3], &[0x80, 0x06]);
    }
}
