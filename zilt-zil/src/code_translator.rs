//! This module contains the bulk of the interesting code performing the
//! translation between ZIL forms and Z-machine instructions.
//!
//! The translation is done in one pass, form by form. Values live on the
//! Z-machine's evaluation stack: a form that produces a value pushes it,
//! and an enclosing form consumes it as a `Variable(0)` operand. Because
//! the machine pops operands in the order the instruction reads them,
//! nested operand expressions are evaluated right to left, so the
//! leftmost value ends up on top.
//!
//! Control flow lowers to branches and jumps. Forward branches inside a
//! single construct are sized by emitting the guarded code into a
//! temporary buffer first; non-local transfers (`RETURN` out of a block,
//! `AGAIN` back to a loop) are emitted as sentinel `jump` patterns that
//! the owning construct rewrites when it learns its exit offset, because
//! the emitting site may be arbitrarily deep in temporary buffers where
//! absolute offsets mean nothing.

use crate::ast::{CondNode, Expr, FormNode, RepeatNode};
use crate::environ::{ZilError, ZilResult};
use crate::program_translator::ProgramTranslator;
use crate::state::{BlockKind, LoopKind, SavedBinding, TranslationState};
use crate::translation_utils::{
    bind_branch, classify_operand, const_value, fold_form, is_terminator, operand_for_number,
    push_value, reserve_branch, translate_expr_to_stack,
};
use log::debug;
use smallvec::SmallVec;
use zilt_codegen::binemit::{
    targeted_exit_sentinel, CodeBuffer, CodeOffset, BLOCK_EXIT_SENTINEL, LOOP_RESTART_SENTINEL,
    ROUTINE_RESTART_SENTINEL,
};
use zilt_codegen::isa::{encode, Branch, Opcode, Operand};

/// What a translated form left behind for an enclosing expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FormValue {
    /// The value is on top of the stack.
    Stack,
    /// The value is in a named variable slot.
    Slot(u8),
    /// The operation produces no value (its value is defined to be true).
    Void,
}

/// Translate one statement, discarding its value classification.
pub(crate) fn translate_statement(
    stmt: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    match stmt {
        Expr::Form(form) => {
            translate_form(form, buf, state, env)?;
        }
        Expr::Cond(cond) => {
            translate_cond_node(cond, buf, state, env)?;
        }
        Expr::Repeat(repeat) => {
            translate_repeat_node(repeat, buf, state, env)?;
        }
        // Standalone atoms and literals generate no code.
        _ => {}
    }
    Ok(())
}

/// Translate a form in value position, reporting where its value went.
pub(crate) fn translate_value(
    expr: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    match expr {
        Expr::Form(form) => translate_form(form, buf, state, env),
        Expr::Cond(cond) => {
            translate_cond_node(cond, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        Expr::Repeat(repeat) => {
            translate_repeat_node(repeat, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        other => {
            let operand = classify_operand(other, buf, state, env)?;
            push_value(operand, buf, env)?;
            Ok(FormValue::Stack)
        }
    }
}

/// Translates one ZIL form into Z-machine instructions.
///
/// This big match treats all built-in operators; anything unrecognized is
/// a routine call if the name is a known routine, and otherwise a warning
/// with no code emitted.
pub(crate) fn translate_form(
    form: &FormNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let name = form.op.to_uppercase();
    let ops = &form.operands[..];
    match name.as_str() {
        /********************************* Control flow ***********************************
         * COND, the block constructs, the loops, and the non-local exits.
         * Each block construct pushes a frame on the block stack and one
         * on the loop stack, emits its body, then rewrites the sentinel
         * jumps that RETURN and AGAIN left behind.
         **********************************************************************************/
        "COND" => {
            translate_cond_form(ops, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        "REPEAT" | "PROG" | "BIND" => {
            let kind = match name.as_str() {
                "REPEAT" => BlockKind::Repeat,
                "PROG" => BlockKind::Prog,
                _ => BlockKind::Bind,
            };
            let (activation, bindings, body) = parse_block_shape(&name, ops, state, env)?;
            translate_block(kind, activation, &bindings, body, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        "DO" => {
            translate_do(ops, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        "MAP-CONTENTS" => {
            translate_map_contents(ops, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        "MAP-DIRECTIONS" => {
            translate_map_directions(ops, buf, state, env)?;
            Ok(FormValue::Stack)
        }
        "RETURN" => translate_return(ops, buf, state, env),
        "AGAIN" => translate_again(ops, buf, state, env),
        "RTRUE" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::Rtrue, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "RFALSE" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::Rfalse, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "RSTACK" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::RetPopped, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "QUIT" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::Quit, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "RESTART" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::Restart, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "NOOP" => {
            encode(buf, env.options.version, Opcode::Nop, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "CATCH" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::Catch, &name, state, env)?;
            encode(buf, env.options.version, Opcode::Catch, &[], Some(0), None)?;
            Ok(FormValue::Stack)
        }
        "THROW" => {
            expect_arity(&name, ops, 2, 2, state)?;
            gate(Opcode::Throw, &name, state, env)?;
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, env.options.version, Opcode::Throw, &operands, None, None)?;
            Ok(FormValue::Void)
        }

        /********************************* Arithmetic *************************************
         * The four basic operators are variadic with identity values for
         * the empty case; longer operand lists reduce left to right
         * through the stack. Anything fully constant folds here.
         **********************************************************************************/
        "+" | "ADD" => translate_arith(form, Opcode::Add, 0, buf, state, env),
        "-" | "SUB" => translate_arith(form, Opcode::Sub, 0, buf, state, env),
        "*" | "MUL" => translate_arith(form, Opcode::Mul, 1, buf, state, env),
        "/" | "DIV" => translate_arith(form, Opcode::Div, 1, buf, state, env),
        "MOD" => {
            expect_arity(&name, ops, 2, 2, state)?;
            if let Some(folded) = fold_form(form, env) {
                push_value(operand_for_number(folded), buf, env)?;
                return Ok(FormValue::Stack);
            }
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, env.options.version, Opcode::Mod, &operands, Some(0), None)?;
            Ok(FormValue::Stack)
        }
        "MIN" | "MAX" => translate_min_max(form, name.as_str() == "MAX", buf, state, env),
        "ABS" => translate_abs(form, buf, state, env),
        "BAND" | "ANDB" => translate_bitwise(form, Opcode::And, -1, buf, state, env),
        "BOR" | "ORB" => translate_bitwise(form, Opcode::Or, 0, buf, state, env),
        "BCOM" => translate_bcom(form, buf, state, env),
        "XOR" | "BXOR" => translate_xor(form, buf, state, env),
        "LSH" | "SHIFT" => {
            expect_arity(&name, ops, 2, 2, state)?;
            gate(Opcode::LogShift, &name, state, env)?;
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, env.options.version, Opcode::LogShift, &operands, Some(0), None)?;
            Ok(FormValue::Stack)
        }
        "ASH" | "ASHIFT" => {
            expect_arity(&name, ops, 2, 2, state)?;
            gate(Opcode::ArtShift, &name, state, env)?;
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, env.options.version, Opcode::ArtShift, &operands, Some(0), None)?;
            Ok(FormValue::Stack)
        }

        /********************************* Predicates *************************************
         * In value position a predicate becomes the canonical push
         * pattern: branch-on-true over "push 0, jump end" to "push 1".
         **********************************************************************************/
        "EQUAL?" | "=?" | "==?" => translate_equal(form, buf, state, env),
        "ZERO?" | "0?" => predicate_value(&name, Opcode::Jz, ops, 1, 1, buf, state, env),
        "LESS?" | "L?" => predicate_value(&name, Opcode::Jl, ops, 2, 2, buf, state, env),
        "GRTR?" | "G?" => predicate_value(&name, Opcode::Jg, ops, 2, 2, buf, state, env),
        "IN?" => predicate_value(&name, Opcode::Jin, ops, 2, 2, buf, state, env),
        "BTST" => predicate_value(&name, Opcode::Test, ops, 2, 2, buf, state, env),
        "FSET?" => {
            expect_arity(&name, ops, 2, 2, state)?;
            env.note_flag_use(ops.get(1));
            predicate_value(&name, Opcode::TestAttr, ops, 2, 2, buf, state, env)
        }
        "DLESS?" | "IGRTR?" => {
            expect_arity(&name, ops, 2, 2, state)?;
            let opcode = if name == "DLESS?" {
                Opcode::DecChk
            } else {
                Opcode::IncChk
            };
            let slot = variable_designator(&ops[0], state, env)?;
            let value = classify_operand(&ops[1], buf, state, env)?;
            predicate_from_operands(opcode, &[Operand::Small(slot), value], None, buf, env)
        }
        "ASSIGNED?" => {
            expect_arity(&name, ops, 1, 1, state)?;
            gate(Opcode::CheckArgCount, &name, state, env)?;
            let slot = variable_designator(&ops[0], state, env)?;
            predicate_from_operands(
                Opcode::CheckArgCount,
                &[Operand::Small(slot)],
                None,
                buf,
                env,
            )
        }
        "VERIFY" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::Verify, &name, state, env)?;
            predicate_from_operands(Opcode::Verify, &[], None, buf, env)
        }
        "ORIGINAL?" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::Piracy, &name, state, env)?;
            predicate_from_operands(Opcode::Piracy, &[], None, buf, env)
        }
        "FIRST?" | "NEXT?" => {
            expect_arity(&name, ops, 1, 1, state)?;
            let opcode = if name == "FIRST?" {
                Opcode::GetChild
            } else {
                Opcode::GetSibling
            };
            let operands = classify_operands(ops, buf, state, env)?;
            // The fetched object number is the predicate's value; the
            // branch decides truth.
            predicate_from_operands(opcode, &operands, Some(0), buf, env)
        }
        "INTBL?" => {
            expect_arity(&name, ops, 3, 4, state)?;
            gate(Opcode::ScanTable, &name, state, env)?;
            let operands = classify_operands(ops, buf, state, env)?;
            // scan_table stores the address (0 when absent), which is
            // exactly the value INTBL? has; route the branch to the next
            // instruction so both outcomes fall through.
            encode(
                buf,
                env.options.version,
                Opcode::ScanTable,
                &operands,
                Some(0),
                Some(Branch {
                    on_true: true,
                    offset: 2,
                }),
            )?;
            Ok(FormValue::Stack)
        }
        "NOT" => {
            expect_arity(&name, ops, 1, 1, state)?;
            predicate_value(&name, Opcode::Jz, ops, 1, 1, buf, state, env)
        }
        "AND" | "AND?" => translate_and(ops, buf, state, env),
        "OR" | "OR?" => translate_or(ops, buf, state, env),

        /******************************** Objects *****************************************/
        "MOVE" => void_op(&name, Opcode::InsertObj, ops, 2, 2, buf, state, env),
        "REMOVE" => void_op(&name, Opcode::RemoveObj, ops, 1, 1, buf, state, env),
        "FSET" | "FCLEAR" => {
            expect_arity(&name, ops, 2, 2, state)?;
            env.note_flag_use(ops.get(1));
            let opcode = if name == "FSET" {
                Opcode::SetAttr
            } else {
                Opcode::ClearAttr
            };
            void_op(&name, opcode, ops, 2, 2, buf, state, env)
        }
        "LOC" => store_op(&name, Opcode::GetParent, ops, 1, 1, buf, state, env),
        "PTSIZE" => store_op(&name, Opcode::GetPropLen, ops, 1, 1, buf, state, env),
        "GETP" => {
            env.note_property_use(ops.get(1));
            store_op(&name, Opcode::GetProp, ops, 2, 2, buf, state, env)
        }
        "GETPT" => {
            env.note_property_use(ops.get(1));
            store_op(&name, Opcode::GetPropAddr, ops, 2, 2, buf, state, env)
        }
        "NEXTP" => {
            env.note_property_use(ops.get(1));
            store_op(&name, Opcode::GetNextProp, ops, 2, 2, buf, state, env)
        }
        "PUTP" => {
            env.note_property_use(ops.get(1));
            void_op(&name, Opcode::PutProp, ops, 3, 3, buf, state, env)
        }

        /******************************** Variables and memory ****************************/
        "SET" | "SETG" => translate_set(&name, ops, buf, state, env),
        "VALUE" => {
            expect_arity(&name, ops, 1, 1, state)?;
            let designator = variable_designator_operand(&ops[0], buf, state, env)?;
            encode(
                buf,
                env.options.version,
                Opcode::Load,
                &[designator],
                Some(0),
                None,
            )?;
            Ok(FormValue::Stack)
        }
        "INC" | "DEC" => {
            expect_arity(&name, ops, 1, 1, state)?;
            let opcode = if name == "INC" { Opcode::Inc } else { Opcode::Dec };
            let slot = variable_designator(&ops[0], state, env)?;
            encode(
                buf,
                env.options.version,
                opcode,
                &[Operand::Small(slot)],
                None,
                None,
            )?;
            Ok(FormValue::Slot(slot))
        }
        "PUSH" => {
            expect_arity(&name, ops, 1, 1, state)?;
            let operands = classify_operands(ops, buf, state, env)?;
            if operands[0] == Operand::Variable(0) {
                // Already on the stack.
                return Ok(FormValue::Stack);
            }
            encode(buf, env.options.version, Opcode::Push, &operands, None, None)?;
            Ok(FormValue::Stack)
        }
        "POP" => {
            expect_arity(&name, ops, 1, 1, state)?;
            let slot = variable_designator(&ops[0], state, env)?;
            pop_to(slot, buf, env)?;
            Ok(FormValue::Slot(slot))
        }
        "FSTACK" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::Pop, &name, state, env)?;
            encode(buf, env.options.version, Opcode::Pop, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "GET" => store_op(&name, Opcode::Loadw, ops, 2, 2, buf, state, env),
        "GETB" => store_op(&name, Opcode::Loadb, ops, 2, 2, buf, state, env),
        "PUT" => void_op(&name, Opcode::Storew, ops, 3, 3, buf, state, env),
        "PUTB" => void_op(&name, Opcode::Storeb, ops, 3, 3, buf, state, env),
        "COPYT" => void_op(&name, Opcode::CopyTable, ops, 3, 3, buf, state, env),
        "ZWSTR" => void_op(&name, Opcode::EncodeText, ops, 4, 4, buf, state, env),
        "LEX" => void_op(&name, Opcode::Tokenise, ops, 2, 4, buf, state, env),
        "RANDOM" => store_op(&name, Opcode::Random, ops, 1, 1, buf, state, env),

        /******************************** Input and output ********************************/
        "TELL" => {
            translate_tell(ops, buf, state, env)?;
            Ok(FormValue::Void)
        }
        "PRINTI" => {
            expect_arity(&name, ops, 1, 1, state)?;
            translate_printi(Opcode::Print, &ops[0], buf, state, env)?;
            Ok(FormValue::Void)
        }
        "PRINTR" => {
            expect_arity(&name, ops, 1, 1, state)?;
            translate_printi(Opcode::PrintRet, &ops[0], buf, state, env)?;
            Ok(FormValue::Void)
        }
        "CRLF" => {
            expect_arity(&name, ops, 0, 0, state)?;
            encode(buf, env.options.version, Opcode::NewLine, &[], None, None)?;
            Ok(FormValue::Void)
        }
        "PRINT" => void_op(&name, Opcode::PrintPaddr, ops, 1, 1, buf, state, env),
        "PRINTB" => void_op(&name, Opcode::PrintAddr, ops, 1, 1, buf, state, env),
        "PRINTC" => void_op(&name, Opcode::PrintChar, ops, 1, 1, buf, state, env),
        "PRINTN" => void_op(&name, Opcode::PrintNum, ops, 1, 1, buf, state, env),
        "PRINTD" => void_op(&name, Opcode::PrintObj, ops, 1, 1, buf, state, env),
        "PRINTT" => void_op(&name, Opcode::PrintTable, ops, 2, 4, buf, state, env),
        "PRINTU" => void_op(&name, Opcode::PrintUnicode, ops, 1, 1, buf, state, env),
        "USL" => void_op(&name, Opcode::ShowStatus, ops, 0, 0, buf, state, env),
        "READ" => {
            let arity_max = if env.options.version.at_least(4) { 4 } else { 2 };
            expect_arity(&name, ops, 1, arity_max, state)?;
            let operands = classify_operands(ops, buf, state, env)?;
            let store = if Opcode::Sread.is_store(env.options.version) {
                Some(0)
            } else {
                None
            };
            encode(buf, env.options.version, Opcode::Sread, &operands, store, None)?;
            if store.is_some() {
                Ok(FormValue::Stack)
            } else {
                Ok(FormValue::Void)
            }
        }
        "INPUT" => store_op(&name, Opcode::ReadChar, ops, 1, 3, buf, state, env),
        "SOUND" => void_op(&name, Opcode::SoundEffect, ops, 1, 4, buf, state, env),
        "SPLIT" => void_op(&name, Opcode::SplitWindow, ops, 1, 1, buf, state, env),
        "SCREEN" => void_op(&name, Opcode::SetWindow, ops, 1, 1, buf, state, env),
        "CLEAR" => void_op(&name, Opcode::EraseWindow, ops, 1, 1, buf, state, env),
        "ERASE" => void_op(&name, Opcode::EraseLine, ops, 1, 1, buf, state, env),
        "CURSET" => void_op(&name, Opcode::SetCursor, ops, 2, 3, buf, state, env),
        "CURGET" => void_op(&name, Opcode::GetCursor, ops, 1, 1, buf, state, env),
        "HLIGHT" => void_op(&name, Opcode::SetTextStyle, ops, 1, 1, buf, state, env),
        "BUFOUT" => void_op(&name, Opcode::BufferMode, ops, 1, 1, buf, state, env),
        "DIROUT" => void_op(&name, Opcode::OutputStream, ops, 1, 3, buf, state, env),
        "DIRIN" => void_op(&name, Opcode::InputStream, ops, 1, 1, buf, state, env),
        "COLOR" => void_op(&name, Opcode::SetColour, ops, 2, 2, buf, state, env),
        "FONT" => store_op(&name, Opcode::SetFont, ops, 1, 1, buf, state, env),

        /******************************** Saving ******************************************/
        "SAVE" => translate_save(&name, ops, Opcode::Save0, Opcode::SaveExt, buf, state, env),
        "RESTORE" => {
            translate_save(&name, ops, Opcode::Restore0, Opcode::RestoreExt, buf, state, env)
        }
        "ISAVE" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::SaveUndo, &name, state, env)?;
            encode(buf, env.options.version, Opcode::SaveUndo, &[], Some(0), None)?;
            Ok(FormValue::Stack)
        }
        "IRESTORE" => {
            expect_arity(&name, ops, 0, 0, state)?;
            gate(Opcode::RestoreUndo, &name, state, env)?;
            encode(buf, env.options.version, Opcode::RestoreUndo, &[], Some(0), None)?;
            Ok(FormValue::Stack)
        }

        /******************************** Calls *******************************************/
        "CALL" | "APPLY" => {
            if ops.is_empty() {
                return Err(arity_error(&name, "requires a routine to call", state));
            }
            translate_call(&ops[0], &ops[1..], true, buf, state, env)
        }
        "ICALL" => {
            if ops.is_empty() {
                return Err(arity_error(&name, "requires a routine to call", state));
            }
            translate_call(&ops[0], &ops[1..], false, buf, state, env)
        }

        /******************************** Everything else *********************************/
        _ => {
            if env.is_routine(&name) {
                let target = Expr::Atom(name);
                return translate_call(&target, ops, true, buf, state, env);
            }
            env.diags.warn(
                "ZIL0505",
                format!(
                    "in {}: unrecognized operator {}, no code emitted",
                    state.routine_name, name
                ),
            )?;
            Ok(FormValue::Void)
        }
    }
}

/// Check an operand count, with the routine name as context.
fn expect_arity(
    name: &str,
    ops: &[Expr],
    min: usize,
    max: usize,
    state: &TranslationState,
) -> ZilResult<()> {
    if ops.len() < min || ops.len() > max {
        let message = if min == max {
            format!("requires exactly {} operand(s), got {}", min, ops.len())
        } else {
            format!(
                "requires {} to {} operands, got {}",
                min,
                max,
                ops.len()
            )
        };
        return Err(arity_error(name, &message, state));
    }
    Ok(())
}

fn arity_error(name: &str, message: &str, state: &TranslationState) -> ZilError {
    ZilError::Arity {
        routine: state.routine_name.clone(),
        op: name.to_string(),
        message: message.to_string(),
    }
}

/// Fail unless the opcode exists in the target version.
fn gate(
    opcode: Opcode,
    name: &str,
    state: &TranslationState,
    env: &ProgramTranslator,
) -> ZilResult<()> {
    if !opcode.exists_in(env.options.version) {
        let (min, max) = opcode.availability();
        return Err(ZilError::VersionGate {
            routine: state.routine_name.clone(),
            op: name.to_string(),
            min,
            max,
            version: env.options.version,
        });
    }
    Ok(())
}

/// Classify a whole operand list. Evaluation order is right to left so
/// stack operands pop in instruction order.
fn classify_operands(
    exprs: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<SmallVec<[Operand; 8]>> {
    let mut out: SmallVec<[Operand; 8]> = SmallVec::with_capacity(exprs.len());
    for _ in 0..exprs.len() {
        out.push(Operand::Small(0));
    }
    for i in (0..exprs.len()).rev() {
        out[i] = classify_operand(&exprs[i], buf, state, env)?;
    }
    Ok(out)
}

/// A store-kind instruction with its result pushed on the stack.
fn store_op(
    name: &str,
    opcode: Opcode,
    ops: &[Expr],
    min: usize,
    max: usize,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity(name, ops, min, max, state)?;
    gate(opcode, name, state, env)?;
    let operands = classify_operands(ops, buf, state, env)?;
    encode(buf, env.options.version, opcode, &operands, Some(0), None)?;
    Ok(FormValue::Stack)
}

/// An instruction with no result.
fn void_op(
    name: &str,
    opcode: Opcode,
    ops: &[Expr],
    min: usize,
    max: usize,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity(name, ops, min, max, state)?;
    gate(opcode, name, state, env)?;
    let operands = classify_operands(ops, buf, state, env)?;
    encode(buf, env.options.version, opcode, &operands, None, None)?;
    Ok(FormValue::Void)
}

/// Resolve a variable-designator operand (the thing `SET`, `INC`,
/// `DLESS?` and friends name) to its slot number.
fn variable_designator(
    expr: &Expr,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<u8> {
    let name = match expr {
        Expr::Atom(n) | Expr::LocalVar(n) | Expr::GlobalVar(n) => n,
        _ => {
            env.diags.warn(
                "ZIL0506",
                format!(
                    "in {}: expected a variable name, using the stack",
                    state.routine_name
                ),
            )?;
            return Ok(0);
        }
    };
    if let Expr::GlobalVar(_) = expr {
        if let Some(slot) = env.global_slot(name) {
            return Ok(slot);
        }
    }
    if let Some(slot) = state.local(name) {
        return Ok(slot);
    }
    if let Some(slot) = env.global_slot(name) {
        return Ok(slot);
    }
    env.diags.warn(
        "ZIL0506",
        format!(
            "in {}: {} is not a variable, using variable $10",
            state.routine_name, name
        ),
    )?;
    Ok(0x10)
}

/// Like `variable_designator`, but a computed designator is allowed and
/// arrives on the stack (the Z-machine's indirect variable reference).
fn variable_designator_operand(
    expr: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<Operand> {
    match expr {
        Expr::Atom(_) | Expr::LocalVar(_) | Expr::GlobalVar(_) => {
            Ok(Operand::Small(variable_designator(expr, state, env)?))
        }
        other => classify_operand(other, buf, state, env),
    }
}

/// Pop the stack into a variable.
fn pop_to(slot: u8, buf: &mut CodeBuffer, env: &mut ProgramTranslator) -> ZilResult<()> {
    let version = env.options.version;
    if version.number() == 6 {
        // V6 made pull a store instruction.
        encode(buf, version, Opcode::Pull, &[], Some(slot), None)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Pull,
            &[Operand::Small(slot)],
            None,
            None,
        )?;
    }
    Ok(())
}

/// Make an operand safe to mention twice: a stack operand is popped into
/// a compiler scratch global first.
fn ensure_reusable(
    operand: Operand,
    scratch: usize,
    buf: &mut CodeBuffer,
    env: &mut ProgramTranslator,
) -> ZilResult<Operand> {
    if operand == Operand::Variable(0) {
        let slot = env.scratch_global(scratch);
        pop_to(slot, buf, env)?;
        Ok(Operand::Variable(slot))
    } else {
        Ok(operand)
    }
}

/**************************** Arithmetic helpers **********************************/

fn translate_arith(
    form: &FormNode,
    opcode: Opcode,
    identity: i32,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let version = env.options.version;
    let ops = &form.operands[..];
    match ops.len() {
        0 => {
            push_value(operand_for_number(identity), buf, env)?;
            Ok(FormValue::Stack)
        }
        1 => {
            let operand = classify_operand(&ops[0], buf, state, env)?;
            match opcode {
                // Unary minus and reciprocal; plus and times are identity.
                Opcode::Sub => {
                    encode(
                        buf,
                        version,
                        Opcode::Sub,
                        &[Operand::Small(0), operand],
                        Some(0),
                        None,
                    )?;
                }
                Opcode::Div => {
                    encode(
                        buf,
                        version,
                        Opcode::Div,
                        &[Operand::Small(1), operand],
                        Some(0),
                        None,
                    )?;
                }
                _ => push_value(operand, buf, env)?,
            }
            Ok(FormValue::Stack)
        }
        _ => {
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, version, opcode, &operands[..2], Some(0), None)?;
            for operand in &operands[2..] {
                encode(
                    buf,
                    version,
                    opcode,
                    &[Operand::Variable(0), *operand],
                    Some(0),
                    None,
                )?;
            }
            Ok(FormValue::Stack)
        }
    }
}

fn translate_bitwise(
    form: &FormNode,
    opcode: Opcode,
    identity: i32,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let ops = &form.operands[..];
    match ops.len() {
        0 => {
            push_value(operand_for_number(identity), buf, env)?;
            Ok(FormValue::Stack)
        }
        1 => {
            let operand = classify_operand(&ops[0], buf, state, env)?;
            push_value(operand, buf, env)?;
            Ok(FormValue::Stack)
        }
        _ => {
            let operands = classify_operands(ops, buf, state, env)?;
            encode(buf, env.options.version, opcode, &operands[..2], Some(0), None)?;
            for operand in &operands[2..] {
                encode(
                    buf,
                    env.options.version,
                    opcode,
                    &[Operand::Variable(0), *operand],
                    Some(0),
                    None,
                )?;
            }
            Ok(FormValue::Stack)
        }
    }
}

/// Bitwise complement. V1-4 have a native opcode; V5 reassigned its slot
/// to call_1n, so later versions compute `0 - (x + 1)`.
fn translate_bcom(
    form: &FormNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity("BCOM", &form.operands, 1, 1, state)?;
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let version = env.options.version;
    let operand = classify_operand(&form.operands[0], buf, state, env)?;
    if version.at_most(4) {
        encode(buf, version, Opcode::Not, &[operand], Some(0), None)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Add,
            &[operand, Operand::Small(1)],
            Some(0),
            None,
        )?;
        encode(
            buf,
            version,
            Opcode::Sub,
            &[Operand::Small(0), Operand::Variable(0)],
            Some(0),
            None,
        )?;
    }
    Ok(FormValue::Stack)
}

/// Exclusive or, which the Z-machine never grew an opcode for:
/// `(A OR B) AND BCOM (A AND B)`.
fn translate_xor(
    form: &FormNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity("XOR", &form.operands, 2, 2, state)?;
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let version = env.options.version;
    let operands = classify_operands(&form.operands, buf, state, env)?;
    let a = ensure_reusable(operands[0], 0, buf, env)?;
    let b = ensure_reusable(operands[1], 1, buf, env)?;
    encode(buf, version, Opcode::Or, &[a, b], Some(0), None)?;
    encode(buf, version, Opcode::And, &[a, b], Some(0), None)?;
    if version.at_most(4) {
        encode(buf, version, Opcode::Not, &[Operand::Variable(0)], Some(0), None)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Add,
            &[Operand::Variable(0), Operand::Small(1)],
            Some(0),
            None,
        )?;
        encode(
            buf,
            version,
            Opcode::Sub,
            &[Operand::Small(0), Operand::Variable(0)],
            Some(0),
            None,
        )?;
    }
    encode(
        buf,
        version,
        Opcode::And,
        &[Operand::Variable(0), Operand::Variable(0)],
        Some(0),
        None,
    )?;
    Ok(FormValue::Stack)
}

fn translate_min_max(
    form: &FormNode,
    is_max: bool,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let name = if is_max { "MAX" } else { "MIN" };
    expect_arity(name, &form.operands, 1, 8, state)?;
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let version = env.options.version;
    let compare = if is_max { Opcode::Jl } else { Opcode::Jg };
    let ops = &form.operands[..];
    if ops.len() == 1 {
        let operand = classify_operand(&ops[0], buf, state, env)?;
        push_value(operand, buf, env)?;
        return Ok(FormValue::Stack);
    }
    if ops.len() == 2 {
        // The two-value case keeps both candidates addressable and picks
        // one of two push sites joined by a forward jump.
        let operands = classify_operands(ops, buf, state, env)?;
        let a = ensure_reusable(operands[0], 0, buf, env)?;
        let b = ensure_reusable(operands[1], 1, buf, env)?;
        encode(buf, version, compare, &[a, b], None, None)?;
        let take_b = reserve_branch(buf, true);
        push_value(a, buf, env)?;
        let join = buf.len();
        buf.put_slice(&[0x8C, 0, 0]);
        bind_branch(buf, take_b, buf.len())?;
        push_value(b, buf, env)?;
        buf.patch_jump(join, buf.len())?;
        return Ok(FormValue::Stack);
    }
    // Longer lists accumulate through a scratch global.
    let accum = env.scratch_global(0);
    let first = classify_operand(&ops[0], buf, state, env)?;
    if first == Operand::Variable(0) {
        pop_to(accum, buf, env)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Store,
            &[Operand::Small(accum), first],
            None,
            None,
        )?;
    }
    for op in &ops[1..] {
        let candidate = classify_operand(op, buf, state, env)?;
        let candidate = ensure_reusable(candidate, 1, buf, env)?;
        encode(
            buf,
            version,
            compare,
            &[Operand::Variable(accum), candidate],
            None,
            None,
        )?;
        let keep = reserve_branch(buf, false);
        encode(
            buf,
            version,
            Opcode::Store,
            &[Operand::Small(accum), candidate],
            None,
            None,
        )?;
        bind_branch(buf, keep, buf.len())?;
    }
    push_value(Operand::Variable(accum), buf, env)?;
    Ok(FormValue::Stack)
}

fn translate_abs(
    form: &FormNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity("ABS", &form.operands, 1, 1, state)?;
    if let Some(folded) = fold_form(form, env) {
        push_value(operand_for_number(folded), buf, env)?;
        return Ok(FormValue::Stack);
    }
    let version = env.options.version;
    let operand = classify_operand(&form.operands[0], buf, state, env)?;
    let operand = ensure_reusable(operand, 0, buf, env)?;
    encode(
        buf,
        version,
        Opcode::Jl,
        &[operand, Operand::Small(0)],
        None,
        None,
    )?;
    let negate = reserve_branch(buf, true);
    push_value(operand, buf, env)?;
    let join = buf.len();
    buf.put_slice(&[0x8C, 0, 0]);
    bind_branch(buf, negate, buf.len())?;
    encode(
        buf,
        version,
        Opcode::Sub,
        &[Operand::Small(0), operand],
        Some(0),
        None,
    )?;
    buf.patch_jump(join, buf.len())?;
    Ok(FormValue::Stack)
}

/**************************** Predicate helpers ***********************************/

/// Emit a predicate instruction and lower it to a stack value: branch on
/// true over "push 0, jump end" to "push 1".
fn predicate_from_operands(
    opcode: Opcode,
    operands: &[Operand],
    store: Option<u8>,
    buf: &mut CodeBuffer,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let version = env.options.version;
    encode(buf, version, opcode, operands, store, None)?;
    let when_true = reserve_branch(buf, true);
    push_value(Operand::Small(0), buf, env)?;
    let join = buf.len();
    buf.put_slice(&[0x8C, 0, 0]);
    bind_branch(buf, when_true, buf.len())?;
    push_value(Operand::Small(1), buf, env)?;
    buf.patch_jump(join, buf.len())?;
    Ok(FormValue::Stack)
}

fn predicate_value(
    name: &str,
    opcode: Opcode,
    ops: &[Expr],
    min: usize,
    max: usize,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity(name, ops, min, max, state)?;
    gate(opcode, name, state, env)?;
    let operands = classify_operands(ops, buf, state, env)?;
    predicate_from_operands(opcode, &operands, None, buf, env)
}

/// EQUAL? against up to three comparands is one `je`. More than three
/// spills the subject into a scratch global and chains `je` groups that
/// branch to a shared success site.
fn translate_equal(
    form: &FormNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity("EQUAL?", &form.operands, 2, 16, state)?;
    let version = env.options.version;
    let ops = &form.operands[..];
    if ops.len() <= 4 {
        let operands = classify_operands(ops, buf, state, env)?;
        return predicate_from_operands(Opcode::Je, &operands, None, buf, env);
    }

    let subject = env.scratch_global(0);
    let first = classify_operand(&ops[0], buf, state, env)?;
    if first == Operand::Variable(0) {
        pop_to(subject, buf, env)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Store,
            &[Operand::Small(subject), first],
            None,
            None,
        )?;
    }
    let mut success_branches = Vec::new();
    for group in ops[1..].chunks(3) {
        let mut operands: SmallVec<[Operand; 8]> = SmallVec::new();
        operands.push(Operand::Variable(subject));
        for operand in classify_operands(group, buf, state, env)? {
            operands.push(operand);
        }
        encode(buf, version, Opcode::Je, &operands, None, None)?;
        success_branches.push(reserve_branch(buf, true));
    }
    push_value(Operand::Small(0), buf, env)?;
    let join = buf.len();
    buf.put_slice(&[0x8C, 0, 0]);
    let success = buf.len();
    for at in success_branches {
        bind_branch(buf, at, success)?;
    }
    push_value(Operand::Small(1), buf, env)?;
    buf.patch_jump(join, buf.len())?;
    Ok(FormValue::Stack)
}

/// Short-circuit AND: test each value, bailing to the failure site on
/// the first false one; the last value is the result.
fn translate_and(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let version = env.options.version;
    if ops.is_empty() {
        push_value(Operand::Small(1), buf, env)?;
        return Ok(FormValue::Stack);
    }
    if ops.len() == 1 {
        translate_expr_to_stack(&ops[0], buf, state, env)?;
        return Ok(FormValue::Stack);
    }
    let mut fail_branches = Vec::new();
    for op in &ops[..ops.len() - 1] {
        let operand = classify_operand(op, buf, state, env)?;
        encode(buf, version, Opcode::Jz, &[operand], None, None)?;
        fail_branches.push(reserve_branch(buf, true));
    }
    translate_expr_to_stack(ops.last().unwrap(), buf, state, env)?;
    let join = buf.len();
    buf.put_slice(&[0x8C, 0, 0]);
    let fail = buf.len();
    for at in fail_branches {
        bind_branch(buf, at, fail)?;
    }
    push_value(Operand::Small(0), buf, env)?;
    buf.patch_jump(join, buf.len())?;
    Ok(FormValue::Stack)
}

/// Short-circuit OR: the first true value is the result.
fn translate_or(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let version = env.options.version;
    if ops.is_empty() {
        push_value(Operand::Small(0), buf, env)?;
        return Ok(FormValue::Stack);
    }
    if ops.len() == 1 {
        translate_expr_to_stack(&ops[0], buf, state, env)?;
        return Ok(FormValue::Stack);
    }
    let mut done_jumps = Vec::new();
    for op in &ops[..ops.len() - 1] {
        let operand = classify_operand(op, buf, state, env)?;
        let operand = ensure_reusable(operand, 0, buf, env)?;
        encode(buf, version, Opcode::Jz, &[operand], None, None)?;
        let next = reserve_branch(buf, true);
        push_value(operand, buf, env)?;
        done_jumps.push(buf.len());
        buf.put_slice(&[0x8C, 0, 0]);
        bind_branch(buf, next, buf.len())?;
    }
    translate_expr_to_stack(ops.last().unwrap(), buf, state, env)?;
    let end = buf.len();
    for at in done_jumps {
        buf.patch_jump(at, end)?;
    }
    Ok(FormValue::Stack)
}

/**************************** Assignment and calls ********************************/

fn translate_set(
    name: &str,
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity(name, ops, 2, 2, state)?;
    let value = classify_operand(&ops[1], buf, state, env)?;
    // SETG prefers the global scope when a bare atom names both a local
    // and a global.
    let designator = match (&ops[0], name) {
        (Expr::Atom(var), "SETG") => match env.global_slot(var) {
            Some(slot) => Operand::Small(slot),
            None => variable_designator_operand(&ops[0], buf, state, env)?,
        },
        _ => variable_designator_operand(&ops[0], buf, state, env)?,
    };
    encode(
        buf,
        env.options.version,
        Opcode::Store,
        &[designator, value],
        None,
        None,
    )?;
    match designator {
        Operand::Small(slot) => Ok(FormValue::Slot(slot)),
        _ => Ok(FormValue::Void),
    }
}

/// A routine call. The callee operand is a routine placeholder when
/// named directly, or any computed value. Version and argument count
/// select the call opcode; `value` selects the storing or non-storing
/// family.
fn translate_call(
    target: &Expr,
    args: &[Expr],
    value: bool,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let version = env.options.version;
    let limit = version.max_call_args();
    if args.len() > limit {
        return Err(ZilError::Arity {
            routine: state.routine_name.clone(),
            op: "CALL".to_string(),
            message: format!("passes {} arguments, limit is {}", args.len(), limit),
        });
    }

    let mut operands: SmallVec<[Operand; 8]> = SmallVec::with_capacity(args.len() + 1);
    for _ in 0..args.len() + 1 {
        operands.push(Operand::Small(0));
    }
    for i in (0..args.len()).rev() {
        operands[i + 1] = classify_operand(&args[i], buf, state, env)?;
    }
    operands[0] = classify_operand(target, buf, state, env)?;

    let opcode = if version.at_most(3) {
        Opcode::CallVs
    } else if value {
        match args.len() {
            0 => Opcode::Call1S,
            1 => Opcode::Call2S,
            2 | 3 => Opcode::CallVs,
            _ => Opcode::CallVs2,
        }
    } else {
        gate(Opcode::CallVn, "ICALL", state, env)?;
        match args.len() {
            0 => Opcode::Call1N,
            1 => Opcode::Call2N,
            2 | 3 => Opcode::CallVn,
            _ => Opcode::CallVn2,
        }
    };
    let store = if opcode.is_store(version) { Some(0) } else { None };
    encode(buf, version, opcode, &operands, store, None)?;
    if store.is_some() {
        Ok(FormValue::Stack)
    } else {
        Ok(FormValue::Void)
    }
}

fn translate_save(
    name: &str,
    ops: &[Expr],
    classic: Opcode,
    extended: Opcode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    expect_arity(name, ops, 0, 0, state)?;
    let version = env.options.version;
    if version.at_most(3) {
        // A branch instruction this early in history; surface it as a
        // boolean value.
        return predicate_from_operands(classic, &[], None, buf, env);
    }
    if version.number() == 4 {
        encode(buf, version, classic, &[], Some(0), None)?;
        return Ok(FormValue::Stack);
    }
    gate(extended, name, state, env)?;
    encode(buf, version, extended, &[], Some(0), None)?;
    Ok(FormValue::Stack)
}

/**************************** Printing ********************************************/

fn translate_printi(
    opcode: Opcode,
    text: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let raw = match text {
        Expr::Str(s) => s.clone(),
        _ => {
            return Err(arity_error("PRINTI", "requires a string literal", state));
        }
    };
    let prepared = env.prepare_text(&raw)?;
    encode(buf, env.options.version, opcode, &[], None, None)?;
    let encoded = env.encoder.encode(&prepared);
    buf.put_slice(&encoded);
    Ok(())
}

/// The TELL dispatcher: literal strings print by packed address, and a
/// handful of atom prefixes select typed output for the value that
/// follows.
fn translate_tell(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    let mut iter = ops.iter();
    while let Some(token) = iter.next() {
        match token {
            Expr::Str(_) => {
                let operand = classify_operand(token, buf, state, env)?;
                encode(buf, version, Opcode::PrintPaddr, &[operand], None, None)?;
            }
            Expr::Atom(atom) => {
                let prefix = atom.to_uppercase();
                let opcode = match prefix.as_str() {
                    "CR" | "CRLF" => {
                        encode(buf, version, Opcode::NewLine, &[], None, None)?;
                        continue;
                    }
                    "D" => Opcode::PrintObj,
                    "N" => Opcode::PrintNum,
                    "C" => Opcode::PrintChar,
                    "P" => Opcode::PrintPaddr,
                    "A" => Opcode::PrintAddr,
                    _ => {
                        env.diags.warn(
                            "ZIL0505",
                            format!(
                                "in {}: unrecognized TELL token {}",
                                state.routine_name, atom
                            ),
                        )?;
                        continue;
                    }
                };
                match iter.next() {
                    Some(value) => {
                        let operand = classify_operand(value, buf, state, env)?;
                        encode(buf, version, opcode, &[operand], None, None)?;
                    }
                    None => {
                        return Err(arity_error(
                            "TELL",
                            &format!("prefix {} needs a value", prefix),
                            state,
                        ));
                    }
                }
            }
            other => {
                // A bare value prints as a number.
                let operand = classify_operand(other, buf, state, env)?;
                encode(buf, version, Opcode::PrintNum, &[operand], None, None)?;
            }
        }
    }
    Ok(())
}

/**************************** COND ************************************************/

/// COND arriving as a form: each operand should be a parenthesized
/// clause.
fn translate_cond_form(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let mut clauses: Vec<(Expr, Vec<Expr>)> = Vec::new();
    for clause in ops {
        match clause {
            Expr::List(parts) if !parts.is_empty() => {
                clauses.push((parts[0].clone(), parts[1..].to_vec()));
            }
            Expr::Cond(cond) => {
                clauses.extend(cond.clauses.iter().cloned());
            }
            other => {
                env.diags.warn(
                    "ZIL0100",
                    format!(
                        "in {}: COND clause {:?} is not parenthesized",
                        state.routine_name, other
                    ),
                )?;
            }
        }
    }
    translate_clauses(&clauses, buf, state, env)
}

pub(crate) fn translate_cond_node(
    cond: &CondNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    translate_clauses(&cond.clauses, buf, state, env)
}

fn is_always_true(cond: &Expr, env: &ProgramTranslator) -> bool {
    match cond {
        Expr::Atom(name) => {
            let upper = name.to_uppercase();
            upper == "T" || upper == "ELSE" || env.constant(name).map_or(false, |v| v != 0)
        }
        Expr::Number(n) => *n != 0,
        _ => false,
    }
}

/// The clause chain. Each clause emits its test ending in a
/// branch-on-false over its actions; non-final clauses jump to the end
/// of the whole COND. The actions are built in a temporary buffer so the
/// branch can use the short form whenever the offset permits.
fn translate_clauses(
    clauses: &[(Expr, Vec<Expr>)],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let mut end_jumps: Vec<CodeOffset> = Vec::new();
    let count = clauses.len();
    for (i, (cond, actions)) in clauses.iter().enumerate() {
        let last = i + 1 == count;
        if is_always_true(cond, env) {
            translate_clause_actions(actions, buf, state, env)?;
            break;
        }
        let invert = translate_condition(cond, buf, state, env)?;
        let mut temp = CodeBuffer::new();
        translate_clause_actions(actions, &mut temp, state, env)?;
        let mut jump_in_temp = None;
        if !last && !actions.last().map_or(false, is_terminator) {
            jump_in_temp = Some(temp.len());
            temp.put_slice(&[0x8C, 0, 0]);
        }
        // Branch over the actions when the condition does not hold. The
        // offset is independent of the branch's own width.
        let offset = temp.len() as i32 + 2;
        Branch {
            on_true: invert,
            offset,
        }
        .emit(buf)?;
        let base = buf.len();
        buf.put_slice(temp.bytes());
        if let Some(pos) = jump_in_temp {
            end_jumps.push(base + pos);
        }
    }
    let end = buf.len();
    for at in end_jumps {
        buf.patch_jump(at, end)?;
    }
    Ok(())
}

/// Emit a clause body and leave the clause's value on the stack: a plain
/// value tail is pushed explicitly, and a void tail pushes a default so
/// COND composes as an expression.
fn translate_clause_actions(
    actions: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    if actions.is_empty() {
        push_value(Operand::Small(1), buf, env)?;
        return Ok(());
    }
    for action in &actions[..actions.len() - 1] {
        translate_statement(action, buf, state, env)?;
    }
    let tail = actions.last().unwrap();
    if is_terminator(tail) {
        return translate_statement(tail, buf, state, env);
    }
    match tail {
        Expr::Form(_) | Expr::Cond(_) | Expr::Repeat(_) => {
            match translate_value(tail, buf, state, env)? {
                FormValue::Stack => {}
                FormValue::Slot(slot) => push_value(Operand::Variable(slot), buf, env)?,
                FormValue::Void => push_value(Operand::Small(0), buf, env)?,
            }
        }
        plain => {
            let operand = classify_operand(plain, buf, state, env)?;
            push_value(operand, buf, env)?;
        }
    }
    Ok(())
}

/// Emit a test for a condition expression, without its branch bytes.
///
/// Returns `invert`: `false` when the instruction's branch fires on the
/// condition being true, `true` when it fires on the condition being
/// false (the `jz`-on-a-value case). The caller picks the branch sense
/// bit from this and the direction it wants.
fn translate_condition(
    cond: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<bool> {
    if let Expr::Form(form) = cond {
        let name = form.op.to_uppercase();
        let ops = &form.operands[..];
        match name.as_str() {
            "NOT" if ops.len() == 1 => {
                return Ok(!translate_condition(&ops[0], buf, state, env)?);
            }
            "ZERO?" | "0?" if ops.len() == 1 => {
                let operands = classify_operands(ops, buf, state, env)?;
                encode(buf, env.options.version, Opcode::Jz, &operands, None, None)?;
                return Ok(false);
            }
            "EQUAL?" | "=?" | "==?" if (2..=4).contains(&ops.len()) => {
                let operands = classify_operands(ops, buf, state, env)?;
                encode(buf, env.options.version, Opcode::Je, &operands, None, None)?;
                return Ok(false);
            }
            "LESS?" | "L?" | "GRTR?" | "G?" | "IN?" | "BTST" | "FSET?" if ops.len() == 2 => {
                let opcode = match name.as_str() {
                    "LESS?" | "L?" => Opcode::Jl,
                    "GRTR?" | "G?" => Opcode::Jg,
                    "IN?" => Opcode::Jin,
                    "BTST" => Opcode::Test,
                    _ => {
                        env.note_flag_use(ops.get(1));
                        Opcode::TestAttr
                    }
                };
                let operands = classify_operands(ops, buf, state, env)?;
                encode(buf, env.options.version, opcode, &operands, None, None)?;
                return Ok(false);
            }
            "DLESS?" | "IGRTR?" if ops.len() == 2 => {
                let opcode = if name == "DLESS?" {
                    Opcode::DecChk
                } else {
                    Opcode::IncChk
                };
                let slot = variable_designator(&ops[0], state, env)?;
                let value = classify_operand(&ops[1], buf, state, env)?;
                encode(
                    buf,
                    env.options.version,
                    opcode,
                    &[Operand::Small(slot), value],
                    None,
                    None,
                )?;
                return Ok(false);
            }
            "ASSIGNED?" if ops.len() == 1 => {
                gate(Opcode::CheckArgCount, &name, state, env)?;
                let slot = variable_designator(&ops[0], state, env)?;
                encode(
                    buf,
                    env.options.version,
                    Opcode::CheckArgCount,
                    &[Operand::Small(slot)],
                    None,
                    None,
                )?;
                return Ok(false);
            }
            "FIRST?" | "NEXT?" if ops.len() == 1 => {
                let opcode = if name == "FIRST?" {
                    Opcode::GetChild
                } else {
                    Opcode::GetSibling
                };
                let operands = classify_operands(ops, buf, state, env)?;
                encode(buf, env.options.version, opcode, &operands, Some(0), None)?;
                return Ok(false);
            }
            "INTBL?" if (3..=4).contains(&ops.len()) => {
                gate(Opcode::ScanTable, &name, state, env)?;
                let operands = classify_operands(ops, buf, state, env)?;
                encode(
                    buf,
                    env.options.version,
                    Opcode::ScanTable,
                    &operands,
                    Some(0),
                    None,
                )?;
                return Ok(false);
            }
            "VERIFY" if ops.is_empty() => {
                gate(Opcode::Verify, &name, state, env)?;
                encode(buf, env.options.version, Opcode::Verify, &[], None, None)?;
                return Ok(false);
            }
            "ORIGINAL?" if ops.is_empty() => {
                gate(Opcode::Piracy, &name, state, env)?;
                encode(buf, env.options.version, Opcode::Piracy, &[], None, None)?;
                return Ok(false);
            }
            _ => {}
        }
    }
    // Any other condition is a value tested against zero.
    let operand = classify_operand(cond, buf, state, env)?;
    encode(buf, env.options.version, Opcode::Jz, &[operand], None, None)?;
    Ok(true)
}

/**************************** Blocks and loops ************************************/

/// Pull the optional activation atom and the binding list off the front
/// of a PROG/REPEAT/BIND operand list.
fn parse_block_shape<'a>(
    name: &str,
    ops: &'a [Expr],
    state: &TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<(Option<String>, Vec<(String, Option<Expr>)>, &'a [Expr])> {
    let mut index = 0;
    let mut activation = None;
    if let Some(Expr::Atom(act)) = ops.get(index) {
        activation = Some(act.clone());
        index += 1;
    }
    let bindings = match ops.get(index) {
        Some(Expr::List(entries)) => {
            index += 1;
            parse_bindings(entries, state, env)?
        }
        _ => {
            return Err(arity_error(name, "requires a binding list", state));
        }
    };
    Ok((activation, bindings, &ops[index..]))
}

pub(crate) fn parse_bindings(
    entries: &[Expr],
    state: &TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<Vec<(String, Option<Expr>)>> {
    let mut bindings = Vec::new();
    for entry in entries {
        match entry {
            Expr::Atom(name) | Expr::LocalVar(name) => bindings.push((name.clone(), None)),
            Expr::List(pair) if pair.len() == 2 => match &pair[0] {
                Expr::Atom(name) | Expr::LocalVar(name) => {
                    bindings.push((name.clone(), Some(pair[1].clone())));
                }
                other => {
                    env.diags.warn(
                        "ZIL0506",
                        format!(
                            "in {}: binding name {:?} is not an atom",
                            state.routine_name, other
                        ),
                    )?;
                }
            },
            other => {
                env.diags.warn(
                    "ZIL0506",
                    format!(
                        "in {}: malformed binding {:?}",
                        state.routine_name, other
                    ),
                )?;
            }
        }
    }
    Ok(bindings)
}

pub(crate) fn translate_repeat_node(
    repeat: &RepeatNode,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    translate_block(
        BlockKind::Repeat,
        repeat.activation.clone(),
        &repeat.bindings,
        &repeat.body,
        buf,
        state,
        env,
    )
}

/// The shared lowering for REPEAT, PROG and BIND. The binding stores are
/// the block prolog; REPEAT additionally closes the body with a backward
/// jump. Exit and restart sentinels inside the body are rewritten here.
fn translate_block(
    kind: BlockKind,
    activation: Option<String>,
    bindings: &[(String, Option<Expr>)],
    body: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    let mut saved: Vec<SavedBinding> = Vec::new();
    for (name, init) in bindings {
        // Initializers see the outer scope.
        let init_op = match init {
            Some(expr) => Some(classify_operand(expr, buf, state, env)?),
            None => None,
        };
        let (slot, save) = state.bind_block_local(name)?;
        saved.push(save);
        if let Some(operand) = init_op {
            encode(
                buf,
                version,
                Opcode::Store,
                &[Operand::Small(slot), operand],
                None,
                None,
            )?;
        }
    }

    let start = buf.len();
    let block_index = state.push_block(kind, activation.clone(), start)?.index;
    state.push_loop(LoopKind::Block(kind), activation, start);
    debug!("{:?} block {} starts at {:#x}", kind, block_index, start);

    for stmt in body {
        translate_statement(stmt, buf, state, env)?;
    }
    if kind == BlockKind::Repeat {
        buf.put_jump_to(start)?;
    }
    let exit = buf.len();
    buf.rewrite_sentinels(start, BLOCK_EXIT_SENTINEL, exit)?;
    buf.rewrite_sentinels(start, targeted_exit_sentinel(block_index), exit)?;
    buf.rewrite_sentinels(start, LOOP_RESTART_SENTINEL, start)?;

    state.pop_loop();
    state.pop_block();
    while let Some(save) = saved.pop() {
        state.unbind_block_local(save);
    }
    Ok(())
}

/// Split a trailing `(END ...)` clause off a loop body.
fn split_end_clause(ops: &[Expr]) -> (&[Expr], Option<&[Expr]>) {
    if let Some(Expr::List(parts)) = ops.last() {
        if let Some(Expr::Atom(first)) = parts.first() {
            if first.to_uppercase() == "END" {
                return (&ops[..ops.len() - 1], Some(&parts[1..]));
            }
        }
    }
    (ops, None)
}

/// The counted loop.
fn translate_do(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    let spec = match ops.first() {
        Some(Expr::List(parts)) if parts.len() >= 3 && parts.len() <= 4 => parts,
        _ => {
            return Err(arity_error("DO", "requires a (var start end [step]) spec", state));
        }
    };
    let var_name = match &spec[0] {
        Expr::Atom(n) | Expr::LocalVar(n) => n.clone(),
        other => {
            return Err(arity_error(
                "DO",
                &format!("loop variable {:?} is not an atom", other),
                state,
            ));
        }
    };
    let start_expr = &spec[1];
    let end_expr = &spec[2];
    let step_expr = spec.get(3);

    let (body, end_clause) = split_end_clause(&ops[1..]);

    // Counting direction: the sign of a constant step, else constant
    // bounds, else ascending.
    let step_const = step_expr.and_then(|e| const_value(e, env));
    let descending = match step_const {
        Some(step) => step < 0,
        None => match (const_value(start_expr, env), const_value(end_expr, env)) {
            (Some(s), Some(e)) => s > e,
            _ => false,
        },
    };

    let start_op = classify_operand(start_expr, buf, state, env)?;
    let (slot, save) = state.bind_block_local(&var_name)?;
    if start_op == Operand::Variable(0) {
        pop_to(slot, buf, env)?;
    } else {
        encode(
            buf,
            version,
            Opcode::Store,
            &[Operand::Small(slot), start_op],
            None,
            None,
        )?;
    }
    // The loop's default result.
    push_value(Operand::Variable(slot), buf, env)?;

    let loop_start = buf.len();
    let block_index = state.push_block(BlockKind::Do, None, loop_start)?.index;
    state.push_loop(LoopKind::Block(BlockKind::Do), None, loop_start);

    let end_op = classify_operand(end_expr, buf, state, env)?;
    let test = if descending { Opcode::Jl } else { Opcode::Jg };
    encode(
        buf,
        version,
        test,
        &[Operand::Variable(slot), end_op],
        None,
        None,
    )?;
    let exit_branch = reserve_branch(buf, true);

    for stmt in body {
        translate_statement(stmt, buf, state, env)?;
    }

    match step_const {
        None if step_expr.is_none() => {
            let bump = if descending { Opcode::Dec } else { Opcode::Inc };
            encode(buf, version, bump, &[Operand::Small(slot)], None, None)?;
        }
        Some(1) => {
            encode(buf, version, Opcode::Inc, &[Operand::Small(slot)], None, None)?;
        }
        Some(-1) => {
            encode(buf, version, Opcode::Dec, &[Operand::Small(slot)], None, None)?;
        }
        _ => {
            let step_op = classify_operand(step_expr.unwrap(), buf, state, env)?;
            encode(
                buf,
                version,
                Opcode::Add,
                &[Operand::Variable(slot), step_op],
                Some(slot),
                None,
            )?;
        }
    }
    buf.put_jump_to(loop_start)?;

    let exit_normal = buf.len();
    bind_branch(buf, exit_branch, exit_normal)?;
    if let Some(end_actions) = end_clause {
        for stmt in end_actions {
            translate_statement(stmt, buf, state, env)?;
        }
    }
    let exit = buf.len();
    buf.rewrite_sentinels(loop_start, BLOCK_EXIT_SENTINEL, exit)?;
    buf.rewrite_sentinels(loop_start, targeted_exit_sentinel(block_index), exit)?;
    buf.rewrite_sentinels(loop_start, LOOP_RESTART_SENTINEL, loop_start)?;

    state.pop_loop();
    state.pop_block();
    state.unbind_block_local(save);
    Ok(())
}

/// Walk an object's children.
fn translate_map_contents(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    let spec = match ops.first() {
        Some(Expr::List(parts)) if parts.len() == 2 || parts.len() == 3 => parts,
        _ => {
            return Err(arity_error(
                "MAP-CONTENTS",
                "requires a (var [next] container) spec",
                state,
            ));
        }
    };
    let var_name = atom_name(&spec[0], "MAP-CONTENTS", state)?;
    let (next_name, container_expr) = if spec.len() == 3 {
        (Some(atom_name(&spec[1], "MAP-CONTENTS", state)?), &spec[2])
    } else {
        (None, &spec[1])
    };
    let (body, end_clause) = split_end_clause(&ops[1..]);

    let container = classify_operand(container_expr, buf, state, env)?;
    let (slot, save_var) = state.bind_block_local(&var_name)?;
    let next_binding = match next_name {
        Some(name) => Some(state.bind_block_local(&name)?),
        None => None,
    };

    encode(buf, version, Opcode::GetChild, &[container], Some(slot), None)?;
    // Branch straight to the exit when there are no children.
    let empty_branch = reserve_branch(buf, false);

    let body_start = buf.len();
    let block_index = state
        .push_block(BlockKind::MapContents, None, body_start)?
        .index;
    state.push_loop(LoopKind::Block(BlockKind::MapContents), None, body_start);

    let mut exit_branches = vec![empty_branch];
    match next_binding.as_ref().map(|(slot, _)| *slot) {
        Some(next_slot) => {
            // Fetch the sibling before the body runs, so the body may
            // remove the current object from its container.
            encode(
                buf,
                version,
                Opcode::GetSibling,
                &[Operand::Variable(slot)],
                Some(next_slot),
                Some(Branch {
                    on_true: true,
                    offset: 2,
                }),
            )?;
            for stmt in body {
                translate_statement(stmt, buf, state, env)?;
            }
            encode(
                buf,
                version,
                Opcode::Store,
                &[Operand::Small(slot), Operand::Variable(next_slot)],
                None,
                None,
            )?;
            encode(
                buf,
                version,
                Opcode::Jz,
                &[Operand::Variable(slot)],
                None,
                None,
            )?;
            exit_branches.push(reserve_branch(buf, true));
            buf.put_jump_to(body_start)?;
        }
        None => {
            for stmt in body {
                translate_statement(stmt, buf, state, env)?;
            }
            // Advance in place, looping while a sibling exists.
            encode(
                buf,
                version,
                Opcode::GetSibling,
                &[Operand::Variable(slot)],
                Some(slot),
                None,
            )?;
            emit_branch_back(buf, true, body_start)?;
        }
    }

    let exit_normal = buf.len();
    for at in exit_branches {
        bind_branch(buf, at, exit_normal)?;
    }
    if let Some(end_actions) = end_clause {
        for stmt in end_actions {
            translate_statement(stmt, buf, state, env)?;
        }
    }
    let exit = buf.len();
    buf.rewrite_sentinels(body_start, BLOCK_EXIT_SENTINEL, exit)?;
    buf.rewrite_sentinels(body_start, targeted_exit_sentinel(block_index), exit)?;
    buf.rewrite_sentinels(body_start, LOOP_RESTART_SENTINEL, body_start)?;

    state.pop_loop();
    state.pop_block();
    if let Some((_, save_next)) = next_binding {
        state.unbind_block_local(save_next);
    }
    state.unbind_block_local(save_var);
    Ok(())
}

/// Walk a room's direction properties from the top down, skipping
/// numbers with no property.
fn translate_map_directions(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    let spec = match ops.first() {
        Some(Expr::List(parts)) if parts.len() == 3 => parts,
        _ => {
            return Err(arity_error(
                "MAP-DIRECTIONS",
                "requires a (dir pt room) spec",
                state,
            ));
        }
    };
    let dir_name = atom_name(&spec[0], "MAP-DIRECTIONS", state)?;
    let pt_name = atom_name(&spec[1], "MAP-DIRECTIONS", state)?;
    let room_expr = &spec[2];
    let (body, end_clause) = split_end_clause(&ops[1..]);

    let room = classify_operand(room_expr, buf, state, env)?;
    let room = ensure_reusable(room, 0, buf, env)?;
    let (dir_slot, save_dir) = state.bind_block_local(&dir_name)?;
    let (pt_slot, save_pt) = state.bind_block_local(&pt_name)?;

    let first = i32::from(env.symbols.max_properties) + 1;
    encode(
        buf,
        version,
        Opcode::Store,
        &[Operand::Small(dir_slot), operand_for_number(first)],
        None,
        None,
    )?;

    let loop_start = buf.len();
    let block_index = state
        .push_block(BlockKind::MapDirections, None, loop_start)?
        .index;
    state.push_loop(LoopKind::Block(BlockKind::MapDirections), None, loop_start);

    let low = operand_for_number(i32::from(env.symbols.low_direction));
    encode(
        buf,
        version,
        Opcode::DecChk,
        &[Operand::Small(dir_slot), low],
        None,
        None,
    )?;
    let exit_branch = reserve_branch(buf, true);
    encode(
        buf,
        version,
        Opcode::GetPropAddr,
        &[room, Operand::Variable(dir_slot)],
        Some(pt_slot),
        None,
    )?;
    // No such property: try the next direction number.
    encode(
        buf,
        version,
        Opcode::Jz,
        &[Operand::Variable(pt_slot)],
        None,
        None,
    )?;
    emit_branch_back(buf, true, loop_start)?;

    for stmt in body {
        translate_statement(stmt, buf, state, env)?;
    }
    buf.put_jump_to(loop_start)?;

    let exit_normal = buf.len();
    bind_branch(buf, exit_branch, exit_normal)?;
    if let Some(end_actions) = end_clause {
        for stmt in end_actions {
            translate_statement(stmt, buf, state, env)?;
        }
    }
    let exit = buf.len();
    buf.rewrite_sentinels(loop_start, BLOCK_EXIT_SENTINEL, exit)?;
    buf.rewrite_sentinels(loop_start, targeted_exit_sentinel(block_index), exit)?;
    buf.rewrite_sentinels(loop_start, LOOP_RESTART_SENTINEL, loop_start)?;

    state.pop_loop();
    state.pop_block();
    state.unbind_block_local(save_pt);
    state.unbind_block_local(save_dir);
    Ok(())
}

fn atom_name(expr: &Expr, op: &str, state: &TranslationState) -> ZilResult<String> {
    match expr {
        Expr::Atom(n) | Expr::LocalVar(n) => Ok(n.clone()),
        other => Err(arity_error(
            op,
            &format!("expected a variable name, got {:?}", other),
            state,
        )),
    }
}

/// A backward branch to a known offset in this buffer.
fn emit_branch_back(buf: &mut CodeBuffer, on_true: bool, target: CodeOffset) -> ZilResult<()> {
    // Two branch bytes: backward offsets never fit the short form.
    let offset = i64::from(target) - i64::from(buf.len() + 2) + 2;
    Branch {
        on_true,
        offset: offset as i32,
    }
    .emit(buf)?;
    Ok(())
}

/**************************** RETURN and AGAIN ************************************/

/// `RETURN` exits the innermost block, a named enclosing block, or the
/// routine, depending on its activation operand and the funny-return
/// policy. Block exits push the result and leave a sentinel; routine
/// exits emit a real return.
fn translate_return(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    if ops.len() > 2 {
        return Err(arity_error("RETURN", "takes at most a value and an activation", state));
    }
    let default_value = Expr::Number(1);
    let value = ops.first().unwrap_or(&default_value);
    let activation = match ops.get(1) {
        Some(Expr::Atom(n)) | Some(Expr::LocalVar(n)) => Some(n.clone()),
        Some(other) => {
            return Err(arity_error(
                "RETURN",
                &format!("activation {:?} is not a name", other),
                state,
            ));
        }
        None => None,
    };

    if let Some(act) = &activation {
        if let Some(index) = state.find_block(act).map(|b| b.index) {
            let operand = classify_operand(value, buf, state, env)?;
            push_value(operand, buf, env)?;
            buf.put_sentinel(targeted_exit_sentinel(index));
            return Ok(FormValue::Void);
        }
        if state.is_routine_activation(act) {
            return emit_routine_return(value, buf, state, env);
        }
        env.diags.warn(
            "ZIL0508",
            format!(
                "in {}: no enclosing block named {}, returning from the routine",
                state.routine_name, act
            ),
        )?;
        return emit_routine_return(value, buf, state, env);
    }

    if env.options.funny_return() || state.innermost_block().is_none() {
        return emit_routine_return(value, buf, state, env);
    }
    let operand = classify_operand(value, buf, state, env)?;
    push_value(operand, buf, env)?;
    buf.put_sentinel(BLOCK_EXIT_SENTINEL);
    Ok(FormValue::Void)
}

/// A true routine return, with the historical shortcuts for 0, 1 and
/// the stack.
fn emit_routine_return(
    value: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    let version = env.options.version;
    let operand = classify_operand(value, buf, state, env)?;
    match operand {
        Operand::Small(0) => encode(buf, version, Opcode::Rfalse, &[], None, None)?,
        Operand::Small(1) => encode(buf, version, Opcode::Rtrue, &[], None, None)?,
        Operand::Variable(0) => encode(buf, version, Opcode::RetPopped, &[], None, None)?,
        other => encode(buf, version, Opcode::Ret, &[other], None, None)?,
    }
    Ok(FormValue::Void)
}

/// `AGAIN` restarts the innermost loop, a named enclosing loop, or the
/// routine. Restarts are sentinels with distinct shapes so an inner
/// block scan cannot claim a routine-level restart.
fn translate_again(
    ops: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<FormValue> {
    if ops.len() > 1 {
        return Err(arity_error("AGAIN", "takes at most an activation", state));
    }
    let activation = match ops.first() {
        Some(Expr::Atom(n)) | Some(Expr::LocalVar(n)) => Some(n.clone()),
        Some(other) => {
            return Err(arity_error(
                "AGAIN",
                &format!("activation {:?} is not a name", other),
                state,
            ));
        }
        None => None,
    };

    let target_kind = match &activation {
        Some(act) => match state.find_loop(act) {
            Some(frame) => Some(frame.kind),
            None if state.is_routine_activation(act) => Some(LoopKind::Routine),
            None => None,
        },
        None => state.innermost_loop().map(|f| f.kind),
    };

    match target_kind {
        Some(LoopKind::Routine) => {
            buf.put_sentinel(ROUTINE_RESTART_SENTINEL);
            Ok(FormValue::Void)
        }
        Some(LoopKind::Block(_)) => {
            buf.put_sentinel(LOOP_RESTART_SENTINEL);
            Ok(FormValue::Void)
        }
        None => {
            env.diags.warn(
                "ZIL0508",
                format!(
                    "in {}: AGAIN outside any loop, no code emitted",
                    state.routine_name
                ),
            )?;
            Ok(FormValue::Void)
        }
    }
}
