//! Routine-level translation: the prolog, the body, the implicit return,
//! and the finalization patches.
//!
//! The routine header is one `n_locals` byte, followed in V1-4 by one
//! big-endian word of initial value per local. V5+ headers have no
//! initial values; defaults become explicit stores at the top of the
//! body, guarded by `check_arg_count` for optional parameters so a
//! caller-supplied argument is not clobbered. The store prolog is also
//! the offset a routine-level `AGAIN` jumps back to.
//!
//! A `PROG` or `BIND` in the body may widen the local set past what the
//! header declared; the header byte (and in V1-4 the initial-value
//! block) is patched once the body is finished.

use crate::ast::{Expr, RoutineNode};
use crate::code_translator::{translate_statement, translate_value, FormValue};
use crate::environ::{ZilError, ZilResult};
use crate::program_translator::ProgramTranslator;
use crate::state::TranslationState;
use crate::translation_utils::{
    bind_branch, classify_operand, const_value, is_terminator, reserve_branch, word_of,
};
use log::debug;
use zilt_codegen::binemit::{CodeBuffer, ROUTINE_RESTART_SENTINEL};
use zilt_codegen::isa::{encode, Opcode, Operand};

/// The entry-point routine, always emitted first.
pub(crate) const ENTRY_ROUTINE: &str = "GO";

/// Translate one routine and append it to the program's code region.
pub(crate) fn translate_routine(
    routine: &RoutineNode,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    debug!("routine {} begins", routine.name);

    let required = routine.params.len();
    let limit = version.max_call_args();
    if required > limit.min(7) {
        return Err(ZilError::TooManyParams {
            routine: routine.name.clone(),
            count: required,
            limit: limit.min(7),
        });
    }
    if routine.name == ENTRY_ROUTINE && required > 0 {
        return Err(ZilError::EntryPoint {
            message: format!("cannot take {} required parameters", required),
        });
    }

    let mut state = TranslationState::new(&routine.name, routine.activation.clone());

    // Declared locals in slot order: required, then optional, then AUX.
    for name in &routine.params {
        state.declare_local(name)?;
    }
    let mut opt_slots = Vec::new();
    for (i, (name, _)) in routine.opt_params.iter().enumerate() {
        let slot = state.declare_local(name)?;
        opt_slots.push(slot);
        if required + i + 1 > limit {
            env.diags.warn(
                "MDL0417",
                format!(
                    "in {}: optional parameter {} can never receive an argument in {}",
                    routine.name, name, version
                ),
            )?;
        }
    }
    let mut aux_slots = Vec::new();
    for (name, _) in &routine.aux {
        aux_slots.push(state.declare_local(name)?);
    }
    let declared = state.high_water();

    // Header: locals count, then V1-4 initial-value words holding the
    // constant defaults.
    let mut buf = CodeBuffer::new();
    buf.put1(declared);
    if version.has_local_defaults() {
        let mut defaults = vec![0u16; usize::from(declared)];
        for (i, (_, init)) in routine.opt_params.iter().enumerate() {
            if let Some(value) = init.as_ref().and_then(|e| const_value(e, env)) {
                defaults[usize::from(opt_slots[i]) - 1] = word_of(value);
            }
        }
        for (i, (_, init)) in routine.aux.iter().enumerate() {
            if let Some(value) = init.as_ref().and_then(|e| const_value(e, env)) {
                defaults[usize::from(aux_slots[i]) - 1] = word_of(value);
            }
        }
        for word in defaults {
            buf.put2(word);
        }
    }
    state.body_start = buf.len();
    // The routine itself is the bottom of the loop stack: a top-level
    // AGAIN restarts it from the store prolog.
    state.push_loop(
        crate::state::LoopKind::Routine,
        routine.activation.clone(),
        state.body_start,
    );

    // Store prolog. Optional-parameter defaults need a check_arg_count
    // guard from V5 on; in V1-4 the header words already hold them. AUX
    // defaults are stored unconditionally, which is also what lets a
    // routine-level AGAIN re-initialize them.
    if version.at_least(5) {
        for (i, (_, init)) in routine.opt_params.iter().enumerate() {
            if let Some(init) = init {
                let slot = opt_slots[i];
                encode(
                    &mut buf,
                    version,
                    Opcode::CheckArgCount,
                    &[Operand::Small(slot)],
                    None,
                    None,
                )?;
                let skip = reserve_branch(&mut buf, true);
                store_default(slot, init, &mut buf, &mut state, env)?;
                let target = buf.len();
                bind_branch(&mut buf, skip, target)?;
            }
        }
    }
    // AUX defaults are stored in every version: V1-4 headers already
    // carry the constants, but the store is what lets a routine-level
    // AGAIN restart with fresh values.
    for (i, (_, init)) in routine.aux.iter().enumerate() {
        if let Some(init) = init {
            store_default(aux_slots[i], init, &mut buf, &mut state, env)?;
        }
    }

    // Body, with the implicit return synthesized from the final
    // statement's shape.
    translate_body(&routine.body, &mut buf, &mut state, env)?;

    // Routine-level AGAIN re-enters at the store prolog.
    buf.rewrite_sentinels(0, ROUTINE_RESTART_SENTINEL, state.body_start)?;

    // A block may have widened the local set; patch the header.
    let high_water = state.high_water();
    if high_water > declared {
        buf.patch1(0, high_water);
        if version.has_local_defaults() {
            let at = 1 + 2 * u32::from(declared);
            buf.insert_zeros(at, 2 * usize::from(high_water - declared));
        }
        debug!(
            "routine {} widened locals {} -> {}",
            routine.name, declared, high_water
        );
    }

    if routine.name == ENTRY_ROUTINE && !version.at_least(6) && high_water > 0 {
        return Err(ZilError::EntryPoint {
            message: format!("cannot have locals before V6, has {}", high_water),
        });
    }

    // Unused-local warnings, skipping initializers kept for their side
    // effects.
    for (name, init) in routine.opt_params.iter().chain(routine.aux.iter()) {
        let side_effect = init.as_ref().map_or(false, has_side_effects);
        if !state.is_used(name) && !side_effect {
            env.diags.warn(
                "ZIL0210",
                format!("in {}: local {} is bound but never used", routine.name, name),
            )?;
        }
    }

    // Land the routine in the code region at the version's alignment.
    env.code.align_to(version.alignment());
    let base = env.code.len();
    env.routine_offsets.insert(routine.name.clone(), base);
    if routine.name == ENTRY_ROUTINE {
        let header = 1 + if version.has_local_defaults() {
            2 * u32::from(high_water)
        } else {
            0
        };
        env.entry_pc = Some(base + header);
    }
    env.code.put_slice(buf.bytes());
    debug!("routine {} at {:#x}, {} bytes", routine.name, base, buf.len());
    Ok(())
}

fn store_default(
    slot: u8,
    init: &Expr,
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let operand = classify_operand(init, buf, state, env)?;
    encode(
        buf,
        env.options.version,
        Opcode::Store,
        &[Operand::Small(slot), operand],
        None,
        None,
    )?;
    Ok(())
}

/// Whether evaluating an initializer does something besides produce a
/// value.
fn has_side_effects(expr: &Expr) -> bool {
    match expr {
        Expr::Form(_) | Expr::Cond(_) | Expr::Repeat(_) => true,
        _ => false,
    }
}

/// Emit the body statements, then make sure control cannot fall off the
/// end: the final statement either is a terminator, or its value is
/// synthesized into a return.
fn translate_body(
    body: &[Expr],
    buf: &mut CodeBuffer,
    state: &mut TranslationState,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    let version = env.options.version;
    if body.is_empty() {
        encode(buf, version, Opcode::Rfalse, &[], None, None)?;
        return Ok(());
    }
    for stmt in &body[..body.len() - 1] {
        translate_statement(stmt, buf, state, env)?;
    }
    let last = body.last().unwrap();
    if is_terminator(last) {
        return translate_statement(last, buf, state, env);
    }
    match last {
        Expr::Form(_) | Expr::Cond(_) | Expr::Repeat(_) => {
            match translate_value(last, buf, state, env)? {
                FormValue::Stack => encode(buf, version, Opcode::RetPopped, &[], None, None)?,
                FormValue::Slot(slot) => encode(
                    buf,
                    version,
                    Opcode::Ret,
                    &[Operand::Variable(slot)],
                    None,
                    None,
                )?,
                // A void operation's value is true.
                FormValue::Void => encode(buf, version, Opcode::Rtrue, &[], None, None)?,
            }
        }
        plain => {
            let operand = classify_operand(plain, buf, state, env)?;
            match operand {
                Operand::Small(0) => encode(buf, version, Opcode::Rfalse, &[], None, None)?,
                Operand::Small(1) => encode(buf, version, Opcode::Rtrue, &[], None, None)?,
                Operand::Variable(0) => encode(buf, version, Opcode::RetPopped, &[], None, None)?,
                other => encode(buf, version, Opcode::Ret, &[other], None, None)?,
            }
        }
    }
    Ok(())
}
