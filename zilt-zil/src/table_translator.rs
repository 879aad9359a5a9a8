//! Lowering of table literals to raw data bytes.
//!
//! Tables accumulate in an append-only region separate from code. Each
//! table is assigned a dense index, and references to it from code or
//! from global initializers are the 16-bit placeholder `0xFF00 | index`
//! until the assembler knows where the region lands.

use crate::ast::{Expr, TableKind, TableNode};
use crate::environ::ZilResult;
use crate::program_translator::ProgramTranslator;
use crate::translation_utils::{const_value, word_of};
use zilt_codegen::binemit::{string_placeholder, table_placeholder};
use zilt_codegen::TableRef;

/// Emit a table literal into the table region, returning its index.
pub(crate) fn translate_table(
    node: &TableNode,
    env: &mut ProgramTranslator,
) -> ZilResult<TableRef> {
    let mut bytes = Vec::new();
    let element_width: u32 = if node.flags.byte { 1 } else { 2 };

    if node.kind == TableKind::ITable {
        let size = node.size.unwrap_or(0).max(0) as u32;
        if node.flags.lexv {
            // A lexical buffer: capacity byte, entry-count byte, then
            // four zero bytes per entry for the parser to fill in.
            if size % 3 != 0 {
                env.diags.warn(
                    "MDL0428",
                    format!("LEXV table size {} is not a multiple of 3", size),
                )?;
            }
            if size > 255 {
                env.diags.warn(
                    "MDL0430",
                    format!("LEXV table size {} exceeds its length byte", size),
                )?;
            }
            bytes.push(size as u8);
            bytes.push(0);
            bytes.resize(bytes.len() + 4 * size as usize, 0);
        } else if node.flags.length && node.flags.byte {
            // A text buffer: size byte, then `size` bytes of initializer.
            if size > 255 {
                env.diags.warn(
                    "MDL0430",
                    format!("ITABLE size {} exceeds its length byte", size),
                )?;
            }
            let init = match node.values.first() {
                Some(v) => data_word(v, env)? as u8,
                None => 0,
            };
            bytes.push(size as u8);
            bytes.resize(bytes.len() + size as usize, init);
        } else {
            if node.flags.length {
                bytes.push((size >> 8) as u8);
                bytes.push(size as u8);
            }
            if node.values.is_empty() {
                bytes.resize(bytes.len() + (size * element_width) as usize, 0);
            } else {
                for _ in 0..size {
                    for value in &node.values {
                        emit_element(&mut bytes, value, element_width, node, env)?;
                    }
                }
            }
        }
    } else {
        let count = node.values.len();
        if node.kind == TableKind::LTable {
            bytes.push((count >> 8) as u8);
            bytes.push(count as u8);
        } else if node.flags.length {
            if count > 255 {
                env.diags.warn(
                    "MDL0430",
                    format!("table length {} exceeds its length byte", count),
                )?;
            }
            bytes.push(count as u8);
        }
        for value in &node.values {
            emit_element(&mut bytes, value, element_width, node, env)?;
        }
    }

    let pure = node.flags.pure || node.kind == TableKind::PTable;
    env.add_table(bytes, pure)
}

/// Emit one element. `#BYTE` and `#WORD` prefixes override the table's
/// element width for a single value; `(STRING)` tables splat string
/// literals as raw characters.
fn emit_element(
    out: &mut Vec<u8>,
    value: &Expr,
    width: u32,
    node: &TableNode,
    env: &mut ProgramTranslator,
) -> ZilResult<()> {
    if let Expr::Form(form) = value {
        match form.op.as_str() {
            "#BYTE" | "BYTE" if form.operands.len() == 1 => {
                let word = data_word(&form.operands[0], env)?;
                out.push(word as u8);
                return Ok(());
            }
            "#WORD" | "WORD" if form.operands.len() == 1 => {
                let word = data_word(&form.operands[0], env)?;
                out.push((word >> 8) as u8);
                out.push(word as u8);
                return Ok(());
            }
            _ => {}
        }
    }
    if let Expr::Str(text) = value {
        if node.flags.string {
            out.extend_from_slice(text.as_bytes());
            return Ok(());
        }
    }

    let word = data_word(value, env)?;
    // Placeholder words must keep their 16-bit slot even in byte tables,
    // or the assembler could not patch them.
    if width == 2 || (word & 0xFC00) >= 0xFC00 {
        out.push((word >> 8) as u8);
        out.push(word as u8);
    } else {
        out.push(word as u8);
    }
    Ok(())
}

/// Resolve a table element to a 16-bit value. Tables hold no code, so
/// only compile-time-resolvable things are accepted.
pub(crate) fn data_word(value: &Expr, env: &mut ProgramTranslator) -> ZilResult<u16> {
    if let Some(n) = const_value(value, env) {
        return Ok(word_of(n));
    }
    match value {
        Expr::Atom(name) | Expr::GlobalVar(name) => {
            if let Some(number) = env.object_number(name) {
                return Ok(number);
            }
            if env.is_routine(name) {
                let routine = env.routine_placeholder_for(name)?;
                return Ok(zilt_codegen::binemit::routine_placeholder(routine));
            }
            env.diags.warn(
                "ZIL0506",
                format!("{} is not usable in a table, using 0", name),
            )?;
            Ok(0)
        }
        Expr::Str(text) => {
            let string = env.intern_string(text)?;
            Ok(string_placeholder(string))
        }
        Expr::Table(nested) => {
            let table = translate_table(nested, env)?;
            Ok(table_placeholder(table))
        }
        other => {
            env.diags.warn(
                "ZIL0506",
                format!("table element {:?} is not constant, using 0", other),
            )?;
            Ok(0)
        }
    }
}
