//! Translator from ZIL forms to Z-machine bytecode.
//!
//! The translation is done in one pass over the program: objects are
//! numbered, constants and globals are bound, then each routine body is
//! walked form by form, appending encoded instructions to a code buffer.
//! Anything whose address is not yet known (routines, strings, tables)
//! is emitted as a placeholder sentinel which the assembler patches once
//! the story file is laid out.
//!
//! Two stacks are maintained while a routine is in flight: the block
//! stack, which `RETURN` unwinds, and the loop stack, which `AGAIN`
//! restarts. Both can be targeted by activation name at any depth.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

mod ast;
mod code_translator;
mod diagnostics;
mod environ;
mod program_translator;
mod routine_translator;
mod state;
mod table_translator;
mod translation_utils;

pub use crate::ast::{
    CondNode, Expr, FormNode, Item, Program, RepeatNode, RoutineNode, TableFlags, TableKind,
    TableNode,
};
pub use crate::diagnostics::Warning;
pub use crate::environ::{CompileOptions, SymbolTable, ZilError, ZilResult};
pub use crate::program_translator::{translate_program, Compilation};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
