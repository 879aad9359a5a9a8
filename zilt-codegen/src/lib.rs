//! Z-machine code generation library.
//!
//! This crate knows how to turn abstract instructions into the exact bytes
//! an interpreter executes: opcode form selection, operand type tagging,
//! store and branch suffixes, and the placeholder sentinels that stand in
//! for addresses which are only known once the whole story file is laid
//! out. It is deliberately ignorant of ZIL; the `zilt-zil` crate drives it.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use zilt_entity as entity;

pub mod binemit;
pub mod isa;
pub mod text;

mod entities;
mod result;
mod version;

pub use crate::entities::{RoutineRef, StringRef, TableRef};
pub use crate::result::{CodegenError, CodegenResult};
pub use crate::version::Version;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
