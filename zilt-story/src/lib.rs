//! Assembling a translated program into a Z-machine story file.
//!
//! The translator hands over code and table regions full of placeholder
//! sentinels. This crate decides where everything lives in the story's
//! address space, packs the interned strings, patches every placeholder
//! with its final packed address, and writes the 64-byte header with
//! the lengths, offsets and checksum an interpreter expects.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::assembler::{assemble, StoryError, StoryResult};
pub use crate::strings::StringTable;

mod assembler;
mod strings;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
