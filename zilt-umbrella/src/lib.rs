//! Umbrella crate re-exporting the commonly-used zilt crates.
//!
//! Most users want the translator and the assembler together: build a
//! `Program`, call `zil::translate_program`, then `story::assemble`.

#![deny(missing_docs)]

pub use zilt_codegen as codegen;
pub use zilt_story as story;
pub use zilt_zil as zil;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
