//! Compilation options, external symbol tables, and the error type.

use failure_derive::Fail;
use std::collections::{BTreeMap, BTreeSet};
use zilt_codegen::{CodegenError, Version};

/// A ZIL translation error. Errors abort the compilation; anything
/// recoverable is a warning instead.
#[derive(Fail, Debug, PartialEq, Eq)]
pub enum ZilError {
    /// An operator was handed the wrong number of operands.
    #[fail(display = "in {}: {} {}", routine, op, message)]
    Arity {
        /// Routine being compiled when the error was raised.
        routine: String,
        /// The offending operator.
        op: String,
        /// What the operator requires.
        message: String,
    },

    /// An operator does not exist in the target version.
    #[fail(display = "in {}: {} requires V{}..V{}, story is {}", routine, op, min, max, version)]
    VersionGate {
        /// Routine being compiled when the error was raised.
        routine: String,
        /// The offending operator.
        op: String,
        /// First version with the operator.
        min: u8,
        /// Last version with the operator.
        max: u8,
        /// The target version.
        version: Version,
    },

    /// A routine declared more locals than the Z-machine has slots.
    #[fail(display = "routine {} has {} locals, limit is 15", routine, count)]
    TooManyLocals {
        /// The routine.
        routine: String,
        /// Declared plus block-introduced locals.
        count: usize,
    },

    /// A routine requires more parameters than any call can pass.
    #[fail(display = "routine {} has {} required parameters, limit is {}", routine, count, limit)]
    TooManyParams {
        /// The routine.
        routine: String,
        /// Required parameter count.
        count: usize,
        /// The version's limit.
        limit: usize,
    },

    /// The `GO` entry point has a signature the Z-machine cannot start.
    #[fail(display = "GO {}", message)]
    EntryPoint {
        /// What is wrong with it.
        message: String,
    },

    /// A dense index space overflowed (placeholders, blocks, objects).
    #[fail(display = "too many {}: limit is {}", what, limit)]
    LimitExceeded {
        /// Which space overflowed.
        what: &'static str,
        /// Its capacity.
        limit: usize,
    },

    /// A warning promoted to an error by `warn_as_error`.
    #[fail(display = "{}: {}", code, message)]
    WarningAsError {
        /// The warning's diagnostic code.
        code: String,
        /// The warning text.
        message: String,
    },

    /// An encoding failure bubbled up from the code generator.
    #[fail(display = "{}", _0)]
    Codegen(#[cause] CodegenError),
}

impl From<CodegenError> for ZilError {
    fn from(e: CodegenError) -> Self {
        ZilError::Codegen(e)
    }
}

/// A convenient alias for a `Result` that uses `ZilError` as the error
/// type.
pub type ZilResult<T> = Result<T, ZilError>;

/// Compiler configuration.
///
/// The recognized `compile_globals` keys of the source language surface
/// here as plain fields: `CRLF-CHARACTER`, `PRESERVE-SPACES?` and
/// `DO-FUNNY-RETURN?`.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Target Z-machine version.
    pub version: Version,
    /// Drop every warning.
    pub suppress_all_warnings: bool,
    /// Drop warnings whose code starts with one of these prefixes.
    pub suppressed_warnings: Vec<String>,
    /// Turn the first surviving warning into a fatal error.
    pub warn_as_error: bool,
    /// Override for the funny-return rule. When unset, V5+ defaults to
    /// "RETURN exits the routine" and V1-4 to "RETURN exits the block".
    pub do_funny_return: Option<bool>,
    /// Keep whitespace in string literals exactly as written.
    pub preserve_spaces: bool,
    /// The character in string literals that turns into a newline.
    pub crlf_character: char,
    /// Serial number stamped into the header, six ASCII digits. V1
    /// stories have no serial and get zeros regardless.
    pub serial: [u8; 6],
}

impl CompileOptions {
    /// Default options for `version`.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            suppress_all_warnings: false,
            suppressed_warnings: Vec::new(),
            warn_as_error: false,
            do_funny_return: None,
            preserve_spaces: false,
            crlf_character: '|',
            serial: *b"000000",
        }
    }

    /// Does `RETURN` without an activation exit the routine rather than
    /// the innermost block?
    pub fn funny_return(&self) -> bool {
        self.do_funny_return.unwrap_or(self.version.at_least(5))
    }
}

/// Symbol tables produced by the object and syntax builders, which run
/// before code generation.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    /// Flag name to attribute bit.
    pub flags: BTreeMap<String, u16>,
    /// Property name to property number.
    pub properties: BTreeMap<String, u16>,
    /// Parser constants (verb numbers, action numbers, and friends).
    pub parser_constants: BTreeMap<String, i32>,
    /// Flags referenced from syntax lines; counts as use for the unused
    /// flag check.
    pub syntax_flags: BTreeSet<String>,
    /// The lowest property number that is a direction.
    pub low_direction: u16,
    /// The highest property number in use.
    pub max_properties: u16,
}

impl SymbolTable {
    /// An empty symbol table with version-appropriate property bounds.
    pub fn new(version: Version) -> Self {
        Self {
            flags: BTreeMap::new(),
            properties: BTreeMap::new(),
            parser_constants: BTreeMap::new(),
            syntax_flags: BTreeSet::new(),
            low_direction: 0,
            max_properties: if version.at_most(3) { 31 } else { 63 },
        }
    }
}
