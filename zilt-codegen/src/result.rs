//! Result and error types representing the outcome of emitting code.

use crate::version::Version;
use failure_derive::Fail;

/// An encoding error.
///
/// Errors at this level mean the caller asked for bytes the Z-machine
/// cannot represent; they are not recoverable by retrying with the same
/// inputs.
#[derive(Fail, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A branch target is further away than the 14-bit signed branch
    /// offset can express.
    #[fail(display = "branch offset {} out of range", _0)]
    BranchOutOfRange(i32),

    /// A jump target is further away than the 16-bit signed jump operand
    /// can express.
    #[fail(display = "jump offset {} out of range", _0)]
    JumpOutOfRange(i64),

    /// More operands than the selected instruction form can carry.
    #[fail(display = "{} operands do not fit the {} form", _0, _1)]
    TooManyOperands(usize, &'static str),

    /// A 2OP instruction was handed an operand count other than two and
    /// cannot be encoded in any form.
    #[fail(display = "2OP instruction given {} operands", _0)]
    BadOperandCount(usize),

    /// The extended form does not exist before V5.
    #[fail(display = "extended opcodes require V5, story is {}", _0)]
    ExtendedForm(Version),

    /// The emitted code outgrew the story format.
    #[fail(display = "code too large for the story file")]
    CodeTooLarge,
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error
/// type.
pub type CodegenResult<T> = Result<T, CodegenError>;
