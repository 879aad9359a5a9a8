//! Entity references used throughout code generation.
//!
//! Each kind of deferred address gets its own index space. The low byte of
//! the index is what ends up inside the placeholder sentinel in the emitted
//! bytes, so these spaces are kept dense and allocation order is part of
//! the output.

use zilt_entity::entity_impl;

/// A reference to a routine whose final address is not yet known.
///
/// Appears in operand position as the 16-bit placeholder `0xFD00 | index`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutineRef(u32);
entity_impl!(RoutineRef, "routine");

/// A reference to an interned string in the string region.
///
/// Appears in operand position as the 16-bit placeholder `0xFC00 | index`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StringRef(u32);
entity_impl!(StringRef, "str");

/// A reference to an emitted data table.
///
/// Appears in operand position as the 16-bit placeholder `0xFF00 | index`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableRef(u32);
entity_impl!(TableRef, "table");
