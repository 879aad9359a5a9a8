//! Densely numbered entity references as mapping keys.
//!
//! The compiler hands out dense integer indices for the things it tracks:
//! routine-address placeholders, interned strings, data tables, block
//! activations. This crate provides the newtype plumbing for those indices
//! and vector-backed maps keyed by them, so an index of one kind cannot be
//! confused with an index of another.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of a `PrimaryMap` or `SecondaryMap`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    /// This should crash if the requested index is not representable.
    fn new(_: usize) -> Self;

    /// Get the index that was used to create this entity reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity
/// reference: `EntityRef`, `Default` (reserved sentinel), and `Display`
/// with the given prefix.
#[macro_export]
macro_rules! entity_impl {
    // Basic traits.
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (::std::u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $entity {
            /// Create a new instance from a `u32`.
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < ::std::u32::MAX);
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    // Include basic traits plus a fmt::Display implementation.
    ($entity:ident, $display_prefix:expr) => {
        entity_impl!($entity);

        impl ::std::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl ::std::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                (self as &dyn ::std::fmt::Display).fmt(f)
            }
        }
    };
}

pub use self::iter::{Iter, IterMut};
pub use self::keys::Keys;
pub use self::map::SecondaryMap;
pub use self::primary::PrimaryMap;

mod iter;
mod keys;
mod map;
mod primary;
