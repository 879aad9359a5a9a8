//! Binary emission of Z-machine code.
//!
//! The `CodeBuffer` is an append-only byte sink with in-place patching.
//! Addresses that are unknown while code is being emitted occupy 16-bit
//! placeholder slots whose high byte is a marker: `0xFD` for routine
//! addresses, `0xFC` for interned strings, `0xFF` for table bases. After
//! everything is emitted, the assembler scans for the markers and patches
//! the slots with packed addresses.
//!
//! Non-local control transfers (`RETURN` out of a block, `AGAIN` back to a
//! loop head) are emitted as `jump` instructions carrying magic operands;
//! the enclosing construct rewrites them to real displacements when it
//! learns its own exit offset. The three-byte patterns differ in their
//! final byte so an inner construct can never capture a transfer that
//! belongs to an outer one.

use crate::entities::{RoutineRef, StringRef, TableRef};
use crate::result::{CodegenError, CodegenResult};
use log::debug;
use zilt_entity::EntityRef;

/// Offset in bytes from the beginning of a code or data region.
pub type CodeOffset = u32;

/// Marker byte of an unresolved routine address.
pub const ROUTINE_MARKER: u8 = 0xFD;
/// Marker byte of an unresolved string address.
pub const STRING_MARKER: u8 = 0xFC;
/// Marker byte of an unresolved table base address.
pub const TABLE_MARKER: u8 = 0xFF;

/// `jump` with this operand is a `RETURN` awaiting the innermost block's
/// exit offset.
pub const BLOCK_EXIT_SENTINEL: [u8; 3] = [0x8C, 0xFF, 0xBB];
/// `jump` with this operand is an `AGAIN` awaiting the innermost loop's
/// start offset.
pub const LOOP_RESTART_SENTINEL: [u8; 3] = [0x8C, 0xFF, 0xAA];
/// `jump` with this operand is an `AGAIN` that restarts the routine and is
/// only rewritten when the routine body is finalized.
pub const ROUTINE_RESTART_SENTINEL: [u8; 3] = [0x8C, 0xFF, 0xAC];

/// The sentinel for a `RETURN` that names a specific enclosing block.
/// Only the block whose index matches the third byte rewrites it.
pub fn targeted_exit_sentinel(block_index: u8) -> [u8; 3] {
    [0x8C, 0xFE, block_index]
}

/// The 16-bit operand standing in for `routine`'s packed address.
pub fn routine_placeholder(routine: RoutineRef) -> u16 {
    debug_assert!(routine.index() <= 0xFF);
    0xFD00 | routine.index() as u16
}

/// The 16-bit operand standing in for `string`'s packed address.
pub fn string_placeholder(string: StringRef) -> u16 {
    debug_assert!(string.index() <= 0xFF);
    0xFC00 | string.index() as u16
}

/// The 16-bit operand standing in for `table`'s base address.
pub fn table_placeholder(table: TableRef) -> u16 {
    debug_assert!(table.index() <= 0xFF);
    0xFF00 | table.index() as u16
}

/// Relocation kinds the assembler knows how to patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reloc {
    /// Packed address of a routine.
    RoutinePacked,
    /// Packed address of an interned string.
    StringPacked,
    /// Byte address of a table base.
    TableBase,
}

impl Reloc {
    /// The marker byte that identifies this relocation in emitted bytes.
    pub fn marker(self) -> u8 {
        match self {
            Reloc::RoutinePacked => ROUTINE_MARKER,
            Reloc::StringPacked => STRING_MARKER,
            Reloc::TableBase => TABLE_MARKER,
        }
    }
}

/// A placeholder slot discovered by scanning emitted bytes: the offset of
/// the marker byte and the index stored in the low byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fixup {
    /// Offset of the 16-bit slot within the scanned region.
    pub offset: CodeOffset,
    /// Dense placeholder index from the slot's low byte.
    pub index: u8,
}

/// Scan a finished byte region for the 16-bit slots bearing `reloc`'s
/// marker.
///
/// The scan is byte-blind: a data byte that happens to equal the marker
/// is indistinguishable from a placeholder. The marker values sit at the
/// top of the 16-bit range, so a colliding constant must fall in the
/// last kilobyte of the negative numbers; callers additionally filter
/// hits against the registry size.
pub fn scan_fixups(bytes: &[u8], reloc: Reloc) -> Vec<Fixup> {
    let marker = reloc.marker();
    let mut fixups = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == marker {
            fixups.push(Fixup {
                offset: i as CodeOffset,
                index: bytes[i + 1],
            });
            i += 2;
        } else {
            i += 1;
        }
    }
    fixups
}

/// An append-only byte sink with in-place patching.
#[derive(Clone, Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Current length, which is also the offset the next byte will land
    /// at.
    pub fn len(&self) -> CodeOffset {
        self.bytes.len() as CodeOffset
    }

    /// Is the buffer empty?
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The emitted bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer, yielding the emitted bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Append one byte.
    pub fn put1(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Append a big-endian 16-bit word.
    pub fn put2(&mut self, word: u16) {
        self.bytes.push((word >> 8) as u8);
        self.bytes.push(word as u8);
    }

    /// Append a slice of bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Overwrite one byte.
    pub fn patch1(&mut self, at: CodeOffset, byte: u8) {
        self.bytes[at as usize] = byte;
    }

    /// Overwrite a big-endian 16-bit word.
    pub fn patch2(&mut self, at: CodeOffset, word: u16) {
        self.bytes[at as usize] = (word >> 8) as u8;
        self.bytes[at as usize + 1] = word as u8;
    }

    /// Read one byte back.
    pub fn byte_at(&self, at: CodeOffset) -> u8 {
        self.bytes[at as usize]
    }

    /// Insert `count` zero bytes at `at`, shifting the tail up.
    ///
    /// Used when a routine's local set grows after its header was
    /// emitted. Every control transfer in the tail is either relative or
    /// a sentinel, so the shift preserves them all.
    pub fn insert_zeros(&mut self, at: CodeOffset, count: usize) {
        let at = at as usize;
        self.bytes.splice(at..at, std::iter::repeat(0).take(count));
    }

    /// Pad with zero bytes until the length is a multiple of `alignment`.
    pub fn align_to(&mut self, alignment: u32) {
        while self.len() % alignment != 0 {
            self.put1(0);
        }
    }

    /// Append an unconditional `jump` to a known offset within this
    /// buffer. Used for the backward jumps that close loops.
    pub fn put_jump_to(&mut self, target: CodeOffset) -> CodegenResult<()> {
        let at = self.len();
        self.put_slice(&[0x8C, 0, 0]);
        self.patch_jump(at, target)
    }

    /// Append the three bytes of `sentinel` verbatim.
    pub fn put_sentinel(&mut self, sentinel: [u8; 3]) {
        self.put_slice(&sentinel);
    }

    /// Patch the operand of the `jump` instruction at `at` so control
    /// lands on `target`.
    pub fn patch_jump(&mut self, at: CodeOffset, target: CodeOffset) -> CodegenResult<()> {
        debug_assert_eq!(self.byte_at(at), 0x8C, "not a jump instruction");
        let disp = crate::isa::jump_displacement(at + 3, target);
        if disp < i64::from(i16::min_value()) || disp > i64::from(i16::max_value()) {
            return Err(CodegenError::JumpOutOfRange(disp));
        }
        self.patch2(at + 1, disp as i16 as u16);
        Ok(())
    }

    /// Rewrite every occurrence of a sentinel pattern in `start..` into a
    /// `jump` to `target`. Returns how many were rewritten.
    ///
    /// Inner constructs must have rewritten their own sentinels already;
    /// whatever still matches belongs to the caller.
    pub fn rewrite_sentinels(
        &mut self,
        start: CodeOffset,
        sentinel: [u8; 3],
        target: CodeOffset,
    ) -> CodegenResult<usize> {
        let mut count = 0;
        let mut i = start as usize;
        while i + 3 <= self.bytes.len() {
            if self.bytes[i..i + 3] == sentinel {
                self.patch_jump(i as CodeOffset, target)?;
                count += 1;
                i += 3;
            } else {
                i += 1;
            }
        }
        if count > 0 {
            debug!(
                "rewrote {} {:02x?} sentinel(s) to jump to {:#x}",
                count, sentinel, target
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_arithmetic() {
        // A jump at offset 0 targeting offset 10: displacement is
        // 10 - 3 + 2 = 9.
        let mut buf = CodeBuffer::new();
        buf.put_slice(&[0x8C, 0, 0]);
        buf.patch_jump(0, 10).unwrap();
        assert_eq!(buf.bytes(), &[0x8C, 0x00, 0x09]);

        // Backward to offset 0 from a jump at offset 6: 0 - 9 + 2 = -7.
        let mut buf = CodeBuffer::new();
        buf.put_slice(&[0; 6]);
        buf.put_jump_to(0).unwrap();
        assert_eq!(&buf.bytes()[6..], &[0x8C, 0xFF, 0xF9]);
    }

    #[test]
    fn sentinel_rewrite_is_scoped() {
        let mut buf = CodeBuffer::new();
        buf.put_sentinel(BLOCK_EXIT_SENTINEL);
        buf.put_sentinel(LOOP_RESTART_SENTINEL);
        buf.put_sentinel(BLOCK_EXIT_SENTINEL);
        let exit = buf.len();

        // Only the block-exit pattern is rewritten; the loop sentinel is
        // left for its owner.
        let n = buf.rewrite_sentinels(0, BLOCK_EXIT_SENTINEL, exit).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf.bytes()[3..6], &LOOP_RESTART_SENTINEL);

        let n = buf.rewrite_sentinels(0, LOOP_RESTART_SENTINEL, 0).unwrap();
        assert_eq!(n, 1);

        // Nothing matches any longer.
        assert_eq!(
            buf.rewrite_sentinels(0, BLOCK_EXIT_SENTINEL, exit).unwrap(),
            0
        );
    }

    #[test]
    fn targeted_sentinels_differ_per_block() {
        assert_ne!(targeted_exit_sentinel(0), targeted_exit_sentinel(1));
        assert_ne!(targeted_exit_sentinel(0x0BB), BLOCK_EXIT_SENTINEL);
    }

    #[test]
    fn fixup_scan() {
        let bytes = [0x00, 0xFD, 0x02, 0x14, 0xFC, 0x00, 0xFD, 0x07];
        let routines = scan_fixups(&bytes, Reloc::RoutinePacked);
        assert_eq!(
            routines,
            vec![
                Fixup {
                    offset: 1,
                    index: 2
                },
                Fixup {
                    offset: 6,
                    index: 7
                },
            ]
        );
        let strings = scan_fixups(&bytes, Reloc::StringPacked);
        assert_eq!(
            strings,
            vec![Fixup {
                offset: 4,
                index: 0
            }]
        );
    }

    #[test]
    fn alignment_padding() {
        let mut buf = CodeBuffer::new();
        buf.put1(1);
        buf.align_to(8);
        assert_eq!(buf.len(), 8);
        buf.align_to(8);
        assert_eq!(buf.len(), 8);
    }
}
