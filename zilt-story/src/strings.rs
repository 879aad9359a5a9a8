//! The packed string region.

use zilt_codegen::binemit::CodeOffset;
use zilt_codegen::text::TextEncoder;
use zilt_codegen::{StringRef, Version};
use zilt_entity::{PrimaryMap, SecondaryMap};

/// The encoded string region: every interned string, each starting at
/// an offset the version's packed addressing can express.
pub struct StringTable {
    bytes: Vec<u8>,
    offsets: SecondaryMap<StringRef, CodeOffset>,
}

impl StringTable {
    /// Encode every string in placeholder-index order.
    ///
    /// The region's own base must be aligned to the version's packing
    /// alignment; each entry is padded to keep that alignment.
    pub fn build(strings: &PrimaryMap<StringRef, String>, version: Version) -> Self {
        let encoder = TextEncoder::new(version);
        let alignment = version.alignment() as usize;
        let mut bytes = Vec::new();
        let mut offsets = SecondaryMap::new();
        for (string, text) in strings.iter() {
            while bytes.len() % alignment != 0 {
                bytes.push(0);
            }
            offsets[string] = bytes.len() as CodeOffset;
            bytes.extend_from_slice(&encoder.encode(text));
        }
        Self { bytes, offsets }
    }

    /// The region's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A string's offset within the region.
    pub fn offset(&self, string: StringRef) -> CodeOffset {
        self.offsets[string]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_packing_alignment() {
        let mut strings = PrimaryMap::new();
        let a = strings.push("hi".to_string());
        let b = strings.push("there".to_string());

        let table = StringTable::build(&strings, Version::new(5).unwrap());
        assert_eq!(table.offset(a) % 4, 0);
        assert_eq!(table.offset(b) % 4, 0);
        // "hi" is one word; the next entry starts at the next 4-aligned
        // offset.
        assert_eq!(table.offset(b), 4);
        // The final word of each string has its high bit set.
        assert!(table.bytes()[table.offset(a) as usize] & 0x80 != 0);
    }
}
