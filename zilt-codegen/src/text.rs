//! ZSCII text encoding.
//!
//! Story text is packed three 5-bit Z-characters to a big-endian word,
//! with the high bit set on the last word. The three alphabet rows and
//! the shift characters moved around in the early versions: V1 has its
//! own punctuation row and no newline in A2, and V1-2 use Z-characters
//! 2/3 as single shifts where V3+ uses 4/5.

use crate::version::Version;

const ALPHA0: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHA1: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
// Row 2 starts at Z-character 7; position 0 (Z-character 6) is the ZSCII
// escape in every version.
const ALPHA2: &[u8] = b"\n0123456789.,!?_#'\"/\\-:()";
const ALPHA2_V1: &[u8] = b"0123456789.,!?_#'\"/\\<-:()";

/// The ZSCII code for a single character, as used by `print_char`
/// operands and dictionary entries. Printable ASCII maps through
/// unchanged; newline is 13.
pub fn zscii(c: char) -> Option<u8> {
    match c {
        '\n' => Some(13),
        ' '..='~' => Some(c as u8),
        _ => None,
    }
}

/// A version-aware encoder from source text to packed Z-characters.
#[derive(Clone, Copy, Debug)]
pub struct TextEncoder {
    version: Version,
}

impl TextEncoder {
    /// Create an encoder for `version`.
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    fn shift_to(&self, alphabet: usize) -> u8 {
        // V1-2 shift with 2/3, V3+ with 4/5.
        let base = if self.version.at_most(2) { 1 } else { 3 };
        base + alphabet as u8
    }

    /// Translate `text` into unpacked 5-bit Z-characters.
    pub fn zchars(&self, text: &str) -> Vec<u8> {
        let alpha2 = if self.version.number() == 1 {
            ALPHA2_V1
        } else {
            ALPHA2
        };
        let mut out = Vec::with_capacity(text.len());
        for c in text.chars() {
            if c == ' ' {
                out.push(0);
            } else if c == '\n' && self.version.number() == 1 {
                out.push(1);
            } else if let Some(pos) = ALPHA0.iter().position(|&a| a == c as u8) {
                out.push(6 + pos as u8);
            } else if let Some(pos) = ALPHA1.iter().position(|&a| a == c as u8) {
                out.push(self.shift_to(1));
                out.push(6 + pos as u8);
            } else if let Some(pos) = alpha2.iter().position(|&a| a == c as u8) {
                out.push(self.shift_to(2));
                out.push(7 + pos as u8);
            } else {
                // ZSCII escape: shift to A2, Z-character 6, then the
                // 10-bit code in two 5-bit halves.
                let code = zscii(c).map(u16::from).unwrap_or(c as u16 & 0x3FF);
                out.push(self.shift_to(2));
                out.push(6);
                out.push((code >> 5) as u8 & 0x1F);
                out.push(code as u8 & 0x1F);
            }
        }
        out
    }

    /// Encode `text` into packed words. The final word has its high bit
    /// set; an empty string still produces one padding word.
    pub fn encode_words(&self, text: &str) -> Vec<u16> {
        let mut zchars = self.zchars(text);
        while zchars.len() % 3 != 0 || zchars.is_empty() {
            zchars.push(5);
        }
        let mut words: Vec<u16> = zchars
            .chunks(3)
            .map(|c| (u16::from(c[0]) << 10) | (u16::from(c[1]) << 5) | u16::from(c[2]))
            .collect();
        *words.last_mut().unwrap() |= 0x8000;
        words
    }

    /// Encode `text` into the byte sequence embedded after `print` and
    /// `print_ret`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in self.encode_words(text) {
            bytes.push((word >> 8) as u8);
            bytes.push(word as u8);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(v: u8) -> TextEncoder {
        TextEncoder::new(Version::new(v).unwrap())
    }

    #[test]
    fn lowercase_packs_directly() {
        // "hi" is two A0 characters plus one pad: a single word.
        let words = enc(3).encode_words("hi");
        assert_eq!(words.len(), 1);
        assert_eq!(words[0], 0x8000 | (13 << 10) | (14 << 5) | 5);
    }

    #[test]
    fn uppercase_shifts() {
        // "Hi" is shift(4), h, i: exactly one word, high bit set.
        let words = enc(3).encode_words("Hi");
        assert_eq!(words.len(), 1);
        assert_eq!(words[0], 0x8000 | (4 << 10) | (13 << 5) | 14);
    }

    #[test]
    fn v1_uses_different_shifts() {
        let zchars = enc(1).zchars("A");
        assert_eq!(zchars, vec![2, 6]);
        let zchars = enc(3).zchars("A");
        assert_eq!(zchars, vec![4, 6]);
    }

    #[test]
    fn v1_newline_is_zchar_1() {
        assert_eq!(enc(1).zchars("\n"), vec![1]);
        // V3 reaches newline through A2.
        assert_eq!(enc(3).zchars("\n"), vec![5, 7]);
    }

    #[test]
    fn empty_string_still_terminates() {
        let words = enc(3).encode_words("");
        assert_eq!(words, vec![0x8000 | (5 << 10) | (5 << 5) | 5]);
    }

    #[test]
    fn zscii_escape_for_exotic_characters() {
        // '@' is not in any alphabet: escape sequence, 4 zchars, so two
        // words once padded.
        let words = enc(3).encode_words("@");
        assert_eq!(words.len(), 2);
        let z = enc(3).zchars("@");
        assert_eq!(z, vec![5, 6, (64 >> 5) as u8, (64 & 0x1F) as u8]);
    }

    #[test]
    fn zscii_codes() {
        assert_eq!(zscii('A'), Some(65));
        assert_eq!(zscii('\n'), Some(13));
        assert_eq!(zscii('\u{1F600}'), None);
    }
}
