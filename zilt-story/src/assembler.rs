//! Story-file layout and placeholder patching.
//!
//! Memory map, low to high:
//!
//! ```text
//! 0x0000  header (64 bytes)
//! 0x0040  abbreviations table (96 zero words; the encoder never
//!         abbreviates, the region just keeps interpreters honest)
//!         object table stub (property defaults only; the real builder
//!         is an external collaborator)
//!         globals (240 words of initial values)
//!         table region (writable, so still dynamic memory)
//!         dictionary stub       <- static memory base
//!         code region           <- high memory base
//!         string region
//! ```
//!
//! Everything in the code and table regions that carried a placeholder
//! sentinel is patched here: routine and string slots get packed
//! addresses, table slots get byte addresses. The header is written
//! last so the stored length and checksum see the final bytes.

use failure_derive::Fail;
use log::debug;
use zilt_codegen::binemit::{scan_fixups, Reloc};
use zilt_codegen::{RoutineRef, StringRef, TableRef, Version};
use zilt_entity::EntityRef;
use zilt_zil::Compilation;

use crate::strings::StringTable;

/// An assembly failure. These are structural: the program does not fit
/// the story format.
#[derive(Fail, Debug, PartialEq, Eq)]
pub enum StoryError {
    /// No `GO` routine, so there is nothing to point the initial PC at.
    #[fail(display = "program has no GO entry point")]
    NoEntryPoint,

    /// A region base outgrew the 16-bit header fields.
    #[fail(display = "{} at {:#x} does not fit a header word", _0, _1)]
    RegionOutOfRange(&'static str, u32),

    /// The file outgrew what the version's length field can express.
    #[fail(display = "story file of {} bytes exceeds the {} limit", _0, _1)]
    FileTooLarge(u32, Version),
}

/// A convenient alias for a `Result` that uses `StoryError` as the
/// error type.
pub type StoryResult<T> = Result<T, StoryError>;

const HEADER_SIZE: u32 = 64;
const ABBREV_WORDS: u32 = 96;
const GLOBAL_WORDS: u32 = 240;

struct Layout {
    abbrev_base: u32,
    objects_base: u32,
    globals_base: u32,
    tables_base: u32,
    dictionary_base: u32,
    static_base: u32,
    code_base: u32,
    strings_base: u32,
}

fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

/// Assemble a translated program into a complete story file.
pub fn assemble(compilation: &Compilation) -> StoryResult<Vec<u8>> {
    let version = compilation.version;
    let alignment = version.alignment();

    let strings = StringTable::build(&compilation.strings, version);

    let abbrev_base = HEADER_SIZE;
    let objects_base = abbrev_base + 2 * ABBREV_WORDS;
    // Property default words: one per property number the version has.
    let objects_len = if version.at_most(3) { 2 * 31 } else { 2 * 63 };
    let globals_base = objects_base + objects_len;
    let tables_base = globals_base + 2 * GLOBAL_WORDS;
    let dictionary_base = tables_base + compilation.table_data.len() as u32;
    let static_base = dictionary_base;
    let dictionary_len = 4;
    // V6/7 express the region bases in the header as eighths, so those
    // bases need the stricter alignment.
    let region_alignment = if version.has_region_offsets() {
        8
    } else {
        alignment
    };
    let code_base = align_up(dictionary_base + dictionary_len, region_alignment);
    let strings_base = align_up(code_base + compilation.code.len() as u32, region_alignment);
    let layout = Layout {
        abbrev_base,
        objects_base,
        globals_base,
        tables_base,
        dictionary_base,
        static_base,
        code_base,
        strings_base,
    };

    for &(what, base) in &[
        ("static memory", layout.static_base),
        ("high memory", layout.code_base),
    ] {
        if base > 0xFFFF {
            return Err(StoryError::RegionOutOfRange(what, base));
        }
    }

    let mut story = vec![0u8; layout.strings_base as usize];
    story.extend_from_slice(strings.bytes());

    // Pad to the length divisor so the stored length is exact.
    while story.len() as u32 % version.length_divisor() != 0 {
        story.push(0);
    }
    let file_len = story.len() as u32;
    if file_len / version.length_divisor() > 0xFFFF {
        return Err(StoryError::FileTooLarge(file_len, version));
    }

    // Globals, with their own placeholders resolved from the word
    // values directly.
    for (i, &word) in compilation.global_values.iter().enumerate() {
        let at = (layout.globals_base + 2 * i as u32) as usize;
        let resolved = resolve_word(word, compilation, &layout, &strings);
        story[at] = (resolved >> 8) as u8;
        story[at + 1] = resolved as u8;
    }

    // Dictionary stub: no separators, version-appropriate entry length,
    // zero entries.
    let dict = layout.dictionary_base as usize;
    story[dict] = 0;
    story[dict + 1] = if version.at_most(3) { 7 } else { 9 };

    // Table and code regions land verbatim, then get patched.
    let tables = layout.tables_base as usize;
    story[tables..tables + compilation.table_data.len()]
        .copy_from_slice(&compilation.table_data);
    let code = layout.code_base as usize;
    story[code..code + compilation.code.len()].copy_from_slice(&compilation.code);

    patch_region(
        &mut story,
        layout.tables_base,
        compilation.table_data.len() as u32,
        compilation,
        &layout,
        &strings,
    );
    patch_region(
        &mut story,
        layout.code_base,
        compilation.code.len() as u32,
        compilation,
        &layout,
        &strings,
    );

    write_header(&mut story, compilation, &layout, file_len)?;

    // Checksum covers everything after the header.
    let checksum = story[0x40..]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
    story[0x1C] = (checksum >> 8) as u8;
    story[0x1D] = checksum as u8;

    debug!(
        "assembled {}: {} bytes, code at {:#x}, strings at {:#x}",
        version, file_len, layout.code_base, layout.strings_base
    );
    Ok(story)
}

/// Patch every placeholder slot in one region of the story.
fn patch_region(
    story: &mut Vec<u8>,
    base: u32,
    len: u32,
    compilation: &Compilation,
    layout: &Layout,
    strings: &StringTable,
) {
    let start = base as usize;
    let end = start + len as usize;
    for reloc in &[Reloc::RoutinePacked, Reloc::StringPacked, Reloc::TableBase] {
        let fixups = scan_fixups(&story[start..end], *reloc);
        for fixup in fixups {
            let known = match reloc {
                Reloc::RoutinePacked => usize::from(fixup.index) < compilation.routines.len(),
                Reloc::StringPacked => usize::from(fixup.index) < compilation.strings.len(),
                Reloc::TableBase => {
                    usize::from(fixup.index) < compilation.table_offsets.len()
                }
            };
            if !known {
                // A data byte that merely looks like a marker.
                continue;
            }
            let word = resolve_placeholder(*reloc, fixup.index, compilation, layout, strings);
            let at = start + fixup.offset as usize;
            story[at] = (word >> 8) as u8;
            story[at + 1] = word as u8;
        }
    }
}

/// Resolve a global initial word that may be a placeholder.
fn resolve_word(
    word: u16,
    compilation: &Compilation,
    layout: &Layout,
    strings: &StringTable,
) -> u16 {
    let index = (word & 0xFF) as u8;
    match word >> 8 {
        0xFD if usize::from(index) < compilation.routines.len() => {
            resolve_placeholder(Reloc::RoutinePacked, index, compilation, layout, strings)
        }
        0xFC if usize::from(index) < compilation.strings.len() => {
            resolve_placeholder(Reloc::StringPacked, index, compilation, layout, strings)
        }
        0xFF if usize::from(index) < compilation.table_offsets.len() => {
            resolve_placeholder(Reloc::TableBase, index, compilation, layout, strings)
        }
        _ => word,
    }
}

fn resolve_placeholder(
    reloc: Reloc,
    index: u8,
    compilation: &Compilation,
    layout: &Layout,
    strings: &StringTable,
) -> u16 {
    match reloc {
        Reloc::RoutinePacked => {
            let routine = RoutineRef::new(usize::from(index));
            match compilation.routine_target(routine) {
                // Packed address of the routine's first byte.
                Some(offset) => pack_routine(layout.code_base + offset, compilation.version, layout),
                // The defined recovery: calling routine 0 returns false.
                None => 0,
            }
        }
        Reloc::StringPacked => {
            let string = StringRef::new(usize::from(index));
            let addr = layout.strings_base + strings.offset(string);
            pack_string(addr, compilation.version, layout)
        }
        Reloc::TableBase => {
            let table = TableRef::new(usize::from(index));
            (layout.tables_base + compilation.table_offsets[table]) as u16
        }
    }
}

fn pack_routine(addr: u32, version: Version, layout: &Layout) -> u16 {
    debug_assert_eq!(addr % version.alignment(), 0);
    match version.number() {
        1..=3 => (addr / 2) as u16,
        4 | 5 => (addr / 4) as u16,
        // V6/7 pack relative to the routines offset in the header.
        6 | 7 => ((addr - layout.code_base) / 4) as u16,
        _ => (addr / 8) as u16,
    }
}

fn pack_string(addr: u32, version: Version, layout: &Layout) -> u16 {
    debug_assert_eq!(addr % version.alignment(), 0);
    match version.number() {
        1..=3 => (addr / 2) as u16,
        4 | 5 => (addr / 4) as u16,
        6 | 7 => ((addr - layout.strings_base) / 4) as u16,
        _ => (addr / 8) as u16,
    }
}

fn write_header(
    story: &mut Vec<u8>,
    compilation: &Compilation,
    layout: &Layout,
    file_len: u32,
) -> StoryResult<()> {
    let version = compilation.version;
    let put2 = |story: &mut Vec<u8>, at: usize, word: u16| {
        story[at] = (word >> 8) as u8;
        story[at + 1] = word as u8;
    };

    story[0x00] = version.number();
    // Release 1.
    put2(story, 0x02, 1);
    put2(story, 0x04, layout.code_base as u16);

    // Only V6 stores a packed main-routine address; every other version
    // stores the byte address of the first instruction.
    let initial_pc = match (compilation.entry_pc, compilation.entry_routine) {
        (_, Some(routine)) if version.number() == 6 => {
            u32::from(pack_routine(layout.code_base + routine, version, layout))
        }
        (Some(pc), _) if version.number() != 6 => layout.code_base + pc,
        _ => return Err(StoryError::NoEntryPoint),
    };
    if initial_pc > 0xFFFF {
        return Err(StoryError::RegionOutOfRange("initial PC", initial_pc));
    }
    put2(story, 0x06, initial_pc as u16);

    put2(story, 0x08, layout.dictionary_base as u16);
    put2(story, 0x0A, layout.objects_base as u16);
    put2(story, 0x0C, layout.globals_base as u16);
    put2(story, 0x0E, layout.static_base as u16);

    // Serial number: six ASCII digits from V2 on, zeros in V1.
    if version.at_least(2) {
        story[0x12..0x18].copy_from_slice(&compilation.serial);
    }

    put2(story, 0x18, layout.abbrev_base as u16);
    put2(story, 0x1A, (file_len / version.length_divisor()) as u16);

    if version.has_region_offsets() {
        put2(story, 0x28, (layout.code_base / 8) as u16);
        put2(story, 0x2A, (layout.strings_base / 8) as u16);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zilt_zil::{translate_program, CompileOptions, Expr, FormNode, Item, Program, RoutineNode, SymbolTable};

    fn form(op: &str, operands: Vec<Expr>) -> Expr {
        Expr::Form(FormNode::new(op, operands))
    }

    fn go(body: Vec<Expr>) -> Item {
        Item::Routine(RoutineNode {
            name: "GO".to_string(),
            activation: None,
            params: Vec::new(),
            opt_params: Vec::new(),
            aux: Vec::new(),
            body,
        })
    }

    fn build(version: u8, items: Vec<Item>) -> Vec<u8> {
        let version = Version::new(version).unwrap();
        let options = CompileOptions::new(version);
        let symbols = SymbolTable::new(version);
        let compilation = translate_program(&Program { items }, options, symbols).unwrap();
        assemble(&compilation).unwrap()
    }

    fn word(story: &[u8], at: usize) -> u16 {
        (u16::from(story[at]) << 8) | u16::from(story[at + 1])
    }

    #[test]
    fn v1_header_and_entry() {
        let story = build(1, vec![go(vec![form("QUIT", vec![])])]);
        assert_eq!(story[0], 1);
        // The initial PC points straight at the quit opcode.
        let pc = word(&story, 0x06) as usize;
        assert_eq!(story[pc], 0xBA);
        // V1 has no serial number.
        assert!(story[0x12..0x18].iter().all(|&b| b == 0));
    }

    #[test]
    fn v3_inline_print() {
        let story = build(
            3,
            vec![go(vec![
                form("PRINTI", vec![Expr::Str("Hi".to_string())]),
                form("CRLF", vec![]),
                form("QUIT", vec![]),
            ])],
        );
        let pc = word(&story, 0x06) as usize;
        // print, one text word with the high bit set, new_line, quit.
        assert_eq!(story[pc], 0xB2);
        assert_eq!(word(&story, pc + 1), 0x91AE);
        assert_eq!(story[pc + 3], 0xBB);
        assert_eq!(story[pc + 4], 0xBA);
        // V2+ serials are ASCII digits.
        assert!(story[0x12..0x18].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn stored_length_matches_divisor() {
        for &(version, divisor) in &[(3u8, 2u32), (4, 4), (5, 4), (6, 8), (7, 8), (8, 8)] {
            let story = build(version, vec![go(vec![form("QUIT", vec![])])]);
            let stored = u32::from(word(&story, 0x1A));
            let actual = story.len() as u32;
            assert_eq!(stored * divisor, actual, "V{}", version);
        }
    }

    #[test]
    fn checksum_covers_the_tail() {
        let story = build(3, vec![go(vec![form("QUIT", vec![])])]);
        let sum = story[0x40..]
            .iter()
            .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
        assert_eq!(word(&story, 0x1C), sum);
    }

    #[test]
    fn region_offsets_only_in_v6_and_v7() {
        let v7 = build(7, vec![go(vec![form("QUIT", vec![])])]);
        assert_ne!(word(&v7, 0x28), 0);
        assert_ne!(word(&v7, 0x2A), 0);

        let v8 = build(8, vec![go(vec![form("QUIT", vec![])])]);
        assert_eq!(word(&v8, 0x28), 0);
        assert_eq!(word(&v8, 0x2A), 0);
    }

    #[test]
    fn routine_placeholders_become_packed_addresses() {
        let helper = Item::Routine(RoutineNode {
            name: "HELPER".to_string(),
            activation: None,
            params: Vec::new(),
            opt_params: Vec::new(),
            aux: Vec::new(),
            body: vec![form("RTRUE", vec![])],
        });
        let story = build(
            3,
            vec![
                go(vec![form("HELPER", vec![]), form("QUIT", vec![])]),
                helper,
            ],
        );
        // The call operand is no longer a placeholder: unpack it and
        // check it lands on a routine header (0 locals) followed by
        // rtrue.
        let pc = word(&story, 0x06) as usize;
        // call_vs is E0, one large operand: type byte 3F.
        assert_eq!(story[pc], 0xE0);
        assert_eq!(story[pc + 1], 0x3F);
        let packed = word(&story, pc + 2);
        let addr = usize::from(packed) * 2;
        assert_eq!(story[addr], 0x00);
        assert_eq!(story[addr + 1], 0xB0);
    }

    #[test]
    fn tell_strings_print_from_the_string_region() {
        let story = build(
            3,
            vec![go(vec![
                form("TELL", vec![Expr::Str("Hello".to_string())]),
                form("QUIT", vec![]),
            ])],
        );
        let pc = word(&story, 0x06) as usize;
        // print_paddr with a large operand.
        assert_eq!(story[pc], 0x8D);
        let packed = usize::from(word(&story, pc + 1)) * 2;
        // The packed address points into the string region: its final
        // word has the high bit set somewhere after it.
        assert!(packed > pc);
        assert!(story[packed] & 0x80 != 0 || story[packed + 2] & 0x80 != 0 || story[packed + 4] & 0x80 != 0 || story[packed + 6] & 0x80 != 0);
    }
}
