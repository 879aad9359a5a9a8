//! Translation skeleton that traverses the whole program and calls the
//! routine, table and statement translators for each piece.
//!
//! Ordering is part of the output contract: objects are numbered before
//! globals compile so a global may name an object; the entry point `GO`
//! is emitted first regardless of where it appears; routines otherwise
//! follow source order; tables and strings are indexed in first-
//! encounter order. Re-running the same program with the same options
//! yields byte-identical output.

use crate::ast::{Expr, Item, Program, RoutineNode};
use crate::diagnostics::{Diagnostics, Warning};
use crate::environ::{CompileOptions, SymbolTable, ZilError, ZilResult};
use crate::routine_translator::{translate_routine, ENTRY_ROUTINE};
use crate::table_translator::data_word;
use crate::translation_utils::const_value;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use zilt_codegen::binemit::{routine_placeholder, scan_fixups, CodeBuffer, CodeOffset, Reloc};
use zilt_codegen::isa::Operand;
use zilt_codegen::text::TextEncoder;
use zilt_codegen::{RoutineRef, StringRef, TableRef, Version};
use zilt_entity::{EntityRef, PrimaryMap, SecondaryMap};

/// Slots reserved for the parser's own globals, in fixed positions. The
/// first three are mandated by the V1-3 status line.
const RESERVED_GLOBALS: &[(&str, u8)] = &[
    ("HERE", 0x10),
    ("SCORE", 0x11),
    ("MOVES", 0x12),
    ("PRSA", 0x13),
    ("PRSO", 0x14),
    ("PRSI", 0x15),
    ("WINNER", 0x16),
];

/// Two scratch globals the compiler itself stores through when a value
/// must survive stack consumption (EQUAL? with many comparands, MIN/MAX
/// candidates).
const SCRATCH_BASE: u8 = 0x17;
const FIRST_USER_GLOBAL: u16 = 0x19;

/// One emitted table.
pub(crate) struct TableData {
    pub bytes: Vec<u8>,
    pub pure: bool,
}

/// Whole-program state accumulated while translating.
pub(crate) struct ProgramTranslator {
    pub options: CompileOptions,
    pub symbols: SymbolTable,
    pub encoder: TextEncoder,
    pub diags: Diagnostics,
    /// The program's code region; routines land here aligned.
    pub code: CodeBuffer,
    pub routine_offsets: BTreeMap<String, CodeOffset>,
    pub entry_pc: Option<CodeOffset>,
    routine_names: BTreeSet<String>,
    placeholders: PrimaryMap<RoutineRef, String>,
    placeholder_index: HashMap<String, RoutineRef>,
    strings: PrimaryMap<StringRef, String>,
    string_index: HashMap<String, StringRef>,
    tables: PrimaryMap<TableRef, TableData>,
    globals: HashMap<String, u8>,
    global_values: Vec<u16>,
    constants: HashMap<String, i32>,
    objects: HashMap<String, u16>,
    pub used_flags: BTreeSet<String>,
    pub used_properties: BTreeSet<String>,
    next_global: u16,
}

impl ProgramTranslator {
    pub(crate) fn new(options: CompileOptions, symbols: SymbolTable) -> Self {
        let mut constants = HashMap::new();
        // The built-in truth values.
        constants.insert("T".to_string(), 1);
        constants.insert("<>".to_string(), 0);
        for (name, bit) in &symbols.flags {
            constants.insert(name.clone(), i32::from(*bit));
        }
        for (name, number) in &symbols.properties {
            constants.insert(name.clone(), i32::from(*number));
        }
        for (name, value) in &symbols.parser_constants {
            constants.insert(name.clone(), *value);
        }

        let mut globals = HashMap::new();
        for (name, slot) in RESERVED_GLOBALS {
            globals.insert((*name).to_string(), *slot);
        }

        let encoder = TextEncoder::new(options.version);
        let diags = Diagnostics::new(&options);
        ProgramTranslator {
            options,
            symbols,
            encoder,
            diags,
            code: CodeBuffer::new(),
            routine_offsets: BTreeMap::new(),
            entry_pc: None,
            routine_names: BTreeSet::new(),
            placeholders: PrimaryMap::new(),
            placeholder_index: HashMap::new(),
            strings: PrimaryMap::new(),
            string_index: HashMap::new(),
            tables: PrimaryMap::new(),
            globals,
            global_values: vec![0; 240],
            constants,
            objects: HashMap::new(),
            used_flags: BTreeSet::new(),
            used_properties: BTreeSet::new(),
            next_global: FIRST_USER_GLOBAL,
        }
    }

    /// A named compile-time constant.
    pub(crate) fn constant(&self, name: &str) -> Option<i32> {
        self.constants.get(name).copied()
    }

    /// A global's variable slot.
    pub(crate) fn global_slot(&self, name: &str) -> Option<u8> {
        self.globals.get(name).copied()
    }

    /// An object's number.
    pub(crate) fn object_number(&self, name: &str) -> Option<u16> {
        self.objects.get(name).copied()
    }

    /// Is this the name of a routine defined anywhere in the program?
    pub(crate) fn is_routine(&self, name: &str) -> bool {
        self.routine_names.contains(name) || self.placeholder_index.contains_key(name)
    }

    /// The placeholder index for a routine name, allocated on first use.
    pub(crate) fn routine_placeholder_for(&mut self, name: &str) -> ZilResult<RoutineRef> {
        if let Some(routine) = self.placeholder_index.get(name) {
            return Ok(*routine);
        }
        if self.placeholders.len() >= 256 {
            return Err(ZilError::LimitExceeded {
                what: "routine placeholders",
                limit: 256,
            });
        }
        let routine = self.placeholders.push(name.to_string());
        self.placeholder_index.insert(name.to_string(), routine);
        Ok(routine)
    }

    /// The operand standing in for a routine's packed address.
    pub(crate) fn routine_operand(&mut self, name: &str) -> ZilResult<Operand> {
        let routine = self.routine_placeholder_for(name)?;
        Ok(Operand::Large(routine_placeholder(routine)))
    }

    /// Translate source-text conventions into story text: the CRLF
    /// character becomes a newline, and source line breaks become spaces
    /// unless `PRESERVE-SPACES?` is on. Unprintable control characters
    /// are diagnosed.
    pub(crate) fn prepare_text(&mut self, raw: &str) -> ZilResult<String> {
        let crlf = self.options.crlf_character;
        let preserve = self.options.preserve_spaces;
        let text: String = raw
            .chars()
            .map(|c| {
                if c == crlf {
                    '\n'
                } else if c == '\n' && !preserve {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        let tab_ok = self.options.version.number() == 6;
        for c in text.chars() {
            let printable = !c.is_control() || c == '\n' || (c == '\t' && tab_ok);
            if !printable {
                self.diags.warn(
                    "ZIL0410",
                    format!("string contains unprintable character {:?}", c),
                )?;
            }
        }
        Ok(text)
    }

    /// Intern a string, deduplicated by its prepared text.
    pub(crate) fn intern_string(&mut self, raw: &str) -> ZilResult<StringRef> {
        let text = self.prepare_text(raw)?;
        if let Some(string) = self.string_index.get(&text) {
            return Ok(*string);
        }
        if self.strings.len() >= 256 {
            return Err(ZilError::LimitExceeded {
                what: "string placeholders",
                limit: 256,
            });
        }
        let string = self.strings.push(text.clone());
        self.string_index.insert(text, string);
        Ok(string)
    }

    /// Append a finished table to the table region.
    pub(crate) fn add_table(&mut self, bytes: Vec<u8>, pure: bool) -> ZilResult<TableRef> {
        if self.tables.len() >= 256 {
            return Err(ZilError::LimitExceeded {
                what: "tables",
                limit: 256,
            });
        }
        Ok(self.tables.push(TableData { bytes, pure }))
    }

    /// One of the compiler's scratch globals.
    pub(crate) fn scratch_global(&self, which: usize) -> u8 {
        debug_assert!(which < 2);
        SCRATCH_BASE + which as u8
    }

    /// Record that an instruction referenced a flag by name.
    pub(crate) fn note_flag_use(&mut self, operand: Option<&Expr>) {
        if let Some(Expr::Atom(name)) | Some(Expr::GlobalVar(name)) = operand {
            if self.symbols.flags.contains_key(name) {
                self.used_flags.insert(name.clone());
            }
        }
    }

    /// Record that an instruction referenced a property by name.
    pub(crate) fn note_property_use(&mut self, operand: Option<&Expr>) {
        if let Some(Expr::Atom(name)) | Some(Expr::GlobalVar(name)) = operand {
            if self.symbols.properties.contains_key(name) {
                self.used_properties.insert(name.clone());
            }
        }
    }
}

/// The translator's output: code and data with embedded placeholder
/// sentinels, plus everything the assembler needs to patch them.
#[derive(Debug)]
pub struct Compilation {
    /// Target version.
    pub version: Version,
    /// Serial number for the header, six ASCII digits.
    pub serial: [u8; 6],
    /// The code region. Routine starts are aligned for the version.
    pub code: Vec<u8>,
    /// The table region, tables concatenated in index order.
    pub table_data: Vec<u8>,
    /// Byte offset of each table within `table_data`.
    pub table_offsets: SecondaryMap<TableRef, u32>,
    /// Which tables were declared pure.
    pub table_pure: SecondaryMap<TableRef, bool>,
    /// Code offset of each defined routine.
    pub routine_offsets: BTreeMap<String, CodeOffset>,
    /// The routine placeholder registry: index to routine name.
    pub routines: PrimaryMap<RoutineRef, String>,
    /// The interned strings, in placeholder-index order.
    pub strings: PrimaryMap<StringRef, String>,
    /// Initial values for globals 0x10..=0xFF, placeholders included.
    pub global_values: Vec<u16>,
    /// Code offset of the entry point's first instruction.
    pub entry_pc: Option<CodeOffset>,
    /// Code offset of the entry routine itself.
    pub entry_routine: Option<CodeOffset>,
    /// Routines referenced but never defined; their placeholders patch
    /// to zero, the Z-machine's "call FALSE".
    pub missing_routines: BTreeSet<String>,
    /// Flags referenced by emitted instructions.
    pub used_flags: BTreeSet<String>,
    /// Properties referenced by emitted instructions.
    pub used_properties: BTreeSet<String>,
    /// Warnings, in the order they were raised.
    pub warnings: Vec<Warning>,
}

impl Compilation {
    /// Routine-address placeholders discovered by scanning the code
    /// region.
    pub fn routine_fixups(&self) -> Vec<(CodeOffset, RoutineRef)> {
        collect_routine_fixups(&self.code, self.routines.len())
    }

    /// Routine-address placeholders discovered by scanning the table
    /// region.
    pub fn table_routine_fixups(&self) -> Vec<(CodeOffset, RoutineRef)> {
        collect_routine_fixups(&self.table_data, self.routines.len())
    }

    /// The inline-string placeholder registry.
    pub fn string_placeholders(&self) -> &PrimaryMap<StringRef, String> {
        &self.strings
    }

    /// The code offset a routine placeholder resolves to, or `None` when
    /// the routine was never defined.
    pub fn routine_target(&self, routine: RoutineRef) -> Option<CodeOffset> {
        self.routine_offsets.get(&self.routines[routine]).copied()
    }

    /// The external verification pass for unreferenced flags and
    /// properties. `P?DESC` and `P?LDESC` are standard and exempt.
    pub fn verify_usage(&self, symbols: &SymbolTable) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for name in symbols.flags.keys() {
            if !self.used_flags.contains(name) && !symbols.syntax_flags.contains(name) {
                warnings.push(Warning {
                    code: "ZIL0211",
                    message: format!("flag {} is defined but never referenced", name),
                });
            }
        }
        for name in symbols.properties.keys() {
            let standard = matches!(name.as_str(), "DESC" | "LDESC" | "P?DESC" | "P?LDESC");
            if !standard && !self.used_properties.contains(name) {
                warnings.push(Warning {
                    code: "ZIL0212",
                    message: format!("property {} is defined but never referenced", name),
                });
            }
        }
        warnings
    }
}

fn collect_routine_fixups(bytes: &[u8], known: usize) -> Vec<(CodeOffset, RoutineRef)> {
    scan_fixups(bytes, Reloc::RoutinePacked)
        .into_iter()
        .filter(|f| usize::from(f.index) < known)
        .map(|f| (f.offset, RoutineRef::new(usize::from(f.index))))
        .collect()
}

/// Translate a whole program.
pub fn translate_program(
    program: &Program,
    options: CompileOptions,
    symbols: SymbolTable,
) -> ZilResult<Compilation> {
    let mut env = ProgramTranslator::new(options, symbols);

    // Routine names are visible everywhere, so forward calls resolve.
    for item in &program.items {
        if let Item::Routine(routine) = item {
            env.routine_names.insert(routine.name.clone());
        }
    }

    // Objects first: globals and tables may name them.
    let mut next_object: u16 = 1;
    for item in &program.items {
        if let Item::Object { name, .. } = item {
            if u32::from(next_object) > env.options.version.max_objects() {
                return Err(ZilError::LimitExceeded {
                    what: "objects",
                    limit: env.options.version.max_objects() as usize,
                });
            }
            env.objects.insert(name.clone(), next_object);
            next_object += 1;
        }
    }

    // Constants next, in source order.
    for item in &program.items {
        if let Item::Constant { name, value } = item {
            let folded = match const_value(value, &env) {
                Some(v) => v,
                None => {
                    env.diags.warn(
                        "ZIL0506",
                        format!("constant {} does not fold, using 0", name),
                    )?;
                    0
                }
            };
            env.constants.insert(name.clone(), folded);
        }
    }

    // Globals: assign slots and compute initial words.
    for item in &program.items {
        if let Item::Global { name, value } = item {
            let slot = match env.globals.get(name) {
                Some(slot) => *slot,
                None => {
                    if env.next_global > 0xFF {
                        return Err(ZilError::LimitExceeded {
                            what: "globals",
                            limit: 240,
                        });
                    }
                    let slot = env.next_global as u8;
                    env.next_global += 1;
                    env.globals.insert(name.clone(), slot);
                    slot
                }
            };
            let word = data_word(value, &mut env)?;
            env.global_values[usize::from(slot) - 0x10] = word;
        }
    }

    // Routines: the entry point first, then source order.
    let mut routines: Vec<&RoutineNode> = Vec::new();
    for item in &program.items {
        if let Item::Routine(routine) = item {
            if routine.name == ENTRY_ROUTINE {
                routines.insert(0, routine);
            } else {
                routines.push(routine);
            }
        }
    }
    for routine in routines {
        translate_routine(routine, &mut env)?;
    }
    let entry_routine = env.routine_offsets.get(ENTRY_ROUTINE).copied();

    // Anything still unresolved stays loadable: the placeholder patches
    // to zero, and calling routine 0 returns false without running code.
    let mut missing = BTreeSet::new();
    for (_, name) in env.placeholders.iter() {
        if !env.routine_offsets.contains_key(name) {
            missing.insert(name.clone());
        }
    }
    for name in &missing {
        env.diags.warn(
            "ZIL0507",
            format!("routine {} is never defined, calls resolve to FALSE", name),
        )?;
    }

    // Concatenate the table region in index order.
    let mut table_data = Vec::new();
    let mut table_offsets = SecondaryMap::new();
    let mut table_pure = SecondaryMap::new();
    for (table, data) in env.tables.iter() {
        table_offsets[table] = table_data.len() as u32;
        table_pure[table] = data.pure;
        table_data.extend_from_slice(&data.bytes);
    }

    debug!(
        "program translated: {} bytes of code, {} routines, {} strings, {} tables",
        env.code.len(),
        env.routine_offsets.len(),
        env.strings.len(),
        env.tables.len()
    );

    Ok(Compilation {
        version: env.options.version,
        serial: env.options.serial,
        code: env.code.into_bytes(),
        table_data,
        table_offsets,
        table_pure,
        routine_offsets: env.routine_offsets,
        routines: env.placeholders,
        strings: env.strings,
        global_values: env.global_values,
        entry_pc: env.entry_pc,
        entry_routine,
        missing_routines: missing,
        used_flags: env.used_flags,
        used_properties: env.used_properties,
        warnings: env.diags.into_warnings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FormNode;

    fn form(op: &str, operands: Vec<Expr>) -> Expr {
        Expr::Form(FormNode::new(op, operands))
    }

    fn num(n: i32) -> Expr {
        Expr::Number(n)
    }

    fn lvar(name: &str) -> Expr {
        Expr::LocalVar(name.to_string())
    }

    fn atom(name: &str) -> Expr {
        Expr::Atom(name.to_string())
    }

    fn list(items: Vec<Expr>) -> Expr {
        Expr::List(items)
    }

    fn routine(name: &str, params: &[&str], aux: &[&str], body: Vec<Expr>) -> Item {
        Item::Routine(RoutineNode {
            name: name.to_string(),
            activation: None,
            params: params.iter().map(|s| s.to_string()).collect(),
            opt_params: Vec::new(),
            aux: aux.iter().map(|s| (s.to_string(), None)).collect(),
            body,
        })
    }

    fn compile(version: u8, items: Vec<Item>) -> Compilation {
        let version = Version::new(version).unwrap();
        let options = CompileOptions::new(version);
        let symbols = SymbolTable::new(version);
        translate_program(&Program { items }, options, symbols).unwrap()
    }

    #[test]
    fn entry_point_quits() {
        let compilation = compile(
            1,
            vec![routine("GO", &[], &[], vec![form("QUIT", vec![])])],
        );
        // Zero locals, then quit; the entry PC lands on the quit.
        assert_eq!(compilation.code, vec![0x00, 0xBA]);
        assert_eq!(compilation.entry_pc, Some(1));
        assert_eq!(compilation.entry_routine, Some(0));
    }

    #[test]
    fn cond_compiles_to_branch_chain() {
        let clause1 = list(vec![
            form("EQUAL?", vec![lvar("X"), num(1)]),
            form("RTRUE", vec![]),
        ]);
        let clause2 = list(vec![atom("T"), form("RFALSE", vec![])]);
        let compilation = compile(
            3,
            vec![routine(
                "F",
                &["X"],
                &[],
                vec![form("COND", vec![clause1, clause2])],
            )],
        );
        assert_eq!(
            compilation.code,
            vec![
                0x01, 0x00, 0x00, // one local, default 0
                0x41, 0x01, 0x01, // je local1, #1
                0x43, // branch on false over the true arm
                0xB0, // rtrue
                0xB1, // rfalse
                0xB8, // synthesized ret_popped
            ]
        );
    }

    #[test]
    fn repeat_patches_return_and_closes_the_loop() {
        let cond = form(
            "COND",
            vec![list(vec![
                form("ZERO?", vec![lvar("I")]),
                form("RETURN", vec![num(42)]),
            ])],
        );
        let dec = form("DEC", vec![atom("I")]);
        let body = form("REPEAT", vec![list(vec![]), cond, dec]);
        let compilation = compile(3, vec![routine("G", &[], &["I"], vec![body])]);
        assert_eq!(
            compilation.code,
            vec![
                0x01, 0x00, 0x00, // one local
                0xA0, 0x01, // jz local1
                0x49, // branch on false past the return
                0x14, 0x00, 0x2A, 0x00, // push 42
                0x8C, 0x00, 0x07, // patched RETURN: jump to the exit
                0x96, 0x01, // dec local1
                0x8C, 0xFF, 0xF3, // backward jump to the loop head
                0xB8, // synthesized ret_popped
            ]
        );
        // No sentinel survived patching.
        assert!(!compilation
            .code
            .windows(3)
            .any(|w| w == [0x8C, 0xFF, 0xBB] || w == [0x8C, 0xFF, 0xAA]));
    }

    #[test]
    fn prog_bindings_widen_the_locals() {
        let bindings = list(vec![
            list(vec![atom("X"), num(10)]),
            list(vec![atom("Y"), num(20)]),
        ]);
        let body = form(
            "PROG",
            vec![
                bindings,
                form("RETURN", vec![form("+", vec![lvar("X"), lvar("Y")])]),
            ],
        );
        let compilation = compile(3, vec![routine("H", &[], &[], vec![body])]);
        assert_eq!(
            compilation.code,
            vec![
                0x02, 0x00, 0x00, 0x00, 0x00, // patched to two locals
                0x0D, 0x01, 0x0A, // store local1, #10
                0x0D, 0x02, 0x14, // store local2, #20
                0x74, 0x01, 0x02, 0x00, // add local1, local2 -> sp
                0x8C, 0x00, 0x02, // patched RETURN: jump to the exit
                0xB8, // synthesized ret_popped
            ]
        );
    }

    #[test]
    fn assigned_lowers_to_check_arg_count() {
        let routine = Item::Routine(RoutineNode {
            name: "K".to_string(),
            activation: None,
            params: Vec::new(),
            opt_params: vec![("LOCAL".to_string(), None)],
            aux: Vec::new(),
            body: vec![form("ASSIGNED?", vec![atom("LOCAL")])],
        });
        let compilation = compile(5, vec![routine]);
        assert_eq!(
            compilation.code,
            vec![
                0x01, // one local, no default words in V5
                0xFF, 0x7F, 0x01, // check_arg_count #1
                0x80, 0x09, // branch on true to the push-1 site
                0x14, 0x00, 0x00, 0x00, // push 0
                0x8C, 0x00, 0x06, // jump past the push-1 site
                0x14, 0x00, 0x01, 0x00, // push 1
                0xB8, // synthesized ret_popped
            ]
        );
    }

    #[test]
    fn funny_return_exits_the_routine() {
        let body = form(
            "REPEAT",
            vec![list(vec![]), form("RETURN", vec![num(42)])],
        );
        let compilation = compile(5, vec![routine("G", &[], &[], vec![body])]);
        // V5 defaults to funny-return: a real ret, no block-exit jump.
        assert!(compilation.code.contains(&0x9B));
        assert!(!compilation.code.windows(3).any(|w| w == [0x8C, 0xFF, 0xBB]));
    }

    #[test]
    fn missing_routine_is_recoverable() {
        let compilation = compile(
            3,
            vec![routine(
                "GO",
                &[],
                &[],
                vec![
                    form("CALL", vec![Expr::GlobalVar("NOWHERE".to_string())]),
                    form("QUIT", vec![]),
                ],
            )],
        );
        // The call site got a placeholder that resolves to FALSE, and
        // the missing set names the routine.
        assert!(compilation.missing_routines.contains("NOWHERE"));
        assert!(compilation.warnings.iter().any(|w| w.code == "ZIL0507"));
        let fixups = compilation.routine_fixups();
        assert_eq!(fixups.len(), 1);
        assert_eq!(compilation.routine_target(fixups[0].1), None);
    }

    #[test]
    fn unrecognized_operator_warns_and_emits_nothing() {
        let compilation = compile(
            3,
            vec![routine(
                "GO",
                &[],
                &[],
                vec![form("FROBNICATE", vec![num(1)]), form("QUIT", vec![])],
            )],
        );
        assert!(compilation.warnings.iter().any(|w| w.code == "ZIL0505"));
        // Header, quit, nothing else.
        assert_eq!(compilation.code, vec![0x00, 0xBA]);
    }

    #[test]
    fn calls_use_placeholders_resolved_by_fixups() {
        let helper = routine("HELPER", &[], &[], vec![form("RTRUE", vec![])]);
        let go = routine(
            "GO",
            &[],
            &[],
            vec![form("HELPER", vec![]), form("QUIT", vec![])],
        );
        let compilation = compile(3, vec![go, helper]);
        let fixups = compilation.routine_fixups();
        assert_eq!(fixups.len(), 1);
        let (offset, routine) = fixups[0];
        assert_eq!(compilation.code[offset as usize], 0xFD);
        let target = compilation.routine_target(routine).unwrap();
        // HELPER follows GO, aligned to 2.
        assert_eq!(target % 2, 0);
        assert_eq!(&compilation.routines[routine], "HELPER");
    }

    #[test]
    fn deterministic_output() {
        let make = || {
            compile(
                3,
                vec![
                    Item::Global {
                        name: "SCORE-MAX".to_string(),
                        value: num(100),
                    },
                    routine(
                        "GO",
                        &[],
                        &[],
                        vec![
                            form("TELL", vec![Expr::Str("Hello".to_string()), atom("CR")]),
                            form("QUIT", vec![]),
                        ],
                    ),
                ],
            )
        };
        let a = make();
        let b = make();
        assert_eq!(a.code, b.code);
        assert_eq!(a.table_data, b.table_data);
        assert_eq!(a.global_values, b.global_values);
    }

    #[test]
    fn tables_are_indexed_in_first_encounter_order() {
        use crate::ast::{TableFlags, TableKind, TableNode};
        let table = |values: Vec<Expr>| {
            Expr::Table(TableNode {
                kind: TableKind::Table,
                flags: TableFlags::default(),
                size: None,
                values,
            })
        };
        let compilation = compile(
            3,
            vec![routine(
                "GO",
                &[],
                &[],
                vec![
                    form("GET", vec![table(vec![num(1), num(2)]), num(0)]),
                    form("GET", vec![table(vec![num(3)]), num(0)]),
                    form("QUIT", vec![]),
                ],
            )],
        );
        assert_eq!(compilation.table_data, vec![0, 1, 0, 2, 0, 3]);
        let first = TableRef::new(0);
        let second = TableRef::new(1);
        assert_eq!(compilation.table_offsets[first], 0);
        assert_eq!(compilation.table_offsets[second], 4);
    }
}
