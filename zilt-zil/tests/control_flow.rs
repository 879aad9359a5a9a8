//! End-to-end translation tests: build a program AST, translate it, and
//! check the emitted bytes and diagnostics.

use zilt_zil::{
    translate_program, Compilation, CompileOptions, Expr, FormNode, Item, Program, RoutineNode,
    SymbolTable, TableFlags, TableKind, TableNode, ZilError,
};
use zilt_codegen::Version;

fn form(op: &str, operands: Vec<Expr>) -> Expr {
    Expr::Form(FormNode::new(op, operands))
}

fn num(n: i32) -> Expr {
    Expr::Number(n)
}

fn atom(name: &str) -> Expr {
    Expr::Atom(name.to_string())
}

fn lvar(name: &str) -> Expr {
    Expr::LocalVar(name.to_string())
}

fn list(items: Vec<Expr>) -> Expr {
    Expr::List(items)
}

fn routine(name: &str, aux: &[&str], body: Vec<Expr>) -> Item {
    Item::Routine(RoutineNode {
        name: name.to_string(),
        activation: None,
        params: Vec::new(),
        opt_params: Vec::new(),
        aux: aux.iter().map(|s| (s.to_string(), None)).collect(),
        body,
    })
}

fn compile(version: u8, items: Vec<Item>) -> Compilation {
    try_compile(version, items).unwrap()
}

fn try_compile(version: u8, items: Vec<Item>) -> Result<Compilation, ZilError> {
    let version = Version::new(version).unwrap();
    let options = CompileOptions::new(version);
    let symbols = SymbolTable::new(version);
    translate_program(&Program { items }, options, symbols)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn no_sentinels(code: &[u8]) {
    for pattern in &[
        [0x8C, 0xFF, 0xBB],
        [0x8C, 0xFF, 0xAA],
        [0x8C, 0xFF, 0xAC],
    ] {
        assert!(
            !contains(code, pattern),
            "unpatched sentinel {:02x?} in {:02x?}",
            pattern,
            code
        );
    }
}

#[test]
fn routine_level_again_reenters_the_prolog() {
    let compilation = compile(
        3,
        vec![routine(
            "GO",
            &[],
            vec![form("CRLF", vec![]), form("AGAIN", vec![])],
        )],
    );
    // new_line, then a backward jump to the post-header offset.
    assert_eq!(compilation.code, vec![0x00, 0xBB, 0x8C, 0xFF, 0xFE]);
}

#[test]
fn targeted_return_to_routine_activation_is_a_real_ret() {
    let body = form(
        "PROG",
        vec![
            list(vec![]),
            form("RETURN", vec![num(5), lvar("A")]),
        ],
    );
    let item = Item::Routine(RoutineNode {
        name: "R".to_string(),
        activation: Some("A".to_string()),
        params: Vec::new(),
        opt_params: Vec::new(),
        aux: Vec::new(),
        body: vec![body],
    });
    let compilation = compile(3, vec![item]);
    // ret #5, not a block exit.
    assert!(contains(&compilation.code, &[0x9B, 0x05]));
    no_sentinels(&compilation.code);
}

#[test]
fn targeted_return_to_named_block() {
    let body = form(
        "PROG",
        vec![
            atom("FOO"),
            list(vec![]),
            form("RETURN", vec![num(1), lvar("FOO")]),
        ],
    );
    let compilation = compile(3, vec![routine("R", &[], vec![body])]);
    // Push 1, then the targeted sentinel patched into a jump to the
    // block exit just past itself.
    assert!(contains(
        &compilation.code,
        &[0x14, 0x00, 0x01, 0x00, 0x8C, 0x00, 0x02]
    ));
    no_sentinels(&compilation.code);
}

#[test]
fn do_loop_counts_and_bumps() {
    let body = form(
        "DO",
        vec![
            list(vec![atom("X"), num(1), num(10)]),
            form("PRINTN", vec![lvar("X")]),
        ],
    );
    let compilation = compile(3, vec![routine("R", &[], vec![body])]);
    // Ascending termination test: jg local1, #10.
    assert!(contains(&compilation.code, &[0x43, 0x01, 0x0A]));
    // Step of one: inc local1.
    assert!(contains(&compilation.code, &[0x95, 0x01]));
    // A backward jump closes the loop.
    assert!(contains(&compilation.code, &[0x8C, 0xFF]));
    no_sentinels(&compilation.code);
}

#[test]
fn do_loop_descends_when_bounds_say_so() {
    let body = form(
        "DO",
        vec![
            list(vec![atom("X"), num(10), num(1)]),
            form("PRINTN", vec![lvar("X")]),
        ],
    );
    let compilation = compile(3, vec![routine("R", &[], vec![body])]);
    // jl local1, #1 and dec local1.
    assert!(contains(&compilation.code, &[0x42, 0x01, 0x01]));
    assert!(contains(&compilation.code, &[0x96, 0x01]));
}

#[test]
fn map_contents_walks_children() {
    let object = Item::Object {
        name: "BOX".to_string(),
        flags: Vec::new(),
        properties: Vec::new(),
    };
    let body = form(
        "MAP-CONTENTS",
        vec![
            list(vec![atom("X"), Expr::GlobalVar("BOX".to_string())]),
            form("PRINTN", vec![lvar("X")]),
        ],
    );
    let compilation = compile(3, vec![object, routine("R", &[], vec![body])]);
    // get_child #1 -> local1, and get_sibling local1 advancing in
    // place.
    assert!(contains(&compilation.code, &[0x92, 0x01, 0x01]));
    assert!(contains(&compilation.code, &[0xA1, 0x01, 0x01]));
    no_sentinels(&compilation.code);
}

#[test]
fn map_directions_scans_property_numbers() {
    let object = Item::Object {
        name: "HALL".to_string(),
        flags: Vec::new(),
        properties: Vec::new(),
    };
    let body = form(
        "MAP-DIRECTIONS",
        vec![
            list(vec![atom("DIR"), atom("PT"), Expr::GlobalVar("HALL".to_string())]),
            form("PRINTN", vec![lvar("DIR")]),
        ],
    );
    let compilation = compile(3, vec![object, routine("R", &[], vec![body])]);
    // Initialize the direction counter past the top property number
    // (31 + 1 = 32), then dec_chk against the low bound.
    assert!(contains(&compilation.code, &[0x0D, 0x01, 0x20]));
    assert!(contains(&compilation.code, &[0x04, 0x01, 0x00]));
    no_sentinels(&compilation.code);
}

#[test]
fn equal_with_many_comparands_spills_to_a_scratch_global() {
    let pred = form(
        "EQUAL?",
        vec![lvar("X"), num(1), num(2), num(3), num(4)],
    );
    let compilation = compile(3, vec![routine("R", &["X"], vec![pred])]);
    // The subject lands in the first scratch global.
    assert!(contains(&compilation.code, &[0x2D, 0x17, 0x01]));
    // First je group: je G17, #1, #2, #3 in variable form.
    assert!(contains(
        &compilation.code,
        &[0xC1, 0x95, 0x17, 0x01, 0x02, 0x03]
    ));
    // Second group: je G17, #4 in long form.
    assert!(contains(&compilation.code, &[0x41, 0x17, 0x04]));
}

#[test]
fn foldable_expressions_classify_as_literals() {
    let cases: Vec<(Expr, u8)> = vec![
        (form("+", vec![num(2), num(3), num(4)]), 9),
        (form("MIN", vec![num(3), num(7)]), 3),
        (form("MAX", vec![num(3), num(7)]), 7),
        (form("ABS", vec![num(-4)]), 4),
        (form("XOR", vec![num(6), num(3)]), 5),
        (form("BAND", vec![num(12), num(10)]), 8),
    ];
    for (expr, expected) in cases {
        let compilation = compile(3, vec![routine("R", &[], vec![form("RETURN", vec![expr])])]);
        assert!(
            contains(&compilation.code, &[0x9B, expected]),
            "expected ret #{} in {:02x?}",
            expected,
            compilation.code
        );
    }
}

#[test]
fn arithmetic_identities() {
    // <+> is 0, <*> is 1, </ 1> folds through the reciprocal.
    let compilation = compile(
        3,
        vec![routine("R", &[], vec![form("RETURN", vec![form("*", vec![])])])],
    );
    assert!(contains(&compilation.code, &[0xB0]));

    let compilation = compile(
        3,
        vec![routine(
            "R",
            &[],
            vec![form("RETURN", vec![form("-", vec![num(5)])])],
        )],
    );
    // Unary minus folds to -5, a large constant.
    assert!(contains(&compilation.code, &[0x8B, 0xFF, 0xFB]));
}

#[test]
fn bcom_is_native_before_v5_and_emulated_after() {
    let body = vec![form("RETURN", vec![form("BCOM", vec![lvar("X")])])];
    let v3 = compile(3, vec![routine("R", &["X"], body.clone())]);
    // Native not: 1OP variable form.
    assert!(contains(&v3.code, &[0xAF, 0x01]));

    let v5 = compile(5, vec![routine("R", &["X"], body)]);
    assert!(!contains(&v5.code, &[0xAF, 0x01]));
    // add local1, #1 -> sp; sub #0, sp -> sp.
    assert!(contains(&v5.code, &[0x54, 0x01, 0x01, 0x00]));
    assert!(contains(&v5.code, &[0x35, 0x00, 0x00, 0x00]));
}

#[test]
fn dless_uses_dec_chk() {
    let cond = form(
        "COND",
        vec![list(vec![
            form("DLESS?", vec![atom("X"), num(0)]),
            form("RTRUE", vec![]),
        ])],
    );
    let compilation = compile(3, vec![routine("R", &["X"], vec![cond])]);
    assert!(contains(&compilation.code, &[0x04, 0x01, 0x00]));
}

#[test]
fn version_gates_are_fatal() {
    let err = try_compile(
        3,
        vec![routine(
            "R",
            &[],
            vec![form("PRINTT", vec![num(0), num(1)])],
        )],
    )
    .unwrap_err();
    match err {
        ZilError::VersionGate { op, min, .. } => {
            assert_eq!(op, "PRINTT");
            assert_eq!(min, 5);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn arity_errors_carry_the_routine_name() {
    let err = try_compile(3, vec![routine("R", &[], vec![form("MOD", vec![num(1)])])])
        .unwrap_err();
    match err {
        ZilError::Arity { routine, op, .. } => {
            assert_eq!(routine, "R");
            assert_eq!(op, "MOD");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn entry_point_signature_limits() {
    let go = Item::Routine(RoutineNode {
        name: "GO".to_string(),
        activation: None,
        params: vec!["X".to_string()],
        opt_params: Vec::new(),
        aux: Vec::new(),
        body: vec![form("QUIT", vec![])],
    });
    assert!(matches!(
        try_compile(3, vec![go]).unwrap_err(),
        ZilError::EntryPoint { .. }
    ));

    // GO with a local fails before V6.
    let go = routine("GO", &["X"], vec![form("QUIT", vec![])]);
    assert!(matches!(
        try_compile(5, vec![go]).unwrap_err(),
        ZilError::EntryPoint { .. }
    ));
}

#[test]
fn required_parameter_limits_follow_the_version() {
    let with_params = |n: usize| {
        Item::Routine(RoutineNode {
            name: "R".to_string(),
            activation: None,
            params: (0..n).map(|i| format!("P{}", i)).collect(),
            opt_params: Vec::new(),
            aux: Vec::new(),
            body: vec![form("RTRUE", vec![])],
        })
    };
    // Seven required parameters are fine from V4 on, never eight.
    assert!(try_compile(4, vec![with_params(7)]).is_ok());
    assert!(try_compile(3, vec![with_params(7)]).is_err());
    for version in 1..=8 {
        assert!(
            try_compile(version, vec![with_params(8)]).is_err(),
            "V{}",
            version
        );
    }
}

#[test]
fn unused_aux_local_warns() {
    let compilation = compile(3, vec![routine("R", &["Y"], vec![form("RTRUE", vec![])])]);
    assert!(compilation.warnings.iter().any(|w| w.code == "ZIL0210"));
}

#[test]
fn unreachable_optional_parameter_warns() {
    let item = Item::Routine(RoutineNode {
        name: "R".to_string(),
        activation: None,
        params: Vec::new(),
        opt_params: (0..4).map(|i| (format!("O{}", i), None)).collect(),
        aux: Vec::new(),
        body: vec![form("RTRUE", vec![])],
    });
    let compilation = compile(3, vec![item]);
    // The fourth optional slot is past V3's three-argument call limit.
    assert!(compilation.warnings.iter().any(|w| w.code == "MDL0417"));
}

#[test]
fn local_fallback_to_global_warns() {
    let compilation = compile(
        3,
        vec![routine("R", &[], vec![form("RETURN", vec![lvar("HERE")])])],
    );
    assert!(compilation.warnings.iter().any(|w| w.code == "ZIL0204"));
    // The fallback still produced code against the global slot.
    assert!(contains(&compilation.code, &[0xAB, 0x10]));
}

#[test]
fn warning_suppression_is_prefix_based() {
    let version = Version::new(3).unwrap();
    let mut options = CompileOptions::new(version);
    options.suppressed_warnings.push("ZIL02".to_string());
    let program = Program {
        items: vec![routine("R", &[], vec![form("RETURN", vec![lvar("HERE")])])],
    };
    let compilation =
        translate_program(&program, options, SymbolTable::new(version)).unwrap();
    assert!(compilation.warnings.iter().all(|w| w.code != "ZIL0204"));
}

#[test]
fn warn_as_error_promotes_the_first_warning() {
    let version = Version::new(3).unwrap();
    let mut options = CompileOptions::new(version);
    options.warn_as_error = true;
    let program = Program {
        items: vec![routine("R", &[], vec![form("RETURN", vec![lvar("HERE")])])],
    };
    let err = translate_program(&program, options, SymbolTable::new(version)).unwrap_err();
    assert!(matches!(err, ZilError::WarningAsError { .. }));
}

#[test]
fn lexv_table_size_warns_when_not_triple() {
    let table = Expr::Table(TableNode {
        kind: TableKind::ITable,
        flags: TableFlags {
            lexv: true,
            ..TableFlags::default()
        },
        size: Some(10),
        values: Vec::new(),
    });
    let compilation = compile(
        3,
        vec![Item::Global {
            name: "LEXBUF".to_string(),
            value: table,
        }],
    );
    assert!(compilation.warnings.iter().any(|w| w.code == "MDL0428"));
    // Capacity byte, count byte, four bytes per entry.
    assert_eq!(compilation.table_data.len(), 2 + 4 * 10);
    assert_eq!(compilation.table_data[0], 10);
}

#[test]
fn table_kinds_have_their_prefixes() {
    let make = |kind, flags| {
        Expr::Table(TableNode {
            kind,
            flags,
            size: None,
            values: vec![num(1), num(2)],
        })
    };
    let compilation = compile(
        3,
        vec![
            Item::Global {
                name: "A".to_string(),
                value: make(TableKind::LTable, TableFlags::default()),
            },
            Item::Global {
                name: "B".to_string(),
                value: make(
                    TableKind::Table,
                    TableFlags {
                        byte: true,
                        length: true,
                        ..TableFlags::default()
                    },
                ),
            },
        ],
    );
    // LTABLE: word count prefix then two words; then the byte table
    // with its one-byte length prefix.
    assert_eq!(
        compilation.table_data,
        vec![0x00, 0x02, 0x00, 0x01, 0x00, 0x02, 0x02, 0x01, 0x02]
    );
}

#[test]
fn usage_verification_reports_unreferenced_symbols() {
    let version = Version::new(3).unwrap();
    let mut symbols = SymbolTable::new(version);
    symbols.flags.insert("TAKEBIT".to_string(), 5);
    symbols.flags.insert("LIGHTBIT".to_string(), 6);
    symbols.properties.insert("P?SIZE".to_string(), 10);
    symbols.properties.insert("P?DESC".to_string(), 11);

    let object = Item::Object {
        name: "LAMP".to_string(),
        flags: Vec::new(),
        properties: Vec::new(),
    };
    let body = form(
        "FSET",
        vec![Expr::GlobalVar("LAMP".to_string()), atom("TAKEBIT")],
    );
    let program = Program {
        items: vec![object, routine("R", &[], vec![body, form("RTRUE", vec![])])],
    };
    let compilation =
        translate_program(&program, CompileOptions::new(version), symbols.clone()).unwrap();

    let warnings = compilation.verify_usage(&symbols);
    // LIGHTBIT is never referenced; TAKEBIT is; P?DESC is exempt.
    assert!(warnings
        .iter()
        .any(|w| w.code == "ZIL0211" && w.message.contains("LIGHTBIT")));
    assert!(!warnings.iter().any(|w| w.message.contains("TAKEBIT")));
    assert!(warnings
        .iter()
        .any(|w| w.code == "ZIL0212" && w.message.contains("P?SIZE")));
    assert!(!warnings.iter().any(|w| w.message.contains("P?DESC")));
}

#[test]
fn tell_dispatch() {
    let compilation = compile(
        3,
        vec![routine(
            "R",
            &["X"],
            vec![form(
                "TELL",
                vec![
                    Expr::Str("You see ".to_string()),
                    atom("N"),
                    lvar("X"),
                    atom("CR"),
                ],
            )],
        )],
    );
    // print_paddr (large), print_num (variable), new_line.
    assert!(contains(&compilation.code, &[0x8D, 0xFC, 0x00]));
    assert!(contains(&compilation.code, &[0xE6, 0xBF, 0x01]));
    assert!(compilation.code.contains(&0xBB));
    assert_eq!(compilation.strings.len(), 1);
}
