//! The abstract syntax the parser hands us.
//!
//! Macro expansion has already happened; what arrives here is plain
//! forms, atoms and literals. Parenthesized lists that are not forms
//! (binding lists, DO specs, COND clauses that escaped the parser's
//! clause shaping) appear as `Expr::List`.

/// An expression or statement node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A bare atom, e.g. `T` or an object name.
    Atom(String),
    /// An integer literal.
    Number(i32),
    /// A character literal (`!\c`).
    Char(char),
    /// A string literal.
    Str(String),
    /// A local variable reference, `.NAME`.
    LocalVar(String),
    /// A global variable reference, `,NAME`.
    GlobalVar(String),
    /// An operator applied to operands, `<OP ...>`.
    Form(FormNode),
    /// A shaped `COND` body.
    Cond(CondNode),
    /// A shaped `REPEAT`/`PROG`/`BIND` body.
    Repeat(RepeatNode),
    /// A table literal.
    Table(TableNode),
    /// A parenthesized list that is not a form.
    List(Vec<Expr>),
}

impl Expr {
    /// The operator name if this is a form with an atom operator.
    pub fn form_name(&self) -> Option<&str> {
        match self {
            Expr::Form(f) => Some(&f.op),
            _ => None,
        }
    }
}

/// `<OP operands...>`.
#[derive(Clone, Debug, PartialEq)]
pub struct FormNode {
    /// The operator atom.
    pub op: String,
    /// The operands in source order.
    pub operands: Vec<Expr>,
}

impl FormNode {
    /// Build a form from an operator name and operands.
    pub fn new(op: impl Into<String>, operands: Vec<Expr>) -> Self {
        Self {
            op: op.into(),
            operands,
        }
    }
}

/// A `COND` whose clauses the parser has already shaped.
#[derive(Clone, Debug, PartialEq)]
pub struct CondNode {
    /// `(condition, actions)` pairs in source order.
    pub clauses: Vec<(Expr, Vec<Expr>)>,
}

/// A `REPEAT`, `PROG` or `BIND` whose pieces the parser has shaped.
#[derive(Clone, Debug, PartialEq)]
pub struct RepeatNode {
    /// Optional activation name for targeted `RETURN`/`AGAIN`.
    pub activation: Option<String>,
    /// `(name, initializer)` bindings.
    pub bindings: Vec<(String, Option<Expr>)>,
    /// Body statements.
    pub body: Vec<Expr>,
}

/// Which table-building form produced a table literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    /// `TABLE`: words, no prefix.
    Table,
    /// `LTABLE`: two-byte word-count prefix.
    LTable,
    /// `ITABLE`: a repeated or zero-filled table of a given size.
    ITable,
    /// `PTABLE`: like `TABLE` but placed in static memory.
    PTable,
}

/// The flag list attached to a table literal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableFlags {
    /// `(BYTE)`: one byte per element.
    pub byte: bool,
    /// `(STRING)`: string elements emit their raw characters.
    pub string: bool,
    /// `(LEXV)`: lexical-buffer layout for `ITABLE`.
    pub lexv: bool,
    /// `(LENGTH)`: length prefix before the data.
    pub length: bool,
    /// `(PURE)`: static, read-only data.
    pub pure: bool,
}

/// A table literal.
#[derive(Clone, Debug, PartialEq)]
pub struct TableNode {
    /// Which form built it.
    pub kind: TableKind,
    /// Flags from the specifier list.
    pub flags: TableFlags,
    /// Element count for `ITABLE`.
    pub size: Option<i32>,
    /// The element values (for `ITABLE`, the repeated pattern).
    pub values: Vec<Expr>,
}

/// A routine definition.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutineNode {
    /// Routine name.
    pub name: String,
    /// Optional activation name for targeted `RETURN`/`AGAIN`.
    pub activation: Option<String>,
    /// Required positional parameters.
    pub params: Vec<String>,
    /// `"OPT"` parameters with optional default initializers.
    pub opt_params: Vec<(String, Option<Expr>)>,
    /// `"AUX"` locals with optional default initializers.
    pub aux: Vec<(String, Option<Expr>)>,
    /// Body statements.
    pub body: Vec<Expr>,
}

/// A top-level definition.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    /// `<ROUTINE ...>`.
    Routine(RoutineNode),
    /// `<OBJECT name ...>` / `<ROOM name ...>`; only what code
    /// generation needs survives to this point.
    Object {
        /// Object name.
        name: String,
        /// Flag names the object sets.
        flags: Vec<String>,
        /// Property names the object defines.
        properties: Vec<String>,
    },
    /// `<GLOBAL name value>`.
    Global {
        /// Global name.
        name: String,
        /// Initial value.
        value: Expr,
    },
    /// `<CONSTANT name value>`.
    Constant {
        /// Constant name.
        name: String,
        /// Compile-time value.
        value: Expr,
    },
}

/// A whole program, in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    /// Top-level items in source order.
    pub items: Vec<Item>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }
}
