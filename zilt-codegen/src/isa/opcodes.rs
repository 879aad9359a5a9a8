//! The opcode table.
//!
//! One variant per distinct instruction. Slots that were reassigned
//! between versions (`not`/`call_1n`, `pop`/`catch`, the V1-4 `save` and
//! `restore` versus their V5 extended forms) get one variant per meaning,
//! each with its own availability range, so the translator never has to
//! reason about what a number means in a given version.

use crate::version::Version;

/// Operand-count class of an opcode. Decides which encoding forms are
/// legal and how the opcode number is packed into the first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeClass {
    /// 0OP: short form, no operands.
    Zero,
    /// 1OP: short form, exactly one operand.
    One,
    /// 2OP: long form, or variable form when an operand needs 16 bits or
    /// the count is not two.
    Two,
    /// VAR: variable form, 0..=4 operands (8 for the double-type-byte
    /// calls).
    Var,
    /// EXT: `0xBE`-prefixed extended form, V5+.
    Ext,
}

macro_rules! opcodes {
    ($( $variant:ident = ($name:expr, $class:ident, $num:expr, $store:expr, $branch:expr, $min:expr, $max:expr); )*) => {
        /// A Z-machine opcode.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $( $variant, )*
        }

        impl Opcode {
            /// Canonical lowercase mnemonic, as used by the Z-machine
            /// standard and in diagnostics.
            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            /// The operand-count class.
            pub fn class(self) -> OpcodeClass {
                match self {
                    $( Opcode::$variant => OpcodeClass::$class, )*
                }
            }

            /// The opcode number within its class.
            pub fn number(self) -> u8 {
                match self {
                    $( Opcode::$variant => $num, )*
                }
            }

            fn base_store(self) -> bool {
                match self {
                    $( Opcode::$variant => $store, )*
                }
            }

            fn base_branch(self) -> bool {
                match self {
                    $( Opcode::$variant => $branch, )*
                }
            }

            /// Inclusive version range in which this opcode exists.
            pub fn availability(self) -> (u8, u8) {
                match self {
                    $( Opcode::$variant => ($min, $max), )*
                }
            }
        }
    };
}

opcodes! {
    // 2OP
    Je = ("je", Two, 0x01, false, true, 1, 8);
    Jl = ("jl", Two, 0x02, false, true, 1, 8);
    Jg = ("jg", Two, 0x03, false, true, 1, 8);
    DecChk = ("dec_chk", Two, 0x04, false, true, 1, 8);
    IncChk = ("inc_chk", Two, 0x05, false, true, 1, 8);
    Jin = ("jin", Two, 0x06, false, true, 1, 8);
    Test = ("test", Two, 0x07, false, true, 1, 8);
    Or = ("or", Two, 0x08, true, false, 1, 8);
    And = ("and", Two, 0x09, true, false, 1, 8);
    TestAttr = ("test_attr", Two, 0x0A, false, true, 1, 8);
    SetAttr = ("set_attr", Two, 0x0B, false, false, 1, 8);
    ClearAttr = ("clear_attr", Two, 0x0C, false, false, 1, 8);
    Store = ("store", Two, 0x0D, false, false, 1, 8);
    InsertObj = ("insert_obj", Two, 0x0E, false, false, 1, 8);
    Loadw = ("loadw", Two, 0x0F, true, false, 1, 8);
    Loadb = ("loadb", Two, 0x10, true, false, 1, 8);
    GetProp = ("get_prop", Two, 0x11, true, false, 1, 8);
    GetPropAddr = ("get_prop_addr", Two, 0x12, true, false, 1, 8);
    GetNextProp = ("get_next_prop", Two, 0x13, true, false, 1, 8);
    Add = ("add", Two, 0x14, true, false, 1, 8);
    Sub = ("sub", Two, 0x15, true, false, 1, 8);
    Mul = ("mul", Two, 0x16, true, false, 1, 8);
    Div = ("div", Two, 0x17, true, false, 1, 8);
    Mod = ("mod", Two, 0x18, true, false, 1, 8);
    Call2S = ("call_2s", Two, 0x19, true, false, 4, 8);
    Call2N = ("call_2n", Two, 0x1A, false, false, 5, 8);
    SetColour = ("set_colour", Two, 0x1B, false, false, 5, 8);
    Throw = ("throw", Two, 0x1C, false, false, 5, 8);

    // 1OP
    Jz = ("jz", One, 0x00, false, true, 1, 8);
    GetSibling = ("get_sibling", One, 0x01, true, true, 1, 8);
    GetChild = ("get_child", One, 0x02, true, true, 1, 8);
    GetParent = ("get_parent", One, 0x03, true, false, 1, 8);
    GetPropLen = ("get_prop_len", One, 0x04, true, false, 1, 8);
    Inc = ("inc", One, 0x05, false, false, 1, 8);
    Dec = ("dec", One, 0x06, false, false, 1, 8);
    PrintAddr = ("print_addr", One, 0x07, false, false, 1, 8);
    Call1S = ("call_1s", One, 0x08, true, false, 4, 8);
    RemoveObj = ("remove_obj", One, 0x09, false, false, 1, 8);
    PrintObj = ("print_obj", One, 0x0A, false, false, 1, 8);
    Ret = ("ret", One, 0x0B, false, false, 1, 8);
    Jump = ("jump", One, 0x0C, false, false, 1, 8);
    PrintPaddr = ("print_paddr", One, 0x0D, false, false, 1, 8);
    Load = ("load", One, 0x0E, true, false, 1, 8);
    Not = ("not", One, 0x0F, true, false, 1, 4);
    Call1N = ("call_1n", One, 0x0F, false, false, 5, 8);

    // 0OP
    Rtrue = ("rtrue", Zero, 0x00, false, false, 1, 8);
    Rfalse = ("rfalse", Zero, 0x01, false, false, 1, 8);
    Print = ("print", Zero, 0x02, false, false, 1, 8);
    PrintRet = ("print_ret", Zero, 0x03, false, false, 1, 8);
    Nop = ("nop", Zero, 0x04, false, false, 1, 8);
    Save0 = ("save", Zero, 0x05, false, false, 1, 4);
    Restore0 = ("restore", Zero, 0x06, false, false, 1, 4);
    Restart = ("restart", Zero, 0x07, false, false, 1, 8);
    RetPopped = ("ret_popped", Zero, 0x08, false, false, 1, 8);
    Pop = ("pop", Zero, 0x09, false, false, 1, 4);
    Catch = ("catch", Zero, 0x09, true, false, 5, 8);
    Quit = ("quit", Zero, 0x0A, false, false, 1, 8);
    NewLine = ("new_line", Zero, 0x0B, false, false, 1, 8);
    ShowStatus = ("show_status", Zero, 0x0C, false, false, 3, 3);
    Verify = ("verify", Zero, 0x0D, false, true, 3, 8);
    Piracy = ("piracy", Zero, 0x0F, false, true, 5, 8);

    // VAR
    CallVs = ("call_vs", Var, 0x00, true, false, 1, 8);
    Storew = ("storew", Var, 0x01, false, false, 1, 8);
    Storeb = ("storeb", Var, 0x02, false, false, 1, 8);
    PutProp = ("put_prop", Var, 0x03, false, false, 1, 8);
    Sread = ("sread", Var, 0x04, false, false, 1, 8);
    PrintChar = ("print_char", Var, 0x05, false, false, 1, 8);
    PrintNum = ("print_num", Var, 0x06, false, false, 1, 8);
    Random = ("random", Var, 0x07, true, false, 1, 8);
    Push = ("push", Var, 0x08, false, false, 1, 8);
    Pull = ("pull", Var, 0x09, false, false, 1, 8);
    SplitWindow = ("split_window", Var, 0x0A, false, false, 3, 8);
    SetWindow = ("set_window", Var, 0x0B, false, false, 3, 8);
    CallVs2 = ("call_vs2", Var, 0x0C, true, false, 4, 8);
    EraseWindow = ("erase_window", Var, 0x0D, false, false, 4, 8);
    EraseLine = ("erase_line", Var, 0x0E, false, false, 4, 8);
    SetCursor = ("set_cursor", Var, 0x0F, false, false, 4, 8);
    GetCursor = ("get_cursor", Var, 0x10, false, false, 4, 8);
    SetTextStyle = ("set_text_style", Var, 0x11, false, false, 4, 8);
    BufferMode = ("buffer_mode", Var, 0x12, false, false, 4, 8);
    OutputStream = ("output_stream", Var, 0x13, false, false, 3, 8);
    InputStream = ("input_stream", Var, 0x14, false, false, 3, 8);
    SoundEffect = ("sound_effect", Var, 0x15, false, false, 3, 8);
    ReadChar = ("read_char", Var, 0x16, true, false, 4, 8);
    ScanTable = ("scan_table", Var, 0x17, true, true, 4, 8);
    NotVar = ("not", Var, 0x18, true, false, 5, 6);
    CallVn = ("call_vn", Var, 0x19, false, false, 5, 8);
    CallVn2 = ("call_vn2", Var, 0x1A, false, false, 5, 8);
    Tokenise = ("tokenise", Var, 0x1B, false, false, 5, 8);
    EncodeText = ("encode_text", Var, 0x1C, false, false, 5, 8);
    CopyTable = ("copy_table", Var, 0x1D, false, false, 5, 8);
    PrintTable = ("print_table", Var, 0x1E, false, false, 5, 8);
    CheckArgCount = ("check_arg_count", Var, 0x1F, false, true, 5, 8);

    // EXT
    SaveExt = ("save", Ext, 0x00, true, false, 5, 8);
    RestoreExt = ("restore", Ext, 0x01, true, false, 5, 8);
    LogShift = ("log_shift", Ext, 0x02, true, false, 5, 8);
    ArtShift = ("art_shift", Ext, 0x03, true, false, 5, 8);
    SetFont = ("set_font", Ext, 0x04, true, false, 5, 8);
    SaveUndo = ("save_undo", Ext, 0x09, true, false, 5, 8);
    RestoreUndo = ("restore_undo", Ext, 0x0A, true, false, 5, 8);
    PrintUnicode = ("print_unicode", Ext, 0x0B, false, false, 5, 8);
    CheckUnicode = ("check_unicode", Ext, 0x0C, true, false, 5, 8);
}

impl Opcode {
    /// Does this instruction take a store byte in `version`?
    ///
    /// A few slots changed meaning across versions: the 0OP `save` and
    /// `restore` grew a store byte in V4 after being branches, `sread`
    /// became a store when it turned into `aread` in V5, and `pull` stores
    /// in V6 where the variable moved out of operand position.
    pub fn is_store(self, version: Version) -> bool {
        match self {
            Opcode::Save0 | Opcode::Restore0 => version.number() == 4,
            Opcode::Sread => version.at_least(5),
            Opcode::Pull => version.number() == 6,
            _ => self.base_store(),
        }
    }

    /// Does this instruction take branch bytes in `version`?
    pub fn is_branch(self, version: Version) -> bool {
        match self {
            Opcode::Save0 | Opcode::Restore0 => version.at_most(3),
            _ => self.base_branch(),
        }
    }

    /// Is this opcode available at all in `version`?
    pub fn exists_in(self, version: Version) -> bool {
        let (min, max) = self.availability();
        version.number() >= min && version.number() <= max
    }

    /// Is the instruction followed by inline encoded text?
    pub fn has_inline_text(self) -> bool {
        match self {
            Opcode::Print | Opcode::PrintRet => true,
            _ => false,
        }
    }

    /// Does this opcode use the second type byte, allowing up to eight
    /// operands?
    pub fn has_double_type_byte(self) -> bool {
        match self {
            Opcode::CallVs2 | Opcode::CallVn2 => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_slots() {
        let v3 = Version::new(3).unwrap();
        let v5 = Version::new(5).unwrap();

        assert_eq!(Opcode::Not.number(), Opcode::Call1N.number());
        assert!(Opcode::Not.exists_in(v3));
        assert!(!Opcode::Not.exists_in(v5));
        assert!(Opcode::Call1N.exists_in(v5));

        assert_eq!(Opcode::Pop.number(), Opcode::Catch.number());
        assert!(!Opcode::Catch.exists_in(v3));
    }

    #[test]
    fn version_sensitive_suffixes() {
        let v3 = Version::new(3).unwrap();
        let v4 = Version::new(4).unwrap();
        let v5 = Version::new(5).unwrap();

        assert!(Opcode::Save0.is_branch(v3));
        assert!(!Opcode::Save0.is_branch(v4));
        assert!(Opcode::Save0.is_store(v4));

        assert!(!Opcode::Sread.is_store(v4));
        assert!(Opcode::Sread.is_store(v5));

        assert!(Opcode::ScanTable.is_store(v5));
        assert!(Opcode::ScanTable.is_branch(v5));
    }
}
