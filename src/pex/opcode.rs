//! The Papyrus instruction set.
//!
//! Every opcode has a fixed number of leading operands and, for calls and the guard
//! instructions, a variable-length tail. The tables here are the single source of truth for
//! operand counts; [`crate::pex::Instruction::validate`] and the decompiler's lowering both
//! read them.
//!
//! # Operand Layout
//!
//! | Opcode | Fixed operands | Variadic tail |
//! |---|---|---|
//! | `iadd` ... `imod`, `cmp_*`, `strcat` | `dest a b` | - |
//! | `not`, `ineg`, `fneg`, `assign`, `cast` | `dest src` | - |
//! | `jmp` | `offset` | - |
//! | `jmpt`, `jmpf` | `cond offset` | - |
//! | `callmethod` | `method object dest` | arguments |
//! | `callparent` | `method dest` | arguments |
//! | `callstatic` | `type method dest` | arguments |
//! | `return` | `value` | - |
//! | `propget` | `property object dest` | - |
//! | `propset` | `property object value` | - |
//! | `lock_guards`, `unlock_guards` | - | guards |
//! | `try_lock_guards` | `dest` | guards |

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

/// A Papyrus opcode.
///
/// The discriminants match the byte values used in the Pex format. The mnemonic (as printed
/// by the Papyrus assembler) is available through `<&'static str>::from(opcode)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OpCode {
    Nop = 0x00,
    Iadd = 0x01,
    Fadd = 0x02,
    Isub = 0x03,
    Fsub = 0x04,
    Imul = 0x05,
    Fmul = 0x06,
    Idiv = 0x07,
    Fdiv = 0x08,
    Imod = 0x09,
    Not = 0x0A,
    Ineg = 0x0B,
    Fneg = 0x0C,
    Assign = 0x0D,
    Cast = 0x0E,
    CmpEq = 0x0F,
    CmpLt = 0x10,
    CmpLe = 0x11,
    CmpGt = 0x12,
    CmpGe = 0x13,
    Jmp = 0x14,
    Jmpt = 0x15,
    Jmpf = 0x16,
    #[strum(serialize = "callmethod")]
    CallMethod = 0x17,
    #[strum(serialize = "callparent")]
    CallParent = 0x18,
    #[strum(serialize = "callstatic")]
    CallStatic = 0x19,
    Return = 0x1A,
    #[strum(serialize = "strcat")]
    StrCat = 0x1B,
    #[strum(serialize = "propget")]
    PropGet = 0x1C,
    #[strum(serialize = "propset")]
    PropSet = 0x1D,
    ArrayCreate = 0x1E,
    ArrayLength = 0x1F,
    #[strum(serialize = "array_getelement")]
    ArrayGetElement = 0x20,
    #[strum(serialize = "array_setelement")]
    ArraySetElement = 0x21,
    #[strum(serialize = "array_findelement")]
    ArrayFindElement = 0x22,
    #[strum(serialize = "array_rfindelement")]
    ArrayRFindElement = 0x23,
    Is = 0x24,
    StructCreate = 0x25,
    StructGet = 0x26,
    StructSet = 0x27,
    #[strum(serialize = "array_findstruct")]
    ArrayFindStruct = 0x28,
    #[strum(serialize = "array_rfindstruct")]
    ArrayRFindStruct = 0x29,
    ArrayAdd = 0x2A,
    ArrayInsert = 0x2B,
    #[strum(serialize = "array_removelast")]
    ArrayRemoveLast = 0x2C,
    ArrayRemove = 0x2D,
    ArrayClear = 0x2E,
    #[strum(serialize = "array_getallmatchingstructs")]
    ArrayGetAllMatchingStructs = 0x2F,
    LockGuards = 0x30,
    UnlockGuards = 0x31,
    TryLockGuards = 0x32,
}

impl OpCode {
    /// Decodes a raw opcode byte.
    ///
    /// # Returns
    ///
    /// `None` if `byte` is outside of the instruction set.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        OpCode::iter().nth(usize::from(byte))
    }

    /// The assembler mnemonic, e.g. `callmethod` or `array_getelement`.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Number of fixed operands.
    #[must_use]
    pub const fn fixed_args(self) -> usize {
        match self {
            OpCode::Nop | OpCode::LockGuards | OpCode::UnlockGuards => 0,
            OpCode::Jmp
            | OpCode::Return
            | OpCode::StructCreate
            | OpCode::ArrayRemoveLast
            | OpCode::ArrayClear
            | OpCode::TryLockGuards => 1,
            OpCode::Not
            | OpCode::Ineg
            | OpCode::Fneg
            | OpCode::Assign
            | OpCode::Cast
            | OpCode::Jmpt
            | OpCode::Jmpf
            | OpCode::CallParent
            | OpCode::ArrayCreate
            | OpCode::ArrayLength => 2,
            OpCode::Iadd
            | OpCode::Fadd
            | OpCode::Isub
            | OpCode::Fsub
            | OpCode::Imul
            | OpCode::Fmul
            | OpCode::Idiv
            | OpCode::Fdiv
            | OpCode::Imod
            | OpCode::CmpEq
            | OpCode::CmpLt
            | OpCode::CmpLe
            | OpCode::CmpGt
            | OpCode::CmpGe
            | OpCode::CallMethod
            | OpCode::CallStatic
            | OpCode::StrCat
            | OpCode::PropGet
            | OpCode::PropSet
            | OpCode::ArrayGetElement
            | OpCode::ArraySetElement
            | OpCode::Is
            | OpCode::StructGet
            | OpCode::StructSet
            | OpCode::ArrayAdd
            | OpCode::ArrayInsert
            | OpCode::ArrayRemove => 3,
            OpCode::ArrayFindElement | OpCode::ArrayRFindElement => 4,
            OpCode::ArrayFindStruct | OpCode::ArrayRFindStruct => 5,
            OpCode::ArrayGetAllMatchingStructs => 6,
        }
    }

    /// Whether the opcode takes a variable-length operand tail.
    #[must_use]
    pub const fn has_varargs(self) -> bool {
        matches!(
            self,
            OpCode::CallMethod
                | OpCode::CallParent
                | OpCode::CallStatic
                | OpCode::LockGuards
                | OpCode::UnlockGuards
                | OpCode::TryLockGuards
        )
    }

    /// `jmp`, `jmpt` or `jmpf`.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::Jmpt | OpCode::Jmpf)
    }

    /// `jmpt` or `jmpf`.
    #[must_use]
    pub const fn is_conditional_jump(self) -> bool {
        matches!(self, OpCode::Jmpt | OpCode::Jmpf)
    }

    /// Instructions that end a basic block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        self.is_jump() || matches!(self, OpCode::Return)
    }

    /// Index of the operand the instruction writes, if any.
    ///
    /// Only identifiers are ever written; `::nonevar` as a destination means the result is
    /// discarded.
    #[must_use]
    pub const fn dest_index(self) -> Option<usize> {
        match self {
            OpCode::Iadd
            | OpCode::Fadd
            | OpCode::Isub
            | OpCode::Fsub
            | OpCode::Imul
            | OpCode::Fmul
            | OpCode::Idiv
            | OpCode::Fdiv
            | OpCode::Imod
            | OpCode::Not
            | OpCode::Ineg
            | OpCode::Fneg
            | OpCode::Assign
            | OpCode::Cast
            | OpCode::CmpEq
            | OpCode::CmpLt
            | OpCode::CmpLe
            | OpCode::CmpGt
            | OpCode::CmpGe
            | OpCode::StrCat
            | OpCode::ArrayCreate
            | OpCode::ArrayLength
            | OpCode::ArrayGetElement
            | OpCode::Is
            | OpCode::StructCreate
            | OpCode::StructGet
            | OpCode::TryLockGuards => Some(0),
            OpCode::CallParent
            | OpCode::ArrayFindElement
            | OpCode::ArrayRFindElement
            | OpCode::ArrayFindStruct
            | OpCode::ArrayRFindStruct
            | OpCode::ArrayGetAllMatchingStructs => Some(1),
            OpCode::CallMethod | OpCode::CallStatic | OpCode::PropGet => Some(2),
            _ => None,
        }
    }

    /// Whether executing the instruction can be observed beyond its destination operand.
    ///
    /// Calls run arbitrary script code, property writes may run setters, and the array,
    /// struct and guard mutators change shared state.
    #[must_use]
    pub const fn has_side_effect(self) -> bool {
        matches!(
            self,
            OpCode::CallMethod
                | OpCode::CallParent
                | OpCode::CallStatic
                | OpCode::PropSet
                | OpCode::ArraySetElement
                | OpCode::StructSet
                | OpCode::ArrayAdd
                | OpCode::ArrayInsert
                | OpCode::ArrayRemoveLast
                | OpCode::ArrayRemove
                | OpCode::ArrayClear
                | OpCode::LockGuards
                | OpCode::UnlockGuards
                | OpCode::TryLockGuards
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_follow_iteration_order() {
        for (index, opcode) in OpCode::iter().enumerate() {
            assert_eq!(opcode as usize, index, "{opcode:?} out of order");
            assert_eq!(OpCode::from_byte(opcode as u8), Some(opcode));
        }
        assert_eq!(OpCode::COUNT, 0x33);
        assert_eq!(OpCode::from_byte(0x33), None);
    }

    #[test]
    fn mnemonics() {
        assert_eq!(OpCode::CallMethod.mnemonic(), "callmethod");
        assert_eq!(OpCode::CmpEq.mnemonic(), "cmp_eq");
        assert_eq!(OpCode::ArrayGetElement.mnemonic(), "array_getelement");
        assert_eq!(OpCode::TryLockGuards.mnemonic(), "try_lock_guards");
        assert_eq!(OpCode::Jmpf.mnemonic(), "jmpf");
    }

    #[test]
    fn destinations_lie_within_fixed_operands() {
        for opcode in OpCode::iter() {
            if let Some(dest) = opcode.dest_index() {
                assert!(dest < opcode.fixed_args(), "{opcode:?}");
            }
        }
    }
}
