//! A single Pex instruction.

use std::fmt;

use crate::{
    pex::{OpCode, Value},
    Result,
};

/// One decoded instruction: an opcode, its fixed operands and its variadic tail.
///
/// Instructions are addressed by their index in [`crate::pex::Function::instructions`];
/// jump offsets are relative to that index.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation
    pub opcode: OpCode,
    /// Fixed operands, `opcode.fixed_args()` of them in a well-formed instruction
    pub args: Vec<Value>,
    /// Variadic operands (call arguments, guard names)
    pub varargs: Vec<Value>,
}

impl Instruction {
    /// Creates an instruction without a variadic tail.
    #[must_use]
    pub fn new(opcode: OpCode, args: Vec<Value>) -> Self {
        Instruction {
            opcode,
            args,
            varargs: Vec::new(),
        }
    }

    /// Creates an instruction with a variadic tail.
    #[must_use]
    pub fn with_varargs(opcode: OpCode, args: Vec<Value>, varargs: Vec<Value>) -> Self {
        Instruction {
            opcode,
            args,
            varargs,
        }
    }

    /// Checks the operand counts against the opcode table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the fixed operand count is wrong, if a variadic
    /// tail is present on an opcode that takes none, or if a jump offset is not an integer.
    pub fn validate(&self) -> Result<()> {
        if self.args.len() != self.opcode.fixed_args() {
            return Err(malformed_error!(
                "{} expects {} operands, found {}",
                self.opcode.mnemonic(),
                self.opcode.fixed_args(),
                self.args.len()
            ));
        }
        if !self.opcode.has_varargs() && !self.varargs.is_empty() {
            return Err(malformed_error!(
                "{} takes no variadic operands, found {}",
                self.opcode.mnemonic(),
                self.varargs.len()
            ));
        }
        if self.opcode.is_jump() && self.jump_offset().is_none() {
            return Err(malformed_error!(
                "{} offset is not an integer",
                self.opcode.mnemonic()
            ));
        }
        Ok(())
    }

    /// Relative jump offset for `jmp`, `jmpt` and `jmpf`.
    #[must_use]
    pub fn jump_offset(&self) -> Option<i32> {
        match self.opcode {
            OpCode::Jmp => self.args.first().and_then(Value::as_integer),
            OpCode::Jmpt | OpCode::Jmpf => self.args.get(1).and_then(Value::as_integer),
            _ => None,
        }
    }

    /// The written operand, if the opcode has one and it is an identifier.
    #[must_use]
    pub fn dest(&self) -> Option<&str> {
        self.opcode
            .dest_index()
            .and_then(|index| self.args.get(index))
            .and_then(Value::as_identifier)
    }

    /// Fixed operand `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the operand is missing.
    pub fn arg(&self, index: usize) -> Result<&Value> {
        self.args.get(index).ok_or_else(|| {
            malformed_error!("{} is missing operand {}", self.opcode.mnemonic(), index)
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        for value in self.args.iter().chain(&self.varargs) {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
