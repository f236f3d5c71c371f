//! Label-resolving instruction builder.
//!
//! [`FunctionAssembler`] produces instruction lists the way the Papyrus compiler lays them
//! out: relative jump offsets, `::nonevar` destinations and guard tails. Jumps name labels
//! that may be defined before or after the jump; offsets are resolved in
//! [`FunctionAssembler::finish`]. Each instruction also records the current source line,
//! giving a matching [`crate::pex::FunctionInfo`] line table for free.
//!
//! # Examples
//!
//! ```rust
//! use pexscope::pex::{FunctionAssembler, OpCode, Value};
//!
//! let mut asm = FunctionAssembler::new();
//! asm.line(3);
//! asm.jmpf("bReady", "else")?;
//! asm.assign("::temp0", Value::str("a"))?;
//! asm.jmp("end")?;
//! asm.label("else")?;
//! asm.assign("::temp0", Value::str("b"))?;
//! asm.label("end")?;
//! asm.ret("::temp0")?;
//!
//! let (instructions, lines) = asm.finish()?;
//! assert_eq!(instructions.len(), 5);
//! assert_eq!(instructions[0].jump_offset(), Some(3));
//! assert_eq!(lines, vec![3; 5]);
//! # Ok::<(), pexscope::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    pex::{Instruction, OpCode, Value, NONE_VAR},
    Error, Result,
};

/// Pending jump awaiting label resolution.
#[derive(Debug, Clone)]
struct LabelFixup {
    /// Target label
    label: String,
    /// Index of the jump instruction
    position: usize,
    /// Index of the offset operand within the instruction
    operand: usize,
}

/// Builds a function body instruction by instruction.
#[derive(Debug, Default)]
pub struct FunctionAssembler {
    instructions: Vec<Instruction>,
    lines: Vec<u16>,
    current_line: u16,
    labels: HashMap<String, usize>,
    fixups: Vec<LabelFixup>,
}

impl FunctionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source line recorded for subsequent instructions.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.current_line = line;
        self
    }

    /// Number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether nothing was emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Emits an arbitrary instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the operand counts do not match the opcode.
    pub fn emit(&mut self, opcode: OpCode, args: Vec<Value>, varargs: Vec<Value>) -> Result<()> {
        let instruction = Instruction::with_varargs(opcode, args, varargs);
        instruction.validate()?;
        self.instructions.push(instruction);
        self.lines.push(self.current_line);
        Ok(())
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if the label already exists.
    pub fn label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.instructions.len());
        Ok(())
    }

    /// `nop`
    ///
    /// # Errors
    ///
    /// Never fails in practice; see [`FunctionAssembler::emit`].
    pub fn nop(&mut self) -> Result<()> {
        self.emit(OpCode::Nop, Vec::new(), Vec::new())
    }

    /// `assign dest src`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn assign(&mut self, dest: &str, src: impl Into<Value>) -> Result<()> {
        self.emit(OpCode::Assign, vec![Value::id(dest), src.into()], Vec::new())
    }

    /// Any `dest a b` instruction: arithmetic, comparisons and `strcat`.
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn binary(
        &mut self,
        opcode: OpCode,
        dest: &str,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) -> Result<()> {
        self.emit(
            opcode,
            vec![Value::id(dest), lhs.into(), rhs.into()],
            Vec::new(),
        )
    }

    /// Any `dest src` instruction: `not`, `ineg`, `fneg` and `cast`.
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn unary(&mut self, opcode: OpCode, dest: &str, src: impl Into<Value>) -> Result<()> {
        self.emit(opcode, vec![Value::id(dest), src.into()], Vec::new())
    }

    /// `callmethod method object dest args...`, pass `None` as `dest` to discard the result.
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn call_method(
        &mut self,
        method: &str,
        object: &str,
        dest: Option<&str>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.emit(
            OpCode::CallMethod,
            vec![
                Value::id(method),
                Value::id(object),
                Value::id(dest.unwrap_or(NONE_VAR)),
            ],
            args,
        )
    }

    /// `callparent method dest args...`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn call_parent(&mut self, method: &str, dest: Option<&str>, args: Vec<Value>) -> Result<()> {
        self.emit(
            OpCode::CallParent,
            vec![Value::id(method), Value::id(dest.unwrap_or(NONE_VAR))],
            args,
        )
    }

    /// `callstatic type method dest args...`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn call_static(
        &mut self,
        type_name: &str,
        method: &str,
        dest: Option<&str>,
        args: Vec<Value>,
    ) -> Result<()> {
        self.emit(
            OpCode::CallStatic,
            vec![
                Value::id(type_name),
                Value::id(method),
                Value::id(dest.unwrap_or(NONE_VAR)),
            ],
            args,
        )
    }

    /// `propget property object dest`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn prop_get(&mut self, property: &str, object: &str, dest: &str) -> Result<()> {
        self.emit(
            OpCode::PropGet,
            vec![Value::id(property), Value::id(object), Value::id(dest)],
            Vec::new(),
        )
    }

    /// `propset property object value`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn prop_set(&mut self, property: &str, object: &str, value: impl Into<Value>) -> Result<()> {
        self.emit(
            OpCode::PropSet,
            vec![Value::id(property), Value::id(object), value.into()],
            Vec::new(),
        )
    }

    /// `return value`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn ret(&mut self, value: impl Into<Value>) -> Result<()> {
        self.emit(OpCode::Return, vec![value.into()], Vec::new())
    }

    /// `jmp label`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn jmp(&mut self, label: &str) -> Result<()> {
        self.jump(OpCode::Jmp, Vec::new(), label)
    }

    /// `jmpt cond label`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn jmpt(&mut self, cond: impl Into<Value>, label: &str) -> Result<()> {
        self.jump(OpCode::Jmpt, vec![cond.into()], label)
    }

    /// `jmpf cond label`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn jmpf(&mut self, cond: impl Into<Value>, label: &str) -> Result<()> {
        self.jump(OpCode::Jmpf, vec![cond.into()], label)
    }

    /// `lock_guards guards...`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn lock_guards(&mut self, guards: &[&str]) -> Result<()> {
        self.emit(OpCode::LockGuards, Vec::new(), identifiers(guards))
    }

    /// `unlock_guards guards...`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn unlock_guards(&mut self, guards: &[&str]) -> Result<()> {
        self.emit(OpCode::UnlockGuards, Vec::new(), identifiers(guards))
    }

    /// `try_lock_guards dest guards...`
    ///
    /// # Errors
    ///
    /// See [`FunctionAssembler::emit`].
    pub fn try_lock_guards(&mut self, dest: &str, guards: &[&str]) -> Result<()> {
        self.emit(
            OpCode::TryLockGuards,
            vec![Value::id(dest)],
            identifiers(guards),
        )
    }

    fn jump(&mut self, opcode: OpCode, mut args: Vec<Value>, label: &str) -> Result<()> {
        let operand = args.len();
        args.push(Value::Integer(0));
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            position: self.instructions.len(),
            operand,
        });
        self.emit(opcode, args, Vec::new())
    }

    /// Resolves all labels and returns the instructions with their source lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] for jumps to labels that were never defined, and
    /// [`Error::Malformed`] if an offset does not fit an `i32`.
    pub fn finish(mut self) -> Result<(Vec<Instruction>, Vec<u16>)> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self
                .labels
                .get(&fixup.label)
                .copied()
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            let target = i32::try_from(target)
                .map_err(|_| malformed_error!("Label position exceeds i32 range"))?;
            let position = i32::try_from(fixup.position)
                .map_err(|_| malformed_error!("Instruction position exceeds i32 range"))?;

            let slot = self
                .instructions
                .get_mut(fixup.position)
                .and_then(|instruction| instruction.args.get_mut(fixup.operand))
                .ok_or_else(|| malformed_error!("Fixup for '{}' lost its jump", fixup.label))?;
            *slot = Value::Integer(target - position);
        }

        Ok((self.instructions, self.lines))
    }
}

fn identifiers(names: &[&str]) -> Vec<Value> {
    names.iter().map(|name| Value::id(*name)).collect()
}
