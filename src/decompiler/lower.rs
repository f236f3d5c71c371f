//! Instruction lowering.
//!
//! Turns every instruction of a basic block into one statement node. Instructions with a
//! destination become `dest = expression`; calls that discard their result and the array,
//! struct and guard mutators become expression statements. Jumps produce no statement; a
//! conditional jump becomes the block's [`FlowExit::Branch`] condition.
//!
//! Every node built for an instruction records that instruction's index.

use std::collections::BTreeMap;

use crate::{
    decompiler::{
        blocks::{BlockExit, BlockGraph},
        tree::{ArrayMethod, BinaryOp, NodeId, NodeKind, Receiver, Tree, UnaryOp},
        types::{element_type_of, TypeTable, VAR_TYPE},
    },
    pex::{Instruction, OpCode, Value, NONE_VAR},
    Result,
};

/// How control leaves a lowered block.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowExit {
    /// The last statement is a `Return`
    Return,
    /// Unconditional transfer, or fall-through to `Jump(end)`
    Jump(usize),
    /// Transfer to `target` unless `condition` holds
    Branch {
        /// Condition under which control falls through to the block end
        condition: NodeId,
        /// Taken successor
        target: usize,
    },
}

/// A basic block whose instructions have been lowered to statements.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowBlock {
    /// First instruction
    pub start: usize,
    /// One past the last instruction
    pub end: usize,
    /// Statement nodes in execution order
    pub statements: Vec<NodeId>,
    /// Exit
    pub exit: FlowExit,
}

impl FlowBlock {
    /// Successor addresses, the function end included.
    #[must_use]
    pub fn successors(&self) -> Vec<usize> {
        match self.exit {
            FlowExit::Return => Vec::new(),
            FlowExit::Jump(target) => vec![target],
            FlowExit::Branch { target, .. } => vec![self.end, target],
        }
    }

    /// The branch condition, if any.
    #[must_use]
    pub fn condition(&self) -> Option<NodeId> {
        match self.exit {
            FlowExit::Branch { condition, .. } => Some(condition),
            _ => None,
        }
    }
}

/// Lowered blocks keyed by start address.
pub type FlowBlocks = BTreeMap<usize, FlowBlock>;

/// Start addresses of the blocks in `blocks` that transfer control to `start`.
#[must_use]
pub fn predecessors(blocks: &FlowBlocks, start: usize) -> Vec<usize> {
    blocks
        .values()
        .filter(|block| block.successors().contains(&start))
        .map(|block| block.start)
        .collect()
}

/// Lowers all reachable blocks of `graph`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a destination or guard operand is not an identifier.
pub fn lower(
    tree: &mut Tree,
    instructions: &[Instruction],
    graph: &BlockGraph,
    types: &TypeTable,
) -> Result<FlowBlocks> {
    let mut lowerer = Lowerer { tree, types };
    let mut blocks = BTreeMap::new();

    for block in graph.blocks.values() {
        let mut statements = Vec::with_capacity(block.end - block.start);
        for ip in block.start..block.end {
            if let Some(statement) = lowerer.statement(ip, &instructions[ip])? {
                statements.push(statement);
            }
        }

        let exit = match &block.exit {
            BlockExit::Return => FlowExit::Return,
            BlockExit::Jump(target) => FlowExit::Jump(*target),
            BlockExit::Branch {
                condition,
                negated,
                target,
            } => {
                let ip = block.end - 1;
                let mut node = lowerer.operand(condition, ip);
                if *negated {
                    node = lowerer.tree.add_at(
                        NodeKind::Unary {
                            op: UnaryOp::Not,
                            operand: node,
                        },
                        ip,
                    );
                }
                FlowExit::Branch {
                    condition: node,
                    target: *target,
                }
            }
        };

        blocks.insert(
            block.start,
            FlowBlock {
                start: block.start,
                end: block.end,
                statements,
                exit,
            },
        );
    }
    Ok(blocks)
}

struct Lowerer<'a> {
    tree: &'a mut Tree,
    types: &'a TypeTable,
}

impl Lowerer<'_> {
    fn operand(&mut self, value: &Value, ip: usize) -> NodeId {
        let kind = match value {
            Value::Identifier(name) => NodeKind::Identifier(name.clone()),
            literal => NodeKind::Literal(literal.clone()),
        };
        self.tree.add_at(kind, ip)
    }

    fn arg(&mut self, instruction: &Instruction, index: usize, ip: usize) -> Result<NodeId> {
        let value = instruction.arg(index)?.clone();
        Ok(self.operand(&value, ip))
    }

    fn name(instruction: &Instruction, index: usize) -> Result<String> {
        instruction
            .arg(index)?
            .as_identifier()
            .map(str::to_string)
            .ok_or_else(|| {
                malformed_error!(
                    "{} operand {} is not an identifier",
                    instruction.opcode.mnemonic(),
                    index
                )
            })
    }

    fn guards(instruction: &Instruction) -> Result<Vec<String>> {
        instruction
            .varargs
            .iter()
            .map(|value| {
                value.as_identifier().map(str::to_string).ok_or_else(|| {
                    malformed_error!("{} guard is not an identifier", instruction.opcode.mnemonic())
                })
            })
            .collect()
    }

    fn add(&mut self, kind: NodeKind, ip: usize) -> NodeId {
        self.tree.add_at(kind, ip)
    }

    /// `dest = value`, or just `value` when the destination is `::nonevar`.
    fn assign_to(&mut self, dest: &str, value: NodeId, ip: usize) -> NodeId {
        if dest.eq_ignore_ascii_case(NONE_VAR) {
            return value;
        }
        let target = self.add(NodeKind::Identifier(dest.to_string()), ip);
        self.add(NodeKind::Assign { target, value }, ip)
    }

    /// Lowers an argument list, dropping trailing defaults.
    fn trimmed_args(
        &mut self,
        instruction: &Instruction,
        ip: usize,
        required: &[usize],
        optional: &[(usize, Value)],
    ) -> Result<Vec<NodeId>> {
        let mut values: Vec<Value> = Vec::with_capacity(required.len() + optional.len());
        for &index in required {
            values.push(instruction.arg(index)?.clone());
        }
        let mut tail: Vec<Value> = Vec::with_capacity(optional.len());
        for (index, _) in optional {
            tail.push(instruction.arg(*index)?.clone());
        }
        while let Some(last) = tail.last() {
            if *last == optional[tail.len() - 1].1 {
                tail.pop();
            } else {
                break;
            }
        }
        values.extend(tail);
        Ok(values.iter().map(|value| self.operand(value, ip)).collect())
    }

    fn array_call(
        &mut self,
        instruction: &Instruction,
        ip: usize,
        method: ArrayMethod,
        args: Vec<NodeId>,
    ) -> Result<NodeId> {
        let array = self.arg(instruction, 0, ip)?;
        Ok(self.add(
            NodeKind::ArrayCall {
                array,
                method,
                args,
            },
            ip,
        ))
    }

    fn statement(&mut self, ip: usize, instruction: &Instruction) -> Result<Option<NodeId>> {
        let binary = |opcode: OpCode| match opcode {
            OpCode::Iadd | OpCode::Fadd | OpCode::StrCat => Some(BinaryOp::Add),
            OpCode::Isub | OpCode::Fsub => Some(BinaryOp::Sub),
            OpCode::Imul | OpCode::Fmul => Some(BinaryOp::Mul),
            OpCode::Idiv | OpCode::Fdiv => Some(BinaryOp::Div),
            OpCode::Imod => Some(BinaryOp::Mod),
            OpCode::CmpEq => Some(BinaryOp::Eq),
            OpCode::CmpLt => Some(BinaryOp::Lt),
            OpCode::CmpLe => Some(BinaryOp::Le),
            OpCode::CmpGt => Some(BinaryOp::Gt),
            OpCode::CmpGe => Some(BinaryOp::Ge),
            _ => None,
        };

        if let Some(op) = binary(instruction.opcode) {
            let dest = Self::name(instruction, 0)?;
            let lhs = self.arg(instruction, 1, ip)?;
            let rhs = self.arg(instruction, 2, ip)?;
            let value = self.add(NodeKind::Binary { op, lhs, rhs }, ip);
            return Ok(Some(self.assign_to(&dest, value, ip)));
        }

        let statement = match instruction.opcode {
            OpCode::Nop | OpCode::Jmp | OpCode::Jmpt | OpCode::Jmpf => return Ok(None),
            OpCode::Not | OpCode::Ineg | OpCode::Fneg => {
                let dest = Self::name(instruction, 0)?;
                let operand = self.arg(instruction, 1, ip)?;
                let op = if instruction.opcode == OpCode::Not {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                let value = self.add(NodeKind::Unary { op, operand }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::Assign => {
                let dest = Self::name(instruction, 0)?;
                let value = self.arg(instruction, 1, ip)?;
                self.assign_to(&dest, value, ip)
            }
            OpCode::Cast => {
                let dest = Self::name(instruction, 0)?;
                let value = self.arg(instruction, 1, ip)?;
                let type_name = self.types.declared_type(&dest).to_string();
                let cast = self.add(NodeKind::Cast { value, type_name }, ip);
                self.assign_to(&dest, cast, ip)
            }
            OpCode::CallMethod => {
                let method = Self::name(instruction, 0)?;
                let receiver = if instruction.arg(1)?.is_identifier("self") {
                    Receiver::SelfObject
                } else {
                    Receiver::Object(self.arg(instruction, 1, ip)?)
                };
                let dest = Self::name(instruction, 2)?;
                self.call(instruction, ip, receiver, method, &dest)
            }
            OpCode::CallParent => {
                let method = Self::name(instruction, 0)?;
                let dest = Self::name(instruction, 1)?;
                self.call(instruction, ip, Receiver::Parent, method, &dest)
            }
            OpCode::CallStatic => {
                let type_name = Self::name(instruction, 0)?;
                let method = Self::name(instruction, 1)?;
                let dest = Self::name(instruction, 2)?;
                self.call(instruction, ip, Receiver::Static(type_name), method, &dest)
            }
            OpCode::Return => {
                let value = self.arg(instruction, 0, ip)?;
                self.add(NodeKind::Return(Some(value)), ip)
            }
            OpCode::PropGet => {
                let name = Self::name(instruction, 0)?;
                let object = self.arg(instruction, 1, ip)?;
                let dest = Self::name(instruction, 2)?;
                let value = self.add(NodeKind::Property { object, name }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::PropSet => {
                let name = Self::name(instruction, 0)?;
                let object = self.arg(instruction, 1, ip)?;
                let target = self.add(NodeKind::Property { object, name }, ip);
                let value = self.arg(instruction, 2, ip)?;
                self.add(NodeKind::Assign { target, value }, ip)
            }
            OpCode::ArrayCreate => {
                let dest = Self::name(instruction, 0)?;
                let size = self.arg(instruction, 1, ip)?;
                let element_type = element_type_of(self.types.type_of(&dest));
                let value = self.add(NodeKind::NewArray { element_type, size }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArrayLength => {
                let dest = Self::name(instruction, 0)?;
                let array = self.arg(instruction, 1, ip)?;
                let value = self.add(NodeKind::Length { array }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArrayGetElement => {
                let dest = Self::name(instruction, 0)?;
                let array = self.arg(instruction, 1, ip)?;
                let index = self.arg(instruction, 2, ip)?;
                let value = self.add(NodeKind::Index { array, index }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArraySetElement => {
                let array = self.arg(instruction, 0, ip)?;
                let index = self.arg(instruction, 1, ip)?;
                let target = self.add(NodeKind::Index { array, index }, ip);
                let value = self.arg(instruction, 2, ip)?;
                self.add(NodeKind::Assign { target, value }, ip)
            }
            OpCode::ArrayFindElement | OpCode::ArrayRFindElement => {
                let (method, start) = if instruction.opcode == OpCode::ArrayFindElement {
                    (ArrayMethod::Find, 0)
                } else {
                    (ArrayMethod::RFind, -1)
                };
                let dest = Self::name(instruction, 1)?;
                let args = self.trimmed_args(instruction, ip, &[2], &[(3, Value::Integer(start))])?;
                let value = self.array_call(instruction, ip, method, args)?;
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArrayFindStruct | OpCode::ArrayRFindStruct => {
                let (method, start) = if instruction.opcode == OpCode::ArrayFindStruct {
                    (ArrayMethod::FindStruct, 0)
                } else {
                    (ArrayMethod::RFindStruct, -1)
                };
                let dest = Self::name(instruction, 1)?;
                let member = Self::name(instruction, 2)?;
                let member = self.add(NodeKind::Literal(Value::String(member)), ip);
                let mut args = vec![member];
                args.extend(self.trimmed_args(instruction, ip, &[3], &[(4, Value::Integer(start))])?);
                let value = self.array_call(instruction, ip, method, args)?;
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArrayGetAllMatchingStructs => {
                let dest = Self::name(instruction, 1)?;
                let member = Self::name(instruction, 2)?;
                let member = self.add(NodeKind::Literal(Value::String(member)), ip);
                let mut args = vec![member];
                args.extend(self.trimmed_args(
                    instruction,
                    ip,
                    &[3],
                    &[(4, Value::Integer(0)), (5, Value::Integer(-1))],
                )?);
                let value =
                    self.array_call(instruction, ip, ArrayMethod::GetMatchingStructs, args)?;
                self.assign_to(&dest, value, ip)
            }
            OpCode::ArrayAdd => {
                let args = self.trimmed_args(instruction, ip, &[1], &[(2, Value::Integer(1))])?;
                self.array_call(instruction, ip, ArrayMethod::Add, args)?
            }
            OpCode::ArrayInsert => {
                let args = self.trimmed_args(instruction, ip, &[1, 2], &[])?;
                self.array_call(instruction, ip, ArrayMethod::Insert, args)?
            }
            OpCode::ArrayRemoveLast => {
                self.array_call(instruction, ip, ArrayMethod::RemoveLast, Vec::new())?
            }
            OpCode::ArrayRemove => {
                let args = self.trimmed_args(instruction, ip, &[1], &[(2, Value::Integer(1))])?;
                self.array_call(instruction, ip, ArrayMethod::Remove, args)?
            }
            OpCode::ArrayClear => {
                self.array_call(instruction, ip, ArrayMethod::Clear, Vec::new())?
            }
            OpCode::Is => {
                let dest = Self::name(instruction, 0)?;
                let value = self.arg(instruction, 1, ip)?;
                let type_name = Self::name(instruction, 2)?;
                let test = self.add(NodeKind::Is { value, type_name }, ip);
                self.assign_to(&dest, test, ip)
            }
            OpCode::StructCreate => {
                let dest = Self::name(instruction, 0)?;
                let type_name = self
                    .types
                    .type_of(&dest)
                    .unwrap_or(VAR_TYPE)
                    .to_string();
                let value = self.add(NodeKind::NewStruct { type_name }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::StructGet => {
                let dest = Self::name(instruction, 0)?;
                let object = self.arg(instruction, 1, ip)?;
                let name = Self::name(instruction, 2)?;
                let value = self.add(NodeKind::Field { object, name }, ip);
                self.assign_to(&dest, value, ip)
            }
            OpCode::StructSet => {
                let object = self.arg(instruction, 0, ip)?;
                let name = Self::name(instruction, 1)?;
                let target = self.add(NodeKind::Field { object, name }, ip);
                let value = self.arg(instruction, 2, ip)?;
                self.add(NodeKind::Assign { target, value }, ip)
            }
            OpCode::LockGuards => self.add(NodeKind::LockGuards(Self::guards(instruction)?), ip),
            OpCode::UnlockGuards => {
                self.add(NodeKind::UnlockGuards(Self::guards(instruction)?), ip)
            }
            OpCode::TryLockGuards => {
                let dest = Self::name(instruction, 0)?;
                let guards = Self::guards(instruction)?;
                let value = self.add(NodeKind::TryLock { guards }, ip);
                self.assign_to(&dest, value, ip)
            }
            other => {
                return Err(malformed_error!(
                    "{} has no statement form",
                    other.mnemonic()
                ))
            }
        };
        Ok(Some(statement))
    }

    fn call(
        &mut self,
        instruction: &Instruction,
        ip: usize,
        receiver: Receiver,
        method: String,
        dest: &str,
    ) -> NodeId {
        let args = instruction
            .varargs
            .iter()
            .map(|value| self.operand(value, ip))
            .collect();
        let call = self.add(
            NodeKind::Call {
                receiver,
                method,
                args,
            },
            ip,
        );
        self.assign_to(dest, call, ip)
    }
}
