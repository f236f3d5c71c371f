//! Control-flow recovery.
//!
//! Rebuilds `If`, `Else` and `While` from the lowered block graph by recursive descent over
//! address ranges. [`FlowRecoverer::rebuild`] walks the live blocks of `[start, end)` in
//! address order, emitting their statements and interpreting each exit:
//!
//! - A forward branch at block `A` to `t` opens a construct whose first arm is `[A.end, t)`.
//!   The last live block `L` of that arm decides which one:
//!   - `L` jumps back to a header `h <= A.start`: a `While` loop, with the header's
//!     statements repeated at the end of the body
//!   - `L` jumps forward to `d > t`: `If`/`Else`, the else arm being `[t, d)`
//!   - `L` returns and the instruction before `t` is an unreachable `jmp` to `d > t`: also
//!     `If`/`Else`, the compiler's layout for arms that both return
//!   - anything else: a plain `If`
//! - A backward branch is a post-tested loop: the statements since its target are followed
//!   by `While cond` wrapping a copy of them.
//! - A jump must either fall through or skip only dead code; anything else would need a
//!   `goto` and is rejected as [`crate::Error::Unstructured`].
//!
//! Jumps consumed by a construct are rewritten to fall-through before the arms are rebuilt.

use std::collections::HashMap;

use crate::{
    decompiler::{
        lower::{FlowBlock, FlowBlocks, FlowExit},
        tree::{NodeId, NodeKind, Tree},
    },
    pex::{Instruction, OpCode},
    Error, Result,
};

/// Recovers the structured body of one function.
pub struct FlowRecoverer<'a> {
    tree: &'a mut Tree,
    blocks: FlowBlocks,
    instructions: &'a [Instruction],
    function: &'a str,
}

impl<'a> FlowRecoverer<'a> {
    /// Creates a recoverer over lowered `blocks`.
    ///
    /// # Arguments
    ///
    /// * `tree` - Arena holding the block statements
    /// * `blocks` - Lowered blocks, consumed
    /// * `instructions` - The raw instructions, used to spot unreachable jumps
    /// * `function` - Function name for error reports
    pub fn new(
        tree: &'a mut Tree,
        blocks: FlowBlocks,
        instructions: &'a [Instruction],
        function: &'a str,
    ) -> Self {
        FlowRecoverer {
            tree,
            blocks,
            instructions,
            function,
        }
    }

    /// Recovers the whole function and returns its root sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unstructured`] for jump patterns without a structured equivalent.
    pub fn recover(mut self) -> Result<NodeId> {
        let len = self.instructions.len();
        self.rebuild(0, len)
    }

    /// Rebuilds the live blocks of `[start, end)` into a sequence.
    fn rebuild(&mut self, start: usize, end: usize) -> Result<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        let mut emitted: HashMap<usize, usize> = HashMap::new();
        let mut pos = start;

        while let Some(block) = self.next_block(pos, end) {
            emitted.insert(block.start, out.len());
            out.extend(block.statements.iter().copied());
            pos = match block.exit {
                FlowExit::Return => block.end,
                FlowExit::Jump(target) => self.follow_jump(&block, target, end)?,
                FlowExit::Branch { condition, target } if target > block.start => {
                    self.forward_branch(&block, condition, target, end, &mut out, &emitted)?
                }
                FlowExit::Branch { condition, target } => {
                    self.backward_branch(&block, condition, target, &mut out, &emitted)?
                }
            };
        }
        Ok(self.tree.sequence(out))
    }

    fn next_block(&self, pos: usize, end: usize) -> Option<FlowBlock> {
        if pos >= end {
            return None;
        }
        self.blocks
            .range(pos..end)
            .next()
            .map(|(_, block)| block.clone())
    }

    fn last_block(&self, start: usize, end: usize) -> Option<FlowBlock> {
        if start >= end {
            return None;
        }
        self.blocks
            .range(start..end)
            .next_back()
            .map(|(_, block)| block.clone())
    }

    fn fall_through(&mut self, start: usize) {
        if let Some(block) = self.blocks.get_mut(&start) {
            block.exit = FlowExit::Jump(block.end);
        }
    }

    fn unstructured(&self, address: usize, reason: &'static str) -> Error {
        Error::Unstructured {
            function: self.function.to_string(),
            address,
            reason,
        }
    }

    fn follow_jump(&self, block: &FlowBlock, target: usize, end: usize) -> Result<usize> {
        if target == block.end {
            return Ok(block.end);
        }
        if target < block.end {
            return Err(self.unstructured(block.end - 1, "backward jump outside of a loop"));
        }
        let resume = target.min(end);
        if self.next_block(block.end, resume).is_some() {
            return Err(self.unstructured(block.end - 1, "forward jump over reachable code"));
        }
        Ok(resume)
    }

    /// Target of an unreachable `jmp` right before `target`, if there is one.
    fn dead_jump_before(&self, target: usize) -> Option<usize> {
        let ip = target.checked_sub(1)?;
        let instruction = self.instructions.get(ip)?;
        if instruction.opcode != OpCode::Jmp {
            return None;
        }
        let covered = self
            .blocks
            .range(..=ip)
            .next_back()
            .is_some_and(|(_, block)| block.end > ip);
        if covered {
            return None;
        }
        let destination = i64::try_from(ip).ok()? + i64::from(instruction.jump_offset()?);
        usize::try_from(destination).ok().filter(|&d| d > target)
    }

    fn forward_branch(
        &mut self,
        block: &FlowBlock,
        condition: NodeId,
        target: usize,
        end: usize,
        out: &mut Vec<NodeId>,
        emitted: &HashMap<usize, usize>,
    ) -> Result<usize> {
        let ip = block.end - 1;
        if target > end {
            return Err(self.unstructured(ip, "branch leaves the enclosing construct"));
        }

        let arm_start = block.end;
        let Some(last) = self.last_block(arm_start, target) else {
            let then = self.tree.sequence(Vec::new());
            out.push(self.tree.add_at(
                NodeKind::If {
                    condition,
                    then,
                    otherwise: None,
                },
                ip,
            ));
            return Ok(target);
        };

        match last.exit {
            FlowExit::Jump(header) if header <= block.start => {
                let header_index = *emitted.get(&header).ok_or_else(|| {
                    self.unstructured(last.end - 1, "loop back edge into an enclosing construct")
                })?;
                self.fall_through(last.start);
                let body = self.rebuild(arm_start, target)?;
                let repeated: Vec<NodeId> = out[header_index..].to_vec();
                for statement in repeated {
                    let copy = self.tree.deep_clone(statement);
                    if let Some(statements) = self.tree.statements_mut(body) {
                        statements.push(copy);
                    }
                }
                log::trace!("while loop at {} with header at {}", ip, header);
                out.push(
                    self.tree
                        .add_at(NodeKind::While { condition, body }, ip),
                );
                Ok(target)
            }
            FlowExit::Jump(join) if join > target && join <= end => {
                self.fall_through(last.start);
                let then = self.rebuild(arm_start, target)?;
                let otherwise = self.rebuild(target, join)?;
                out.push(self.tree.add_at(
                    NodeKind::If {
                        condition,
                        then,
                        otherwise: Some(otherwise),
                    },
                    ip,
                ));
                Ok(join)
            }
            FlowExit::Return => match self.dead_jump_before(target).filter(|&join| join <= end) {
                Some(join) => {
                    let then = self.rebuild(arm_start, target)?;
                    let otherwise = self.rebuild(target, join)?;
                    out.push(self.tree.add_at(
                        NodeKind::If {
                            condition,
                            then,
                            otherwise: Some(otherwise),
                        },
                        ip,
                    ));
                    Ok(join)
                }
                None => self.plain_if(condition, arm_start, target, ip, out),
            },
            _ => self.plain_if(condition, arm_start, target, ip, out),
        }
    }

    fn plain_if(
        &mut self,
        condition: NodeId,
        arm_start: usize,
        target: usize,
        ip: usize,
        out: &mut Vec<NodeId>,
    ) -> Result<usize> {
        let then = self.rebuild(arm_start, target)?;
        out.push(self.tree.add_at(
            NodeKind::If {
                condition,
                then,
                otherwise: None,
            },
            ip,
        ));
        Ok(target)
    }

    fn backward_branch(
        &mut self,
        block: &FlowBlock,
        condition: NodeId,
        target: usize,
        out: &mut Vec<NodeId>,
        emitted: &HashMap<usize, usize>,
    ) -> Result<usize> {
        let ip = block.end - 1;
        let body_index = *emitted.get(&target).ok_or_else(|| {
            self.unstructured(ip, "conditional jump back into an enclosing construct")
        })?;

        let copies: Vec<NodeId> = out[body_index..]
            .to_vec()
            .into_iter()
            .map(|statement| self.tree.deep_clone(statement))
            .collect();
        let body = self.tree.sequence(copies);
        let condition = self.tree.negate(condition);
        log::trace!("post-tested loop at {} back to {}", ip, target);
        out.push(self.tree.add_at(NodeKind::While { condition, body }, ip));
        Ok(block.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompiler::{
            blocks::BlockGraph, booleans::fold_booleans, expressions::ExpressionRebuilder,
            lower::lower, types::TypeTable,
        },
        pex::{Function, FunctionAssembler, Object, OpCode, Value},
    };

    fn recover(build: impl Fn(&mut FunctionAssembler)) -> Result<(Tree, NodeId, BlockGraph)> {
        let mut asm = FunctionAssembler::new();
        build(&mut asm);
        let (instructions, _) = asm.finish()?;
        let function = Function::new("F", "None")
            .with_local("i", "Int")
            .with_instructions(instructions);
        let types = TypeTable::infer(&Object::new("A"), &function);
        let graph = BlockGraph::build(&function.instructions)?;
        let mut tree = Tree::new();
        let mut blocks = lower(&mut tree, &function.instructions, &graph, &types)?;
        let rebuilder = ExpressionRebuilder::new(&function);
        rebuilder.rebuild_blocks(&mut tree, &mut blocks);
        fold_booleans(&mut tree, &mut blocks, &rebuilder, function.instructions.len());
        let root = FlowRecoverer::new(&mut tree, blocks, &function.instructions, "F").recover()?;
        Ok((tree, root, graph))
    }

    fn kinds(tree: &Tree, sequence: NodeId) -> Vec<&'static str> {
        tree.statements(sequence)
            .iter()
            .map(|&id| match tree.kind(id) {
                NodeKind::If { .. } => "If",
                NodeKind::While { .. } => "While",
                NodeKind::Return(_) => "Return",
                NodeKind::Assign { .. } => "Assign",
                NodeKind::Call { .. } => "Call",
                _ => "Other",
            })
            .collect()
    }

    #[test]
    fn if_arms_match_block_successors() {
        let (tree, root, graph) = recover(|asm| {
            asm.jmpf("bReady", "skip").unwrap();
            asm.call_method("Foo", "self", None, vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![]).unwrap();
            asm.label("skip").unwrap();
            asm.ret(Value::None).unwrap();
        })
        .unwrap();
        assert_eq!(kinds(&tree, root), ["If", "Return"]);

        // The entry branches to the then arm (fall-through) and to the join.
        let successors = graph.block(0).unwrap().successors();
        assert_eq!(successors, [1, 3]);

        let NodeKind::If { then, otherwise, .. } = tree.kind(tree.statements(root)[0]) else {
            unreachable!();
        };
        assert!(otherwise.is_none());
        let arm_origins = tree.subtree_origins(*then);
        assert_eq!(arm_origins.iter().copied().collect::<Vec<_>>(), [1, 2]);
        let join = tree.statements(root)[1];
        assert_eq!(tree.node(join).origins.iter().next(), Some(&3));
    }

    #[test]
    fn if_else() {
        let (tree, root, _) = recover(|asm| {
            asm.jmpf("bReady", "else").unwrap();
            asm.call_method("Foo", "self", None, vec![]).unwrap();
            asm.jmp("end").unwrap();
            asm.label("else").unwrap();
            asm.call_method("Bar", "self", None, vec![]).unwrap();
            asm.label("end").unwrap();
            asm.ret(Value::None).unwrap();
        })
        .unwrap();
        assert_eq!(kinds(&tree, root), ["If", "Return"]);
        let NodeKind::If { then, otherwise, .. } = tree.kind(tree.statements(root)[0]) else {
            unreachable!();
        };
        assert_eq!(kinds(&tree, *then), ["Call"]);
        assert_eq!(kinds(&tree, otherwise.unwrap()), ["Call"]);
    }

    #[test]
    fn returning_arms_use_the_dead_jump() {
        let (tree, root, _) = recover(|asm| {
            asm.jmpf("bReady", "else").unwrap();
            asm.ret(1).unwrap();
            asm.jmp("end").unwrap();
            asm.label("else").unwrap();
            asm.ret(2).unwrap();
            asm.label("end").unwrap();
            asm.ret(Value::None).unwrap();
        })
        .unwrap();
        let NodeKind::If { otherwise, .. } = tree.kind(tree.statements(root)[0]) else {
            panic!("expected If");
        };
        assert!(otherwise.is_some());
    }

    #[test]
    fn while_loop() {
        let (tree, root, _) = recover(|asm| {
            asm.assign("i", 0).unwrap();
            asm.label("top").unwrap();
            asm.binary(OpCode::CmpLt, "::temp0", "i", 10).unwrap();
            asm.jmpf("::temp0", "done").unwrap();
            asm.binary(OpCode::Iadd, "i", "i", 1).unwrap();
            asm.jmp("top").unwrap();
            asm.label("done").unwrap();
            asm.ret(Value::None).unwrap();
        })
        .unwrap();
        assert_eq!(kinds(&tree, root), ["Assign", "While", "Return"]);
        let NodeKind::While { condition, body } = tree.kind(tree.statements(root)[1]) else {
            unreachable!();
        };
        assert!(matches!(tree.kind(*condition), NodeKind::Binary { .. }));
        assert_eq!(kinds(&tree, *body), ["Assign"]);
    }

    #[test]
    fn post_tested_loop() {
        let (tree, root, _) = recover(|asm| {
            asm.label("top").unwrap();
            asm.call_method("Foo", "self", None, vec![]).unwrap();
            asm.call_method("Step", "self", Some("::temp0"), vec![]).unwrap();
            asm.jmpt("::temp0", "top").unwrap();
            asm.ret(Value::None).unwrap();
        })
        .unwrap();
        assert_eq!(kinds(&tree, root), ["Call", "While", "Return"]);
        let NodeKind::While { condition, body } = tree.kind(tree.statements(root)[1]) else {
            unreachable!();
        };
        // `jmpt Step() top` keeps looping while the call returns true.
        assert!(matches!(tree.kind(*condition), NodeKind::Call { method, .. } if method == "Step"));
        assert_eq!(kinds(&tree, *body), ["Call"]);
    }

    #[test]
    fn goto_is_unstructured() {
        let result = recover(|asm| {
            asm.jmp("later").unwrap();
            asm.label("back").unwrap();
            asm.call_method("Foo", "self", None, vec![]).unwrap();
            asm.ret(Value::None).unwrap();
            asm.label("later").unwrap();
            asm.jmp("back").unwrap();
        });
        assert!(matches!(result, Err(Error::Unstructured { .. })));
    }
}
