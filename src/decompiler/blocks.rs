//! Basic block construction.
//!
//! Splits a function's instruction list at jump targets and after every jump or return,
//! derives the exit of each block and prunes blocks that cannot be reached from the entry.
//!
//! # Block Boundaries
//!
//! An instruction starts a new block if it is the first instruction, the target of a jump,
//! or follows a `jmp`, `jmpt`, `jmpf` or `return`. A jump target equal to the instruction
//! count denotes the function end and starts no block.
//!
//! # Exits
//!
//! Conditional jumps are normalized so that [`BlockExit::Branch`] always describes the
//! condition under which the fall-through successor runs: `jmpf c` falls through when `c`
//! holds, `jmpt c` when it does not.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    pex::{Instruction, OpCode, Value},
    Result,
};

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockExit {
    /// The block ends in `return`
    Return,
    /// Unconditional transfer, either a `jmp` or falling through to `target`
    Jump(usize),
    /// Conditional transfer to `target`; falls through to the block end otherwise
    Branch {
        /// The tested operand
        condition: Value,
        /// `true` if the fall-through runs when `condition` is false (`jmpt`)
        negated: bool,
        /// Address of the taken successor
        target: usize,
    },
}

/// A straight-line run of instructions `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// First instruction
    pub start: usize,
    /// One past the last instruction
    pub end: usize,
    /// Exit
    pub exit: BlockExit,
}

impl BasicBlock {
    /// Successor addresses; the function end (`len`) is included when reached.
    #[must_use]
    pub fn successors(&self) -> Vec<usize> {
        match &self.exit {
            BlockExit::Return => Vec::new(),
            BlockExit::Jump(target) => vec![*target],
            BlockExit::Branch { target, .. } => vec![self.end, *target],
        }
    }
}

/// Reachable blocks of one function keyed by start address.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    /// Blocks by start address
    pub blocks: BTreeMap<usize, BasicBlock>,
    /// Instruction count, the address of the function end
    pub len: usize,
}

impl BlockGraph {
    /// Builds the block graph of `instructions`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if an instruction has the wrong operand count or a
    /// jump target lies outside `[0, len]`.
    pub fn build(instructions: &[Instruction]) -> Result<Self> {
        let len = instructions.len();
        let mut leaders = BTreeSet::new();
        if len > 0 {
            leaders.insert(0);
        }

        let mut targets = Vec::with_capacity(len);
        for (ip, instruction) in instructions.iter().enumerate() {
            instruction.validate()?;
            let target = jump_target(ip, instruction, len)?;
            if let Some(target) = target {
                if target < len {
                    leaders.insert(target);
                }
            }
            if instruction.opcode.is_terminator() && ip + 1 < len {
                leaders.insert(ip + 1);
            }
            targets.push(target);
        }

        let starts: Vec<usize> = leaders.into_iter().collect();
        let mut blocks = BTreeMap::new();
        for (index, &start) in starts.iter().enumerate() {
            let end = starts.get(index + 1).copied().unwrap_or(len);
            let last = end - 1;
            let instruction = &instructions[last];
            let exit = match (instruction.opcode, targets[last]) {
                (OpCode::Return, _) => BlockExit::Return,
                (OpCode::Jmp, Some(target)) => BlockExit::Jump(target),
                (OpCode::Jmpt | OpCode::Jmpf, Some(target)) if target == end => {
                    BlockExit::Jump(target)
                }
                (opcode @ (OpCode::Jmpt | OpCode::Jmpf), Some(target)) => BlockExit::Branch {
                    condition: instruction.arg(0)?.clone(),
                    negated: opcode == OpCode::Jmpt,
                    target,
                },
                _ => BlockExit::Jump(end),
            };
            blocks.insert(start, BasicBlock { start, end, exit });
        }

        let mut graph = BlockGraph { blocks, len };
        graph.prune();
        Ok(graph)
    }

    /// Number of reachable blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the function has no reachable code.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the block starting at `start`.
    #[must_use]
    pub fn block(&self, start: usize) -> Option<&BasicBlock> {
        self.blocks.get(&start)
    }

    /// Start addresses of the blocks that transfer control to `start`.
    #[must_use]
    pub fn predecessors(&self, start: usize) -> Vec<usize> {
        self.blocks
            .values()
            .filter(|block| block.successors().contains(&start))
            .map(|block| block.start)
            .collect()
    }

    fn prune(&mut self) {
        let mut reachable = BTreeSet::new();
        let mut stack: Vec<usize> = self.blocks.keys().next().copied().into_iter().collect();
        while let Some(start) = stack.pop() {
            if !reachable.insert(start) {
                continue;
            }
            if let Some(block) = self.blocks.get(&start) {
                stack.extend(
                    block
                        .successors()
                        .into_iter()
                        .filter(|next| self.blocks.contains_key(next)),
                );
            }
        }
        self.blocks.retain(|start, _| reachable.contains(start));
    }
}

/// Absolute target of a jump instruction.
fn jump_target(ip: usize, instruction: &Instruction, len: usize) -> Result<Option<usize>> {
    let Some(offset) = instruction.jump_offset() else {
        return Ok(None);
    };
    let out_of_range = |target: i64| {
        malformed_error!(
            "{} at {} targets {} outside of [0, {}]",
            instruction.opcode.mnemonic(),
            ip,
            target,
            len
        )
    };

    let base = i64::try_from(ip).map_err(|_| malformed_error!("Instruction index {} too large", ip))?;
    let target = base + i64::from(offset);
    let target_ip = usize::try_from(target).map_err(|_| out_of_range(target))?;
    if target_ip > len {
        return Err(out_of_range(target));
    }
    Ok(Some(target_ip))
}
