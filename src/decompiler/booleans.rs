//! Short-circuit boolean recovery.
//!
//! The compiler lowers `a && b` and `a || b` into a conditional jump around the evaluation
//! of `b`, writing both operands into the same temporary:
//!
//! ```text
//! A:  t = a
//!     jmpf t L        ; jmpt for ||
//! B:  t = b
//! L:  jmpf t ...      ; the consumer
//! ```
//!
//! When `B` is reached only from `A`, contains nothing but `t = b` and continues at `L`,
//! the pattern folds into `t = a && b` (or `a || b`) at the end of `A`, and `B` disappears.
//! If `A` is then the only predecessor of `L`, the two are merged so the consumer's
//! condition can absorb `t` again. Folding repeats until no pattern is left, which builds
//! chains such as `a && b || c` from the inside out.

use crate::decompiler::{
    expressions::ExpressionRebuilder,
    lower::{predecessors, FlowBlocks, FlowExit},
    tree::{BinaryOp, NodeId, NodeKind, Tree, UnaryOp},
};

/// Folds short-circuit patterns in `blocks`; returns the number of folds.
///
/// `len` is the instruction count; patterns that continue at the function end are left
/// alone.
pub fn fold_booleans(
    tree: &mut Tree,
    blocks: &mut FlowBlocks,
    rebuilder: &ExpressionRebuilder,
    len: usize,
) -> usize {
    let mut folds = 0;
    loop {
        let starts: Vec<usize> = blocks.keys().copied().collect();
        let Some(start) = starts
            .into_iter()
            .find(|&start| fold_at(tree, blocks, start, len))
        else {
            break;
        };
        folds += 1;
        log::trace!("folded short-circuit operator at block {}", start);
        rebuilder.rebuild_blocks(tree, blocks);
    }
    folds
}

/// Splits a branch condition into the tested name and whether it was `jmpt`.
fn tested_name(tree: &Tree, condition: NodeId) -> Option<(String, bool)> {
    match tree.kind(condition) {
        NodeKind::Identifier(name) => Some((name.clone(), false)),
        NodeKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => tree.identifier(*operand).map(|name| (name.to_string(), true)),
        _ => None,
    }
}

/// Attempts the fold with `A` at `start`.
fn fold_at(tree: &mut Tree, blocks: &mut FlowBlocks, start: usize, len: usize) -> bool {
    let Some(a) = blocks.get(&start) else {
        return false;
    };
    let FlowExit::Branch { condition, target } = a.exit else {
        return false;
    };
    if target == len {
        return false;
    }
    let Some((name, is_or)) = tested_name(tree, condition) else {
        return false;
    };

    let b_start = a.end;
    let Some(b) = blocks.get(&b_start) else {
        return false;
    };
    if b.exit != FlowExit::Jump(target) || b.statements.len() != 1 {
        return false;
    }
    let b_statement = b.statements[0];
    if !tree
        .assigned_name(b_statement)
        .is_some_and(|assigned| assigned.eq_ignore_ascii_case(&name))
    {
        return false;
    }
    if predecessors(blocks, b_start) != [start] {
        return false;
    }
    let NodeKind::Assign { value: rhs, .. } = *tree.kind(b_statement) else {
        return false;
    };

    let op = if is_or { BinaryOp::Or } else { BinaryOp::And };
    let branch_origins = tree.node(condition).origins.clone();
    let b_origins = tree.subtree_origins(b_statement);
    let a_last = a.statements.last().copied();

    match a_last.filter(|&last| {
        tree.assigned_name(last)
            .is_some_and(|assigned| assigned.eq_ignore_ascii_case(&name))
    }) {
        Some(last) => {
            let NodeKind::Assign { value: lhs, .. } = *tree.kind(last) else {
                return false;
            };
            let combined = tree.add(NodeKind::Binary { op, lhs, rhs });
            tree.add_origins(combined, &branch_origins);
            if let NodeKind::Assign { value, .. } = tree.kind_mut(last) {
                *value = combined;
            }
            tree.add_origins(last, &b_origins);
        }
        None => {
            let lhs = tree.add(NodeKind::Identifier(name.clone()));
            let combined = tree.add(NodeKind::Binary { op, lhs, rhs });
            tree.add_origins(combined, &branch_origins);
            let target_node = tree.add(NodeKind::Identifier(name));
            let assign = tree.add(NodeKind::Assign {
                target: target_node,
                value: combined,
            });
            tree.add_origins(assign, &b_origins);
            if let Some(a) = blocks.get_mut(&start) {
                a.statements.push(assign);
            }
        }
    }

    blocks.remove(&b_start);
    if let Some(a) = blocks.get_mut(&start) {
        a.exit = FlowExit::Jump(target);
    }

    if predecessors(blocks, target) == [start] {
        if let Some(join) = blocks.remove(&target) {
            if let Some(a) = blocks.get_mut(&start) {
                a.statements.extend(join.statements);
                a.end = join.end;
                a.exit = join.exit;
            }
        }
    }
    true
}
