//! Local tidying of the structured tree.
//!
//! [`TreeCleaner`] removes what the earlier stages leave behind and rewrites a few shapes
//! into the form a programmer would have written:
//!
//! - `Return None` becomes a bare `Return` in functions without a return value, and a bare
//!   `Return` closing the function body is dropped
//! - assignments to temporaries nobody reads are removed, keeping the call if the value is
//!   one
//! - an empty `Else` disappears, an empty `If` arm with a non-empty `Else` is flipped, and an
//!   `If` with nothing in either arm is removed or reduced to its call
//! - `x = x + y` becomes `x += y` for the arithmetic operators
//! - `!(a == b)` becomes `a != b`, and `!!x` conditions lose both negations
//! - `If c ... t = a Else ... t = b EndIf` followed by `Return t` returns from each arm
//!
//! The pass is run until it reports no change.

use crate::{
    decompiler::{
        guards::bodies,
        pass::TreePass,
        tree::{BinaryOp, NodeId, NodeKind, Tree, UnaryOp},
    },
    pex::is_temp,
    Result,
};

/// What happened to one statement.
enum Cleaned {
    Keep,
    Changed,
    Remove,
    Replace(NodeId),
}

/// Tidying pass over the structured tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeCleaner {
    returns_none: bool,
}

impl TreeCleaner {
    /// Creates the pass for a function whose return type is `None` if `returns_none`.
    #[must_use]
    pub fn new(returns_none: bool) -> Self {
        TreeCleaner { returns_none }
    }

    fn clean_sequence(&self, tree: &mut Tree, root: NodeId, sequence: NodeId) -> bool {
        let mut changed = false;
        let statements = tree.statements(sequence).to_vec();
        let mut kept = Vec::with_capacity(statements.len());

        for statement in statements {
            for body in bodies(tree, statement) {
                changed |= self.clean_sequence(tree, root, body);
            }
            match self.clean_statement(tree, root, statement) {
                Cleaned::Keep => kept.push(statement),
                Cleaned::Changed => {
                    kept.push(statement);
                    changed = true;
                }
                Cleaned::Remove => changed = true,
                Cleaned::Replace(replacement) => {
                    kept.push(replacement);
                    changed = true;
                }
            }
        }

        changed |= sink_returns(tree, root, &mut kept);
        if let Some(slot) = tree.statements_mut(sequence) {
            *slot = kept;
        }
        changed
    }

    fn clean_statement(&self, tree: &mut Tree, root: NodeId, statement: NodeId) -> Cleaned {
        match *tree.kind(statement) {
            NodeKind::Return(Some(value)) if self.returns_none && tree.is_none_literal(value) => {
                tree.set(statement, NodeKind::Return(None));
                Cleaned::Changed
            }
            NodeKind::Assign { target, value } => clean_assignment(tree, root, statement, target, value),
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => clean_if(tree, statement, condition, then, otherwise),
            _ => Cleaned::Keep,
        }
    }
}

impl TreePass for TreeCleaner {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn description(&self) -> &'static str {
        "Removes dead temporaries and empty branches and tidies returns and operators"
    }

    fn run(&mut self, tree: &mut Tree, root: NodeId) -> Result<bool> {
        let mut changed = self.clean_sequence(tree, root, root);
        changed |= simplify_negations(tree, root);
        if self.returns_none {
            changed |= drop_trailing_return(tree, root);
        }
        Ok(changed)
    }
}

fn clean_assignment(
    tree: &mut Tree,
    root: NodeId,
    statement: NodeId,
    target: NodeId,
    value: NodeId,
) -> Cleaned {
    let Some(name) = tree.identifier(target).map(str::to_string) else {
        return Cleaned::Keep;
    };

    if is_temp(&name) {
        if tree.reads(root, &name) > 0 {
            return Cleaned::Keep;
        }
        if !tree.has_side_effect(value) {
            return Cleaned::Remove;
        }
        if matches!(
            tree.kind(value),
            NodeKind::Call { .. } | NodeKind::ArrayCall { .. }
        ) {
            let origins = tree.node(statement).origins.clone();
            tree.add_origins(value, &origins);
            return Cleaned::Replace(value);
        }
        return Cleaned::Keep;
    }

    if let NodeKind::Binary { op, lhs, rhs } = *tree.kind(value) {
        let same_target = tree
            .identifier(lhs)
            .is_some_and(|operand| operand.eq_ignore_ascii_case(&name));
        if op.is_arithmetic() && same_target {
            let origins = tree.node(value).origins.clone();
            tree.set(
                statement,
                NodeKind::CompoundAssign {
                    op,
                    target,
                    value: rhs,
                },
            );
            tree.add_origins(statement, &origins);
            return Cleaned::Changed;
        }
    }
    Cleaned::Keep
}

fn clean_if(
    tree: &mut Tree,
    statement: NodeId,
    condition: NodeId,
    then: NodeId,
    otherwise: Option<NodeId>,
) -> Cleaned {
    let then_empty = tree.statements(then).is_empty();
    match otherwise {
        Some(otherwise) if tree.statements(otherwise).is_empty() => {
            tree.set(
                statement,
                NodeKind::If {
                    condition,
                    then,
                    otherwise: None,
                },
            );
            Cleaned::Changed
        }
        Some(otherwise) if then_empty => {
            let condition = tree.negate(condition);
            tree.set(
                statement,
                NodeKind::If {
                    condition,
                    then: otherwise,
                    otherwise: None,
                },
            );
            Cleaned::Changed
        }
        None if then_empty => {
            if !tree.has_side_effect(condition) {
                Cleaned::Remove
            } else if matches!(tree.kind(condition), NodeKind::Call { .. }) {
                let origins = tree.node(statement).origins.clone();
                tree.add_origins(condition, &origins);
                Cleaned::Replace(condition)
            } else {
                Cleaned::Keep
            }
        }
        _ => Cleaned::Keep,
    }
}

/// Value assigned to `name` by the last statement of `sequence`.
fn trailing_assignment(tree: &Tree, sequence: NodeId, name: &str) -> Option<(NodeId, NodeId)> {
    let last = *tree.statements(sequence).last()?;
    match *tree.kind(last) {
        NodeKind::Assign { target, value }
            if tree
                .identifier(target)
                .is_some_and(|target| target.eq_ignore_ascii_case(name)) =>
        {
            Some((last, value))
        }
        _ => None,
    }
}

/// Collects the assignments to `name` that end every path through `sequence`.
///
/// A sequence ending in an `If` with an `Else` contributes the assignments of both arms, so
/// `ElseIf` chains are followed to their last arm.
fn arm_assignments(
    tree: &Tree,
    sequence: NodeId,
    name: &str,
    out: &mut Vec<(NodeId, NodeId)>,
) -> Option<()> {
    if let Some(assignment) = trailing_assignment(tree, sequence, name) {
        out.push(assignment);
        return Some(());
    }
    let last = *tree.statements(sequence).last()?;
    branch_assignments(tree, last, name, out)
}

fn branch_assignments(
    tree: &Tree,
    branch: NodeId,
    name: &str,
    out: &mut Vec<(NodeId, NodeId)>,
) -> Option<()> {
    let NodeKind::If {
        then,
        otherwise: Some(otherwise),
        ..
    } = *tree.kind(branch)
    else {
        return None;
    };
    arm_assignments(tree, then, name, out)?;
    arm_assignments(tree, otherwise, name, out)
}

/// The arm assignments that `ret` can be moved into, if every arm of `branch` ends with one.
fn sinkable_return(
    tree: &Tree,
    root: NodeId,
    branch: NodeId,
    ret: NodeId,
) -> Option<Vec<(NodeId, NodeId)>> {
    let NodeKind::Return(Some(returned)) = *tree.kind(ret) else {
        return None;
    };
    let name = tree.identifier(returned)?;
    if !is_temp(name) || tree.reads(root, name) != 1 {
        return None;
    }
    let mut assignments = Vec::new();
    branch_assignments(tree, branch, name, &mut assignments)?;
    Some(assignments)
}

/// Moves `Return t` into every arm of an `If`/`Else` chain that ends by assigning `t`.
fn sink_returns(tree: &mut Tree, root: NodeId, statements: &mut Vec<NodeId>) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index + 1 < statements.len() {
        let (branch, ret) = (statements[index], statements[index + 1]);
        let sunk = sinkable_return(tree, root, branch, ret);

        if let Some(assignments) = sunk {
            for (assignment, value) in assignments {
                tree.set(assignment, NodeKind::Return(Some(value)));
            }
            statements.remove(index + 1);
            changed = true;
        }
        index += 1;
    }
    changed
}

/// Rewrites `!(a == b)` into `a != b` everywhere and drops `!!` from conditions.
fn simplify_negations(tree: &mut Tree, root: NodeId) -> bool {
    let mut nodes = Vec::new();
    tree.walk(root, &mut |id| nodes.push(id));

    let mut changed = false;
    for id in nodes {
        match *tree.kind(id) {
            NodeKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                if let NodeKind::Binary {
                    op: BinaryOp::Eq,
                    lhs,
                    rhs,
                } = *tree.kind(operand)
                {
                    let origins = tree.node(operand).origins.clone();
                    tree.set(
                        id,
                        NodeKind::Binary {
                            op: BinaryOp::Ne,
                            lhs,
                            rhs,
                        },
                    );
                    tree.add_origins(id, &origins);
                    changed = true;
                }
            }
            NodeKind::If { condition, .. } | NodeKind::While { condition, .. } => {
                if let Some(inner) = double_negation(tree, condition) {
                    match tree.kind_mut(id) {
                        NodeKind::If { condition, .. } | NodeKind::While { condition, .. } => {
                            *condition = inner;
                        }
                        _ => {}
                    }
                    changed = true;
                }
            }
            _ => {}
        }
    }
    changed
}

fn double_negation(tree: &Tree, condition: NodeId) -> Option<NodeId> {
    let NodeKind::Unary {
        op: UnaryOp::Not,
        operand,
    } = *tree.kind(condition)
    else {
        return None;
    };
    match *tree.kind(operand) {
        NodeKind::Unary {
            op: UnaryOp::Not,
            operand: inner,
        } => Some(inner),
        _ => None,
    }
}

fn drop_trailing_return(tree: &mut Tree, root: NodeId) -> bool {
    let Some(&last) = tree.statements(root).last() else {
        return false;
    };
    if !matches!(tree.kind(last), NodeKind::Return(None)) {
        return false;
    }
    if let Some(statements) = tree.statements_mut(root) {
        statements.pop();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompiler::{pass::run_until_stable, tree::Receiver},
        pex::Value,
    };

    fn ident(tree: &mut Tree, name: &str) -> NodeId {
        tree.add(NodeKind::Identifier(name.to_string()))
    }

    fn literal(tree: &mut Tree, value: Value) -> NodeId {
        tree.add(NodeKind::Literal(value))
    }

    fn call(tree: &mut Tree, method: &str) -> NodeId {
        tree.add(NodeKind::Call {
            receiver: Receiver::SelfObject,
            method: method.to_string(),
            args: Vec::new(),
        })
    }

    fn assign(tree: &mut Tree, name: &str, value: NodeId) -> NodeId {
        let target = ident(tree, name);
        tree.add(NodeKind::Assign { target, value })
    }

    fn clean(tree: &mut Tree, root: NodeId, returns_none: bool) {
        run_until_stable(&mut TreeCleaner::new(returns_none), tree, root).unwrap();
    }

    #[test]
    fn returns_in_none_functions() {
        let mut tree = Tree::new();
        let none = literal(&mut tree, Value::None);
        let early = tree.add(NodeKind::Return(Some(none)));
        let condition = ident(&mut tree, "bDone");
        let then = tree.sequence(vec![early]);
        let branch = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: None,
        });
        let none = literal(&mut tree, Value::None);
        let last = tree.add(NodeKind::Return(Some(none)));
        let root = tree.sequence(vec![branch, last]);

        clean(&mut tree, root, true);
        assert_eq!(tree.statements(root), [branch]);
        assert_eq!(tree.kind(early), &NodeKind::Return(None));
    }

    #[test]
    fn dead_temporaries() {
        let mut tree = Tree::new();
        let five = literal(&mut tree, Value::Integer(5));
        let pure = assign(&mut tree, "::temp0", five);
        let foo = call(&mut tree, "Foo");
        let effect = assign(&mut tree, "::temp1", foo);
        let root = tree.sequence(vec![pure, effect]);

        clean(&mut tree, root, true);
        assert_eq!(tree.statements(root), [foo]);
    }

    #[test]
    fn empty_arms() {
        let mut tree = Tree::new();
        let condition = ident(&mut tree, "bReady");
        let then = tree.sequence(Vec::new());
        let foo = call(&mut tree, "Foo");
        let otherwise = tree.sequence(vec![foo]);
        let flipped = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: Some(otherwise),
        });
        let check = call(&mut tree, "Check");
        let empty_then = tree.sequence(Vec::new());
        let empty_else = tree.sequence(Vec::new());
        let reduced = tree.add(NodeKind::If {
            condition: check,
            then: empty_then,
            otherwise: Some(empty_else),
        });
        let root = tree.sequence(vec![flipped, reduced]);

        clean(&mut tree, root, true);
        assert_eq!(tree.statements(root), [flipped, check]);
        let NodeKind::If {
            condition,
            then,
            otherwise,
        } = *tree.kind(flipped)
        else {
            unreachable!();
        };
        assert!(otherwise.is_none());
        assert_eq!(tree.statements(then), [foo]);
        assert!(matches!(
            tree.kind(condition),
            NodeKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn compound_assignment() {
        let mut tree = Tree::new();
        let lhs = ident(&mut tree, "iCount");
        let rhs = literal(&mut tree, Value::Integer(1));
        let sum = tree.add(NodeKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        });
        let statement = assign(&mut tree, "ICOUNT", sum);
        let root = tree.sequence(vec![statement]);

        clean(&mut tree, root, false);
        assert!(matches!(
            tree.kind(statement),
            NodeKind::CompoundAssign {
                op: BinaryOp::Add,
                value,
                ..
            } if *value == rhs
        ));
    }

    #[test]
    fn negated_equality() {
        let mut tree = Tree::new();
        let lhs = ident(&mut tree, "a");
        let rhs = ident(&mut tree, "b");
        let eq = tree.add(NodeKind::Binary {
            op: BinaryOp::Eq,
            lhs,
            rhs,
        });
        let not = tree.add(NodeKind::Unary {
            op: UnaryOp::Not,
            operand: eq,
        });
        let ret = tree.add(NodeKind::Return(Some(not)));
        let root = tree.sequence(vec![ret]);

        clean(&mut tree, root, false);
        assert!(matches!(
            tree.kind(not),
            NodeKind::Binary {
                op: BinaryOp::Ne,
                ..
            }
        ));
    }

    #[test]
    fn return_sinks_into_both_arms() {
        let mut tree = Tree::new();
        let condition = ident(&mut tree, "bFlag");
        let a = literal(&mut tree, Value::str("a"));
        let then_assign = assign(&mut tree, "::temp0", a);
        let then = tree.sequence(vec![then_assign]);
        let b = literal(&mut tree, Value::str("b"));
        let else_assign = assign(&mut tree, "::temp0", b);
        let otherwise = tree.sequence(vec![else_assign]);
        let branch = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: Some(otherwise),
        });
        let returned = ident(&mut tree, "::temp0");
        let ret = tree.add(NodeKind::Return(Some(returned)));
        let root = tree.sequence(vec![branch, ret]);

        clean(&mut tree, root, false);
        assert_eq!(tree.statements(root), [branch]);
        assert_eq!(tree.kind(then_assign), &NodeKind::Return(Some(a)));
        assert_eq!(tree.kind(else_assign), &NodeKind::Return(Some(b)));
    }

    #[test]
    fn return_sinks_through_else_if_chains() {
        let mut tree = Tree::new();
        let arms: Vec<(NodeId, NodeId)> = ["a", "b", "c"]
            .into_iter()
            .map(|text| {
                let value = literal(&mut tree, Value::str(text));
                (assign(&mut tree, "::temp0", value), value)
            })
            .collect();
        let inner_condition = ident(&mut tree, "b");
        let inner_then = tree.sequence(vec![arms[1].0]);
        let inner_else = tree.sequence(vec![arms[2].0]);
        let inner = tree.add(NodeKind::If {
            condition: inner_condition,
            then: inner_then,
            otherwise: Some(inner_else),
        });
        let condition = ident(&mut tree, "a");
        let then = tree.sequence(vec![arms[0].0]);
        let otherwise = tree.sequence(vec![inner]);
        let branch = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: Some(otherwise),
        });
        let returned = ident(&mut tree, "::temp0");
        let ret = tree.add(NodeKind::Return(Some(returned)));
        let root = tree.sequence(vec![branch, ret]);

        clean(&mut tree, root, false);
        assert_eq!(tree.statements(root), [branch]);
        for (assignment, value) in arms {
            assert_eq!(tree.kind(assignment), &NodeKind::Return(Some(value)));
        }
    }

    #[test]
    fn return_stays_when_an_arm_does_not_assign() {
        let mut tree = Tree::new();
        let a = literal(&mut tree, Value::str("a"));
        let then_assign = assign(&mut tree, "::temp0", a);
        let inner_condition = ident(&mut tree, "b");
        let foo = call(&mut tree, "Foo");
        let inner_then = tree.sequence(vec![foo]);
        let inner = tree.add(NodeKind::If {
            condition: inner_condition,
            then: inner_then,
            otherwise: None,
        });
        let condition = ident(&mut tree, "a");
        let then = tree.sequence(vec![then_assign]);
        let otherwise = tree.sequence(vec![inner]);
        let branch = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: Some(otherwise),
        });
        let returned = ident(&mut tree, "::temp0");
        let ret = tree.add(NodeKind::Return(Some(returned)));
        let root = tree.sequence(vec![branch, ret]);

        clean(&mut tree, root, false);
        assert_eq!(tree.statements(root), [branch, ret]);
        assert!(matches!(tree.kind(then_assign), NodeKind::Assign { .. }));
    }
}
