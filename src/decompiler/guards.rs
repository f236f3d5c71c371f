//! Guard statement recovery.
//!
//! Lowering leaves `LockGuards` and `UnlockGuards` as flat statements. This pass pairs an
//! acquire with the first release of the same guard set that follows it in the same
//! sequence and wraps everything between them in a `Guard` block. Releases of that set
//! nested inside the body belong to early exits and are dropped with it. When the sequence
//! holds no matching release but a nested one exists, the rest of the sequence becomes the
//! body. An acquire that cannot be paired stays where it is and is rendered as a warning.
//!
//! An `If` testing `TryLock(...)` directly becomes a `TryGuard`.
//!
//! Guard sets compare case-insensitively and regardless of order.

use crate::{
    decompiler::{
        pass::TreePass,
        tree::{NodeId, NodeKind, Tree},
    },
    Result,
};

/// Lifts guard acquire/release pairs into `Guard` and `TryGuard` blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardLifter;

impl GuardLifter {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        GuardLifter
    }
}

impl TreePass for GuardLifter {
    fn name(&self) -> &'static str {
        "guard-lift"
    }

    fn description(&self) -> &'static str {
        "Pairs LockGuards/UnlockGuards into Guard blocks and TryLock tests into TryGuard blocks"
    }

    fn run(&mut self, tree: &mut Tree, root: NodeId) -> Result<bool> {
        Ok(lift_sequence(tree, root))
    }
}

/// Normalized form of a guard set for comparison.
fn guard_key(guards: &[String]) -> Vec<String> {
    let mut key: Vec<String> = guards.iter().map(|g| g.to_ascii_lowercase()).collect();
    key.sort();
    key.dedup();
    key
}

fn same_guards(a: &[String], b: &[String]) -> bool {
    guard_key(a) == guard_key(b)
}

/// Body sequences owned by a statement.
pub(crate) fn bodies(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    match tree.kind(id) {
        NodeKind::If {
            then, otherwise, ..
        } => std::iter::once(*then).chain(*otherwise).collect(),
        NodeKind::While { body, .. } | NodeKind::Guard { body, .. } => vec![*body],
        NodeKind::TryGuard {
            body, otherwise, ..
        } => std::iter::once(*body).chain(*otherwise).collect(),
        _ => Vec::new(),
    }
}

fn is_unlock_of(tree: &Tree, id: NodeId, guards: &[String]) -> bool {
    matches!(tree.kind(id), NodeKind::UnlockGuards(released) if same_guards(released, guards))
}

fn contains_unlock(tree: &Tree, statements: &[NodeId], guards: &[String]) -> bool {
    statements.iter().any(|&statement| {
        is_unlock_of(tree, statement, guards)
            || bodies(tree, statement)
                .into_iter()
                .any(|body| contains_unlock(tree, tree.statements(body), guards))
    })
}

/// Removes every release of `guards` from `sequence` and the bodies below it.
fn strip_unlocks(tree: &mut Tree, sequence: NodeId, guards: &[String]) {
    let statements: Vec<NodeId> = tree.statements(sequence).to_vec();
    let kept: Vec<NodeId> = statements
        .iter()
        .copied()
        .filter(|&statement| !is_unlock_of(tree, statement, guards))
        .collect();
    for &statement in &kept {
        for body in bodies(tree, statement) {
            strip_unlocks(tree, body, guards);
        }
    }
    if kept.len() != statements.len() {
        if let Some(slot) = tree.statements_mut(sequence) {
            *slot = kept;
        }
    }
}

fn lift_sequence(tree: &mut Tree, sequence: NodeId) -> bool {
    let mut changed = false;

    for statement in tree.statements(sequence).to_vec() {
        for body in bodies(tree, statement) {
            changed |= lift_sequence(tree, body);
        }
        changed |= lift_try_guard(tree, statement);
    }

    let mut index = 0;
    while index < tree.statements(sequence).len() {
        let statements = tree.statements(sequence).to_vec();
        let lock = statements[index];
        let NodeKind::LockGuards(guards) = tree.kind(lock).clone() else {
            index += 1;
            continue;
        };

        let rest = &statements[index + 1..];
        let (body_statements, consumed) = match rest
            .iter()
            .position(|&statement| is_unlock_of(tree, statement, &guards))
        {
            Some(offset) => (rest[..offset].to_vec(), offset + 2),
            None if contains_unlock(tree, rest, &guards) => (rest.to_vec(), rest.len() + 1),
            None => {
                log::warn!("unmatched LockGuards {}", guards.join(", "));
                index += 1;
                continue;
            }
        };

        let body = tree.sequence(body_statements);
        strip_unlocks(tree, body, &guards);
        let origins = tree.node(lock).origins.clone();
        let guard = tree.add(NodeKind::Guard { guards, body });
        tree.add_origins(guard, &origins);

        let mut replaced = statements[..index].to_vec();
        replaced.push(guard);
        replaced.extend_from_slice(&statements[index + consumed..]);
        if let Some(slot) = tree.statements_mut(sequence) {
            *slot = replaced;
        }
        changed = true;
        index += 1;
    }
    changed
}

fn lift_try_guard(tree: &mut Tree, statement: NodeId) -> bool {
    let NodeKind::If {
        condition,
        then,
        otherwise,
    } = *tree.kind(statement)
    else {
        return false;
    };
    let NodeKind::TryLock { guards } = tree.kind(condition).clone() else {
        return false;
    };
    strip_unlocks(tree, then, &guards);
    let origins = tree.subtree_origins(condition);
    tree.set(
        statement,
        NodeKind::TryGuard {
            guards,
            body: then,
            otherwise,
        },
    );
    tree.add_origins(statement, &origins);
    true
}
