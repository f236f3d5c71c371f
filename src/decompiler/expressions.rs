//! Expression rebuilding.
//!
//! The compiler evaluates every sub-expression into a temporary. Rebuilding substitutes a
//! temporary's definition into its single use and drops the definition, recovering nested
//! expressions such as `Bar(Foo())`.
//!
//! # Inlining Rule
//!
//! A definition `t = value` at statement `i` is substituted into the next statement `j`
//! that references `t` when all of the following hold:
//!
//! - `j` reads `t` exactly once, and `t` is dead after `j` (or `j` overwrites it)
//! - the statements between `i` and `j` have no side effect and write nothing `value` reads
//! - if `value` has a side effect, those statements write no variable at all
//! - nothing with a side effect is evaluated in `j` before the read, unless `value` only
//!   reads literals, temporaries, parameters and locals
//! - a `value` with a side effect is never moved into the right operand of `&&`/`||`
//!
//! The rule is applied per basic block with exact liveness, and once more over the
//! structured tree for temporaries that have exactly one definition and one read in the
//! whole function.

use std::collections::BTreeSet;

use crate::{
    decompiler::{
        liveness::{live_after, Liveness, TempSet},
        lower::{FlowBlock, FlowBlocks},
        pass::TreePass,
        tree::{NodeId, NodeKind, ReadSite, Tree},
    },
    pex::{is_temp, Function},
    Result,
};

/// Inlines single-use temporaries.
#[derive(Debug, Clone, Default)]
pub struct ExpressionRebuilder {
    /// Lowercased names no call can modify: parameters and locals
    stable: BTreeSet<String>,
}

impl ExpressionRebuilder {
    /// Creates a rebuilder for `function`.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        let stable = function
            .params
            .iter()
            .map(|param| param.name.to_ascii_lowercase())
            .chain(
                function
                    .locals
                    .iter()
                    .map(|local| local.name.to_ascii_lowercase()),
            )
            .collect();
        ExpressionRebuilder { stable }
    }

    /// Rebuilds every block; returns whether anything was inlined.
    pub fn rebuild_blocks(&self, tree: &mut Tree, blocks: &mut FlowBlocks) -> bool {
        let liveness = Liveness::compute(tree, blocks);
        let empty = TempSet::new();
        let mut changed = false;
        for block in blocks.values_mut() {
            let live_out = liveness.live_out(block.start).unwrap_or(&empty);
            changed |= self.rebuild_block(tree, block, live_out);
        }
        changed
    }

    /// Rebuilds one block given the temporaries live on its exit.
    pub fn rebuild_block(&self, tree: &mut Tree, block: &mut FlowBlock, live_out: &TempSet) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            for index in (0..block.statements.len()).rev() {
                if index < block.statements.len() && self.inline_in_block(tree, block, index, live_out)
                {
                    round = true;
                }
            }
            if !round {
                break;
            }
            changed = true;
        }
        changed
    }

    fn inline_in_block(
        &self,
        tree: &mut Tree,
        block: &mut FlowBlock,
        index: usize,
        live_out: &TempSet,
    ) -> bool {
        let statement = block.statements[index];
        let Some((name, value)) = temp_definition(tree, statement) else {
            return false;
        };

        let len = block.statements.len();
        let use_index = match (index + 1..len).find(|&k| tree.references(block.statements[k], &name)) {
            Some(k) => k,
            None if block
                .condition()
                .is_some_and(|condition| tree.reads(condition, &name) > 0) =>
            {
                len
            }
            None => return false,
        };
        let Some(use_node) = block.statements.get(use_index).copied().or(block.condition()) else {
            return false;
        };

        let overwritten = use_index < len && tree.writes(use_node, &name);
        let exits_live = live_out.contains(&name.to_ascii_lowercase());
        if !overwritten && live_after(tree, block, use_index, &name, exits_live) {
            return false;
        }

        let between = &block.statements[index + 1..use_index];
        let Some(site) = self.substitution(tree, value, &name, between, use_node) else {
            return false;
        };

        log::trace!(
            "inlining {} from statement {} into {} of block {}",
            name,
            index,
            if use_index == len { "the condition".to_string() } else { format!("statement {use_index}") },
            block.start
        );
        substitute(tree, statement, value, site);
        block.statements.remove(index);
        true
    }

    /// Checks the inlining rule; returns the read to replace.
    fn substitution(
        &self,
        tree: &Tree,
        value: NodeId,
        name: &str,
        between: &[NodeId],
        use_node: NodeId,
    ) -> Option<ReadSite> {
        if tree.reads(use_node, name) != 1 {
            return None;
        }

        let value_effects = tree.has_side_effect(value);
        let mut value_reads = Vec::new();
        tree.collect_reads(value, &mut value_reads);

        for &statement in between {
            if tree.has_side_effect(statement) {
                return None;
            }
            let mut writes = Vec::new();
            tree.collect_writes(statement, &mut writes);
            if writes.iter().any(|written| {
                value_reads
                    .iter()
                    .any(|read| read.eq_ignore_ascii_case(written))
            }) {
                return None;
            }
            if value_effects && writes.iter().any(|written| !is_temp(written)) {
                return None;
            }
        }

        let site = tree.first_read(use_node, name)?;
        if site.after_side_effect && !self.is_stable(tree, value) {
            return None;
        }
        if site.conditional && value_effects {
            return None;
        }
        Some(site)
    }

    /// Whether no call can change the value of the expression.
    fn is_stable(&self, tree: &Tree, id: NodeId) -> bool {
        match tree.kind(id) {
            NodeKind::Literal(_) => true,
            NodeKind::Identifier(name) => {
                is_temp(name) || self.stable.contains(&name.to_ascii_lowercase())
            }
            NodeKind::Unary { operand, .. } => self.is_stable(tree, *operand),
            NodeKind::Binary { lhs, rhs, .. } => {
                self.is_stable(tree, *lhs) && self.is_stable(tree, *rhs)
            }
            NodeKind::Cast { value, .. } | NodeKind::Is { value, .. } => {
                self.is_stable(tree, *value)
            }
            _ => false,
        }
    }

    fn inline_in_sequence(&self, tree: &mut Tree, root: NodeId, sequence: NodeId, index: usize) -> bool {
        let statements = tree.statements(sequence).to_vec();
        let statement = statements[index];
        let Some((name, value)) = temp_definition(tree, statement) else {
            return false;
        };
        if tree.reads(root, &name) != 1 || count_definitions(tree, root, &name) != 1 {
            return false;
        }

        let Some(use_index) =
            (index + 1..statements.len()).find(|&k| tree.references(statements[k], &name))
        else {
            return false;
        };
        let use_node = statements[use_index];
        let Some(site) =
            self.substitution(tree, value, &name, &statements[index + 1..use_index], use_node)
        else {
            return false;
        };

        log::trace!("inlining {} across blocks", name);
        substitute(tree, statement, value, site);
        if let Some(statements) = tree.statements_mut(sequence) {
            statements.remove(index);
        }
        true
    }
}

impl TreePass for ExpressionRebuilder {
    fn name(&self) -> &'static str {
        "expression-rebuild"
    }

    fn description(&self) -> &'static str {
        "Inlines temporaries defined once and read once anywhere in the function"
    }

    fn run(&mut self, tree: &mut Tree, root: NodeId) -> Result<bool> {
        let mut sequences = Vec::new();
        tree.walk(root, &mut |id| {
            if matches!(tree.kind(id), NodeKind::Sequence(_)) {
                sequences.push(id);
            }
        });

        let mut changed = false;
        for sequence in sequences {
            let mut index = tree.statements(sequence).len();
            while index > 0 {
                index -= 1;
                if index < tree.statements(sequence).len()
                    && self.inline_in_sequence(tree, root, sequence, index)
                {
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}

/// `(name, value)` of a `::tempN = value` statement whose value does not read `::tempN`.
fn temp_definition(tree: &Tree, statement: NodeId) -> Option<(String, NodeId)> {
    let NodeKind::Assign { target, value } = tree.kind(statement) else {
        return None;
    };
    let name = tree.identifier(*target).filter(|name| is_temp(name))?;
    if tree.reads(*value, name) > 0 {
        return None;
    }
    Some((name.to_string(), *value))
}

fn count_definitions(tree: &Tree, root: NodeId, name: &str) -> usize {
    let mut count = 0;
    tree.walk(root, &mut |id| {
        if let NodeKind::Assign { target, .. } | NodeKind::CompoundAssign { target, .. } =
            tree.kind(id)
        {
            if tree
                .identifier(*target)
                .is_some_and(|target| target.eq_ignore_ascii_case(name))
            {
                count += 1;
            }
        }
    });
    count
}

fn substitute(tree: &mut Tree, statement: NodeId, value: NodeId, site: ReadSite) {
    tree.replace_with(site.node, value);
    let origins = tree.node(statement).origins.clone();
    tree.add_origins(site.node, &origins);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompiler::{
            blocks::BlockGraph,
            lower::lower,
            tree::{BinaryOp, Receiver},
            types::TypeTable,
        },
        pex::{FunctionAssembler, Object, OpCode, Value},
    };

    fn rebuild(function: Function, build: impl Fn(&mut FunctionAssembler)) -> (Tree, FlowBlocks) {
        let mut asm = FunctionAssembler::new();
        build(&mut asm);
        let (instructions, _) = asm.finish().unwrap();
        let function = function.with_instructions(instructions);
        let types = TypeTable::infer(&Object::new("A"), &function);
        let graph = BlockGraph::build(&function.instructions).unwrap();
        let mut tree = Tree::new();
        let mut blocks = lower(&mut tree, &function.instructions, &graph, &types).unwrap();
        ExpressionRebuilder::new(&function).rebuild_blocks(&mut tree, &mut blocks);
        (tree, blocks)
    }

    #[test]
    fn nested_calls() {
        let (tree, blocks) = rebuild(Function::new("F", "None"), |asm| {
            asm.call_method("Foo", "self", Some("::temp0"), vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![Value::id("::temp0")]).unwrap();
        });
        let statements = &blocks[&0].statements;
        assert_eq!(statements.len(), 1);
        let NodeKind::Call { method, args, receiver } = tree.kind(statements[0]) else {
            panic!("expected a call");
        };
        assert_eq!(method, "Bar");
        assert_eq!(*receiver, Receiver::SelfObject);
        assert!(matches!(tree.kind(args[0]), NodeKind::Call { method, .. } if method == "Foo"));
        assert_eq!(tree.subtree_origins(statements[0]).len(), 2);
    }

    #[test]
    fn side_effects_block_reordering() {
        let (_, blocks) = rebuild(Function::new("F", "None"), |asm| {
            asm.call_method("Foo", "self", Some("::temp0"), vec![]).unwrap();
            asm.call_method("Baz", "self", None, vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![Value::id("::temp0")]).unwrap();
        });
        assert_eq!(blocks[&0].statements.len(), 3);
    }

    #[test]
    fn evaluation_order_inside_the_use() {
        let (_, blocks) = rebuild(Function::new("F", "None"), |asm| {
            asm.prop_get("Health", "akActor", "::temp0").unwrap();
            asm.call_method("Heal", "self", Some("::temp1"), vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![Value::id("::temp1"), Value::id("::temp0")])
                .unwrap();
        });
        // Heal() runs before the read of ::temp0 in Bar(...), so the property read stays put.
        assert_eq!(blocks[&0].statements.len(), 2);

        let (_, blocks) = rebuild(Function::new("F", "None").with_param("a", "Int"), |asm| {
            asm.binary(OpCode::Iadd, "::temp0", "a", 1).unwrap();
            asm.call_method("Heal", "self", Some("::temp1"), vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![Value::id("::temp1"), Value::id("::temp0")])
                .unwrap();
        });
        assert_eq!(blocks[&0].statements.len(), 1);
    }

    #[test]
    fn multiple_uses_stay() {
        let (_, blocks) = rebuild(Function::new("F", "None"), |asm| {
            asm.call_method("Foo", "self", Some("::temp0"), vec![]).unwrap();
            asm.call_method("Bar", "self", None, vec![Value::id("::temp0"), Value::id("::temp0")])
                .unwrap();
        });
        assert_eq!(blocks[&0].statements.len(), 2);
    }

    #[test]
    fn condition_is_a_use() {
        let (tree, blocks) = rebuild(Function::new("F", "None"), |asm| {
            asm.binary(OpCode::CmpGt, "::temp0", "x", 1).unwrap();
            asm.jmpf("::temp0", "end").unwrap();
            asm.call_method("Foo", "self", None, vec![]).unwrap();
            asm.label("end").unwrap();
            asm.ret(Value::None).unwrap();
        });
        let entry = &blocks[&0];
        assert!(entry.statements.is_empty());
        assert!(matches!(
            tree.kind(entry.condition().unwrap()),
            NodeKind::Binary { .. }
        ));
    }

    #[test]
    fn tree_pass_crosses_sequences() {
        let mut tree = Tree::new();
        let target = tree.add(NodeKind::Identifier("::temp0".to_string()));
        let call = tree.add(NodeKind::Call {
            receiver: Receiver::SelfObject,
            method: "Foo".to_string(),
            args: vec![],
        });
        let def = tree.add(NodeKind::Assign { target, value: call });
        let read = tree.add(NodeKind::Identifier("::temp0".to_string()));
        let body = tree.sequence(vec![]);
        let branch = tree.add(NodeKind::If {
            condition: read,
            then: body,
            otherwise: None,
        });
        let root = tree.sequence(vec![def, branch]);

        let mut pass = ExpressionRebuilder::default();
        assert!(pass.run(&mut tree, root).unwrap());
        assert_eq!(tree.statements(root).len(), 1);
        assert!(matches!(tree.kind(read), NodeKind::Call { .. }));
        assert!(!pass.run(&mut tree, root).unwrap());
    }

    fn guarded_read(tree: &mut Tree, value: NodeId) -> (NodeId, NodeId) {
        let target = tree.add(NodeKind::Identifier("::temp0".to_string()));
        let def = tree.add(NodeKind::Assign { target, value });
        let lhs = tree.add(NodeKind::Identifier("a".to_string()));
        let read = tree.add(NodeKind::Identifier("::temp0".to_string()));
        let condition = tree.add(NodeKind::Binary {
            op: BinaryOp::And,
            lhs,
            rhs: read,
        });
        let then = tree.sequence(vec![]);
        let branch = tree.add(NodeKind::If {
            condition,
            then,
            otherwise: None,
        });
        (tree.sequence(vec![def, branch]), read)
    }

    #[test]
    fn calls_stay_out_of_short_circuit_operands() {
        let mut tree = Tree::new();
        let call = tree.add(NodeKind::Call {
            receiver: Receiver::SelfObject,
            method: "Foo".to_string(),
            args: vec![],
        });
        let (root, read) = guarded_read(&mut tree, call);

        let mut pass = ExpressionRebuilder::default();
        assert!(!pass.run(&mut tree, root).unwrap());
        assert_eq!(tree.statements(root).len(), 2);
        assert!(matches!(tree.kind(read), NodeKind::Identifier(_)));

        let mut tree = Tree::new();
        let variable = tree.add(NodeKind::Identifier("b".to_string()));
        let (root, read) = guarded_read(&mut tree, variable);
        assert!(pass.run(&mut tree, root).unwrap());
        assert_eq!(tree.statements(root).len(), 1);
        assert!(matches!(tree.kind(read), NodeKind::Identifier(name) if name == "b"));
    }
}
