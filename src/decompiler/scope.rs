//! Name resolution and variable declarations.
//!
//! Bytecode locals are function-wide; source variables are block scoped. This stage gives
//! every surviving temporary a source name, decides where each local and temporary is
//! declared and records what every referenced name is bound to.
//!
//! A declaration goes into the innermost sequence that contains all references to the
//! variable, right before the first one. When that first reference is a plain assignment
//! the two merge into `Type name = value`. A variable first touched inside a loop body by
//! anything but such an assignment carries its value between iterations, so its
//! declaration moves in front of the loop.
//!
//! Temporaries that are read but never written (*dangling*) only occur in functions the
//! compiler stripped down to debug calls. They keep their `::tempN` spelling and are
//! reported so the fixup stage can deal with them.

use std::collections::{HashMap, HashSet};

use strum::{AsRefStr, Display};

use crate::{
    decompiler::{
        guards::bodies,
        tree::{NodeId, NodeKind, Tree},
        types::TypeTable,
    },
    pex::{is_autovar, is_temp, Function, Object},
};

/// What a name in the output refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum BindingKind {
    /// A compiler temporary promoted to a variable
    Temporary,
    /// A declared local
    Local,
    /// A property backing variable
    Autovar,
    /// An object variable
    ObjectVariable,
    /// A parameter
    Parameter,
}

/// One resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Name as it appears in the output
    pub name: String,
    /// Name in the bytecode
    pub original: String,
    /// Type
    pub type_name: String,
    /// What the name refers to
    pub kind: BindingKind,
    /// Sequence holding the declaration; `None` for names declared outside the body
    pub scope: Option<NodeId>,
}

/// Outcome of [`ScopeResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Scopes {
    /// Every referenced name with a known binding, in order of first appearance
    pub bindings: Vec<Binding>,
    /// Temporaries that are read but never written
    pub dangling: Vec<String>,
}

impl Scopes {
    /// Looks up a binding by its output or bytecode name.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|binding| {
            binding.name.eq_ignore_ascii_case(name) || binding.original.eq_ignore_ascii_case(name)
        })
    }
}

/// One level of a reference path: a sequence and a statement index in it.
type Frame = (NodeId, usize);

/// Resolves names and places declarations for one function.
pub struct ScopeResolver<'a> {
    object: &'a Object,
    function: &'a Function,
    types: &'a TypeTable,
}

impl<'a> ScopeResolver<'a> {
    /// Creates a resolver.
    #[must_use]
    pub fn new(object: &'a Object, function: &'a Function, types: &'a TypeTable) -> Self {
        ScopeResolver {
            object,
            function,
            types,
        }
    }

    /// Renames temporaries, inserts declarations and collects bindings.
    pub fn resolve(&self, tree: &mut Tree, root: NodeId) -> Scopes {
        let referenced = referenced_names(tree, root);
        let mut written = Vec::new();
        tree.collect_writes(root, &mut written);
        let written: HashSet<String> = written.iter().map(|name| name.to_ascii_lowercase()).collect();

        let mut taken: HashSet<String> = self
            .function
            .params
            .iter()
            .map(|param| param.name.as_str())
            .chain(self.function.locals.iter().map(|local| local.name.as_str()))
            .chain(self.object.variables.iter().map(|var| var.name.as_str()))
            .chain(self.object.properties.iter().map(|prop| prop.name.as_str()))
            .chain(referenced.iter().map(String::as_str))
            .map(str::to_ascii_lowercase)
            .collect();

        let mut scopes = Scopes::default();
        let mut pending = Vec::new();

        for name in referenced {
            if is_temp(&name) {
                if !written.contains(&name.to_ascii_lowercase()) {
                    log::debug!("{} reads {} without writing it", self.function.name, name);
                    scopes.dangling.push(name);
                    continue;
                }
                let renamed = fresh_name(name.trim_start_matches(':'), &mut taken);
                tree.rename(root, &name, &renamed);
                let type_name = self.types.declared_type(&name).to_string();
                pending.push(Binding {
                    name: renamed,
                    original: name,
                    type_name,
                    kind: BindingKind::Temporary,
                    scope: None,
                });
            } else if let Some(param) = self.function.param(&name) {
                scopes.bindings.push(Binding {
                    name: param.name.clone(),
                    original: name,
                    type_name: param.type_name.clone(),
                    kind: BindingKind::Parameter,
                    scope: None,
                });
            } else if let Some(local) = self.function.local(&name) {
                let type_name = local
                    .declared_type()
                    .unwrap_or_else(|| self.types.declared_type(&name))
                    .to_string();
                pending.push(Binding {
                    name: local.name.clone(),
                    original: name,
                    type_name,
                    kind: BindingKind::Local,
                    scope: None,
                });
            } else if is_autovar(&name) {
                if let Some(property) = self.object.property_for_autovar(&name) {
                    scopes.bindings.push(Binding {
                        name: property.name.clone(),
                        original: name,
                        type_name: property.type_name.clone(),
                        kind: BindingKind::Autovar,
                        scope: None,
                    });
                }
            } else if let Some(variable) = self.object.variable(&name) {
                scopes.bindings.push(Binding {
                    name: variable.name.clone(),
                    original: name,
                    type_name: variable.type_name.clone(),
                    kind: BindingKind::ObjectVariable,
                    scope: None,
                });
            }
        }

        for mut binding in pending {
            binding.scope = declare(tree, root, &binding.name, &binding.type_name);
            scopes.bindings.push(binding);
        }
        scopes
    }
}

/// Identifier names in order of first appearance, deduplicated case-insensitively.
fn referenced_names(tree: &Tree, root: NodeId) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    tree.walk(root, &mut |id| {
        if let NodeKind::Identifier(name) = tree.kind(id) {
            if seen.insert(name.to_ascii_lowercase()) {
                names.push(name.clone());
            }
        }
    });
    names
}

/// Picks `base`, or `base_N` for the first free `N`, and reserves it.
fn fresh_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 0;
    while taken.contains(&candidate.to_ascii_lowercase()) {
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }
    taken.insert(candidate.to_ascii_lowercase());
    candidate
}

/// Whether the statement itself, bodies aside, mentions `name`.
fn header_references(tree: &Tree, statement: NodeId, name: &str) -> bool {
    match tree.kind(statement) {
        NodeKind::If { condition, .. } | NodeKind::While { condition, .. } => {
            tree.references(*condition, name)
        }
        NodeKind::Guard { .. } | NodeKind::TryGuard { .. } => false,
        _ => tree.references(statement, name),
    }
}

/// Paths from the root to every statement that mentions `name`.
fn reference_paths(
    tree: &Tree,
    sequence: NodeId,
    name: &str,
    path: &mut Vec<Frame>,
    out: &mut Vec<Vec<Frame>>,
) {
    for (index, &statement) in tree.statements(sequence).iter().enumerate() {
        path.push((sequence, index));
        if header_references(tree, statement, name) {
            out.push(path.clone());
        }
        for body in bodies(tree, statement) {
            reference_paths(tree, body, name, path, out);
        }
        path.pop();
    }
}

/// Maps each loop body to the loop's sequence and index.
fn loop_owners(tree: &Tree, sequence: NodeId, owners: &mut HashMap<NodeId, Frame>) {
    for (index, &statement) in tree.statements(sequence).iter().enumerate() {
        if let NodeKind::While { body, .. } = tree.kind(statement) {
            owners.insert(*body, (sequence, index));
        }
        for body in bodies(tree, statement) {
            loop_owners(tree, body, owners);
        }
    }
}

fn is_plain_definition(tree: &Tree, statement: NodeId, name: &str) -> bool {
    match *tree.kind(statement) {
        NodeKind::Assign { target, value } => {
            tree.identifier(target)
                .is_some_and(|target| target.eq_ignore_ascii_case(name))
                && tree.reads(value, name) == 0
        }
        _ => false,
    }
}

/// Inserts the declaration of `name`; returns the sequence that holds it.
fn declare(tree: &mut Tree, root: NodeId, name: &str, type_name: &str) -> Option<NodeId> {
    let mut paths = Vec::new();
    reference_paths(tree, root, name, &mut Vec::new(), &mut paths);
    let first_path = paths.first()?;

    let mut level = 0;
    while paths
        .iter()
        .all(|path| path.len() > level + 1 && path[level + 1].0 == first_path[level + 1].0)
    {
        level += 1;
    }

    let (mut sequence, mut index) = paths
        .iter()
        .map(|path| path[level])
        .min_by_key(|&(_, index)| index)?;
    let mut direct = paths
        .iter()
        .any(|path| path.len() == level + 1 && path[level].1 == index);

    let mut owners = HashMap::new();
    loop_owners(tree, root, &mut owners);
    while let Some(&(parent, loop_index)) = owners.get(&sequence) {
        let first = tree.statements(sequence)[index];
        if direct && is_plain_definition(tree, first, name) {
            break;
        }
        sequence = parent;
        index = loop_index;
        direct = false;
    }

    let first = tree.statements(sequence)[index];
    if direct && is_plain_definition(tree, first, name) {
        if let NodeKind::Assign { value, .. } = *tree.kind(first) {
            tree.set(
                first,
                NodeKind::Declaration {
                    name: name.to_string(),
                    type_name: type_name.to_string(),
                    init: Some(value),
                },
            );
        }
        return Some(sequence);
    }

    let declaration = tree.add(NodeKind::Declaration {
        name: name.to_string(),
        type_name: type_name.to_string(),
        init: None,
    });
    if let Some(statements) = tree.statements_mut(sequence) {
        statements.insert(index, declaration);
    }
    Some(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompiler::tree::{BinaryOp, Receiver},
        pex::Value,
    };

    struct Fixture {
        tree: Tree,
        object: Object,
        function: Function,
    }

    impl Fixture {
        fn new(function: Function) -> Self {
            Fixture {
                tree: Tree::new(),
                object: Object::new("A"),
                function,
            }
        }

        fn ident(&mut self, name: &str) -> NodeId {
            self.tree.add(NodeKind::Identifier(name.to_string()))
        }

        fn call(&mut self, method: &str, args: Vec<NodeId>) -> NodeId {
            self.tree.add(NodeKind::Call {
                receiver: Receiver::SelfObject,
                method: method.to_string(),
                args,
            })
        }

        fn assign(&mut self, name: &str, value: NodeId) -> NodeId {
            let target = self.ident(name);
            self.tree.add(NodeKind::Assign { target, value })
        }

        fn resolve(&mut self, root: NodeId) -> Scopes {
            let types = TypeTable::infer(&self.object, &self.function);
            ScopeResolver::new(&self.object, &self.function, &types).resolve(&mut self.tree, root)
        }
    }

    #[test]
    fn temporary_gets_merged_declaration() {
        let mut f = Fixture::new(Function::new("F", "None"));
        let foo = f.call("Foo", Vec::new());
        let define = f.assign("::temp0", foo);
        let first = f.ident("::temp0");
        let bar = f.call("Bar", vec![first]);
        let second = f.ident("::temp0");
        let baz = f.call("Baz", vec![second]);
        let root = f.tree.sequence(vec![define, bar, baz]);

        let scopes = f.resolve(root);
        assert_eq!(f.tree.statements(root), [define, bar, baz]);
        assert!(matches!(
            f.tree.kind(define),
            NodeKind::Declaration { name, init: Some(_), .. } if name == "temp0"
        ));
        assert_eq!(f.tree.identifier(first), Some("temp0"));
        let binding = scopes.binding("::temp0").unwrap();
        assert_eq!(binding.kind, BindingKind::Temporary);
        assert_eq!(binding.scope, Some(root));
        assert!(scopes.dangling.is_empty());
    }

    #[test]
    fn renamed_temporary_avoids_collisions() {
        let mut f = Fixture::new(Function::new("F", "None").with_local("Temp0", "Int"));
        let five = f.tree.add(NodeKind::Literal(Value::Integer(5)));
        let define = f.assign("::temp0", five);
        let read = f.ident("::temp0");
        let use_it = f.call("Foo", vec![read]);
        let root = f.tree.sequence(vec![define, use_it]);

        let scopes = f.resolve(root);
        assert_eq!(f.tree.identifier(read), Some("temp0_1"));
        assert_eq!(scopes.binding("::temp0").unwrap().name, "temp0_1");
        // The unused local is not declared.
        assert!(scopes.binding("Temp0").is_none());
    }

    #[test]
    fn dangling_temporary_is_reported() {
        let mut f = Fixture::new(Function::new("F", "None"));
        let read = f.ident("::temp3");
        let trace = f.call("Trace", vec![read]);
        let root = f.tree.sequence(vec![trace]);

        let scopes = f.resolve(root);
        assert_eq!(scopes.dangling, ["::temp3"]);
        assert_eq!(f.tree.identifier(read), Some("::temp3"));
        assert_eq!(f.tree.statements(root).len(), 1);
    }

    #[test]
    fn declaration_covers_both_arms() {
        let mut f = Fixture::new(Function::new("F", "None").with_local("sName", "String"));
        let a = f.tree.add(NodeKind::Literal(Value::str("a")));
        let then_assign = f.assign("sName", a);
        let then = f.tree.sequence(vec![then_assign]);
        let b = f.tree.add(NodeKind::Literal(Value::str("b")));
        let else_assign = f.assign("sName", b);
        let otherwise = f.tree.sequence(vec![else_assign]);
        let condition = f.ident("bFlag");
        let branch = f.tree.add(NodeKind::If {
            condition,
            then,
            otherwise: Some(otherwise),
        });
        let read = f.ident("sName");
        let show = f.call("Show", vec![read]);
        let root = f.tree.sequence(vec![branch, show]);

        let scopes = f.resolve(root);
        let statements = f.tree.statements(root);
        assert_eq!(statements.len(), 3);
        assert_eq!(
            f.tree.kind(statements[0]),
            &NodeKind::Declaration {
                name: "sName".to_string(),
                type_name: "String".to_string(),
                init: None,
            }
        );
        assert_eq!(scopes.binding("sName").unwrap().kind, BindingKind::Local);
    }

    #[test]
    fn loop_carried_local_is_hoisted() {
        let mut f = Fixture::new(Function::new("F", "None").with_local("iCount", "Int"));
        let target = f.ident("iCount");
        let one = f.tree.add(NodeKind::Literal(Value::Integer(1)));
        let bump = f.tree.add(NodeKind::CompoundAssign {
            op: BinaryOp::Add,
            target,
            value: one,
        });
        let body = f.tree.sequence(vec![bump]);
        let condition = f.call("Running", Vec::new());
        let repeat = f.tree.add(NodeKind::While { condition, body });
        let root = f.tree.sequence(vec![repeat]);

        let scopes = f.resolve(root);
        assert_eq!(f.tree.statements(root).len(), 2);
        assert!(matches!(
            f.tree.kind(f.tree.statements(root)[0]),
            NodeKind::Declaration { init: None, .. }
        ));
        assert_eq!(f.tree.statements(body), [bump]);
        assert_eq!(scopes.binding("iCount").unwrap().scope, Some(root));
    }

    #[test]
    fn object_names_resolve() {
        let mut f = Fixture::new(Function::new("F", "None").with_param("akTarget", "Actor"));
        f.object = Object::new("A")
            .with_variable(crate::pex::Variable::new("fDelay", "Float"))
            .with_property(crate::pex::Property::auto("Stage", "Int"));
        let target = f.ident("akTarget");
        let delay = f.ident("fDelay");
        let stage = f.ident("::Stage_var");
        let call = f.call("Foo", vec![target, delay, stage]);
        let root = f.tree.sequence(vec![call]);

        let scopes = f.resolve(root);
        assert_eq!(scopes.binding("akTarget").unwrap().kind, BindingKind::Parameter);
        assert_eq!(scopes.binding("fDelay").unwrap().kind, BindingKind::ObjectVariable);
        let stage = scopes.binding("::Stage_var").unwrap();
        assert_eq!((stage.kind, stage.name.as_str()), (BindingKind::Autovar, "Stage"));
        assert_eq!(f.tree.statements(root).len(), 1);
    }
}
