//! Arena-backed syntax tree.
//!
//! Every stage of the pipeline rewrites the same [`Tree`]. Nodes are stored in a flat arena
//! and reference their children by [`NodeId`]; a rewrite either changes a node in place or
//! builds new nodes and swaps ids in the owning [`NodeKind::Sequence`]. Nodes that fall out
//! of the tree are simply left behind in the arena, which lives only as long as one
//! function's run.
//!
//! Each node carries the set of instruction indices it was built from. The code generator
//! unions these over a line to attribute debug line numbers.

use std::{collections::BTreeSet, fmt};

use crate::pex::{display_name, Value};

/// Index of a node in a [`Tree`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}

impl UnaryOp {
    /// Source spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Source spelling.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding strength, lower binds tighter.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 5,
            BinaryOp::And => 6,
            BinaryOp::Or => 7,
        }
    }

    /// Operators that have a compound assignment form (`+=` and friends).
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// Who a call is dispatched on.
#[derive(Debug, Clone, PartialEq)]
pub enum Receiver {
    /// The current object, rendered as a bare call
    SelfObject,
    /// `Parent.`
    Parent,
    /// A global function of the named script
    Static(String),
    /// Any other object expression
    Object(NodeId),
}

/// Array and struct-array intrinsics, rendered as method calls on the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ArrayMethod {
    Find,
    RFind,
    FindStruct,
    RFindStruct,
    Add,
    Insert,
    RemoveLast,
    Remove,
    Clear,
    GetMatchingStructs,
}

impl ArrayMethod {
    /// Method name as written in source.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ArrayMethod::Find => "Find",
            ArrayMethod::RFind => "RFind",
            ArrayMethod::FindStruct => "FindStruct",
            ArrayMethod::RFindStruct => "RFindStruct",
            ArrayMethod::Add => "Add",
            ArrayMethod::Insert => "Insert",
            ArrayMethod::RemoveLast => "RemoveLast",
            ArrayMethod::Remove => "Remove",
            ArrayMethod::Clear => "Clear",
            ArrayMethod::GetMatchingStructs => "GetMatchingStructs",
        }
    }

    /// Whether the intrinsic modifies the array.
    #[must_use]
    pub const fn mutates(self) -> bool {
        matches!(
            self,
            ArrayMethod::Add
                | ArrayMethod::Insert
                | ArrayMethod::RemoveLast
                | ArrayMethod::Remove
                | ArrayMethod::Clear
        )
    }
}

/// The node variants.
///
/// Expressions and statements share one enum; a [`NodeKind::Sequence`] holds statements and
/// every structured statement owns its bodies as sequences.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Non-identifier constant
    Literal(Value),
    /// Variable, parameter or property backing variable
    Identifier(String),
    /// `!x`, `-x`
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: NodeId,
    },
    /// `a op b`
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: NodeId,
        /// Right operand
        rhs: NodeId,
    },
    /// `value as Type`
    Cast {
        /// Converted value
        value: NodeId,
        /// Target type
        type_name: String,
    },
    /// `value is Type`
    Is {
        /// Tested value
        value: NodeId,
        /// Tested type
        type_name: String,
    },
    /// Method, parent or global call
    Call {
        /// Dispatch target
        receiver: Receiver,
        /// Method name
        method: String,
        /// Arguments
        args: Vec<NodeId>,
    },
    /// `object.Property`
    Property {
        /// Owner
        object: NodeId,
        /// Property name
        name: String,
    },
    /// `struct.Member`
    Field {
        /// Struct value
        object: NodeId,
        /// Member name
        name: String,
    },
    /// `array[index]`
    Index {
        /// Array value
        array: NodeId,
        /// Element index
        index: NodeId,
    },
    /// `array.Length`
    Length {
        /// Array value
        array: NodeId,
    },
    /// `new Type[size]`
    NewArray {
        /// Element type
        element_type: String,
        /// Element count
        size: NodeId,
    },
    /// `new Type`
    NewStruct {
        /// Struct type
        type_name: String,
    },
    /// `array.Method(args)`
    ArrayCall {
        /// Array value
        array: NodeId,
        /// Intrinsic
        method: ArrayMethod,
        /// Arguments, defaults already dropped
        args: Vec<NodeId>,
    },
    /// Result of `try_lock_guards`
    TryLock {
        /// Guard names
        guards: Vec<String>,
    },
    /// `target = value`
    Assign {
        /// Written location
        target: NodeId,
        /// Written value
        value: NodeId,
    },
    /// `target op= value`
    CompoundAssign {
        /// Arithmetic operator
        op: BinaryOp,
        /// Written location
        target: NodeId,
        /// Right operand
        value: NodeId,
    },
    /// `Return [value]`
    Return(Option<NodeId>),
    /// `If condition ... [Else ...] EndIf`
    If {
        /// Condition
        condition: NodeId,
        /// Sequence run when the condition holds
        then: NodeId,
        /// Sequence run otherwise
        otherwise: Option<NodeId>,
    },
    /// `While condition ... EndWhile`
    While {
        /// Loop condition
        condition: NodeId,
        /// Body sequence
        body: NodeId,
    },
    /// `Guard a, b ... EndGuard`
    Guard {
        /// Guard names
        guards: Vec<String>,
        /// Body sequence
        body: NodeId,
    },
    /// `TryGuard a ... [Else ...] EndTryGuard`
    TryGuard {
        /// Guard names
        guards: Vec<String>,
        /// Sequence run when the lock was taken
        body: NodeId,
        /// Sequence run otherwise
        otherwise: Option<NodeId>,
    },
    /// An acquire that has no matching release
    LockGuards(Vec<String>),
    /// A release that has no matching acquire
    UnlockGuards(Vec<String>),
    /// Statement list
    Sequence(Vec<NodeId>),
    /// `Type name [= init]`
    Declaration {
        /// Variable name
        name: String,
        /// Declared type
        type_name: String,
        /// Initializer
        init: Option<NodeId>,
    },
}

/// A node and the instructions it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The variant
    pub kind: NodeKind,
    /// Originating instruction indices
    pub origins: BTreeSet<usize>,
}

/// Position of the first evaluated read of a name within a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSite {
    /// The identifier node
    pub node: NodeId,
    /// Whether a side effect completes before the read is evaluated
    pub after_side_effect: bool,
    /// Whether the read sits in the right operand of `&&`/`||` and may not run
    pub conditional: bool,
}

/// The syntax tree of one function.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes ever allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocates a node without origins.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            origins: BTreeSet::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Allocates a node built from instruction `ip`.
    pub fn add_at(&mut self, kind: NodeKind, ip: usize) -> NodeId {
        let id = self.add(kind);
        self.nodes[id.0].origins.insert(ip);
        id
    }

    /// Allocates a statement list.
    pub fn sequence(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Sequence(statements))
    }

    /// Returns a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Returns a node's variant.
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// Returns a node's variant for modification.
    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    /// Replaces a node's variant, keeping its origins.
    pub fn set(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.0].kind = kind;
    }

    /// Adds origins to a node.
    pub fn add_origins(&mut self, id: NodeId, origins: &BTreeSet<usize>) {
        self.nodes[id.0].origins.extend(origins.iter().copied());
    }

    /// Statements of a sequence, empty for any other node.
    #[must_use]
    pub fn statements(&self, id: NodeId) -> &[NodeId] {
        match self.kind(id) {
            NodeKind::Sequence(statements) => statements,
            _ => &[],
        }
    }

    /// Statements of a sequence for modification.
    pub fn statements_mut(&mut self, id: NodeId) -> Option<&mut Vec<NodeId>> {
        match self.kind_mut(id) {
            NodeKind::Sequence(statements) => Some(statements),
            _ => None,
        }
    }

    /// Identifier name of a node, if it is an identifier.
    #[must_use]
    pub fn identifier(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the node is the `None` literal.
    #[must_use]
    pub fn is_none_literal(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Literal(Value::None))
    }

    /// Name written by a plain `name = value` statement.
    #[must_use]
    pub fn assigned_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Assign { target, .. } => self.identifier(*target),
            _ => None,
        }
    }

    /// All children in evaluation order, bodies included.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::Literal(_)
            | NodeKind::Identifier(_)
            | NodeKind::NewStruct { .. }
            | NodeKind::TryLock { .. }
            | NodeKind::LockGuards(_)
            | NodeKind::UnlockGuards(_) => Vec::new(),
            NodeKind::Unary { operand, .. } => vec![*operand],
            NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::Cast { value, .. } | NodeKind::Is { value, .. } => vec![*value],
            NodeKind::Call { receiver, args, .. } => {
                let mut children = Vec::with_capacity(args.len() + 1);
                if let Receiver::Object(object) = receiver {
                    children.push(*object);
                }
                children.extend(args.iter().copied());
                children
            }
            NodeKind::Property { object, .. } | NodeKind::Field { object, .. } => vec![*object],
            NodeKind::Index { array, index } => vec![*array, *index],
            NodeKind::Length { array } => vec![*array],
            NodeKind::NewArray { size, .. } => vec![*size],
            NodeKind::ArrayCall { array, args, .. } => {
                let mut children = Vec::with_capacity(args.len() + 1);
                children.push(*array);
                children.extend(args.iter().copied());
                children
            }
            NodeKind::Assign { target, value } | NodeKind::CompoundAssign { target, value, .. } => {
                vec![*target, *value]
            }
            NodeKind::Return(value) => value.iter().copied().collect(),
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => {
                let mut children = vec![*condition, *then];
                children.extend(otherwise.iter().copied());
                children
            }
            NodeKind::While { condition, body } => vec![*condition, *body],
            NodeKind::Guard { body, .. } => vec![*body],
            NodeKind::TryGuard {
                body, otherwise, ..
            } => {
                let mut children = vec![*body];
                children.extend(otherwise.iter().copied());
                children
            }
            NodeKind::Sequence(statements) => statements.clone(),
            NodeKind::Declaration { init, .. } => init.iter().copied().collect(),
        }
    }

    /// Children evaluated exactly once, in order, when the node itself is evaluated.
    ///
    /// Bodies are excluded, and so is a loop condition, which runs once per iteration. The
    /// identifier target of a plain assignment is written, not evaluated.
    #[must_use]
    pub fn evaluated_children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::If { condition, .. } => vec![*condition],
            NodeKind::While { .. }
            | NodeKind::Guard { .. }
            | NodeKind::TryGuard { .. }
            | NodeKind::Sequence(_) => Vec::new(),
            NodeKind::Assign { target, value } => {
                if self.identifier(*target).is_some() {
                    vec![*value]
                } else {
                    vec![*target, *value]
                }
            }
            _ => self.children(id),
        }
    }

    /// Whether the node itself (children aside) has an observable effect.
    #[must_use]
    pub fn has_own_side_effect(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Call { .. }
            | NodeKind::TryLock { .. }
            | NodeKind::LockGuards(_)
            | NodeKind::UnlockGuards(_)
            | NodeKind::Return(_) => true,
            NodeKind::ArrayCall { method, .. } => method.mutates(),
            NodeKind::Assign { target, .. } | NodeKind::CompoundAssign { target, .. } => {
                self.identifier(*target).is_none()
            }
            _ => false,
        }
    }

    /// Whether evaluating the subtree can be observed beyond plain variable writes.
    #[must_use]
    pub fn has_side_effect(&self, id: NodeId) -> bool {
        self.has_own_side_effect(id)
            || self
                .children(id)
                .into_iter()
                .any(|child| self.has_side_effect(child))
    }

    /// Number of reads of `name` in the subtree.
    #[must_use]
    pub fn reads(&self, id: NodeId, name: &str) -> usize {
        match self.kind(id) {
            NodeKind::Identifier(id_name) => usize::from(id_name.eq_ignore_ascii_case(name)),
            NodeKind::Assign { target, value } if self.identifier(*target).is_some() => {
                self.reads(*value, name)
            }
            _ => self
                .children(id)
                .into_iter()
                .map(|child| self.reads(child, name))
                .sum(),
        }
    }

    /// Whether the subtree writes `name`.
    #[must_use]
    pub fn writes(&self, id: NodeId, name: &str) -> bool {
        let own = match self.kind(id) {
            NodeKind::Assign { target, .. } | NodeKind::CompoundAssign { target, .. } => self
                .identifier(*target)
                .is_some_and(|target| target.eq_ignore_ascii_case(name)),
            NodeKind::Declaration { name: declared, .. } => declared.eq_ignore_ascii_case(name),
            _ => false,
        };
        own || self
            .children(id)
            .into_iter()
            .any(|child| self.writes(child, name))
    }

    /// Whether the subtree reads or writes `name`.
    #[must_use]
    pub fn references(&self, id: NodeId, name: &str) -> bool {
        self.reads(id, name) > 0 || self.writes(id, name)
    }

    /// Collects every identifier read in the subtree.
    pub fn collect_reads(&self, id: NodeId, out: &mut Vec<String>) {
        match self.kind(id) {
            NodeKind::Identifier(name) => out.push(name.clone()),
            NodeKind::Assign { target, value } if self.identifier(*target).is_some() => {
                self.collect_reads(*value, out);
            }
            _ => {
                for child in self.children(id) {
                    self.collect_reads(child, out);
                }
            }
        }
    }

    /// Collects every identifier written in the subtree.
    pub fn collect_writes(&self, id: NodeId, out: &mut Vec<String>) {
        match self.kind(id) {
            NodeKind::Assign { target, .. } | NodeKind::CompoundAssign { target, .. } => {
                if let Some(name) = self.identifier(*target) {
                    out.push(name.to_string());
                }
            }
            NodeKind::Declaration { name, .. } => out.push(name.clone()),
            _ => {}
        }
        for child in self.children(id) {
            self.collect_writes(child, out);
        }
    }

    /// Finds the first read of `name` among the parts of `id` that are evaluated once.
    ///
    /// # Returns
    ///
    /// `None` if no such read exists, even if `name` is read inside a body.
    #[must_use]
    pub fn first_read(&self, id: NodeId, name: &str) -> Option<ReadSite> {
        let mut seen = false;
        self.scan_read(id, name, false, &mut seen)
            .map(|(node, conditional)| ReadSite {
                node,
                after_side_effect: seen,
                conditional,
            })
    }

    fn scan_read(
        &self,
        id: NodeId,
        name: &str,
        conditional: bool,
        seen: &mut bool,
    ) -> Option<(NodeId, bool)> {
        match self.kind(id) {
            NodeKind::Identifier(id_name) => {
                return id_name
                    .eq_ignore_ascii_case(name)
                    .then_some((id, conditional));
            }
            NodeKind::Binary {
                op: BinaryOp::And | BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                return self
                    .scan_read(lhs, name, conditional, seen)
                    .or_else(|| self.scan_read(rhs, name, true, seen));
            }
            _ => {}
        }
        for child in self.evaluated_children(id) {
            if let Some(found) = self.scan_read(child, name, conditional, seen) {
                return Some(found);
            }
        }
        if self.has_own_side_effect(id) {
            *seen = true;
        }
        None
    }

    /// Overwrites `target` with a copy of `replacement`'s variant.
    ///
    /// Children are shared, not copied; `replacement` must not be used elsewhere afterwards.
    pub fn replace_with(&mut self, target: NodeId, replacement: NodeId) {
        let node = self.nodes[replacement.0].clone();
        let slot = &mut self.nodes[target.0];
        slot.kind = node.kind;
        slot.origins.extend(node.origins);
    }

    /// Deep-copies a subtree.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id.0].clone();
        let kind = match node.kind {
            NodeKind::Unary { op, operand } => NodeKind::Unary {
                op,
                operand: self.deep_clone(operand),
            },
            NodeKind::Binary { op, lhs, rhs } => NodeKind::Binary {
                op,
                lhs: self.deep_clone(lhs),
                rhs: self.deep_clone(rhs),
            },
            NodeKind::Cast { value, type_name } => NodeKind::Cast {
                value: self.deep_clone(value),
                type_name,
            },
            NodeKind::Is { value, type_name } => NodeKind::Is {
                value: self.deep_clone(value),
                type_name,
            },
            NodeKind::Call {
                receiver,
                method,
                args,
            } => NodeKind::Call {
                receiver: match receiver {
                    Receiver::Object(object) => Receiver::Object(self.deep_clone(object)),
                    other => other,
                },
                method,
                args: self.deep_clone_all(&args),
            },
            NodeKind::Property { object, name } => NodeKind::Property {
                object: self.deep_clone(object),
                name,
            },
            NodeKind::Field { object, name } => NodeKind::Field {
                object: self.deep_clone(object),
                name,
            },
            NodeKind::Index { array, index } => NodeKind::Index {
                array: self.deep_clone(array),
                index: self.deep_clone(index),
            },
            NodeKind::Length { array } => NodeKind::Length {
                array: self.deep_clone(array),
            },
            NodeKind::NewArray { element_type, size } => NodeKind::NewArray {
                element_type,
                size: self.deep_clone(size),
            },
            NodeKind::ArrayCall {
                array,
                method,
                args,
            } => NodeKind::ArrayCall {
                array: self.deep_clone(array),
                method,
                args: self.deep_clone_all(&args),
            },
            NodeKind::Assign { target, value } => NodeKind::Assign {
                target: self.deep_clone(target),
                value: self.deep_clone(value),
            },
            NodeKind::CompoundAssign { op, target, value } => NodeKind::CompoundAssign {
                op,
                target: self.deep_clone(target),
                value: self.deep_clone(value),
            },
            NodeKind::Return(value) => NodeKind::Return(value.map(|v| self.deep_clone(v))),
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => NodeKind::If {
                condition: self.deep_clone(condition),
                then: self.deep_clone(then),
                otherwise: otherwise.map(|o| self.deep_clone(o)),
            },
            NodeKind::While { condition, body } => NodeKind::While {
                condition: self.deep_clone(condition),
                body: self.deep_clone(body),
            },
            NodeKind::Guard { guards, body } => NodeKind::Guard {
                guards,
                body: self.deep_clone(body),
            },
            NodeKind::TryGuard {
                guards,
                body,
                otherwise,
            } => NodeKind::TryGuard {
                guards,
                body: self.deep_clone(body),
                otherwise: otherwise.map(|o| self.deep_clone(o)),
            },
            NodeKind::Sequence(statements) => NodeKind::Sequence(self.deep_clone_all(&statements)),
            NodeKind::Declaration {
                name,
                type_name,
                init,
            } => NodeKind::Declaration {
                name,
                type_name,
                init: init.map(|i| self.deep_clone(i)),
            },
            leaf @ (NodeKind::Literal(_)
            | NodeKind::Identifier(_)
            | NodeKind::NewStruct { .. }
            | NodeKind::TryLock { .. }
            | NodeKind::LockGuards(_)
            | NodeKind::UnlockGuards(_)) => leaf,
        };
        self.nodes.push(Node {
            kind,
            origins: node.origins,
        });
        NodeId(self.nodes.len() - 1)
    }

    fn deep_clone_all(&mut self, ids: &[NodeId]) -> Vec<NodeId> {
        ids.iter().map(|id| self.deep_clone(*id)).collect()
    }

    /// Builds the logical negation of `condition`, folding `!!x` and `!(a == b)`.
    pub fn negate(&mut self, condition: NodeId) -> NodeId {
        let origins = self.node(condition).origins.clone();
        let negated = match self.kind(condition).clone() {
            NodeKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => return operand,
            NodeKind::Binary {
                op: BinaryOp::Eq,
                lhs,
                rhs,
            } => NodeKind::Binary {
                op: BinaryOp::Ne,
                lhs,
                rhs,
            },
            NodeKind::Binary {
                op: BinaryOp::Ne,
                lhs,
                rhs,
            } => NodeKind::Binary {
                op: BinaryOp::Eq,
                lhs,
                rhs,
            },
            _ => NodeKind::Unary {
                op: UnaryOp::Not,
                operand: condition,
            },
        };
        let id = self.add(negated);
        self.add_origins(id, &origins);
        id
    }

    /// Union of the origins of every node in the subtree.
    #[must_use]
    pub fn subtree_origins(&self, id: NodeId) -> BTreeSet<usize> {
        let mut origins = BTreeSet::new();
        self.gather_origins(id, &mut origins);
        origins
    }

    fn gather_origins(&self, id: NodeId, out: &mut BTreeSet<usize>) {
        out.extend(self.node(id).origins.iter().copied());
        for child in self.children(id) {
            self.gather_origins(child, out);
        }
    }

    /// Origins of a statement's own line: the node plus its once-evaluated parts.
    #[must_use]
    pub fn header_origins(&self, id: NodeId) -> BTreeSet<usize> {
        let mut origins = self.node(id).origins.clone();
        let children = match self.kind(id) {
            NodeKind::While { condition, .. } => vec![*condition],
            _ => self.evaluated_children(id),
        };
        for child in children {
            self.gather_origins(child, &mut origins);
        }
        origins
    }

    /// Renames every occurrence of `from` in the subtree, declarations included.
    pub fn rename(&mut self, id: NodeId, from: &str, to: &str) {
        match self.kind_mut(id) {
            NodeKind::Identifier(name) | NodeKind::Declaration { name, .. }
                if name.eq_ignore_ascii_case(from) =>
            {
                *name = to.to_string();
            }
            _ => {}
        }
        for child in self.children(id) {
            self.rename(child, from, to);
        }
    }

    /// Visits the subtree in pre-order.
    pub fn walk(&self, id: NodeId, visit: &mut impl FnMut(NodeId)) {
        visit(id);
        for child in self.children(id) {
            self.walk(child, visit);
        }
    }

    /// Renders the subtree as an indented outline for trace logs.
    #[must_use]
    pub fn dump(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(id, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let label = match self.kind(id) {
            NodeKind::Literal(value) => format!("Literal {value}"),
            NodeKind::Identifier(name) => format!("Identifier {}", display_name(name)),
            NodeKind::Unary { op, .. } => format!("Unary {}", op.symbol()),
            NodeKind::Binary { op, .. } => format!("Binary {}", op.symbol()),
            NodeKind::Cast { type_name, .. } => format!("Cast {type_name}"),
            NodeKind::Is { type_name, .. } => format!("Is {type_name}"),
            NodeKind::Call {
                receiver, method, ..
            } => match receiver {
                Receiver::SelfObject => format!("Call {method}"),
                Receiver::Parent => format!("Call Parent.{method}"),
                Receiver::Static(type_name) => format!("Call {type_name}.{method}"),
                Receiver::Object(_) => format!("Call .{method}"),
            },
            NodeKind::Property { name, .. } => format!("Property {name}"),
            NodeKind::Field { name, .. } => format!("Field {name}"),
            NodeKind::Index { .. } => "Index".to_string(),
            NodeKind::Length { .. } => "Length".to_string(),
            NodeKind::NewArray { element_type, .. } => format!("NewArray {element_type}"),
            NodeKind::NewStruct { type_name } => format!("NewStruct {type_name}"),
            NodeKind::ArrayCall { method, .. } => format!("ArrayCall {}", method.name()),
            NodeKind::TryLock { guards } => format!("TryLock {}", guards.join(", ")),
            NodeKind::Assign { .. } => "Assign".to_string(),
            NodeKind::CompoundAssign { op, .. } => format!("CompoundAssign {}=", op.symbol()),
            NodeKind::Return(_) => "Return".to_string(),
            NodeKind::If { .. } => "If".to_string(),
            NodeKind::While { .. } => "While".to_string(),
            NodeKind::Guard { guards, .. } => format!("Guard {}", guards.join(", ")),
            NodeKind::TryGuard { guards, .. } => format!("TryGuard {}", guards.join(", ")),
            NodeKind::LockGuards(guards) => format!("LockGuards {}", guards.join(", ")),
            NodeKind::UnlockGuards(guards) => format!("UnlockGuards {}", guards.join(", ")),
            NodeKind::Sequence(_) => "Sequence".to_string(),
            NodeKind::Declaration {
                name, type_name, ..
            } => format!("Declaration {type_name} {name}"),
        };
        let origins = &self.node(id).origins;
        out.push_str(&"  ".repeat(depth));
        out.push_str(&label);
        if !origins.is_empty() {
            let ips: Vec<String> = origins.iter().map(ToString::to_string).collect();
            out.push_str(&format!(" @[{}]", ips.join(",")));
        }
        out.push('\n');
        for child in self.children(id) {
            self.dump_into(child, depth + 1, out);
        }
    }
}
