//! Source text generation.
//!
//! [`CodeGenerator`] renders a structured tree to indented Papyrus lines. Every line keeps
//! the instruction indices it was produced from; [`layout`] turns those into the debug line
//! map, inserts blank lines where the original source had gaps and appends the optional
//! `#DEBUG_LINE_NO` suffix.
//!
//! Parentheses are emitted from operator precedence alone: a left operand is wrapped when
//! it binds looser than its parent, a right operand also when it binds equally.

use std::collections::BTreeSet;

use crate::{
    decompiler::{
        config::DecompilerConfig,
        tree::{NodeId, NodeKind, Receiver, Tree},
    },
    pex::{display_name, FunctionInfo, Instruction},
};

/// Comment prefix of generated warnings.
pub const WARNING_PREFIX: &str = ";***";

/// Precedence of primary expressions (names, literals, calls, member access).
const PRIMARY: u8 = 0;
/// Precedence of `as`.
const CAST: u8 = 1;
/// Precedence of `!` and unary `-`.
const UNARY: u8 = 2;
/// Precedence of `is`, shared with the comparisons.
const IS: u8 = 5;

/// One generated line before layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    /// Nesting depth
    pub indent: usize,
    /// Text without indentation
    pub text: String,
    /// Instructions the line was produced from
    pub origins: BTreeSet<usize>,
}

impl Line {
    /// A line that maps to no instruction.
    #[must_use]
    pub fn unmapped(indent: usize, text: impl Into<String>) -> Self {
        Line {
            indent,
            text: text.into(),
            origins: BTreeSet::new(),
        }
    }
}

/// Final text and line map of a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Indented lines
    pub lines: Vec<String>,
    /// `line_map[i]` lists the source lines behind `lines[i]`
    pub line_map: Vec<Vec<u16>>,
}

/// Renders a tree to [`Line`]s.
pub struct CodeGenerator<'a> {
    tree: &'a Tree,
    instructions: &'a [Instruction],
    comment_asm: bool,
    lines: Vec<Line>,
}

impl<'a> CodeGenerator<'a> {
    /// Creates a generator over `tree`.
    ///
    /// `instructions` are only read when assembly comments are enabled.
    #[must_use]
    pub fn new(tree: &'a Tree, instructions: &'a [Instruction]) -> Self {
        CodeGenerator {
            tree,
            instructions,
            comment_asm: false,
            lines: Vec::new(),
        }
    }

    /// Precedes every statement with the instructions it came from.
    #[must_use]
    pub fn with_comment_asm(mut self, enabled: bool) -> Self {
        self.comment_asm = enabled;
        self
    }

    /// Renders the sequence `root`.
    #[must_use]
    pub fn generate(mut self, root: NodeId) -> Vec<Line> {
        self.sequence(root, 0);
        self.lines
    }

    fn push(&mut self, indent: usize, text: String, origins: BTreeSet<usize>) {
        self.lines.push(Line {
            indent,
            text,
            origins,
        });
    }

    fn sequence(&mut self, sequence: NodeId, depth: usize) {
        for &statement in self.tree.statements(sequence) {
            self.statement(statement, depth);
        }
    }

    fn asm_comments(&mut self, origins: &BTreeSet<usize>, depth: usize) {
        if !self.comment_asm {
            return;
        }
        for &ip in origins {
            if let Some(instruction) = self.instructions.get(ip) {
                self.push(depth, format!("; {ip}: {instruction}"), BTreeSet::new());
            }
        }
    }

    fn statement(&mut self, id: NodeId, depth: usize) {
        let tree = self.tree;
        let header = tree.header_origins(id);
        match tree.kind(id) {
            NodeKind::If { .. } => self.if_chain(id, depth, "If"),
            NodeKind::While { condition, body } => {
                self.asm_comments(&header, depth);
                self.push(depth, format!("While {}", expression(tree, *condition)), header);
                self.sequence(*body, depth + 1);
                self.push(depth, "EndWhile".to_string(), BTreeSet::new());
            }
            NodeKind::Guard { guards, body } => {
                self.asm_comments(&header, depth);
                let text = experimental(format!("Guard {}", guards.join(", ")), "Guard");
                self.push(depth, text, header);
                self.sequence(*body, depth + 1);
                let end = experimental("EndGuard".to_string(), "EndGuard");
                self.push(depth, end, BTreeSet::new());
            }
            NodeKind::TryGuard {
                guards,
                body,
                otherwise,
            } => {
                self.asm_comments(&header, depth);
                let text = experimental(format!("TryGuard {}", guards.join(", ")), "TryGuard");
                self.push(depth, text, header);
                self.sequence(*body, depth + 1);
                if let Some(otherwise) = otherwise {
                    self.push(depth, "Else".to_string(), BTreeSet::new());
                    self.sequence(*otherwise, depth + 1);
                }
                let end = experimental("EndTryGuard".to_string(), "EndTryGuard");
                self.push(depth, end, BTreeSet::new());
            }
            NodeKind::Sequence(_) => self.sequence(id, depth),
            _ => {
                let origins = tree.subtree_origins(id);
                self.asm_comments(&origins, depth);
                self.push(depth, simple_statement(tree, id), origins);
            }
        }
    }

    /// Renders an `If`, folding an `Else` that holds a single `If` into `ElseIf`.
    fn if_chain(&mut self, id: NodeId, depth: usize, keyword: &str) {
        let tree = self.tree;
        let NodeKind::If {
            condition,
            then,
            otherwise,
        } = *tree.kind(id)
        else {
            return;
        };
        let header = tree.header_origins(id);
        self.asm_comments(&header, depth);
        self.push(
            depth,
            format!("{keyword} {}", expression(tree, condition)),
            header,
        );
        self.sequence(then, depth + 1);

        match otherwise {
            Some(otherwise) => match tree.statements(otherwise) {
                [single] if matches!(tree.kind(*single), NodeKind::If { .. }) => {
                    self.if_chain(*single, depth, "ElseIf");
                    return;
                }
                _ => {
                    self.push(depth, "Else".to_string(), BTreeSet::new());
                    self.sequence(otherwise, depth + 1);
                }
            },
            None => {}
        }
        self.push(depth, "EndIf".to_string(), BTreeSet::new());
    }
}

fn experimental(text: String, keyword: &str) -> String {
    format!("{text} {WARNING_PREFIX} WARNING: Experimental syntax, may be incorrect: {keyword}")
}

/// Renders a statement that fits on one line.
fn simple_statement(tree: &Tree, id: NodeId) -> String {
    match tree.kind(id) {
        NodeKind::Assign { target, value } => {
            format!("{} = {}", expression(tree, *target), expression(tree, *value))
        }
        NodeKind::CompoundAssign { op, target, value } => format!(
            "{} {}= {}",
            expression(tree, *target),
            op.symbol(),
            expression(tree, *value)
        ),
        NodeKind::Return(None) => "Return".to_string(),
        NodeKind::Return(Some(value)) => format!("Return {}", expression(tree, *value)),
        NodeKind::Declaration {
            name,
            type_name,
            init,
        } => match init {
            Some(init) => format!("{type_name} {name} = {}", expression(tree, *init)),
            None => format!("{type_name} {name}"),
        },
        NodeKind::LockGuards(guards) => {
            format!("{WARNING_PREFIX} WARNING: unmatched LockGuards {}", guards.join(", "))
        }
        NodeKind::UnlockGuards(guards) => {
            format!("{WARNING_PREFIX} WARNING: unmatched UnlockGuards {}", guards.join(", "))
        }
        _ => expression(tree, id),
    }
}

fn precedence(tree: &Tree, id: NodeId) -> u8 {
    match tree.kind(id) {
        NodeKind::Cast { .. } => CAST,
        NodeKind::Unary { .. } => UNARY,
        NodeKind::Binary { op, .. } => op.precedence(),
        NodeKind::Is { .. } => IS,
        _ => PRIMARY,
    }
}

/// Renders `id`, parenthesized if its precedence exceeds `limit`.
fn operand(tree: &Tree, id: NodeId, limit: u8) -> String {
    let text = expression(tree, id);
    if precedence(tree, id) > limit {
        format!("({text})")
    } else {
        text
    }
}

fn arguments(tree: &Tree, args: &[NodeId]) -> String {
    args.iter()
        .map(|&arg| expression(tree, arg))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders an expression.
#[must_use]
pub fn expression(tree: &Tree, id: NodeId) -> String {
    match tree.kind(id) {
        NodeKind::Literal(value) => value.to_string(),
        NodeKind::Identifier(name) => display_name(name).to_string(),
        NodeKind::Unary { op, operand: inner } => {
            format!("{}{}", op.symbol(), operand(tree, *inner, UNARY - 1))
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let level = op.precedence();
            format!(
                "{} {} {}",
                operand(tree, *lhs, level),
                op.symbol(),
                operand(tree, *rhs, level - 1)
            )
        }
        NodeKind::Cast { value, type_name } => {
            format!("{} as {type_name}", operand(tree, *value, CAST))
        }
        NodeKind::Is { value, type_name } => {
            format!("{} is {type_name}", operand(tree, *value, IS))
        }
        NodeKind::Call {
            receiver,
            method,
            args,
        } => {
            let args = arguments(tree, args);
            match receiver {
                Receiver::SelfObject => format!("{method}({args})"),
                Receiver::Parent => format!("Parent.{method}({args})"),
                Receiver::Static(type_name) => format!("{type_name}.{method}({args})"),
                Receiver::Object(object) => {
                    format!("{}.{method}({args})", operand(tree, *object, PRIMARY))
                }
            }
        }
        NodeKind::Property { object, name } | NodeKind::Field { object, name } => {
            format!("{}.{name}", operand(tree, *object, PRIMARY))
        }
        NodeKind::Index { array, index } => format!(
            "{}[{}]",
            operand(tree, *array, PRIMARY),
            expression(tree, *index)
        ),
        NodeKind::Length { array } => format!("{}.Length", operand(tree, *array, PRIMARY)),
        NodeKind::NewArray { element_type, size } => {
            format!("new {element_type}[{}]", expression(tree, *size))
        }
        NodeKind::NewStruct { type_name } => format!("new {type_name}"),
        NodeKind::ArrayCall {
            array,
            method,
            args,
        } => format!(
            "{}.{}({})",
            operand(tree, *array, PRIMARY),
            method.name(),
            arguments(tree, args)
        ),
        NodeKind::TryLock { guards } => format!("TryLock({})", guards.join(", ")),
        NodeKind::Assign { .. }
        | NodeKind::CompoundAssign { .. }
        | NodeKind::Return(_)
        | NodeKind::Declaration { .. }
        | NodeKind::LockGuards(_)
        | NodeKind::UnlockGuards(_) => simple_statement(tree, id),
        NodeKind::If { .. }
        | NodeKind::While { .. }
        | NodeKind::Guard { .. }
        | NodeKind::TryGuard { .. }
        | NodeKind::Sequence(_) => String::new(),
    }
}

/// Maps lines to source lines, inserts blank lines and appends line suffixes.
#[must_use]
pub fn layout(lines: &[Line], info: Option<&FunctionInfo>, config: &DecompilerConfig) -> Layout {
    let mut out = Layout::default();
    let mut previous: Vec<u16> = Vec::new();

    for line in lines {
        let mapped = info
            .map(|info| info.lines_for(&line.origins))
            .unwrap_or_default();

        if config.preserve_blank_lines {
            if let (Some(&last), Some(&current)) = (previous.last(), mapped.last()) {
                let gap = i32::from(current) - i32::from(last);
                for _ in 1..gap {
                    out.lines.push(String::new());
                    out.line_map.push(Vec::new());
                }
            }
        }

        let mut text = format!("{}{}", config.indent.repeat(line.indent), line.text);
        if config.print_debug_line_numbers && !mapped.is_empty() {
            let numbers: Vec<String> = mapped.iter().map(ToString::to_string).collect();
            text.push_str(&format!(" ; #DEBUG_LINE_NO:{}", numbers.join(",")));
        }
        out.lines.push(text);
        out.line_map.push(mapped.clone());
        previous = mapped;
    }
    out
}
