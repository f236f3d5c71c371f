//! Papyrus decompilation engine.
//!
//! This module turns the instruction stream of one [`crate::pex::Function`] into
//! structured Papyrus source. All work happens on a per-function arena ([`Tree`]); the
//! only shared state is the read-only binary model, so whole objects are decompiled in
//! parallel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      Decompilation Pipeline                          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Input: Function (instructions, params, locals)                      │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  BlockGraph::build    leaders, jump targets, operand validation      │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  lower + rebuild      one statement per instruction, temps inlined   │
//! │           │           inside each block                              │
//! │           ▼                                                          │
//! │  fold_booleans        short-circuit && / || merged into conditions   │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  FlowRecoverer        If / Else / While from the block graph         │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  Tree passes          ExpressionRebuilder → GuardLifter →            │
//! │           │           TreeCleaner, each run until stable             │
//! │           ▼                                                          │
//! │  ScopeResolver        temp names, declarations, bindings             │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  CodeGenerator        lines → fixups → layout and line map           │
//! │                                                                      │
//! │  Output: DecompiledFunction                                          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`Decompiler`] - Entry point; runs the pipeline for a function or a whole object
//! - [`DecompilerConfig`] - Output and diagnostic options
//! - [`Tree`] / [`NodeKind`] - The arena-backed syntax tree every stage works on
//! - [`TreePass`] - The trait implemented by the tree rewrites
//! - [`fixups`] - Registry of rewrites for known compiler defects
//! - [`TraceLog`] - Per-function stage dumps, enabled by [`DecompilerConfig::trace_dir`]
//!
//! # Example
//!
//! ```rust,no_run
//! use pexscope::{
//!     decompiler::{Decompiler, DecompilerConfig},
//!     pex::{Binary, Function, FunctionAssembler, Object, ScriptType, State, Value},
//! };
//!
//! # fn main() -> pexscope::Result<()> {
//! let mut asm = FunctionAssembler::new();
//! asm.ret(Value::Integer(5))?;
//! let (instructions, _) = asm.finish()?;
//!
//! let function = Function::new("GetValue", "Int").with_instructions(instructions);
//! let object = Object::new("MyScript").with_state(State::new("").with_function(function));
//! let binary = Binary::new(ScriptType::Fallout4).with_object(object);
//!
//! let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
//! let result = decompiler.decompile_named("MyScript", "", "GetValue")?;
//! assert_eq!(result.lines(), ["Return 5"]);
//! # Ok(())
//! # }
//! ```

use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

// Infrastructure
mod config;
mod pass;
mod trace;
mod tree;

// Block level
mod blocks;
mod booleans;
mod expressions;
mod liveness;
mod lower;
mod types;

// Tree level
mod cleaner;
mod flow;
mod guards;
mod scope;

// Output
mod codegen;
pub mod fixups;

// Driver
mod pipeline;

pub use blocks::{BasicBlock, BlockExit, BlockGraph};
pub use booleans::fold_booleans;
pub use cleaner::TreeCleaner;
pub use codegen::{expression, layout, CodeGenerator, Layout, Line, WARNING_PREFIX};
pub use config::{DebugFunctionPolicy, DecompilerConfig};
pub use expressions::ExpressionRebuilder;
pub use flow::FlowRecoverer;
pub use guards::GuardLifter;
pub use liveness::{live_after, Liveness, TempSet};
pub use lower::{lower, predecessors, FlowBlock, FlowBlocks, FlowExit};
pub use pass::{run_together_until_stable, run_until_stable, TreePass, MAX_PASS_ROUNDS};
pub use pipeline::{DecompiledFunction, Decompiler, FunctionOutcome};
pub use scope::{Binding, BindingKind, ScopeResolver, Scopes};
pub use trace::TraceLog;
pub use tree::{ArrayMethod, BinaryOp, Node, NodeId, NodeKind, ReadSite, Receiver, Tree, UnaryOp};
pub use types::{element_type_of, TypeTable, VAR_TYPE};

/// The states a function passes through, in execution order.
///
/// Used as section headers in trace logs; the `Display` form is the variant name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumCount, IntoStaticStr,
)]
pub enum Stage {
    /// The instruction listing
    Raw,
    /// Lowered blocks with per-block inlining
    Blocked,
    /// Short-circuit operators folded
    BooleanRebuilt,
    /// Structured `If`/`While` tree
    ControlFlowRecovered,
    /// Temporaries inlined across the tree
    ExpressionRebuilt,
    /// `Guard`/`TryGuard` blocks formed
    GuardLifted,
    /// Cleanup rewrites applied
    Cleaned,
    /// Names resolved and declarations placed
    ScopeResolved,
    /// Final text
    Generated,
}
