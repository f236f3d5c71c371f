//! # pexscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the pexscope library. Import this module to get quick access to the essential
//! types for decompiling Papyrus bytecode.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pexscope operations
pub use crate::Error;

/// The result type used throughout pexscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The decompiler and its output
pub use crate::decompiler::{DecompiledFunction, Decompiler, FunctionOutcome};

/// Configuration
pub use crate::decompiler::{DebugFunctionPolicy, DecompilerConfig};

// ================================================================================================
// Binary Model
// ================================================================================================

/// Containers
pub use crate::pex::{Binary, Object, ScriptType, State};

/// Functions and their bytecode
pub use crate::pex::{Function, FunctionAssembler, Instruction, OpCode, Value};

/// Members
pub use crate::pex::{Property, Variable};

/// Debug tables
pub use crate::pex::{DebugInfo, FunctionInfo, FunctionKind};

// ================================================================================================
// Syntax Tree
// ================================================================================================

/// The recovered syntax tree
pub use crate::decompiler::{NodeId, NodeKind, Stage, Tree, TreePass};
