// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # pexscope
//!
//! A decompilation engine for Papyrus, the scripting language of the Creation Engine
//! (Skyrim, Fallout 4 and Starfield). `pexscope` takes the linear, temporary-heavy
//! bytecode found in compiled `.pex` scripts and recovers structured, recompilable
//! Papyrus source from it.
//!
//! ## Features
//!
//! - **🧱 Basic block partitioning** - Jump-target analysis with strict bounds checking
//! - **🔀 Control flow recovery** - `If`/`ElseIf`/`Else`, `While` and short-circuit `&&`/`||`
//! - **🌳 Expression rebuilding** - Liveness-driven inlining of compiler temporaries
//! - **🏷️ Type and scope resolution** - Inferred declarations placed at their innermost legal scope
//! - **🔒 Guard reconstruction** - Starfield `Guard`/`TryGuard` blocks lifted from lock instructions
//! - **🗺️ Debug line mapping** - Every emitted line carries the original source lines it covers
//! - **⚡ Parallel** - Objects decompile function-by-function across a rayon pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pexscope::prelude::*;
//!
//! # fn load() -> Binary { unimplemented!() }
//! let binary: Binary = load();
//! let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
//!
//! for object in &binary.objects {
//!     for outcome in decompiler.decompile_object(object) {
//!         match outcome.result {
//!             Ok(function) => {
//!                 for line in function.lines() {
//!                     println!("{line}");
//!                 }
//!             }
//!             Err(error) => eprintln!("{}: {}", outcome.function, error),
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`pex`] - The in-memory binary model consumed by the engine, plus a label-resolving
//!   [`pex::FunctionAssembler`] for building instruction streams by hand
//! - [`decompiler`] - The per-function pipeline: block building, boolean folding, control
//!   flow recovery, expression rebuilding, guard lifting, cleaning, scope resolution and
//!   code generation
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Malformed bytecode aborts the function
//! being decompiled and nothing else; see [`Error`] for the individual failure modes.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use pexscope::prelude::*;
///
/// let config = DecompilerConfig::default().with_comment_asm(true);
/// assert!(config.comment_asm);
/// ```
pub mod prelude;

/// The consumed Pex binary model.
///
/// Objects, states, functions, instructions and debug tables, as handed to the engine by a
/// container reader. The model is plain data: it can be built programmatically and is shared
/// read-only between the worker threads of [`decompiler::Decompiler::decompile_object`].
///
/// # Key Types
///
/// - [`pex::Binary`] - A whole script file
/// - [`pex::Object`] - One script object with its states, properties and variables
/// - [`pex::Function`] - One function body
/// - [`pex::Instruction`] / [`pex::OpCode`] - The bytecode
/// - [`pex::DebugInfo`] - Line tables and declaration ordering
pub mod pex;

/// The decompilation engine.
///
/// # Key Types
///
/// - [`decompiler::Decompiler`] - Entry point, one per binary
/// - [`decompiler::DecompilerConfig`] - Output and diagnostic options
/// - [`decompiler::DecompiledFunction`] - Source lines, line map and the final syntax tree
pub mod decompiler;

/// `pexscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use pexscope::{pex::Function, Result};
///
/// fn check(function: &Function) -> Result<()> {
///     for instruction in &function.instructions {
///         instruction.validate()?;
///     }
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `pexscope` Error type
///
/// The main error type for all operations in this crate. See the variants for the
/// individual failure modes.
pub use error::Error;

pub use decompiler::{DecompiledFunction, Decompiler, DecompilerConfig};
pub use pex::{Binary, ScriptType};
