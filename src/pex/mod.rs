//! In-memory model of a compiled Papyrus script.
//!
//! The model mirrors what a `.pex` reader produces once the string table has been
//! resolved: every identifier is a plain [`String`] and every operand a typed [`Value`].
//! Nothing in here performs I/O.
//!
//! # Structure
//!
//! ```text
//! Binary
//! ├── script_type, user_flags
//! ├── objects
//! │   └── Object
//! │       ├── variables, properties (with getter/setter bodies), structs, guards
//! │       └── states
//! │           └── State
//! │               └── functions
//! │                   └── Function
//! │                       ├── params, locals, return_type, flags
//! │                       └── instructions: Vec<Instruction>
//! └── debug_info
//!     ├── functions (per-instruction line numbers)
//!     ├── property_groups
//!     └── struct_orders
//! ```

mod assembler;
mod binary;
mod debug;
mod function;
mod instruction;
mod object;
mod opcode;
mod value;

pub use assembler::FunctionAssembler;
pub use binary::{Binary, ScriptType, UserFlag};
pub use debug::{DebugInfo, FunctionInfo, FunctionKind, PropertyGroup, StructOrder};
pub use function::{Function, FunctionFlags, Local, Parameter};
pub use instruction::Instruction;
pub use object::{
    Object, ObjectFlags, Property, PropertyFlags, State, StructInfo, StructMember, Variable,
};
pub use opcode::OpCode;
pub use value::{
    display_name, is_autovar, is_temp, Value, AUTOVAR_SUFFIX, NONE_VAR, TEMP_PREFIX,
};
