//! Function bodies and signatures.

use bitflags::bitflags;

use crate::pex::Instruction;

bitflags! {
    /// Function flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        /// Declared `Global`, no `self`
        const GLOBAL = 0x01;
        /// Declared `Native`, no body
        const NATIVE = 0x02;
    }
}

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Papyrus type name
    pub type_name: String,
}

/// A function local.
///
/// Readers that keep the local table attach its type; locals synthesized without one are
/// typed by inference during decompilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    /// Local name, `::tempN` for compiler temporaries
    pub name: String,
    /// Declared type, if known
    pub type_name: Option<String>,
}

impl Local {
    /// The declared type; a blank type name counts as unknown.
    #[must_use]
    pub fn declared_type(&self) -> Option<&str> {
        self.type_name
            .as_deref()
            .map(str::trim)
            .filter(|type_name| !type_name.is_empty())
    }
}

/// A function: signature plus body.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Declared return type, `None` for functions that return nothing
    pub return_type: String,
    /// Parameters in declaration order
    pub params: Vec<Parameter>,
    /// Locals, including compiler temporaries
    pub locals: Vec<Local>,
    /// The body
    pub instructions: Vec<Instruction>,
    /// Global/native flags
    pub flags: FunctionFlags,
    /// Documentation comment
    pub doc_string: String,
    /// User flag bits
    pub user_flags: u32,
}

impl Function {
    /// Creates an empty function with the given name and return type.
    #[must_use]
    pub fn new(name: impl Into<String>, return_type: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            return_type: return_type.into(),
            ..Default::default()
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    /// Adds a typed local. An empty type name leaves the type to inference.
    #[must_use]
    pub fn with_local(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        self.locals.push(Local {
            name: name.into(),
            type_name: (!type_name.trim().is_empty()).then_some(type_name),
        });
        self
    }

    /// Adds a local whose type has to be inferred.
    #[must_use]
    pub fn with_untyped_local(mut self, name: impl Into<String>) -> Self {
        self.locals.push(Local {
            name: name.into(),
            type_name: None,
        });
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Sets the flag word.
    #[must_use]
    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// `Native` functions have no body to decompile.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.flags.contains(FunctionFlags::NATIVE)
    }

    /// `Global` functions have no `self`.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.flags.contains(FunctionFlags::GLOBAL)
    }

    /// Whether the function returns nothing.
    #[must_use]
    pub fn returns_none(&self) -> bool {
        self.return_type.is_empty() || self.return_type.eq_ignore_ascii_case("none")
    }

    /// Looks up a parameter by name (case-insensitive).
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params
            .iter()
            .find(|param| param.name.eq_ignore_ascii_case(name))
    }

    /// Looks up a local by name (case-insensitive).
    #[must_use]
    pub fn local(&self, name: &str) -> Option<&Local> {
        self.locals
            .iter()
            .find(|local| local.name.eq_ignore_ascii_case(name))
    }
}
