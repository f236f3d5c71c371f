//! Script objects and their members.
//!
//! An [`Object`] is one script: its parent, variables, properties, structs, guards and
//! states. Functions live inside states; the empty-named state is the default one.
//! All name lookups are case-insensitive, as Papyrus identifiers are.

use bitflags::bitflags;

use crate::pex::{Function, Value};

bitflags! {
    /// Object flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u8 {
        /// Declared `Const`
        const CONST = 0x01;
        /// Declared `Native`
        const NATIVE = 0x02;
    }
}

bitflags! {
    /// Property flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u8 {
        /// Has a getter or an autovar read path
        const READ = 0x01;
        /// Has a setter or an autovar write path
        const WRITE = 0x02;
        /// Backed by an autovar
        const AUTOVAR = 0x04;
    }
}

/// An object (script-level) variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Variable name, `::Name_var` for property backing variables
    pub name: String,
    /// Papyrus type name
    pub type_name: String,
    /// Initial value
    pub default: Value,
    /// Declared `Const`
    pub is_const: bool,
    /// User flag bits
    pub user_flags: u32,
}

impl Variable {
    /// Creates a variable with a `None` default.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            type_name: type_name.into(),
            default: Value::None,
            is_const: false,
            user_flags: 0,
        }
    }
}

/// A property with optional accessors.
#[derive(Debug, Clone, Default)]
pub struct Property {
    /// Property name
    pub name: String,
    /// Papyrus type name
    pub type_name: String,
    /// Flag word
    pub flags: PropertyFlags,
    /// Backing variable for auto properties
    pub auto_var: Option<String>,
    /// Explicit getter body
    pub getter: Option<Function>,
    /// Explicit setter body
    pub setter: Option<Function>,
    /// Documentation comment
    pub doc_string: String,
    /// User flag bits
    pub user_flags: u32,
}

impl Property {
    /// Creates an auto property backed by `::<name>_var`.
    #[must_use]
    pub fn auto(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Property {
            auto_var: Some(format!("::{name}_var")),
            name,
            type_name: type_name.into(),
            flags: PropertyFlags::READ | PropertyFlags::WRITE | PropertyFlags::AUTOVAR,
            ..Default::default()
        }
    }

    /// Whether the property is backed by an autovar.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.flags.contains(PropertyFlags::AUTOVAR)
    }
}

/// A struct member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    /// Member name
    pub name: String,
    /// Papyrus type name
    pub type_name: String,
    /// Initial value
    pub default: Value,
    /// Declared `Const`
    pub is_const: bool,
}

/// A struct definition (Fallout 4 and Starfield).
#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    /// Struct name
    pub name: String,
    /// Members in binary order
    pub members: Vec<StructMember>,
}

impl StructInfo {
    /// Looks up a member by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members
            .iter()
            .find(|member| member.name.eq_ignore_ascii_case(name))
    }
}

/// A state and its function overrides.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// State name, empty for the default state
    pub name: String,
    /// Functions defined in this state
    pub functions: Vec<Function>,
}

impl State {
    /// Creates a state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        State {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Adds a function.
    #[must_use]
    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|function| function.name.eq_ignore_ascii_case(name))
    }
}

/// A script object.
#[derive(Debug, Clone, Default)]
pub struct Object {
    /// Script name
    pub name: String,
    /// Parent script, empty if none
    pub parent: String,
    /// State entered on load
    pub auto_state: String,
    /// Const/native flags
    pub flags: ObjectFlags,
    /// Object variables, including property backing variables
    pub variables: Vec<Variable>,
    /// Properties
    pub properties: Vec<Property>,
    /// Struct definitions
    pub structs: Vec<StructInfo>,
    /// Guard names (Starfield)
    pub guards: Vec<String>,
    /// States, the default state has an empty name
    pub states: Vec<State>,
    /// Documentation comment
    pub doc_string: String,
    /// User flag bits
    pub user_flags: u32,
}

impl Object {
    /// Creates an empty object.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Object {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a state.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Adds a property. Auto properties get their backing variable added as well.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        if let Some(var) = &property.auto_var {
            if self.variable(var).is_none() {
                self.variables
                    .push(Variable::new(var.clone(), property.type_name.clone()));
            }
        }
        self.properties.push(property);
        self
    }

    /// Adds a struct definition.
    #[must_use]
    pub fn with_struct(mut self, info: StructInfo) -> Self {
        self.structs.push(info);
        self
    }

    /// Adds a guard.
    #[must_use]
    pub fn with_guard(mut self, name: impl Into<String>) -> Self {
        self.guards.push(name.into());
        self
    }

    /// Whether the object is declared `Const`.
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.flags.contains(ObjectFlags::CONST)
    }

    /// Looks up an object variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|var| var.name.eq_ignore_ascii_case(name))
    }

    /// Looks up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|prop| prop.name.eq_ignore_ascii_case(name))
    }

    /// Finds the property backed by the autovar `var_name`.
    #[must_use]
    pub fn property_for_autovar(&self, var_name: &str) -> Option<&Property> {
        self.properties.iter().find(|prop| {
            prop.auto_var
                .as_deref()
                .is_some_and(|var| var.eq_ignore_ascii_case(var_name))
        })
    }

    /// Looks up a struct definition.
    #[must_use]
    pub fn struct_info(&self, name: &str) -> Option<&StructInfo> {
        self.structs
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(name))
    }

    /// Looks up a state.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states
            .iter()
            .find(|state| state.name.eq_ignore_ascii_case(name))
    }

    /// Finds a function, preferring `state` and falling back to the default state.
    #[must_use]
    pub fn function(&self, state: &str, name: &str) -> Option<&Function> {
        self.state(state)
            .and_then(|s| s.function(name))
            .or_else(|| self.state("").and_then(|s| s.function(name)))
    }

    /// Whether `name` is a guard of this object.
    #[must_use]
    pub fn is_guard(&self, name: &str) -> bool {
        self.guards.iter().any(|guard| guard.eq_ignore_ascii_case(name))
    }
}
