//! The top-level binary.

use strum::{Display, EnumIter};

use crate::pex::{DebugInfo, Object};

/// Engine variant the script was compiled for.
///
/// The variant decides which opcodes may appear (structs from Fallout 4 on, guards in
/// Starfield) and which known compiler defects the fixup registry handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter)]
pub enum ScriptType {
    /// Skyrim and Skyrim Special Edition
    #[default]
    Skyrim,
    /// Fallout 4 and Fallout 76
    Fallout4,
    /// Starfield
    Starfield,
}

/// A named user flag bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFlag {
    /// Flag keyword, e.g. `Hidden` or `Conditional`
    pub name: String,
    /// Bit index
    pub flag_index: u8,
}

impl UserFlag {
    /// The bit mask of this flag.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        1u32 << (self.flag_index as u32 & 31)
    }
}

/// A parsed `.pex` file.
#[derive(Debug, Clone, Default)]
pub struct Binary {
    /// Engine variant
    pub script_type: ScriptType,
    /// Objects, usually exactly one
    pub objects: Vec<Object>,
    /// User flag definitions
    pub user_flags: Vec<UserFlag>,
    /// Debug tables, absent in release builds
    pub debug_info: Option<DebugInfo>,
}

impl Binary {
    /// Creates an empty binary for `script_type`.
    #[must_use]
    pub fn new(script_type: ScriptType) -> Self {
        Binary {
            script_type,
            ..Default::default()
        }
    }

    /// Adds an object.
    #[must_use]
    pub fn with_object(mut self, object: Object) -> Self {
        self.objects.push(object);
        self
    }

    /// Sets the debug tables.
    #[must_use]
    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    /// Looks up an object by name.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<&Object> {
        self.objects
            .iter()
            .find(|object| object.name.eq_ignore_ascii_case(name))
    }

    /// Names of the user flags set in `bits`.
    #[must_use]
    pub fn user_flag_names(&self, bits: u32) -> Vec<&str> {
        self.user_flags
            .iter()
            .filter(|flag| bits & flag.mask() != 0)
            .map(|flag| flag.name.as_str())
            .collect()
    }
}
