//! Debug tables.
//!
//! Pex files compiled with debug information carry, per function, the source line of every
//! instruction, plus the declaration order of property groups and struct members. None of
//! it is needed to recover a correct tree; it drives line attribution and ordering only.

use std::collections::BTreeSet;

use crate::{
    pex::{Object, Property, StructMember},
    Error, Result,
};

/// How a function entry in the line table is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FunctionKind {
    /// Ordinary function or event
    #[default]
    Plain,
    /// Property getter
    Getter,
    /// Property setter
    Setter,
}

/// Line table of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Owning object
    pub object_name: String,
    /// Owning state, empty for the default state
    pub state_name: String,
    /// Function name (the property name for accessors)
    pub function_name: String,
    /// Accessor classification
    pub kind: FunctionKind,
    /// `line_numbers[ip]` is the source line of instruction `ip`
    pub line_numbers: Vec<u16>,
}

impl FunctionInfo {
    /// Source lines of the given instruction indices, sorted and deduplicated.
    ///
    /// Indices without an entry are ignored.
    #[must_use]
    pub fn lines_for<'a>(&self, ips: impl IntoIterator<Item = &'a usize>) -> Vec<u16> {
        let lines: BTreeSet<u16> = ips
            .into_iter()
            .filter_map(|ip| self.line_numbers.get(*ip).copied())
            .collect();
        lines.into_iter().collect()
    }
}

/// A named group of properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyGroup {
    /// Owning object
    pub object_name: String,
    /// Group name, empty for the ungrouped section
    pub group_name: String,
    /// Documentation comment
    pub doc_string: String,
    /// User flag bits
    pub user_flags: u32,
    /// Property names in source order
    pub names: Vec<String>,
}

/// Source order of a struct's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructOrder {
    /// Owning object
    pub object_name: String,
    /// Struct name
    pub order_name: String,
    /// Member names in source order
    pub names: Vec<String>,
}

/// All debug tables of a binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Function line tables
    pub functions: Vec<FunctionInfo>,
    /// Property groups
    pub property_groups: Vec<PropertyGroup>,
    /// Struct member orders
    pub struct_orders: Vec<StructOrder>,
}

impl DebugInfo {
    /// Finds the line table of a function.
    ///
    /// # Arguments
    ///
    /// * `object` - Object name
    /// * `state` - State name, empty for the default state
    /// * `function` - Function name, or the property name for accessors
    /// * `kind` - Accessor classification
    #[must_use]
    pub fn function(
        &self,
        object: &str,
        state: &str,
        function: &str,
        kind: FunctionKind,
    ) -> Option<&FunctionInfo> {
        self.functions.iter().find(|info| {
            info.kind == kind
                && info.object_name.eq_ignore_ascii_case(object)
                && info.state_name.eq_ignore_ascii_case(state)
                && info.function_name.eq_ignore_ascii_case(function)
        })
    }

    /// Members of `struct_name` in source order.
    ///
    /// Falls back to binary order when no order table exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] if the struct does not exist or the order table
    /// names a member the struct does not declare.
    pub fn ordered_struct_members<'a>(
        &self,
        object: &'a Object,
        struct_name: &str,
    ) -> Result<Vec<&'a StructMember>> {
        let info = object.struct_info(struct_name).ok_or_else(|| {
            Error::UnresolvedReference(format!("{}::{}", object.name, struct_name))
        })?;

        let Some(order) = self.struct_orders.iter().find(|order| {
            order.object_name.eq_ignore_ascii_case(&object.name)
                && order.order_name.eq_ignore_ascii_case(struct_name)
        }) else {
            return Ok(info.members.iter().collect());
        };

        order
            .names
            .iter()
            .map(|name| {
                info.member(name).ok_or_else(|| {
                    Error::UnresolvedReference(format!("{}::{}.{}", object.name, info.name, name))
                })
            })
            .collect()
    }

    /// Property groups of `object` with their properties resolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] if a group names a property the object does not
    /// declare.
    pub fn resolved_property_groups<'a>(
        &'a self,
        object: &'a Object,
    ) -> Result<Vec<(&'a PropertyGroup, Vec<&'a Property>)>> {
        self.property_groups
            .iter()
            .filter(|group| group.object_name.eq_ignore_ascii_case(&object.name))
            .map(|group| {
                let properties = group
                    .names
                    .iter()
                    .map(|name| {
                        object.property(name).ok_or_else(|| {
                            Error::UnresolvedReference(format!("{}.{}", object.name, name))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((group, properties))
            })
            .collect()
    }
}
