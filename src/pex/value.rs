//! Instruction operands.
//!
//! A Pex operand is either an identifier (resolved from the string table by the reader) or
//! one of four literal kinds. [`Value`] keeps that distinction and knows how to print itself
//! as a Papyrus literal.

use std::fmt;

/// Prefix the compiler uses for synthesized temporaries (`::temp0`, `::temp1`, ...).
pub const TEMP_PREFIX: &str = "::temp";

/// Destination used for call results that are discarded.
pub const NONE_VAR: &str = "::nonevar";

/// Suffix of property backing variables (`::Health_var` backs `Health`).
pub const AUTOVAR_SUFFIX: &str = "_var";

/// A single instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The `None` literal
    None,
    /// A variable, parameter, property, type or function name
    Identifier(String),
    /// A string literal, unescaped
    String(String),
    /// A 32-bit integer literal
    Integer(i32),
    /// A 32-bit float literal
    Float(f32),
    /// A boolean literal
    Bool(bool),
}

impl Value {
    /// Shorthand for [`Value::Identifier`].
    #[must_use]
    pub fn id(name: impl Into<String>) -> Self {
        Value::Identifier(name.into())
    }

    /// Shorthand for [`Value::String`].
    #[must_use]
    pub fn str(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// Returns the identifier name if this operand is one.
    #[must_use]
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Value::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the integer payload if this operand is an integer literal.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns `true` for every operand that is not an identifier.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        !matches!(self, Value::Identifier(_))
    }

    /// Returns `true` if this operand names the identifier `name` (case-insensitive).
    #[must_use]
    pub fn is_identifier(&self, name: &str) -> bool {
        self.as_identifier()
            .is_some_and(|id| id.eq_ignore_ascii_case(name))
    }

    /// Papyrus type name of a literal, `None` for identifiers and the `None` literal.
    #[must_use]
    pub const fn literal_type(&self) -> Option<&'static str> {
        match self {
            Value::String(_) => Some("String"),
            Value::Integer(_) => Some("Int"),
            Value::Float(_) => Some("Float"),
            Value::Bool(_) => Some("Bool"),
            Value::None | Value::Identifier(_) => None,
        }
    }
}

/// Returns `true` if `name` is a compiler temporary.
///
/// Temporaries start with `::temp`; names that also end in `_var` are property backing
/// variables and never temporaries.
///
/// # Examples
///
/// ```rust
/// use pexscope::pex::is_temp;
///
/// assert!(is_temp("::temp12"));
/// assert!(!is_temp("::temperature_var"));
/// assert!(!is_temp("temp12"));
/// ```
#[must_use]
pub fn is_temp(name: &str) -> bool {
    name.len() > TEMP_PREFIX.len()
        && name
            .get(..TEMP_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(TEMP_PREFIX))
        && !is_autovar(name)
}

/// Returns `true` if `name` is a property backing variable (`::Name_var`).
#[must_use]
pub fn is_autovar(name: &str) -> bool {
    name.len() > 2 + AUTOVAR_SUFFIX.len()
        && name.starts_with("::")
        && name
            .get(name.len() - AUTOVAR_SUFFIX.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(AUTOVAR_SUFFIX))
}

/// Returns the source-level spelling of an identifier.
///
/// Backing variables lose their decoration (`::Health_var` becomes `Health`) and `self`
/// becomes `Self`. Everything else is returned unchanged.
#[must_use]
pub fn display_name(name: &str) -> &str {
    if is_autovar(name) {
        &name[2..name.len() - AUTOVAR_SUFFIX.len()]
    } else if name.eq_ignore_ascii_case("self") {
        "Self"
    } else {
        name
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Identifier(name) => write!(f, "{name}"),
            Value::String(text) => {
                write!(f, "\"")?;
                for c in text.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => {
                let text = format!("{value}");
                if value.is_finite() && !text.contains(['.', 'e', 'E']) {
                    write!(f, "{text}.0")
                } else {
                    write!(f, "{text}")
                }
            }
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Bare strings become identifiers; use [`Value::str`] for string literals.
impl From<&str> for Value {
    fn from(name: &str) -> Self {
        Value::Identifier(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_rendering() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::str("say \"hi\"\n").to_string(), "\"say \\\"hi\\\"\\n\"");
    }

    #[test]
    fn name_classification() {
        assert!(is_temp("::temp0"));
        assert!(is_temp("::TEMP7"));
        assert!(!is_temp("::temp"));
        assert!(!is_temp("::temp1_var"));
        assert!(is_autovar("::Health_var"));
        assert!(!is_autovar("Health_var"));
        assert_eq!(display_name("::Health_var"), "Health");
        assert_eq!(display_name("self"), "Self");
        assert_eq!(display_name("akActor"), "akActor");
    }

    #[test]
    fn identifier_matching_ignores_case() {
        let value = Value::id("akTarget");
        assert!(value.is_identifier("AKTARGET"));
        assert!(!Value::str("akTarget").is_identifier("akTarget"));
    }
}
