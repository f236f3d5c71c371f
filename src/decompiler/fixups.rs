//! Registry of text fixups for known compiler defects.
//!
//! Some shipped scripts cannot be recompiled from a faithful decompilation: the compiler
//! stripped debug-only calls but left reads of the temporaries that fed them, and the
//! native `ScriptObject` state accessors refer to a variable spelled `::State`. The
//! entries below rewrite exactly those functions, matched by script type, object name and
//! function name. Every other function with a dangling temporary is reported according to
//! [`DebugFunctionPolicy`] and left untouched.

use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;

use crate::{
    decompiler::{codegen::Line, config::DebugFunctionPolicy},
    pex::ScriptType,
};

/// Dangling temporary references.
const TEMP_PATTERN: &str = r"(?i)::temp\d+";
/// The state variable of the native state accessors.
const STATE_PATTERN: &str = r"(?i)::State\b";

/// When an entry applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupTrigger {
    /// Only for functions that read a temporary they never write
    DebugOnly,
    /// Whenever object and function match
    Always,
}

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    /// Engine variant the entry is limited to, `None` for all
    pub script_type: Option<ScriptType>,
    /// Object name, `None` for any object
    pub object: Option<&'static str>,
    /// Function names
    pub functions: &'static [&'static str],
    /// When the entry applies
    pub trigger: FixupTrigger,
    /// Regular expression selecting the text to replace
    pub pattern: &'static str,
    /// Replacement text
    pub replacement: &'static str,
}

impl Fixup {
    fn matches(&self, script_type: ScriptType, object: &str, function: &str) -> bool {
        self.script_type.map_or(true, |only| only == script_type)
            && self
                .object
                .map_or(true, |name| name.eq_ignore_ascii_case(object))
            && self
                .functions
                .iter()
                .any(|name| name.eq_ignore_ascii_case(function))
    }

    /// Comment line placed before the rewritten body.
    #[must_use]
    pub fn marker(&self, function: &str) -> String {
        match self.trigger {
            FixupTrigger::DebugOnly => format!("; Fixup hacks for debug-only function: {function}"),
            FixupTrigger::Always => {
                "; Fixup hacks for native ScriptObject::GotoState/GetState".to_string()
            }
        }
    }
}

static REGISTRY: &[Fixup] = &[
    Fixup {
        script_type: Some(ScriptType::Starfield),
        object: None,
        functions: &["warning"],
        trigger: FixupTrigger::DebugOnly,
        pattern: TEMP_PATTERN,
        replacement: "false",
    },
    Fixup {
        script_type: Some(ScriptType::Starfield),
        object: Some("ENV_Hazard_ParentScript"),
        functions: &["GlobalWarning"],
        trigger: FixupTrigger::DebugOnly,
        pattern: TEMP_PATTERN,
        replacement: "false",
    },
    Fixup {
        script_type: Some(ScriptType::Starfield),
        object: Some("ENV_AfflictionScript"),
        functions: &["TraceStats"],
        trigger: FixupTrigger::DebugOnly,
        pattern: TEMP_PATTERN,
        replacement: "false",
    },
    Fixup {
        script_type: Some(ScriptType::Starfield),
        object: Some("RobotQuestRunner"),
        functions: &["UpdateState"],
        trigger: FixupTrigger::DebugOnly,
        pattern: TEMP_PATTERN,
        replacement: "None",
    },
    Fixup {
        script_type: Some(ScriptType::Starfield),
        object: Some("RobotQuestRunner"),
        functions: &["MakeQuestNameSave"],
        trigger: FixupTrigger::DebugOnly,
        pattern: TEMP_PATTERN,
        replacement: "questName",
    },
    Fixup {
        script_type: None,
        object: Some("ScriptObject"),
        functions: &["GotoState", "GetState"],
        trigger: FixupTrigger::Always,
        pattern: STATE_PATTERN,
        replacement: "__state",
    },
];

/// All registry entries.
#[must_use]
pub fn registry() -> &'static [Fixup] {
    REGISTRY
}

/// Compiled registry patterns; a pattern that fails to compile is absent.
fn compiled(pattern: &str) -> Option<&'static Regex> {
    static PATTERNS: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            REGISTRY
                .iter()
                .filter_map(|fixup| Regex::new(fixup.pattern).ok().map(|re| (fixup.pattern, re)))
                .collect()
        })
        .get(pattern)
}

/// Finds the entry for a function.
#[must_use]
pub fn find(
    script_type: ScriptType,
    object: &str,
    function: &str,
    trigger: FixupTrigger,
) -> Option<&'static Fixup> {
    REGISTRY
        .iter()
        .find(|fixup| fixup.trigger == trigger && fixup.matches(script_type, object, function))
}

/// What the fixup stage did to a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixupOutcome {
    /// Comment placed before the body
    pub marker: Option<String>,
    /// A registry entry rewrote the body
    pub applied: bool,
    /// The body was dropped
    pub skipped: bool,
}

/// Identifies the function being fixed up.
#[derive(Debug, Clone, Copy)]
pub struct FixupContext<'a> {
    /// Engine variant of the binary
    pub script_type: ScriptType,
    /// Object name
    pub object: &'a str,
    /// Function name
    pub function: &'a str,
    /// The function reads temporaries it never writes
    pub debug_only: bool,
    /// What to do with debug-only functions without an entry
    pub policy: DebugFunctionPolicy,
}

fn rewrite(lines: &mut [Line], fixup: &Fixup) {
    let Some(regex) = compiled(fixup.pattern) else {
        log::warn!("fixup pattern {} does not compile", fixup.pattern);
        return;
    };
    for line in lines.iter_mut() {
        if regex.is_match(&line.text) {
            line.text = regex.replace_all(&line.text, fixup.replacement).into_owned();
        }
    }
}

/// Applies the registry to the generated `lines` of one function.
///
/// The marker comment, if any, is also inserted as the first line.
pub fn apply(lines: &mut Vec<Line>, context: &FixupContext<'_>) -> FixupOutcome {
    let mut outcome = FixupOutcome::default();
    let FixupContext {
        script_type,
        object,
        function,
        debug_only,
        policy,
    } = *context;

    if debug_only {
        if let Some(fixup) = find(script_type, object, function, FixupTrigger::DebugOnly) {
            rewrite(lines, fixup);
            outcome.applied = true;
            outcome.marker = Some(fixup.marker(function));
        } else {
            match policy {
                DebugFunctionPolicy::Warn => {
                    log::warn!("{object}.{function} reads temporaries it never writes");
                    outcome.marker =
                        Some(format!("; WARNING: possibly inoperative debug function {function}"));
                }
                DebugFunctionPolicy::Skip => {
                    log::warn!("skipping {object}.{function}: it reads temporaries it never writes");
                    lines.clear();
                    outcome.skipped = true;
                    outcome.marker = Some(format!("; Skipped inoperative debug function {function}"));
                }
            }
        }
    } else if let Some(fixup) = find(script_type, object, function, FixupTrigger::Always) {
        rewrite(lines, fixup);
        outcome.applied = true;
        outcome.marker = Some(fixup.marker(function));
    }

    if let Some(marker) = &outcome.marker {
        lines.insert(0, Line::unmapped(0, marker.clone()));
    }
    outcome
}
