//! Configuration for the decompiler.
//!
//! All options shape the text that is produced; none of them changes the recovered tree.

use std::path::PathBuf;

/// What to do with a debug-only function that no fixup rule covers.
///
/// Debug-only functions read temporaries the compiler never wrote. Their output would not
/// recompile, so unless a fixup exists they are either flagged or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugFunctionPolicy {
    /// Emit the body, preceded by a warning marker
    Warn,
    /// Emit only a marker line
    #[default]
    Skip,
}

/// Configuration for the decompiler.
#[derive(Debug, Clone)]
pub struct DecompilerConfig {
    /// Precede each statement with the instructions it was built from (default: false).
    pub comment_asm: bool,

    /// Directory for per-function trace logs; `None` disables tracing (default: None).
    pub trace_dir: Option<PathBuf>,

    /// Dump the tree after every stage when tracing (default: true).
    pub dump_tree: bool,

    /// Handling of debug-only functions without a fixup (default: skip).
    pub debug_function_policy: DebugFunctionPolicy,

    /// Append `; #DEBUG_LINE_NO:` suffixes to mapped lines (default: false).
    pub print_debug_line_numbers: bool,

    /// Insert blank lines where the debug line numbers jump (default: true).
    pub preserve_blank_lines: bool,

    /// One indentation level (default: two spaces).
    pub indent: String,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            comment_asm: false,
            trace_dir: None,
            dump_tree: true,
            debug_function_policy: DebugFunctionPolicy::Skip,
            print_debug_line_numbers: false,
            preserve_blank_lines: true,
            indent: "  ".to_string(),
        }
    }
}

impl DecompilerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration producing bare code: no blank lines, no comments.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            preserve_blank_lines: false,
            ..Self::default()
        }
    }

    /// Enables or disables assembly comments.
    #[must_use]
    pub fn with_comment_asm(mut self, enable: bool) -> Self {
        self.comment_asm = enable;
        self
    }

    /// Enables tracing into `dir`.
    #[must_use]
    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    /// Enables or disables tree dumps in trace logs.
    #[must_use]
    pub fn with_dump_tree(mut self, enable: bool) -> Self {
        self.dump_tree = enable;
        self
    }

    /// Sets the handling of debug-only functions.
    #[must_use]
    pub fn with_debug_function_policy(mut self, policy: DebugFunctionPolicy) -> Self {
        self.debug_function_policy = policy;
        self
    }

    /// Enables or disables debug line number suffixes.
    #[must_use]
    pub fn with_debug_line_numbers(mut self, enable: bool) -> Self {
        self.print_debug_line_numbers = enable;
        self
    }

    /// Enables or disables blank line preservation.
    #[must_use]
    pub fn with_blank_lines(mut self, enable: bool) -> Self {
        self.preserve_blank_lines = enable;
        self
    }

    /// Sets the indentation unit.
    #[must_use]
    pub fn with_indent(mut self, indent: impl Into<String>) -> Self {
        self.indent = indent.into();
        self
    }
}
