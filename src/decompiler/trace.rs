//! Per-function trace logs.
//!
//! With [`DecompilerConfig::trace_dir`] set, every function run records each pipeline
//! stage into `{dir}/{object}.{state}.{function}.rebuild.log`. The log is buffered in
//! memory and written once at the end of the run, so no handle outlives the function.

use std::{fmt::Write as _, fs, path::PathBuf};

use crate::{
    decompiler::{
        config::DecompilerConfig,
        lower::{FlowBlocks, FlowExit},
        tree::{NodeId, Tree},
        Stage,
    },
    Result,
};

/// Buffered trace of one function run. Disabled traces ignore every call.
#[derive(Debug, Default)]
pub struct TraceLog {
    path: Option<PathBuf>,
    dump_tree: bool,
    buffer: String,
}

impl TraceLog {
    /// Creates the trace for one function; disabled unless `config.trace_dir` is set.
    #[must_use]
    pub fn new(config: &DecompilerConfig, object: &str, state: &str, function: &str) -> Self {
        TraceLog {
            path: config
                .trace_dir
                .as_ref()
                .map(|dir| dir.join(format!("{object}.{state}.{function}.rebuild.log"))),
            dump_tree: config.dump_tree,
            buffer: String::new(),
        }
    }

    /// Whether anything will be written.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Destination file, if tracing.
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Buffered text.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    fn header(&mut self, stage: Stage) {
        let _ = writeln!(self.buffer, "==== {stage} ====");
    }

    /// Records a free-form line.
    pub fn note(&mut self, text: &str) {
        if self.is_enabled() {
            self.buffer.push_str(text);
            self.buffer.push('\n');
        }
    }

    /// Records the block-level state of a stage.
    pub fn blocks(&mut self, stage: Stage, tree: &Tree, blocks: &FlowBlocks) {
        if !self.is_enabled() {
            return;
        }
        self.header(stage);
        for block in blocks.values() {
            let exit = match block.exit {
                FlowExit::Return => "return".to_string(),
                FlowExit::Jump(target) => format!("jump {target}"),
                FlowExit::Branch { target, .. } => format!("branch {target}"),
            };
            let _ = writeln!(self.buffer, "block {}..{} -> {}", block.start, block.end, exit);
            if self.dump_tree {
                for &statement in block.statements.iter().chain(block.condition().iter()) {
                    self.buffer.push_str(&tree.dump(statement));
                }
            }
        }
    }

    /// Records the tree-level state of a stage.
    pub fn tree(&mut self, stage: Stage, tree: &Tree, root: NodeId) {
        if !self.is_enabled() {
            return;
        }
        self.header(stage);
        if self.dump_tree {
            self.buffer.push_str(&tree.dump(root));
        }
    }

    /// Records the generated text.
    pub fn lines(&mut self, stage: Stage, lines: &[String]) {
        if !self.is_enabled() {
            return;
        }
        self.header(stage);
        for line in lines {
            self.buffer.push_str(line);
            self.buffer.push('\n');
        }
    }

    /// Writes the log file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be written.
    pub fn finish(self) -> Result<()> {
        if let Some(path) = self.path {
            fs::write(path, self.buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::tree::NodeKind;

    #[test]
    fn disabled_trace_records_nothing() {
        let mut trace = TraceLog::new(&DecompilerConfig::default(), "A", "", "F");
        let mut tree = Tree::new();
        let root = tree.add(NodeKind::Sequence(Vec::new()));
        trace.tree(Stage::Cleaned, &tree, root);
        trace.note("ignored");
        assert!(!trace.is_enabled());
        assert!(trace.contents().is_empty());
        assert!(trace.finish().is_ok());
    }

    #[test]
    fn trace_file_name() {
        let config = DecompilerConfig::default().with_trace_dir("/tmp/pexscope");
        let mut trace = TraceLog::new(&config, "QuestScript", "Running", "OnUpdate");
        assert_eq!(
            trace.path().unwrap(),
            &PathBuf::from("/tmp/pexscope/QuestScript.Running.OnUpdate.rebuild.log")
        );

        let mut tree = Tree::new();
        let root = tree.add(NodeKind::Sequence(Vec::new()));
        trace.tree(Stage::GuardLifted, &tree, root);
        assert!(trace.contents().starts_with("==== GuardLifted ===="));
        assert!(trace.contents().contains("Sequence"));
    }

    #[test]
    fn write_errors_surface() {
        let config = DecompilerConfig::default().with_trace_dir("/nonexistent/pexscope/trace");
        let mut trace = TraceLog::new(&config, "A", "", "F");
        trace.note("x");
        assert!(matches!(trace.finish(), Err(crate::Error::FileError(_))));
    }
}
