//! Main decompilation driver.
//!
//! The [`Decompiler`] is the entry point of the engine. For every function it builds the
//! block graph, lowers and folds it, recovers structured control flow, rebuilds
//! expressions, lifts guards, cleans the tree, resolves names and finally renders and lays
//! out the source lines. Each run owns its own [`Tree`], so functions of one object are
//! decompiled in parallel by [`Decompiler::decompile_object`].

use std::{fmt, time::Instant};

use rayon::prelude::*;

use crate::{
    decompiler::{
        blocks::BlockGraph,
        booleans::fold_booleans,
        cleaner::TreeCleaner,
        codegen::{self, CodeGenerator},
        config::DecompilerConfig,
        expressions::ExpressionRebuilder,
        fixups::{self, FixupContext, FixupOutcome},
        flow::FlowRecoverer,
        guards::GuardLifter,
        lower::lower,
        pass::{run_together_until_stable, run_until_stable, TreePass},
        scope::{Binding, ScopeResolver},
        trace::TraceLog,
        tree::{NodeId, NodeKind, Tree},
        types::TypeTable,
        Stage,
    },
    pex::{is_autovar, Binary, Function, FunctionInfo, FunctionKind, Object, Property},
    Error, Result,
};

/// The decompiled body of one function.
#[derive(Debug, Clone)]
pub struct DecompiledFunction {
    /// Owning object
    pub object: String,
    /// Owning state, empty for the default state
    pub state: String,
    /// Function name, the property name for accessors
    pub name: String,
    /// Accessor classification
    pub kind: FunctionKind,
    lines: Vec<String>,
    /// `line_map[i]` lists the source lines behind line `i`
    pub line_map: Vec<Vec<u16>>,
    /// Final syntax tree
    pub tree: Tree,
    /// Root sequence of [`Self::tree`]
    pub root: NodeId,
    /// Line table used for the mapping, if the binary has one for this function
    pub debug_function: Option<FunctionInfo>,
    /// What the fixup registry did
    pub fixup: FixupOutcome,
    /// Properties whose backing variables the body references
    pub props_in_use: Vec<String>,
    /// Object variables the body references
    pub vars_in_use: Vec<String>,
    /// Resolved names
    pub bindings: Vec<Binding>,
    /// Temporaries read but never written
    pub dangling: Vec<String>,
}

impl DecompiledFunction {
    /// Indented source lines of the body.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether the body reads temporaries it never writes.
    #[must_use]
    pub fn is_debug_only(&self) -> bool {
        !self.dangling.is_empty()
    }

    /// Looks up a resolved name.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|binding| {
            binding.name.eq_ignore_ascii_case(name) || binding.original.eq_ignore_ascii_case(name)
        })
    }
}

impl fmt::Display for DecompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Result of one function of [`Decompiler::decompile_object`].
#[derive(Debug)]
pub struct FunctionOutcome {
    /// State name, empty for the default state and for accessors
    pub state: String,
    /// Function name, the property name for accessors
    pub function: String,
    /// Accessor classification
    pub kind: FunctionKind,
    /// The decompiled body or the reason it failed
    pub result: Result<DecompiledFunction>,
}

/// Names referenced by a body.
#[derive(Debug, Default)]
struct IdsInUse {
    props: Vec<String>,
    vars: Vec<String>,
}

/// Decompiles the functions of one [`Binary`].
///
/// # Examples
///
/// ```rust,no_run
/// use pexscope::{Binary, Decompiler, DecompilerConfig};
///
/// # fn run(binary: &Binary) -> pexscope::Result<()> {
/// let decompiler = Decompiler::new(binary, DecompilerConfig::default());
/// let result = decompiler.decompile_named("QuestScript", "", "OnInit")?;
/// print!("{result}");
/// # Ok(())
/// # }
/// ```
pub struct Decompiler<'a> {
    binary: &'a Binary,
    config: DecompilerConfig,
}

impl<'a> Decompiler<'a> {
    /// Creates a decompiler over `binary`.
    #[must_use]
    pub fn new(binary: &'a Binary, config: DecompilerConfig) -> Self {
        Decompiler { binary, config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DecompilerConfig {
        &self.config
    }

    /// Decompiles one function of `object`.
    ///
    /// # Arguments
    ///
    /// * `object` - The owning object
    /// * `state` - The owning state, empty for the default state
    /// * `function` - The function to decompile
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The bytecode is malformed ([`Error::Malformed`])
    /// - A jump has no structured equivalent ([`Error::Unstructured`])
    /// - The body references an autovar with no owning property ([`Error::UnresolvedReference`])
    pub fn decompile_function(
        &self,
        object: &Object,
        state: &str,
        function: &Function,
    ) -> Result<DecompiledFunction> {
        self.run(object, state, &function.name, function, FunctionKind::Plain)
    }

    /// Decompiles the getter or setter of `property`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] if the property has no such accessor, and the
    /// errors of [`Self::decompile_function`] otherwise.
    pub fn decompile_accessor(
        &self,
        object: &Object,
        property: &Property,
        kind: FunctionKind,
    ) -> Result<DecompiledFunction> {
        let accessor = match kind {
            FunctionKind::Getter => property.getter.as_ref(),
            FunctionKind::Setter => property.setter.as_ref(),
            FunctionKind::Plain => None,
        };
        let function = accessor.ok_or_else(|| {
            Error::UnresolvedReference(format!(
                "{}.{} has no {:?} accessor",
                object.name, property.name, kind
            ))
        })?;
        self.run(object, "", &property.name, function, kind)
    }

    /// Decompiles a function looked up by name.
    ///
    /// The function is searched in `state` first and in the default state second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedReference`] if the object or function does not exist, and
    /// the errors of [`Self::decompile_function`] otherwise.
    pub fn decompile_named(
        &self,
        object_name: &str,
        state: &str,
        function_name: &str,
    ) -> Result<DecompiledFunction> {
        let object = self
            .binary
            .object(object_name)
            .ok_or_else(|| Error::UnresolvedReference(object_name.to_string()))?;
        let function = object.function(state, function_name).ok_or_else(|| {
            Error::UnresolvedReference(format!("{}.{}", object.name, function_name))
        })?;
        self.decompile_function(object, state, function)
    }

    /// Decompiles every non-native function and accessor of `object` in parallel.
    ///
    /// Each function gets its own outcome; a failing function never affects the others.
    /// Outcomes are ordered by state, then function, with accessors last.
    #[must_use]
    pub fn decompile_object(&self, object: &Object) -> Vec<FunctionOutcome> {
        let mut jobs: Vec<(&str, &str, &Function, FunctionKind)> = Vec::new();
        for state in &object.states {
            for function in state.functions.iter().filter(|f| !f.is_native()) {
                let name = function.name.as_str();
                jobs.push((state.name.as_str(), name, function, FunctionKind::Plain));
            }
        }
        for property in &object.properties {
            let accessors = [
                (property.getter.as_ref(), FunctionKind::Getter),
                (property.setter.as_ref(), FunctionKind::Setter),
            ];
            for (accessor, kind) in accessors {
                if let Some(function) = accessor.filter(|f| !f.is_native()) {
                    jobs.push(("", property.name.as_str(), function, kind));
                }
            }
        }

        let start = Instant::now();
        let outcomes: Vec<FunctionOutcome> = jobs
            .par_iter()
            .map(|&(state, name, function, kind)| FunctionOutcome {
                state: state.to_string(),
                function: name.to_string(),
                kind,
                result: self.run(object, state, name, function, kind),
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        log::debug!(
            "{}: decompiled {} functions ({} failed) in {:?}",
            object.name,
            outcomes.len(),
            failed,
            start.elapsed()
        );
        outcomes
    }

    fn run(
        &self,
        object: &Object,
        state: &str,
        name: &str,
        function: &Function,
        kind: FunctionKind,
    ) -> Result<DecompiledFunction> {
        let mut trace = TraceLog::new(&self.config, &object.name, state, name);
        let result = self.pipeline(object, state, name, function, kind, &mut trace);
        if let Err(error) = &result {
            log::debug!("{}.{} failed: {}", object.name, name, error);
            trace.note(&format!("error: {error}"));
        }
        if let Err(error) = trace.finish() {
            log::warn!("cannot write trace of {}.{}: {}", object.name, name, error);
        }
        result
    }

    fn pipeline(
        &self,
        object: &Object,
        state: &str,
        name: &str,
        function: &Function,
        kind: FunctionKind,
        trace: &mut TraceLog,
    ) -> Result<DecompiledFunction> {
        let instructions = function.instructions.as_slice();
        let mut tree = Tree::new();

        if trace.is_enabled() {
            let listing: Vec<String> = instructions
                .iter()
                .enumerate()
                .map(|(ip, instruction)| format!("{ip}: {instruction}"))
                .collect();
            trace.lines(Stage::Raw, &listing);
        }

        // Phase 1: Blocks, lowered to statements with temporaries inlined per block
        let types = TypeTable::infer(object, function);
        let graph = BlockGraph::build(instructions)?;
        let mut blocks = lower(&mut tree, instructions, &graph, &types)?;
        let mut rebuilder = ExpressionRebuilder::new(function);
        rebuilder.rebuild_blocks(&mut tree, &mut blocks);
        log::debug!("{}.{}: {} blocks", object.name, name, blocks.len());
        trace.blocks(Stage::Blocked, &tree, &blocks);

        // Phase 2: Short-circuit operators
        let folds = fold_booleans(&mut tree, &mut blocks, &rebuilder, instructions.len());
        log::debug!("{}.{}: {} boolean folds", object.name, name, folds);
        trace.blocks(Stage::BooleanRebuilt, &tree, &blocks);

        // Phase 3: Structured control flow
        let root = FlowRecoverer::new(&mut tree, blocks, instructions, name).recover()?;
        log::debug!("{}.{}: control flow recovered", object.name, name);
        trace.tree(Stage::ControlFlowRecovered, &tree, root);

        // Phase 4: Tree passes
        run_until_stable(&mut rebuilder, &mut tree, root)?;
        trace.tree(Stage::ExpressionRebuilt, &tree, root);

        run_until_stable(&mut GuardLifter::new(), &mut tree, root)?;
        trace.tree(Stage::GuardLifted, &tree, root);

        // Cleaning can free temporaries for inlining
        let mut cleaner = TreeCleaner::new(function.returns_none());
        let passes: &mut [&mut dyn TreePass] = &mut [&mut cleaner, &mut rebuilder];
        run_together_until_stable(passes, &mut tree, root)?;
        log::debug!("{}.{}: tree passes done", object.name, name);
        trace.tree(Stage::Cleaned, &tree, root);

        // Phase 5: Names and declarations
        let scopes = ScopeResolver::new(object, function, &types).resolve(&mut tree, root);
        let ids = ids_in_use(&tree, root, object, function)?;
        log::debug!(
            "{}.{}: {} bindings, {} dangling",
            object.name,
            name,
            scopes.bindings.len(),
            scopes.dangling.len()
        );
        trace.tree(Stage::ScopeResolved, &tree, root);

        // Phase 6: Text
        let mut lines = CodeGenerator::new(&tree, instructions)
            .with_comment_asm(self.config.comment_asm)
            .generate(root);
        let fixup = fixups::apply(
            &mut lines,
            &FixupContext {
                script_type: self.binary.script_type,
                object: &object.name,
                function: name,
                debug_only: !scopes.dangling.is_empty(),
                policy: self.config.debug_function_policy,
            },
        );
        let debug_function = self
            .binary
            .debug_info
            .as_ref()
            .and_then(|debug| debug.function(&object.name, state, name, kind))
            .cloned();
        let layout = codegen::layout(&lines, debug_function.as_ref(), &self.config);
        log::debug!("{}.{}: {} lines", object.name, name, layout.lines.len());
        trace.lines(Stage::Generated, &layout.lines);

        Ok(DecompiledFunction {
            object: object.name.clone(),
            state: state.to_string(),
            name: name.to_string(),
            kind,
            lines: layout.lines,
            line_map: layout.line_map,
            tree,
            root,
            debug_function,
            fixup,
            props_in_use: ids.props,
            vars_in_use: ids.vars,
            bindings: scopes.bindings,
            dangling: scopes.dangling,
        })
    }
}

/// Collects the properties and object variables referenced by the body.
///
/// Parameters and locals shadow object variables; `self` is never reported.
fn ids_in_use(tree: &Tree, root: NodeId, object: &Object, function: &Function) -> Result<IdsInUse> {
    let mut names = Vec::new();
    tree.walk(root, &mut |id| {
        if let NodeKind::Identifier(name) = tree.kind(id) {
            names.push(name.clone());
        }
    });

    let mut ids = IdsInUse::default();
    for name in names {
        if name.eq_ignore_ascii_case("self")
            || function.param(&name).is_some()
            || function.local(&name).is_some()
        {
            continue;
        }
        if is_autovar(&name) {
            let property = object.property_for_autovar(&name).ok_or_else(|| {
                Error::UnresolvedReference(format!("{}: no property owns {}", object.name, name))
            })?;
            push_unique(&mut ids.props, &property.name);
        } else if let Some(variable) = object.variable(&name) {
            push_unique(&mut ids.vars, &variable.name);
        }
    }
    Ok(ids)
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|known| known.eq_ignore_ascii_case(name)) {
        names.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pex::{FunctionAssembler, Property, State, Value, Variable};

    fn binary_with(object: Object) -> Binary {
        Binary::new(crate::pex::ScriptType::Fallout4).with_object(object)
    }

    #[test]
    fn ids_in_use_resolve_autovars_and_variables() {
        let mut asm = FunctionAssembler::new();
        asm.assign("::Stage_var", Value::Integer(10)).unwrap();
        asm.assign("count", Value::Integer(1)).unwrap();
        asm.ret(Value::None).unwrap();
        let (instructions, _) = asm.finish().unwrap();
        let function = Function::new("Reset", "None").with_instructions(instructions);
        let object = Object::new("QuestScript")
            .with_property(Property::auto("Stage", "Int"))
            .with_variable(Variable::new("count", "Int"))
            .with_state(State::new("").with_function(function));
        let binary = binary_with(object);

        let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
        let result = decompiler.decompile_named("QuestScript", "", "Reset").unwrap();
        assert_eq!(result.props_in_use, vec!["Stage".to_string()]);
        assert_eq!(result.vars_in_use, vec!["count".to_string()]);
        assert!(!result.is_debug_only());
    }

    #[test]
    fn orphaned_autovar_is_unresolved() {
        let mut asm = FunctionAssembler::new();
        asm.assign("::Missing_var", Value::Integer(1)).unwrap();
        asm.ret(Value::None).unwrap();
        let (instructions, _) = asm.finish().unwrap();
        let function = Function::new("Reset", "None").with_instructions(instructions);
        let object = Object::new("QuestScript").with_state(State::new("").with_function(function));
        let binary = binary_with(object);

        let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
        assert!(matches!(
            decompiler.decompile_named("QuestScript", "", "Reset"),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn unknown_names_are_unresolved() {
        let binary = binary_with(Object::new("QuestScript"));
        let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
        assert!(matches!(
            decompiler.decompile_named("Other", "", "OnInit"),
            Err(Error::UnresolvedReference(_))
        ));
        assert!(matches!(
            decompiler.decompile_named("QuestScript", "", "OnInit"),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn trace_log_records_every_stage() {
        let dir = std::env::temp_dir().join("pexscope-pipeline-trace");
        std::fs::create_dir_all(&dir).unwrap();

        let mut asm = FunctionAssembler::new();
        asm.ret(Value::Integer(5)).unwrap();
        let (instructions, _) = asm.finish().unwrap();
        let function = Function::new("GetValue", "Int").with_instructions(instructions);
        let object = Object::new("TraceScript").with_state(State::new("").with_function(function));
        let binary = binary_with(object);

        let config = DecompilerConfig::default().with_trace_dir(&dir);
        let decompiler = Decompiler::new(&binary, config);
        decompiler.decompile_named("TraceScript", "", "GetValue").unwrap();

        let log = std::fs::read_to_string(dir.join("TraceScript..GetValue.rebuild.log")).unwrap();
        assert!(log.starts_with("==== Raw ===="));
        assert!(log.contains("0: return 5"));
        assert!(log.contains("==== ScopeResolved ===="));
        assert!(log.trim_end().ends_with("Return 5"));
    }

    #[test]
    fn accessors_are_decompiled_with_the_object() {
        let mut asm = FunctionAssembler::new();
        asm.ret(Value::Integer(100)).unwrap();
        let (instructions, _) = asm.finish().unwrap();
        let health = Property {
            name: "Health".to_string(),
            type_name: "Int".to_string(),
            getter: Some(Function::new("", "Int").with_instructions(instructions)),
            ..Default::default()
        };
        let object = Object::new("ActorScript").with_property(health);
        let binary = binary_with(object);
        let object = &binary.objects[0];
        let decompiler = Decompiler::new(&binary, DecompilerConfig::default());

        let getter = decompiler
            .decompile_accessor(object, &object.properties[0], FunctionKind::Getter)
            .unwrap();
        assert_eq!(getter.lines(), ["Return 100"]);
        assert_eq!(getter.name, "Health");
        assert!(matches!(
            decompiler.decompile_accessor(object, &object.properties[0], FunctionKind::Setter),
            Err(Error::UnresolvedReference(_))
        ));

        let outcomes = decompiler.decompile_object(object);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind, FunctionKind::Getter);
        assert_eq!(outcomes[0].function, "Health");
        assert!(outcomes[0].result.is_ok());
    }
}
