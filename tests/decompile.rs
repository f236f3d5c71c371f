//! End-to-end decompilation tests.
//!
//! These tests drive the public API only:
//! 1. Build a function body with `FunctionAssembler`
//! 2. Wrap it in an object and a binary
//! 3. Decompile it with `Decompiler`
//! 4. Check the emitted lines, the line map and the final tree

use pexscope::{
    decompiler::{
        DebugFunctionPolicy, DecompiledFunction, Decompiler, DecompilerConfig, GuardLifter,
        NodeKind, TreePass,
    },
    pex::{
        Binary, DebugInfo, Function, FunctionAssembler, FunctionFlags, FunctionInfo,
        FunctionKind, Instruction, Object, OpCode, ScriptType, State, Value,
    },
    Error, Result,
};

const EXPERIMENTAL: &str = ";*** WARNING: Experimental syntax, may be incorrect:";

/// Assemble `build` into the body of `function`.
fn assemble(
    function: Function,
    build: impl Fn(&mut FunctionAssembler) -> Result<()>,
) -> Result<(Function, Vec<u16>)> {
    let mut asm = FunctionAssembler::new();
    build(&mut asm)?;
    let (instructions, lines) = asm.finish()?;
    Ok((function.with_instructions(instructions), lines))
}

/// Decompile a single function of a one-object binary.
fn decompile_in(
    script_type: ScriptType,
    object: &str,
    function: Function,
    config: DecompilerConfig,
) -> Result<DecompiledFunction> {
    let name = function.name.clone();
    let object = Object::new(object).with_state(State::new("").with_function(function));
    let binary = Binary::new(script_type).with_object(object);
    Decompiler::new(&binary, config).decompile_named(&binary.objects[0].name, "", &name)
}

fn decompile(function: Function) -> Result<DecompiledFunction> {
    decompile_in(ScriptType::Fallout4, "MyScript", function, DecompilerConfig::default())
}

#[test]
fn test_nested_call_is_inlined() -> Result<()> {
    let (function, _) = assemble(Function::new("OnInit", "None"), |asm| {
        asm.call_method("Foo", "self", Some("::temp0"), vec![])?;
        asm.call_method("Bar", "self", None, vec![Value::id("::temp0")])?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    assert_eq!(result.lines(), ["Bar(Foo())"]);
    assert!(result.bindings.iter().all(|b| b.original != "::temp0"));
    Ok(())
}

#[test]
fn test_side_effect_keeps_temporary() -> Result<()> {
    let (function, _) = assemble(Function::new("OnInit", "None"), |asm| {
        asm.call_method("Foo", "self", Some("::temp0"), vec![])?;
        asm.call_method("Baz", "self", None, vec![])?;
        asm.call_method("Bar", "self", None, vec![Value::id("::temp0")])?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    let lines = result.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("temp0 = Foo()"), "{}", lines[0]);
    assert_eq!(lines[1], "Baz()");
    assert_eq!(lines[2], "Bar(temp0)");
    Ok(())
}

#[test]
fn test_temporary_freed_by_cleaning_is_inlined() -> Result<()> {
    let function = Function::new("Recount", "None")
        .with_param("a", "Int")
        .with_param("b", "Int");
    let (function, _) = assemble(function, |asm| {
        asm.binary(OpCode::Iadd, "::temp0", "a", "b")?;
        asm.binary(OpCode::Imul, "::temp1", "::temp0", 2)?;
        asm.binary(OpCode::Isub, "::temp2", "a", "::temp0")?;
        asm.binary(OpCode::Isub, "::temp3", 10, "::temp1")?;
        asm.assign("Count", "::temp3")?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    assert_eq!(result.lines(), ["Count = 10 - (a + b) * 2"]);
    Ok(())
}

#[test]
fn test_single_return() -> Result<()> {
    let (function, _) = assemble(Function::new("GetValue", "Int"), |asm| {
        asm.ret(Value::Integer(5))
    })?;

    let result = decompile(function)?;
    assert_eq!(result.lines(), ["Return 5"]);

    let statements = result.tree.statements(result.root);
    assert_eq!(statements.len(), 1);
    assert!(statements
        .iter()
        .all(|&id| !matches!(result.tree.kind(id), NodeKind::Declaration { .. })));
    Ok(())
}

#[test]
fn test_if_else_sinks_merged_return() -> Result<()> {
    let (function, _) = assemble(Function::new("Pick", "String"), |asm| {
        asm.jmpf("bReady", "else")?;
        asm.assign("::temp0", Value::str("a"))?;
        asm.jmp("end")?;
        asm.label("else")?;
        asm.assign("::temp0", Value::str("b"))?;
        asm.label("end")?;
        asm.ret("::temp0")
    })?;

    let result = decompile(function)?;
    assert_eq!(
        result.lines(),
        ["If bReady", "  Return \"a\"", "Else", "  Return \"b\"", "EndIf"]
    );
    Ok(())
}

#[test]
fn test_else_if_chain_sinks_merged_return() -> Result<()> {
    let function = Function::new("Pick", "String")
        .with_param("a", "Bool")
        .with_param("b", "Bool");
    let (function, _) = assemble(function, |asm| {
        asm.jmpf("a", "second")?;
        asm.assign("::temp0", Value::str("a"))?;
        asm.jmp("end")?;
        asm.label("second")?;
        asm.jmpf("b", "last")?;
        asm.assign("::temp0", Value::str("b"))?;
        asm.jmp("end")?;
        asm.label("last")?;
        asm.assign("::temp0", Value::str("c"))?;
        asm.label("end")?;
        asm.ret("::temp0")
    })?;

    let result = decompile(function)?;
    assert_eq!(
        result.lines(),
        [
            "If a",
            "  Return \"a\"",
            "ElseIf b",
            "  Return \"b\"",
            "Else",
            "  Return \"c\"",
            "EndIf"
        ]
    );
    Ok(())
}

#[test]
fn test_plain_if() -> Result<()> {
    let function = Function::new("OnActivate", "None").with_param("bReady", "Bool");
    let (function, _) = assemble(function, |asm| {
        asm.jmpf("bReady", "end")?;
        asm.call_method("Foo", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    assert_eq!(result.lines(), ["If bReady", "  Foo()", "EndIf"]);
    Ok(())
}

#[test]
fn test_short_circuit_conditions() -> Result<()> {
    let params = |f: Function| f.with_param("a", "Bool").with_param("b", "Bool");

    let (and, _) = assemble(params(Function::new("Both", "None")), |asm| {
        asm.assign("::temp0", "a")?;
        asm.jmpf("::temp0", "test")?;
        asm.assign("::temp0", "b")?;
        asm.label("test")?;
        asm.jmpf("::temp0", "end")?;
        asm.call_method("Foo", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;
    assert_eq!(decompile(and)?.lines(), ["If a && b", "  Foo()", "EndIf"]);

    let (or, _) = assemble(params(Function::new("Either", "None")), |asm| {
        asm.assign("::temp0", "a")?;
        asm.jmpt("::temp0", "test")?;
        asm.assign("::temp0", "b")?;
        asm.label("test")?;
        asm.jmpf("::temp0", "end")?;
        asm.call_method("Foo", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;
    assert_eq!(decompile(or)?.lines(), ["If a || b", "  Foo()", "EndIf"]);
    Ok(())
}

#[test]
fn test_short_circuit_keeps_calls_unconditional() -> Result<()> {
    let params = |f: Function| f.with_param("a", "Bool").with_param("b", "Bool");

    let (call, _) = assemble(params(Function::new("Checked", "None")), |asm| {
        asm.call_method("Foo", "self", Some("::temp0"), vec![])?;
        asm.assign("::temp1", "a")?;
        asm.jmpf("::temp1", "test")?;
        asm.assign("::temp1", "::temp0")?;
        asm.label("test")?;
        asm.jmpf("::temp1", "end")?;
        asm.call_method("X", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;
    let result = decompile(call)?;
    let lines = result.lines();
    assert_eq!(lines.len(), 4, "{lines:?}");
    assert!(lines[0].ends_with("temp0 = Foo()"), "{}", lines[0]);
    assert_eq!(&lines[1..], ["If a && temp0", "  X()", "EndIf"]);

    let (pure, _) = assemble(params(Function::new("Plain", "None")), |asm| {
        asm.assign("::temp0", "b")?;
        asm.assign("::temp1", "a")?;
        asm.jmpf("::temp1", "test")?;
        asm.assign("::temp1", "::temp0")?;
        asm.label("test")?;
        asm.jmpf("::temp1", "end")?;
        asm.call_method("X", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;
    assert_eq!(decompile(pure)?.lines(), ["If a && b", "  X()", "EndIf"]);
    Ok(())
}

#[test]
fn test_while_loop() -> Result<()> {
    let function = Function::new("Count", "None").with_local("i", "Int");
    let (function, _) = assemble(function, |asm| {
        asm.assign("i", Value::Integer(0))?;
        asm.label("top")?;
        asm.binary(OpCode::CmpLt, "::temp0", "i", 10)?;
        asm.jmpf("::temp0", "end")?;
        asm.binary(OpCode::Iadd, "::temp1", "i", 1)?;
        asm.assign("i", "::temp1")?;
        asm.jmp("top")?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    assert_eq!(
        result.lines(),
        ["Int i = 0", "While i < 10", "  i += 1", "EndWhile"]
    );
    Ok(())
}

#[test]
fn test_blank_local_type_is_inferred() -> Result<()> {
    let function = Function::new("OnInit", "None").with_local("x", "");
    let (function, _) = assemble(function, |asm| {
        asm.assign("x", Value::Integer(5))?;
        asm.call_method("Foo", "self", None, vec![Value::id("x")])?;
        asm.ret(Value::None)
    })?;

    let result = decompile(function)?;
    assert_eq!(result.lines(), ["Int x = 5", "Foo(x)"]);
    Ok(())
}

#[test]
fn test_guard_block() -> Result<()> {
    let (function, _) = assemble(Function::new("Update", "None"), |asm| {
        asm.lock_guards(&["myGuard"])?;
        asm.call_method("Foo", "self", None, vec![])?;
        asm.unlock_guards(&["myGuard"])?;
        asm.ret(Value::None)
    })?;

    let mut result = decompile_in(
        ScriptType::Starfield,
        "MyScript",
        function,
        DecompilerConfig::default(),
    )?;
    assert_eq!(
        result.lines(),
        [
            format!("Guard myGuard {EXPERIMENTAL} Guard"),
            "  Foo()".to_string(),
            format!("EndGuard {EXPERIMENTAL} EndGuard"),
        ]
    );

    // Lifting is idempotent on the finished tree.
    let root = result.root;
    assert!(!GuardLifter::new().run(&mut result.tree, root)?);
    Ok(())
}

#[test]
fn test_try_guard_block() -> Result<()> {
    let (function, _) = assemble(Function::new("Update", "None"), |asm| {
        asm.try_lock_guards("::temp0", &["myGuard"])?;
        asm.jmpf("::temp0", "else")?;
        asm.call_method("Foo", "self", None, vec![])?;
        asm.unlock_guards(&["myGuard"])?;
        asm.jmp("end")?;
        asm.label("else")?;
        asm.call_method("Bar", "self", None, vec![])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;

    let result = decompile_in(
        ScriptType::Starfield,
        "MyScript",
        function,
        DecompilerConfig::default(),
    )?;
    let lines = result.lines();
    assert!(lines[0].starts_with("TryGuard myGuard"), "{}", lines[0]);
    assert!(lines.iter().any(|line| line.starts_with("EndTryGuard")));
    assert!(lines.iter().all(|line| !line.contains("UnlockGuards")));
    Ok(())
}

fn debug_only_function(name: &str) -> Result<Function> {
    let (function, _) = assemble(Function::new(name, "None"), |asm| {
        asm.jmpf("::temp3", "end")?;
        asm.call_static("Debug", "Trace", None, vec![Value::str("x")])?;
        asm.label("end")?;
        asm.ret(Value::None)
    })?;
    Ok(function)
}

#[test]
fn test_allow_listed_debug_function() -> Result<()> {
    let result = decompile_in(
        ScriptType::Starfield,
        "ENV_Hazard_ParentScript",
        debug_only_function("GlobalWarning")?,
        DecompilerConfig::default(),
    )?;
    assert!(result.is_debug_only());
    assert!(result.fixup.applied);
    assert_eq!(
        result.lines(),
        [
            "; Fixup hacks for debug-only function: GlobalWarning",
            "If false",
            "  Debug.Trace(\"x\")",
            "EndIf",
        ]
    );
    Ok(())
}

#[test]
fn test_unlisted_debug_function_policy() -> Result<()> {
    let skipped = decompile_in(
        ScriptType::Starfield,
        "MyQuest",
        debug_only_function("Report")?,
        DecompilerConfig::default(),
    )?;
    assert!(skipped.fixup.skipped);
    assert_eq!(skipped.lines(), ["; Skipped inoperative debug function Report"]);

    let warned = decompile_in(
        ScriptType::Starfield,
        "MyQuest",
        debug_only_function("Report")?,
        DecompilerConfig::default().with_debug_function_policy(DebugFunctionPolicy::Warn),
    )?;
    assert!(!warned.fixup.applied);
    assert_eq!(
        warned.lines()[0],
        "; WARNING: possibly inoperative debug function Report"
    );
    assert_eq!(warned.lines()[1], "If ::temp3");
    Ok(())
}

#[test]
fn test_debug_line_mapping() -> Result<()> {
    let (function, lines) = assemble(Function::new("OnInit", "None"), |asm| {
        asm.line(3);
        asm.call_method("Foo", "self", None, vec![])?;
        asm.line(6);
        asm.call_method("Bar", "self", None, vec![])?;
        asm.ret(Value::None)
    })?;
    let info = FunctionInfo {
        object_name: "MyScript".to_string(),
        state_name: String::new(),
        function_name: "OnInit".to_string(),
        kind: FunctionKind::Plain,
        line_numbers: lines,
    };
    let object = Object::new("MyScript").with_state(State::new("").with_function(function));
    let binary = Binary::new(ScriptType::Skyrim)
        .with_object(object)
        .with_debug_info(DebugInfo {
            functions: vec![info],
            ..Default::default()
        });

    let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
    let result = decompiler.decompile_named("MyScript", "", "OnInit")?;
    assert_eq!(result.lines(), ["Foo()", "", "", "Bar()"]);
    assert_eq!(result.line_map, vec![vec![3], vec![], vec![], vec![6]]);
    assert!(result.debug_function.is_some());

    let compact = Decompiler::new(
        &binary,
        DecompilerConfig::default()
            .with_blank_lines(false)
            .with_debug_line_numbers(true),
    );
    let result = compact.decompile_named("MyScript", "", "OnInit")?;
    assert_eq!(
        result.lines(),
        ["Foo() ; #DEBUG_LINE_NO:3", "Bar() ; #DEBUG_LINE_NO:6"]
    );
    Ok(())
}

#[test]
fn test_jump_out_of_range_is_malformed() -> Result<()> {
    let function = Function::new("Broken", "None").with_instructions(vec![
        Instruction::new(OpCode::Jmp, vec![Value::Integer(5)]),
        Instruction::new(OpCode::Return, vec![Value::None]),
    ]);
    assert!(matches!(decompile(function), Err(Error::Malformed { .. })));
    Ok(())
}

#[test]
fn test_bad_arity_is_malformed() -> Result<()> {
    let function = Function::new("Broken", "None").with_instructions(vec![
        Instruction::new(OpCode::Assign, vec![Value::id("x")]),
        Instruction::new(OpCode::Return, vec![Value::None]),
    ]);
    assert!(matches!(decompile(function), Err(Error::Malformed { .. })));
    Ok(())
}

#[test]
fn test_object_failures_are_isolated() -> Result<()> {
    let (good, _) = assemble(Function::new("GetValue", "Int"), |asm| {
        asm.ret(Value::Integer(1))
    })?;
    let broken = Function::new("Broken", "None").with_instructions(vec![Instruction::new(
        OpCode::Jmp,
        vec![Value::Integer(7)],
    )]);
    let native = Function::new("GetState", "String").with_flags(FunctionFlags::NATIVE);

    let object = Object::new("MyScript").with_state(
        State::new("")
            .with_function(good)
            .with_function(broken)
            .with_function(native),
    );
    let binary = Binary::new(ScriptType::Fallout4).with_object(object);
    let decompiler = Decompiler::new(&binary, DecompilerConfig::default());

    let outcomes = decompiler.decompile_object(&binary.objects[0]);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].function, "GetValue");
    assert_eq!(outcomes[0].result.as_ref().map(|f| f.lines().len()).ok(), Some(1));
    assert_eq!(outcomes[1].function, "Broken");
    assert!(outcomes[1].result.is_err());
    Ok(())
}
