//! Benchmarks for the decompilation pipeline.
//!
//! Measures whole-function decompilation for synthetic bodies shaped like compiler output:
//! - Straight-line call chains with temporaries to inline
//! - Chains of `If`/`Else` with a merged return value
//! - Counting loops
//! - A whole object decompiled in parallel

extern crate pexscope;

use criterion::{criterion_group, criterion_main, Criterion};
use pexscope::{
    pex::{Function, FunctionAssembler, Object, OpCode, State, Value},
    Binary, Decompiler, DecompilerConfig, ScriptType,
};
use std::hint::black_box;

/// `Bar(Foo(i))` repeated `count` times.
fn call_chain(count: usize) -> Function {
    let mut asm = FunctionAssembler::new();
    for i in 0..count {
        asm.call_method("Foo", "self", Some("::temp0"), vec![Value::Integer(i as i32)])
            .unwrap();
        asm.call_method("Bar", "self", None, vec![Value::id("::temp0")])
            .unwrap();
    }
    asm.ret(Value::None).unwrap();
    let (instructions, _) = asm.finish().unwrap();
    Function::new("Chain", "None").with_instructions(instructions)
}

/// `count` consecutive `If x == i ... Else ... EndIf` blocks.
fn branches(count: usize) -> Function {
    let mut asm = FunctionAssembler::new();
    for i in 0..count {
        let other = format!("else{i}");
        let join = format!("join{i}");
        asm.binary(OpCode::CmpEq, "::temp0", "x", i as i32).unwrap();
        asm.jmpf("::temp0", &other).unwrap();
        asm.call_method("Foo", "self", None, vec![]).unwrap();
        asm.jmp(&join).unwrap();
        asm.label(&other).unwrap();
        asm.call_method("Bar", "self", None, vec![]).unwrap();
        asm.label(&join).unwrap();
    }
    asm.ret(Value::None).unwrap();
    let (instructions, _) = asm.finish().unwrap();
    Function::new("Branches", "None")
        .with_param("x", "Int")
        .with_instructions(instructions)
}

/// `count` sequential counting loops.
fn loops(count: usize) -> Function {
    let mut asm = FunctionAssembler::new();
    for i in 0..count {
        let top = format!("top{i}");
        let end = format!("end{i}");
        asm.assign("i", Value::Integer(0)).unwrap();
        asm.label(&top).unwrap();
        asm.binary(OpCode::CmpLt, "::temp0", "i", 10).unwrap();
        asm.jmpf("::temp0", &end).unwrap();
        asm.call_method("Foo", "self", None, vec![Value::id("i")])
            .unwrap();
        asm.binary(OpCode::Iadd, "::temp1", "i", 1).unwrap();
        asm.assign("i", "::temp1").unwrap();
        asm.jmp(&top).unwrap();
        asm.label(&end).unwrap();
    }
    asm.ret(Value::None).unwrap();
    let (instructions, _) = asm.finish().unwrap();
    Function::new("Loops", "None")
        .with_local("i", "Int")
        .with_instructions(instructions)
}

fn binary_with(functions: Vec<Function>) -> Binary {
    let state = functions
        .into_iter()
        .fold(State::new(""), |state, function| state.with_function(function));
    Binary::new(ScriptType::Fallout4).with_object(Object::new("BenchScript").with_state(state))
}

fn bench_function(c: &mut Criterion, id: &str, function: Function) {
    let name = function.name.clone();
    let binary = binary_with(vec![function]);
    let decompiler = Decompiler::new(&binary, DecompilerConfig::default());

    c.bench_function(id, |b| {
        b.iter(|| {
            let result = decompiler
                .decompile_named(black_box("BenchScript"), "", &name)
                .unwrap();
            black_box(result)
        });
    });
}

fn bench_call_chain(c: &mut Criterion) {
    bench_function(c, "decompile_call_chain_200", call_chain(200));
}

fn bench_branches(c: &mut Criterion) {
    bench_function(c, "decompile_branches_50", branches(50));
}

fn bench_loops(c: &mut Criterion) {
    bench_function(c, "decompile_loops_20", loops(20));
}

/// Benchmark a whole object; functions are spread over the rayon pool.
fn bench_object(c: &mut Criterion) {
    let functions = (0..32)
        .map(|i| {
            let mut function = branches(10);
            function.name = format!("Branches{i}");
            function
        })
        .collect();
    let binary = binary_with(functions);
    let decompiler = Decompiler::new(&binary, DecompilerConfig::default());

    c.bench_function("decompile_object_32", |b| {
        b.iter(|| black_box(decompiler.decompile_object(black_box(&binary.objects[0]))));
    });
}

criterion_group!(
    benches,
    bench_call_chain,
    bench_branches,
    bench_loops,
    bench_object
);
criterion_main!(benches);
