#![no_main]

use libfuzzer_sys::fuzz_target;
use pexscope::{
    pex::{Binary, Function, Instruction, Object, OpCode, ScriptType, State, Value},
    Decompiler, DecompilerConfig,
};

const NAMES: [&str; 6] = ["::temp0", "::temp1", "a", "b", "self", "::Stage_var"];

fn operand(byte: u8, jump: bool) -> Value {
    if jump {
        return Value::Integer(i32::from(byte as i8));
    }
    match byte % 4 {
        0 => Value::Integer(i32::from(byte)),
        1 => Value::Bool(byte & 0x10 != 0),
        _ => Value::id(NAMES[usize::from(byte) % NAMES.len()]),
    }
}

fn instructions(data: &[u8]) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut bytes = data.iter().copied();
    while let Some(code) = bytes.next() {
        let Some(opcode) = OpCode::from_byte(code) else {
            continue;
        };
        let count = opcode.fixed_args();
        let args = (0..count)
            .map(|index| {
                let jump = opcode.is_jump() && index + 1 == count;
                operand(bytes.next().unwrap_or(0), jump)
            })
            .collect();
        let varargs = if opcode.has_varargs() {
            let n = bytes.next().unwrap_or(0) % 3;
            (0..n).map(|_| operand(bytes.next().unwrap_or(0), false)).collect()
        } else {
            Vec::new()
        };
        out.push(Instruction::with_varargs(opcode, args, varargs));
    }
    out
}

fuzz_target!(|data: &[u8]| {
    let function = Function::new("Fuzz", "None")
        .with_param("a", "Int")
        .with_param("b", "Bool")
        .with_instructions(instructions(data));
    let object = Object::new("FuzzScript").with_state(State::new("").with_function(function));
    let binary = Binary::new(ScriptType::Starfield).with_object(object);
    let decompiler = Decompiler::new(&binary, DecompilerConfig::default());
    let _ = decompiler.decompile_named("FuzzScript", "", "Fuzz");
});
