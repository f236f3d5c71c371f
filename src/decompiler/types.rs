//! Type inference for undeclared variables.
//!
//! Temporaries and untyped locals get their type by unification over the instruction list:
//! literal operands, declared variables, the signatures of methods on the same object,
//! property types, array element types and the function's return type all contribute.
//! `Int` and `Float` unify to `Float`; any other disagreement, or no information at all,
//! yields the dynamic type [`VAR_TYPE`]. Inference never fails.

use std::collections::HashMap;

use crate::pex::{is_temp, Function, Instruction, Object, OpCode, Value, NONE_VAR};

/// The most general type, used when inference has nothing consistent to offer.
pub const VAR_TYPE: &str = "Var";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Unknown,
    Known(String),
    Conflict,
}

impl Slot {
    /// Joins `self` with `type_name`, returning whether anything changed.
    fn unify(&mut self, type_name: &str) -> bool {
        let next = match self {
            Slot::Conflict => return false,
            Slot::Unknown => Slot::Known(type_name.to_string()),
            Slot::Known(current) => {
                if current.eq_ignore_ascii_case(type_name) {
                    return false;
                }
                let numeric = |t: &str| t.eq_ignore_ascii_case("Int") || t.eq_ignore_ascii_case("Float");
                if numeric(current) && numeric(type_name) {
                    Slot::Known("Float".to_string())
                } else {
                    Slot::Conflict
                }
            }
        };
        let changed = *self != next;
        *self = next;
        changed
    }
}

/// Types of every name a function touches.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    declared: HashMap<String, String>,
    inferred: HashMap<String, Slot>,
}

impl TypeTable {
    /// Runs inference for `function` of `object`.
    #[must_use]
    pub fn infer(object: &Object, function: &Function) -> Self {
        let mut table = TypeTable::default();
        for variable in &object.variables {
            table.declare(&variable.name, &variable.type_name);
        }
        table.declare("self", &object.name);
        for param in &function.params {
            table.declare(&param.name, &param.type_name);
        }
        for local in &function.locals {
            match local.declared_type() {
                Some(type_name) => table.declare(&local.name, type_name),
                None => {
                    table.inferred.insert(local.name.to_ascii_lowercase(), Slot::Unknown);
                }
            }
        }
        for instruction in &function.instructions {
            for value in instruction.args.iter().chain(&instruction.varargs) {
                if let Some(name) = value.as_identifier().filter(|name| is_temp(name)) {
                    table
                        .inferred
                        .entry(name.to_ascii_lowercase())
                        .or_insert(Slot::Unknown);
                }
            }
        }

        let mut rounds = 0;
        while rounds < 32 {
            let mut changed = false;
            for instruction in &function.instructions {
                changed |= table.visit(object, function, instruction);
            }
            if !changed {
                break;
            }
            rounds += 1;
        }
        table
    }

    /// Type of `name`, `None` if nothing is known.
    #[must_use]
    pub fn type_of(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        if let Some(type_name) = self.declared.get(&key) {
            return Some(type_name);
        }
        match self.inferred.get(&key) {
            Some(Slot::Known(type_name)) => Some(type_name),
            _ => None,
        }
    }

    /// Type to declare `name` with, [`VAR_TYPE`] when inference failed.
    #[must_use]
    pub fn declared_type(&self, name: &str) -> &str {
        self.type_of(name).unwrap_or(VAR_TYPE)
    }

    /// Type of an operand.
    #[must_use]
    pub fn value_type(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Identifier(name) => self.type_of(name),
            other => other.literal_type(),
        }
    }

    fn declare(&mut self, name: &str, type_name: &str) {
        self.declared
            .insert(name.to_ascii_lowercase(), type_name.to_string());
    }

    /// Feeds a type observation for an operand; only inferable names record it.
    fn observe(&mut self, value: &Value, type_name: Option<&str>) -> bool {
        let (Some(name), Some(type_name)) = (value.as_identifier(), type_name) else {
            return false;
        };
        if name.eq_ignore_ascii_case(NONE_VAR) {
            return false;
        }
        match self.inferred.get_mut(&name.to_ascii_lowercase()) {
            Some(slot) => slot.unify(type_name),
            None => false,
        }
    }

    fn observe_owned(&mut self, value: &Value, type_name: Option<String>) -> bool {
        self.observe(value, type_name.as_deref())
    }

    fn visit(&mut self, object: &Object, function: &Function, instruction: &Instruction) -> bool {
        let args = &instruction.args;
        let arg = |index: usize| args.get(index).unwrap_or(&Value::None);
        let mut changed = false;
        match instruction.opcode {
            OpCode::Iadd | OpCode::Isub | OpCode::Imul | OpCode::Idiv | OpCode::Imod => {
                changed |= self.observe(arg(0), Some("Int"));
                changed |= self.observe(arg(1), Some("Int"));
                changed |= self.observe(arg(2), Some("Int"));
            }
            OpCode::Fadd | OpCode::Fsub | OpCode::Fmul | OpCode::Fdiv => {
                changed |= self.observe(arg(0), Some("Float"));
            }
            OpCode::Ineg => {
                changed |= self.observe(arg(0), Some("Int"));
                changed |= self.observe(arg(1), Some("Int"));
            }
            OpCode::Fneg => changed |= self.observe(arg(0), Some("Float")),
            OpCode::Not
            | OpCode::CmpEq
            | OpCode::CmpLt
            | OpCode::CmpLe
            | OpCode::CmpGt
            | OpCode::CmpGe
            | OpCode::Is
            | OpCode::TryLockGuards => changed |= self.observe(arg(0), Some("Bool")),
            OpCode::StrCat => changed |= self.observe(arg(0), Some("String")),
            OpCode::ArrayLength => changed |= self.observe(arg(0), Some("Int")),
            OpCode::ArrayFindElement
            | OpCode::ArrayRFindElement
            | OpCode::ArrayFindStruct
            | OpCode::ArrayRFindStruct => changed |= self.observe(arg(1), Some("Int")),
            OpCode::Assign => {
                let source = self.value_type(arg(1)).map(str::to_string);
                changed |= self.observe_owned(arg(0), source);
                let dest = self.value_type(arg(0)).map(str::to_string);
                changed |= self.observe_owned(arg(1), dest);
            }
            OpCode::Return => {
                if !function.returns_none() {
                    changed |= self.observe(arg(0), Some(function.return_type.as_str()));
                }
            }
            OpCode::CallMethod => {
                if arg(1).is_identifier("self") {
                    changed |= self.visit_self_call(object, arg(0), arg(2), &instruction.varargs);
                }
            }
            OpCode::CallStatic => {
                if arg(0).is_identifier(&object.name) {
                    changed |= self.visit_self_call(object, arg(1), arg(2), &instruction.varargs);
                }
            }
            OpCode::PropGet | OpCode::PropSet => {
                if arg(1).is_identifier("self") {
                    let property_type = arg(0)
                        .as_identifier()
                        .and_then(|name| object.property(name))
                        .map(|property| property.type_name.clone());
                    changed |= self.observe_owned(arg(2), property_type);
                }
            }
            OpCode::ArrayGetElement => {
                let element = self.element_type(arg(1));
                changed |= self.observe_owned(arg(0), element);
                changed |= self.observe(arg(2), Some("Int"));
            }
            OpCode::ArraySetElement => {
                let element = self.element_type(arg(0));
                changed |= self.observe_owned(arg(2), element);
                changed |= self.observe(arg(1), Some("Int"));
            }
            OpCode::ArrayAdd | OpCode::ArrayInsert => {
                let element = self.element_type(arg(0));
                changed |= self.observe_owned(arg(1), element);
            }
            OpCode::ArrayCreate => changed |= self.observe(arg(1), Some("Int")),
            OpCode::ArrayGetAllMatchingStructs => {
                let array = self.value_type(arg(0)).map(str::to_string);
                changed |= self.observe_owned(arg(1), array);
            }
            OpCode::StructGet => {
                let member = self.member_type(object, arg(1), arg(2));
                changed |= self.observe_owned(arg(0), member);
            }
            OpCode::StructSet => {
                let member = self.member_type(object, arg(0), arg(1));
                changed |= self.observe_owned(arg(2), member);
            }
            _ => {}
        }
        changed
    }

    fn visit_self_call(
        &mut self,
        object: &Object,
        method: &Value,
        dest: &Value,
        args: &[Value],
    ) -> bool {
        let Some(callee) = method
            .as_identifier()
            .and_then(|name| find_method(object, name))
        else {
            return false;
        };
        let mut changed = false;
        if !callee.returns_none() {
            changed |= self.observe(dest, Some(callee.return_type.as_str()));
        }
        for (param, value) in callee.params.iter().zip(args) {
            changed |= self.observe(value, Some(param.type_name.as_str()));
        }
        changed
    }

    fn element_type(&self, array: &Value) -> Option<String> {
        self.value_type(array)
            .and_then(|type_name| type_name.strip_suffix("[]"))
            .map(str::to_string)
    }

    fn member_type(&self, object: &Object, value: &Value, member: &Value) -> Option<String> {
        let struct_type = self.value_type(value)?;
        let struct_name = struct_type.rsplit(['#', ':']).next().unwrap_or(struct_type);
        let member = member.as_identifier()?;
        object
            .struct_info(struct_name)
            .and_then(|info| info.member(member))
            .map(|member| member.type_name.clone())
    }
}

/// Finds a method of `object` in any state, the default state first.
pub(crate) fn find_method<'a>(object: &'a Object, name: &str) -> Option<&'a Function> {
    object.function("", name).or_else(|| {
        object
            .states
            .iter()
            .find_map(|state| state.function(name))
    })
}

/// Element type of an array type name, [`VAR_TYPE`] when `type_name` is not an array.
#[must_use]
pub fn element_type_of(type_name: Option<&str>) -> String {
    type_name
        .and_then(|type_name| type_name.strip_suffix("[]"))
        .unwrap_or(VAR_TYPE)
        .to_string()
}
