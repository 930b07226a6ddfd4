//! Reference register interpreter
//!
//! A small instruction set, enough to drive the thread runtime from tests,
//! demos and persisted snapshots. Registers are stack slots of the running
//! frame; multi-value results travel through the frame's `v` list.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::vm::closure::Closure;
use crate::vm::dispatch::{Control, Dispatch, Execution, NativeResult};
use crate::vm::errors::{ScriptError, StructuralError, ThreadResult};
use crate::vm::frames::{Frame, MULTI_RETURN};
use crate::vm::value::{Key, Table, Value, Varargs};

/// Constant operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Nil,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_bits")] f64),
    Str(String),
}

/// Floats as their bit pattern, so NaN and infinities survive JSON
mod float_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &f64,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl Const {
    pub fn to_value(&self) -> Value {
        match self {
            Const::Nil => Value::Nil,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(i) => Value::Int(*i),
            Const::Float(f) => Value::Float(*f),
            Const::Str(s) => Value::str(s),
        }
    }
}

impl From<&str> for Const {
    fn from(s: &str) -> Self {
        Const::Str(s.to_string())
    }
}

impl From<i64> for Const {
    fn from(i: i64) -> Self {
        Const::Int(i)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Concat,
}

/// Instruction
///
/// `nargs: None` passes `stack[func+1..top]` followed by the pending
/// multi-value list; `nresults: None` keeps every result in that list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    LoadK { dst: usize, value: Const },
    Move { dst: usize, src: usize },
    GetGlobal { dst: usize, name: String },
    SetGlobal { name: String, src: usize },
    GetField { dst: usize, table: usize, key: Const },
    SetField { table: usize, key: Const, src: usize },
    NewTable { dst: usize },
    GetUpval { dst: usize, index: usize },
    SetUpval { index: usize, src: usize },
    /// Instantiate child prototype `proto`
    Closure { dst: usize, proto: usize },
    /// Close upvalues for slots `from..`
    Close { from: usize },
    Arith { op: ArithOp, dst: usize, lhs: usize, rhs: usize },
    Lt { dst: usize, lhs: usize, rhs: usize },
    Eq { dst: usize, lhs: usize, rhs: usize },
    Not { dst: usize, src: usize },
    Jmp { target: usize },
    JmpIfNot { cond: usize, target: usize },
    VarArg { dst: usize, count: Option<usize> },
    Call { func: usize, nargs: Option<usize>, nresults: Option<usize> },
    TailCall { func: usize, nargs: Option<usize> },
    Return { base: usize, count: Option<usize> },
}

/// Dispatcher for [`Instr`] code
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Interpreter
    }
}

impl Dispatch for Interpreter {
    fn execute(
        &self,
        exec: &mut Execution<'_>,
    ) -> ThreadResult<Control> {
        let closure = exec.closure()?;
        let proto = closure.proto();

        // Resumed after a tail-called native yielded: its results are ours
        let resumed_at = exec.frame()?.pc.checked_sub(1).and_then(|pc| proto.code.get(pc));
        if let Some(Instr::TailCall { .. }) = resumed_at {
            let values = exec.frame_mut()?.take_pending();
            return Ok(Control::Return(values));
        }

        loop {
            if exec.is_cancelled() {
                return Err(StructuralError::Cancelled.into());
            }
            let frame = exec.frame_mut()?;
            let pc = frame.pc;
            let Some(instr) = proto.code.get(pc) else {
                // Falling off the end returns nothing
                return Ok(Control::Return(Varargs::none()));
            };
            frame.pc += 1;

            match instr {
                Instr::LoadK { dst, value } => frame.set_slot(*dst, value.to_value()),
                Instr::Move { dst, src } => {
                    let value = frame.slot(*src);
                    frame.set_slot(*dst, value);
                }
                Instr::GetGlobal { dst, name } => {
                    let value = exec.env().borrow().get_str(name);
                    exec.frame_mut()?.set_slot(*dst, value);
                }
                Instr::SetGlobal { name, src } => {
                    let value = frame.slot(*src);
                    exec.env().borrow_mut().set_str(name, value);
                }
                Instr::GetField { dst, table, key } => {
                    let table = index_target(&frame.slot(*table))?;
                    let value = table.borrow().get(&Key::from_value(&key.to_value())?);
                    frame.set_slot(*dst, value);
                }
                Instr::SetField { table, key, src } => {
                    let table = index_target(&frame.slot(*table))?;
                    let value = frame.slot(*src);
                    table.borrow_mut().set(Key::from_value(&key.to_value())?, value);
                }
                Instr::NewTable { dst } => frame.set_slot(*dst, Value::new_table()),
                Instr::GetUpval { dst, index } => {
                    let up = closure
                        .upvalue(*index)
                        .ok_or_else(|| StructuralError::InvalidState(format!("no upvalue {}", index)))?;
                    let value = exec.get_upvalue(up)?;
                    exec.frame_mut()?.set_slot(*dst, value);
                }
                Instr::SetUpval { index, src } => {
                    let value = frame.slot(*src);
                    let up = closure
                        .upvalue(*index)
                        .ok_or_else(|| StructuralError::InvalidState(format!("no upvalue {}", index)))?;
                    exec.set_upvalue(up, value)?;
                }
                Instr::Closure { dst, proto: child } => {
                    let child = proto
                        .protos
                        .get(*child)
                        .cloned()
                        .ok_or_else(|| StructuralError::InvalidState(format!("no child prototype {}", child)))?;
                    let mut upvalues = Vec::with_capacity(child.upvalues.len());
                    for desc in &child.upvalues {
                        let up = if desc.in_stack {
                            exec.capture(desc.index)?
                        } else {
                            closure.upvalue(desc.index).cloned().ok_or_else(|| {
                                StructuralError::InvalidState(format!("no upvalue {}", desc.index))
                            })?
                        };
                        upvalues.push(up);
                    }
                    let value = Value::Closure(Rc::new(Closure::new(child, upvalues)));
                    exec.frame_mut()?.set_slot(*dst, value);
                }
                Instr::Close { from } => frame.close_upvalues_from(*from),
                Instr::Arith { op, dst, lhs, rhs } => {
                    let value = arith(*op, &frame.slot(*lhs), &frame.slot(*rhs))?;
                    frame.set_slot(*dst, value);
                }
                Instr::Lt { dst, lhs, rhs } => {
                    let value = less_than(&frame.slot(*lhs), &frame.slot(*rhs))?;
                    frame.set_slot(*dst, Value::Bool(value));
                }
                Instr::Eq { dst, lhs, rhs } => {
                    let value = frame.slot(*lhs).raw_eq(&frame.slot(*rhs));
                    frame.set_slot(*dst, Value::Bool(value));
                }
                Instr::Not { dst, src } => {
                    let value = !frame.slot(*src).is_truthy();
                    frame.set_slot(*dst, Value::Bool(value));
                }
                Instr::Jmp { target } => frame.pc = *target,
                Instr::JmpIfNot { cond, target } => {
                    if !frame.slot(*cond).is_truthy() {
                        frame.pc = *target;
                    }
                }
                Instr::VarArg { dst, count } => match count {
                    Some(n) => {
                        let varargs = frame.varargs.clone();
                        for i in 0..*n {
                            frame.set_slot(dst + i, varargs.get(i));
                        }
                    }
                    None => {
                        frame.v = frame.varargs.clone();
                        frame.top = *dst;
                    }
                },
                Instr::Call { func, nargs, nresults } => {
                    let callee = frame.slot(*func);
                    let args = collect_args(frame, *func + 1, *nargs);
                    let return_count = nresults.map_or(MULTI_RETURN, |n| n as i32);
                    match callee {
                        Value::Closure(closure) => {
                            return Ok(Control::Call {
                                closure,
                                args,
                                return_base: *func,
                                return_count,
                            });
                        }
                        Value::Native(native) => match exec.call_native(&native, args)? {
                            NativeResult::Return(values) => {
                                exec.frame_mut()?.store_results(*func, return_count, &values);
                            }
                            other => return Ok(suspend(other)),
                        },
                        other => return Err(not_callable(&proto.code, pc, *func, &other).into()),
                    }
                }
                Instr::TailCall { func, nargs } => {
                    let callee = frame.slot(*func);
                    let args = collect_args(frame, *func + 1, *nargs);
                    return match callee {
                        Value::Closure(closure) => Ok(Control::TailCall { closure, args }),
                        Value::Native(native) => match exec.call_native(&native, args)? {
                            NativeResult::Return(values) => Ok(Control::Return(values)),
                            other => Ok(suspend(other)),
                        },
                        other => Err(not_callable(&proto.code, pc, *func, &other).into()),
                    };
                }
                Instr::Return { base, count } => {
                    let values = collect_args(frame, *base, *count);
                    return Ok(Control::Return(values));
                }
            }
        }
    }

    fn deliver(
        &self,
        frame: &mut Frame,
        values: Varargs,
    ) {
        let Some(closure) = frame.closure.clone() else {
            return;
        };
        let call = frame
            .pc
            .checked_sub(1)
            .and_then(|pc| closure.proto().code.get(pc));
        match call {
            Some(Instr::Call { func, nresults, .. }) => {
                let count = nresults.map_or(MULTI_RETURN, |n| n as i32);
                frame.store_results(*func, count, &values);
            }
            Some(Instr::TailCall { .. }) => frame.set_pending(values),
            _ => {}
        }
    }
}

/// Non-returning native outcome as a thread control
fn suspend(result: NativeResult) -> Control {
    match result {
        NativeResult::Return(values) => Control::Return(values),
        NativeResult::Yield(values) => Control::Yield(values),
        NativeResult::EndCall(values) => Control::EndCall(values),
        NativeResult::Jump { closure, args } => Control::Jump { closure, args },
    }
}

/// Error for calling `callee`
///
/// A nil callee loaded by name reports the missing binding.
fn not_callable(
    code: &[Instr],
    pc: usize,
    func: usize,
    callee: &Value,
) -> ScriptError {
    if callee.is_nil() {
        if let Some(name) = binding_name(&code[..pc], func) {
            return ScriptError::MissingBinding(name);
        }
    }
    ScriptError::NotCallable(callee.type_name())
}

/// Name under which the latest write to `slot` in `code` looked its value up
fn binding_name(
    code: &[Instr],
    slot: usize,
) -> Option<String> {
    for instr in code.iter().rev() {
        match instr {
            Instr::GetGlobal { dst, name } if *dst == slot => return Some(name.clone()),
            Instr::GetField {
                dst,
                key: Const::Str(name),
                ..
            } if *dst == slot => return Some(name.clone()),
            Instr::LoadK { dst, .. }
            | Instr::Move { dst, .. }
            | Instr::GetGlobal { dst, .. }
            | Instr::GetField { dst, .. }
            | Instr::NewTable { dst }
            | Instr::GetUpval { dst, .. }
            | Instr::Closure { dst, .. }
            | Instr::Arith { dst, .. }
            | Instr::Lt { dst, .. }
            | Instr::Eq { dst, .. }
            | Instr::Not { dst, .. }
                if *dst == slot =>
            {
                return None;
            }
            _ => {}
        }
    }
    None
}

/// `count` slots from `start`, or `start..top` plus the pending list
fn collect_args(
    frame: &mut Frame,
    start: usize,
    count: Option<usize>,
) -> Varargs {
    match count {
        Some(n) => (start..start + n).map(|i| frame.slot(i)).collect(),
        None => {
            let fixed: Varargs = (start..frame.top.max(start)).map(|i| frame.slot(i)).collect();
            let pending = frame.take_pending();
            fixed.concat(&pending)
        }
    }
}

fn index_target(value: &Value) -> Result<Rc<RefCell<Table>>, ScriptError> {
    value
        .as_table()
        .cloned()
        .ok_or(ScriptError::NotIndexable(value.type_name()))
}

fn arith(
    op: ArithOp,
    lhs: &Value,
    rhs: &Value,
) -> Result<Value, ScriptError> {
    let mismatch = || ScriptError::Arithmetic {
        op: op_name(op),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    if op == ArithOp::Concat {
        return match (lhs, rhs) {
            (Value::Str(_) | Value::Int(_) | Value::Float(_), Value::Str(_) | Value::Int(_) | Value::Float(_)) => {
                Ok(Value::str(&(lhs.to_display_string() + &rhs.to_display_string())))
            }
            _ => Err(mismatch()),
        };
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
            ArithOp::Add => a.wrapping_add(*b),
            ArithOp::Sub => a.wrapping_sub(*b),
            _ => a.wrapping_mul(*b),
        })),
        _ => {
            let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) else {
                return Err(mismatch());
            };
            Ok(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                _ => a * b,
            }))
        }
    }
}

fn op_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Concat => "concat",
    }
}

fn less_than(
    lhs: &Value,
    rhs: &Value,
) -> Result<bool, ScriptError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a < b),
        _ => match (lhs.as_float(), rhs.as_float()) {
            (Some(a), Some(b)) => Ok(a < b),
            _ => Err(ScriptError::Comparison {
                lhs: lhs.type_name(),
                rhs: rhs.type_name(),
            }),
        },
    }
}
