//! VM tests
//!
//! Shared builders for prototypes, threads and a context with the
//! `Thread` library installed.

pub mod frames;
pub mod interpreter;
pub mod pool;

use std::rc::Rc;

use crate::runtime::stdlib;
use crate::runtime::Context;
use crate::vm::{Closure, ClosureRef, Const, Instr, Prototype, Thread, ThreadRef, Value, Varargs};

/// Closure over a fresh prototype
pub(super) fn closure(
    name: &str,
    code: Vec<Instr>,
) -> ClosureRef {
    Closure::from_proto(Prototype::new(name, code))
}

pub(super) fn ints(values: &[i64]) -> Varargs {
    values.iter().map(|v| Value::Int(*v)).collect()
}

/// Default context with the `Thread` table in its globals
pub(super) fn context() -> Context {
    let mut cx = Context::default();
    stdlib::install(&mut cx);
    cx
}

pub(super) fn thread(cx: &Context) -> ThreadRef {
    Thread::new_ref(Rc::clone(cx.globals()))
}

pub(super) fn global(
    cx: &Context,
    name: &str,
) -> Value {
    cx.globals().borrow().get_str(name)
}

/// `Thread.<function>(args in slots dst+1..)` loading the callee into `dst`
pub(super) fn thread_call(
    dst: usize,
    function: &str,
    nargs: usize,
) -> Vec<Instr> {
    vec![
        Instr::GetGlobal {
            dst,
            name: "Thread".into(),
        },
        Instr::GetField {
            dst,
            table: dst,
            key: Const::from(function),
        },
        Instr::Call {
            func: dst,
            nargs: Some(nargs),
            nresults: Some(0),
        },
    ]
}

/// `globals[name] = value` via slot `tmp`
pub(super) fn set_global(
    tmp: usize,
    name: &str,
    value: i64,
) -> Vec<Instr> {
    vec![
        Instr::LoadK {
            dst: tmp,
            value: Const::Int(value),
        },
        Instr::SetGlobal {
            name: name.into(),
            src: tmp,
        },
    ]
}
