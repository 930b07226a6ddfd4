//! Runtime tests
//!
//! Scripts here report progress through an `emit` native that appends its
//! argument to a shared log.


use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::Runtime;
use crate::vm::{Closure, ClosureRef, Const, Instr, NativeFunction, NativeResult, Prototype, Varargs};

pub(super) type Log = Rc<RefCell<Vec<String>>>;

pub(super) fn emit_native(log: Log) -> NativeFunction {
    NativeFunction::new("emit", move |_call, args: Varargs| {
        log.borrow_mut().push(args.get(0).to_display_string());
        Ok(NativeResult::none())
    })
}

/// Runtime with `emit` bound, and its log
pub(super) fn runtime() -> (Runtime, Log) {
    let mut runtime = Runtime::new();
    let log = Log::default();
    let native = emit_native(Rc::clone(&log));
    runtime.context_mut().natives_mut().register(native.clone());
    runtime.set_global("emit", native);
    (runtime, log)
}

pub(super) fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

pub(super) fn closure(
    name: &str,
    code: Vec<Instr>,
) -> ClosureRef {
    Closure::from_proto(Prototype::new(name, code))
}

/// `emit(text)` using slots `dst` and `dst + 1`
pub(super) fn emit(
    dst: usize,
    text: &str,
) -> Vec<Instr> {
    vec![
        Instr::GetGlobal {
            dst,
            name: "emit".into(),
        },
        Instr::LoadK {
            dst: dst + 1,
            value: Const::from(text),
        },
        Instr::Call {
            func: dst,
            nargs: Some(1),
            nresults: Some(0),
        },
    ]
}

/// `emit(slot)` using slots `dst` and `dst + 1`
pub(super) fn emit_slot(
    dst: usize,
    slot: usize,
) -> Vec<Instr> {
    vec![
        Instr::GetGlobal {
            dst,
            name: "emit".into(),
        },
        Instr::Move { dst: dst + 1, src: slot },
        Instr::Call {
            func: dst,
            nargs: Some(1),
            nresults: Some(0),
        },
    ]
}

/// `Thread.<function>(...)` with `nargs` arguments already in `dst + 1..`
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

/// `Thread.yield(n)`
pub(super) fn yield_for(
    dst: usize,
    n: i64,
) -> Vec<Instr> {
    let mut code = vec![Instr::LoadK {
        dst: dst + 1,
        value: Const::Int(n),
    }];
    code.extend(thread_call(dst, "yield", 1));
    code
}

/// Call global `name` with no args and no results
pub(super) fn call_global(
    dst: usize,
    name: &str,
) -> Vec<Instr> {
    vec![
        Instr::GetGlobal {
            dst,
            name: name.into(),
        },
        Instr::Call {
            func: dst,
            nargs: Some(0),
            nresults: Some(0),
        },
    ]
}

/// `emit(label); yield` forever
pub(super) fn ticker(label: &str) -> ClosureRef {
    let mut code = emit(0, label);
    code.extend(thread_call(0, "yield", 0));
    code.push(Instr::Jmp { target: 0 });
    closure(label, code)
}
