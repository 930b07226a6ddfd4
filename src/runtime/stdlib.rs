//! `Thread` script library
//!
//! | function                | effect                                          |
//! |-------------------------|-------------------------------------------------|
//! | `Thread.new(f, ...)`    | start `f(...)` in a new link of the default group, returning nothing |
//! | `Thread.yield(n?)`      | suspend; with `n`, skip the next `n - 1` updates  |
//! | `Thread.endCall(n?)`    | return from the caller, then yield like above    |
//! | `Thread.jump(f, ...)`   | drop the current stack, run `f(...)` next update  |
//!
//! A wait of `n <= 0` is stored as is, so a negative `n` blocks until the
//! host changes the wait.

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::context::Context;
use crate::vm::dispatch::{NativeCall, NativeResult};
use crate::vm::errors::{ScriptError, ThreadResult};
use crate::vm::value::{ClosureRef, NativeFunction, Table, Value, Varargs};

/// Name of the library table in the globals
pub const LIBRARY_NAME: &str = "Thread";

/// Register the natives and publish the `Thread` table
pub fn install(cx: &mut Context) {
    let mut table = Table::new();
    for native in natives() {
        let field = native
            .name()
            .strip_prefix("Thread.")
            .unwrap_or(native.name())
            .to_string();
        table.set_str(&field, native.clone());
        cx.natives_mut().register(native);
    }
    cx.globals()
        .borrow_mut()
        .set_str(LIBRARY_NAME, Value::Table(Rc::new(RefCell::new(table))));
}

/// The library's natives, named as they are persisted
pub fn natives() -> Vec<NativeFunction> {
    vec![
        NativeFunction::new("Thread.new", thread_new),
        NativeFunction::new("Thread.yield", thread_yield),
        NativeFunction::new("Thread.endCall", thread_end_call),
        NativeFunction::new("Thread.jump", thread_jump),
    ]
}

fn thread_new(
    call: &mut NativeCall<'_>,
    args: Varargs,
) -> ThreadResult<NativeResult> {
    let closure = check_closure(&args, "Thread.new")?;
    let group = call.context().default_group();
    group.new_thread(closure, args.subargs(1))?;
    Ok(NativeResult::none())
}

fn thread_yield(
    call: &mut NativeCall<'_>,
    args: Varargs,
) -> ThreadResult<NativeResult> {
    apply_wait(call, &args, "Thread.yield")?;
    Ok(NativeResult::Yield(args))
}

fn thread_end_call(
    call: &mut NativeCall<'_>,
    args: Varargs,
) -> ThreadResult<NativeResult> {
    apply_wait(call, &args, "Thread.endCall")?;
    Ok(NativeResult::EndCall(args))
}

fn thread_jump(
    _call: &mut NativeCall<'_>,
    args: Varargs,
) -> ThreadResult<NativeResult> {
    let closure = check_closure(&args, "Thread.jump")?;
    Ok(NativeResult::Jump {
        closure,
        args: args.subargs(1),
    })
}

/// Set the current link's wait from the optional first argument
fn apply_wait(
    call: &mut NativeCall<'_>,
    args: &Varargs,
    function: &str,
) -> Result<(), ScriptError> {
    let first = args.get(0);
    if first.is_nil() {
        return Ok(());
    }
    let w = first.as_int().ok_or_else(|| ScriptError::BadArgument {
        index: 1,
        function: function.to_string(),
        expected: "number",
    })?;
    let w = w.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    if let Some(link) = call.current_link() {
        link.set_wait(if w <= 0 { w } else { w - 1 });
    }
    Ok(())
}

fn check_closure(
    args: &Varargs,
    function: &str,
) -> Result<ClosureRef, ScriptError> {
    args.get(0).as_closure().cloned().ok_or_else(|| ScriptError::BadArgument {
        index: 1,
        function: function.to_string(),
        expected: "function",
    })
}
