//! Built-in demo scripts
//!
//! Two counters that log every time they run. `A` runs every tick, `B`
//! every other tick. Used by the CLI and the benchmarks.

use tracing::info;

use crate::runtime::{NativeRegistry, Runtime};
use crate::vm::{ArithOp, Closure, Const, Instr, NativeFunction, NativeResult, Prototype, StructuralError, Value, Varargs};

/// Name of the logging native the counters call
pub const LOG_NATIVE: &str = "log";

/// `counter(label, wait)`: count up forever, yielding `wait` ticks each time
pub fn counter_proto() -> Prototype {
    Prototype::new(
        "counter",
        vec![
            Instr::LoadK {
                dst: 2,
                value: Const::Int(0),
            },
            Instr::LoadK {
                dst: 3,
                value: Const::Int(1),
            },
            Instr::Arith {
                op: ArithOp::Add,
                dst: 2,
                lhs: 2,
                rhs: 3,
            },
            Instr::GetGlobal {
                dst: 4,
                name: LOG_NATIVE.into(),
            },
            Instr::Move { dst: 5, src: 0 },
            Instr::Move { dst: 6, src: 2 },
            Instr::Call {
                func: 4,
                nargs: Some(2),
                nresults: Some(0),
            },
            Instr::GetGlobal {
                dst: 4,
                name: "Thread".into(),
            },
            Instr::GetField {
                dst: 4,
                table: 4,
                key: Const::from("yield"),
            },
            Instr::Move { dst: 5, src: 1 },
            Instr::Call {
                func: 4,
                nargs: Some(1),
                nresults: Some(0),
            },
            Instr::Jmp { target: 2 },
        ],
    )
    .with_params(2)
    .with_max_stack(8)
}

/// The `log(label, count)` native
pub fn log_native() -> NativeFunction {
    NativeFunction::new(LOG_NATIVE, |_call, args| {
        info!(
            thread = %args.get(0).to_display_string(),
            count = %args.get(1).to_display_string(),
            "tick"
        );
        Ok(NativeResult::none())
    })
}

/// Host natives a demo snapshot refers to
pub fn natives() -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    natives.register(log_native());
    natives
}

/// Bind the demo globals and start both counters
pub fn install(runtime: &mut Runtime) -> Result<(), StructuralError> {
    let native = log_native();
    runtime.context_mut().natives_mut().register(native.clone());
    runtime.set_global(LOG_NATIVE, native);

    let counter = Closure::from_proto(counter_proto());
    runtime.set_global("counter", Value::Closure(counter.clone()));

    runtime.new_thread(
        counter.clone(),
        Varargs::from_vec(vec![Value::str("A"), Value::Int(1)]),
    )?;
    runtime.new_thread(counter, Varargs::from_vec(vec![Value::str("B"), Value::Int(2)]))?;
    Ok(())
}
