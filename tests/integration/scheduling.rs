//! Scheduling through the public API

use std::cell::RefCell;
use std::rc::Rc;

use spool::demo;
use spool::vm::{Closure, Const, Instr, NativeResult, Prototype, Value, Varargs};
use spool::Runtime;

/// Runtime whose `record` native collects its first argument
fn recording_runtime() -> (Runtime, Rc<RefCell<Vec<String>>>) {
    let mut runtime = Runtime::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    runtime.register_native("record", move |_call, args| {
        sink.borrow_mut().push(args.get(0).to_display_string());
        Ok(NativeResult::none())
    });
    (runtime, seen)
}

/// `record(label); Thread.yield(wait)` forever
fn every(
    label: &str,
    wait: i64,
) -> Rc<Closure> {
    Closure::from_proto(Prototype::new(
        label,
        vec![
            Instr::GetGlobal {
                dst: 0,
                name: "record".into(),
            },
            Instr::LoadK {
                dst: 1,
                value: Const::from(label),
            },
            Instr::Call {
                func: 0,
                nargs: Some(1),
                nresults: Some(0),
            },
            Instr::GetGlobal {
                dst: 0,
                name: "Thread".into(),
            },
            Instr::GetField {
                dst: 0,
                table: 0,
                key: Const::from("yield"),
            },
            Instr::LoadK {
                dst: 1,
                value: Const::Int(wait),
            },
            Instr::Call {
                func: 0,
                nargs: Some(1),
                nresults: Some(0),
            },
            Instr::Jmp { target: 0 },
        ],
    ))
}

#[test]
fn test_waits_interleave_threads() {
    let (mut runtime, seen) = recording_runtime();
    runtime.new_thread(every("fast", 0), Varargs::none()).unwrap();
    runtime.new_thread(every("slow", 2), Varargs::none()).unwrap();

    for _ in 0..6 {
        assert!(runtime.update().is_ok());
    }
    assert_eq!(
        *seen.borrow(),
        vec!["fast", "slow", "fast", "fast", "fast", "slow", "fast", "fast"]
    );
}

#[test]
fn test_suspended_group_is_skipped() {
    let (mut runtime, seen) = recording_runtime();
    let group = runtime.new_thread_group();
    group.new_thread(every("g", 0), Varargs::none()).unwrap();

    runtime.update();
    group.suspend().unwrap();
    runtime.update();
    runtime.update();
    group.resume().unwrap();
    runtime.update();
    assert_eq!(*seen.borrow(), vec!["g", "g"]);
}

#[test]
fn test_demo_counters_run() {
    let mut runtime = Runtime::new();
    demo::install(&mut runtime).unwrap();
    let links = runtime.default_group().links();
    assert_eq!(links.len(), 2);

    for _ in 0..4 {
        assert!(runtime.update().is_ok());
    }
    assert!(links.iter().all(|link| !link.is_finished()));
    assert!(matches!(runtime.get_global("counter"), Value::Closure(_)));
}
