//! Saving, loading and resuming through the public API

use std::cell::RefCell;
use std::rc::Rc;

use spool::demo;
use spool::runtime::NativeRegistry;
use spool::util::config::{RuntimeConfig, SnapshotFormat};
use spool::vm::{Closure, Const, Instr, Interpreter, NativeFunction, NativeResult, Prototype, Varargs};
use spool::{PersistError, Runtime, Snapshot};

type Seen = Rc<RefCell<Vec<String>>>;

fn record_native(seen: Seen) -> NativeFunction {
    NativeFunction::new("record", move |_call, args| {
        seen.borrow_mut().push(args.get(0).to_display_string());
        Ok(NativeResult::none())
    })
}

/// `n = 0; loop { n = n + 1; record(n); Thread.yield() }`
fn counting() -> Rc<Closure> {
    Closure::from_proto(Prototype::new(
        "counting",
        vec![
            Instr::LoadK {
                dst: 0,
                value: Const::Int(0),
            },
            Instr::LoadK {
                dst: 1,
                value: Const::Int(1),
            },
            Instr::Arith {
                op: spool::vm::ArithOp::Add,
                dst: 0,
                lhs: 0,
                rhs: 1,
            },
            Instr::GetGlobal {
                dst: 2,
                name: "record".into(),
            },
            Instr::Move { dst: 3, src: 0 },
            Instr::Call {
                func: 2,
                nargs: Some(1),
                nresults: Some(0),
            },
            Instr::GetGlobal {
                dst: 2,
                name: "Thread".into(),
            },
            Instr::GetField {
                dst: 2,
                table: 2,
                key: Const::from("yield"),
            },
            Instr::Call {
                func: 2,
                nargs: Some(0),
                nresults: Some(0),
            },
            Instr::Jmp { target: 1 },
        ],
    ))
}

#[test]
fn test_resume_from_file_continues_counting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting.json");
    let config = RuntimeConfig {
        snapshot_format: SnapshotFormat::Json,
        ..RuntimeConfig::default()
    };

    let seen = Seen::default();
    let mut runtime = Runtime::with_config(config.clone());
    let native = record_native(Rc::clone(&seen));
    runtime.context_mut().natives_mut().register(native.clone());
    runtime.set_global("record", native);
    runtime.new_thread(counting(), Varargs::none()).unwrap();
    for _ in 0..3 {
        runtime.update();
    }
    runtime.save_file(&path).unwrap();
    assert_eq!(*seen.borrow(), vec!["1", "2", "3"]);

    let resumed_seen = Seen::default();
    let mut natives = NativeRegistry::new();
    natives.register(record_native(Rc::clone(&resumed_seen)));
    let text = std::fs::read_to_string(&path).unwrap();
    let snapshot = Snapshot::decode(SnapshotFormat::Json, &text).unwrap();
    let mut resumed = Runtime::load(&snapshot, natives, config, Rc::new(Interpreter::new())).unwrap();
    resumed.update();
    resumed.update();
    assert_eq!(*resumed_seen.borrow(), vec!["4", "5"]);
}

#[test]
fn test_demo_snapshot_round_trips() {
    let mut runtime = Runtime::new();
    demo::install(&mut runtime).unwrap();
    runtime.update();
    runtime.update();

    let snapshot = runtime.save().unwrap();
    let text = snapshot.encode(SnapshotFormat::Ron).unwrap();
    let decoded = Snapshot::decode(SnapshotFormat::Ron, &text).unwrap();
    assert_eq!(decoded, snapshot);

    let mut resumed = Runtime::load(
        &decoded,
        demo::natives(),
        RuntimeConfig::default(),
        Rc::new(Interpreter::new()),
    )
    .unwrap();
    assert_eq!(resumed.default_group().len(), 2);
    assert!(resumed.update().is_ok());
    assert_eq!(resumed.save().unwrap().objects.len(), snapshot.objects.len());
}

#[test]
fn test_missing_native_fails_to_load() {
    let mut runtime = Runtime::new();
    demo::install(&mut runtime).unwrap();
    let snapshot = runtime.save().unwrap();

    let result = Runtime::load(
        &snapshot,
        NativeRegistry::new(),
        RuntimeConfig::default(),
        Rc::new(Interpreter::new()),
    );
    assert!(matches!(result, Err(PersistError::UnknownNative(name)) if name == demo::LOG_NATIVE));
}

#[test]
fn test_garbage_is_a_decode_error() {
    assert!(Snapshot::decode(SnapshotFormat::Json, "{ not json").is_err());
    assert!(Snapshot::decode(SnapshotFormat::Ron, "(((").is_err());
}
