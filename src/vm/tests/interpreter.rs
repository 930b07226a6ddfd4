//! Reference interpreter tests

use super::{closure, context, ints, thread, thread_call};
use crate::runtime::Context;
use crate::vm::{
    ArithOp, Closure, ClosureRef, Const, Instr, Prototype, ScriptError, ThreadError, Value, VarargMode, Varargs,
};

fn run(
    cx: &mut Context,
    f: ClosureRef,
    args: Varargs,
) -> Result<Varargs, ThreadError> {
    let t = thread(cx);
    t.borrow_mut().push_pending(f, args);
    let result = t.borrow_mut().resume(cx, -1);
    result
}

fn binary(
    op: ArithOp,
    lhs: Const,
    rhs: Const,
) -> ClosureRef {
    closure(
        "binary",
        vec![
            Instr::LoadK { dst: 0, value: lhs },
            Instr::LoadK { dst: 1, value: rhs },
            Instr::Arith {
                op,
                dst: 2,
                lhs: 0,
                rhs: 1,
            },
            Instr::Return { base: 2, count: Some(1) },
        ],
    )
}

#[cfg(test)]
mod interpreter_tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic() {
        let mut cx = context();
        let values = run(&mut cx, binary(ArithOp::Mul, Const::Int(6), Const::Int(7)), Varargs::none()).unwrap();
        assert_eq!(values, ints(&[42]));

        let values = run(&mut cx, binary(ArithOp::Sub, Const::Int(1), Const::Int(3)), Varargs::none()).unwrap();
        assert_eq!(values, ints(&[-2]));
    }

    #[test]
    fn test_mixed_arithmetic_is_float() {
        let mut cx = context();
        let values = run(&mut cx, binary(ArithOp::Add, Const::Int(1), Const::Float(0.5)), Varargs::none()).unwrap();
        assert_eq!(values.get(0), Value::Float(1.5));
    }

    #[test]
    fn test_concat() {
        let mut cx = context();
        let values = run(
            &mut cx,
            binary(ArithOp::Concat, Const::from("tick "), Const::Int(3)),
            Varargs::none(),
        )
        .unwrap();
        assert_eq!(values.get(0).as_str(), Some("tick 3"));
    }

    #[test]
    fn test_arithmetic_type_error() {
        let mut cx = context();
        let err = run(&mut cx, binary(ArithOp::Add, Const::Bool(true), Const::Int(1)), Varargs::none()).unwrap_err();
        assert_eq!(
            err,
            ThreadError::Script(ScriptError::Arithmetic {
                op: "add",
                lhs: "boolean",
                rhs: "number",
            })
        );
    }

    #[test]
    fn test_tables() {
        let mut cx = context();
        let f = closure(
            "tables",
            vec![
                Instr::NewTable { dst: 0 },
                Instr::LoadK {
                    dst: 1,
                    value: Const::from("v"),
                },
                Instr::SetField {
                    table: 0,
                    key: Const::Int(1),
                    src: 1,
                },
                Instr::GetField {
                    dst: 2,
                    table: 0,
                    key: Const::Int(1),
                },
                Instr::GetField {
                    dst: 3,
                    table: 0,
                    key: Const::from("missing"),
                },
                Instr::Return { base: 2, count: Some(2) },
            ],
        );
        let values = run(&mut cx, f, Varargs::none()).unwrap();
        assert_eq!(values.get(0).as_str(), Some("v"));
        assert!(values.get(1).is_nil());
    }

    #[test]
    fn test_index_non_table() {
        let mut cx = context();
        let f = closure(
            "index",
            vec![Instr::GetField {
                dst: 0,
                table: 1,
                key: Const::from("x"),
            }],
        );
        let err = run(&mut cx, f, Varargs::none()).unwrap_err();
        assert_eq!(err, ThreadError::Script(ScriptError::NotIndexable("nil")));
    }

    #[test]
    fn test_branching() {
        let mut cx = context();
        // return a < b and "lt" or "ge"
        let f = Closure::from_proto(
            Prototype::new(
                "cmp",
                vec![
                    Instr::Lt { dst: 2, lhs: 0, rhs: 1 },
                    Instr::JmpIfNot { cond: 2, target: 4 },
                    Instr::LoadK {
                        dst: 3,
                        value: Const::from("lt"),
                    },
                    Instr::Jmp { target: 5 },
                    Instr::LoadK {
                        dst: 3,
                        value: Const::from("ge"),
                    },
                    Instr::Return { base: 3, count: Some(1) },
                ],
            )
            .with_params(2),
        );
        let lt = run(&mut cx, f.clone(), ints(&[1, 2])).unwrap();
        let ge = run(&mut cx, f, ints(&[2, 2])).unwrap();
        assert_eq!(lt.get(0).as_str(), Some("lt"));
        assert_eq!(ge.get(0).as_str(), Some("ge"));
    }

    #[test]
    fn test_comparison_type_error() {
        let mut cx = context();
        let f = closure(
            "cmp",
            vec![
                Instr::LoadK {
                    dst: 0,
                    value: Const::from("a"),
                },
                Instr::LoadK {
                    dst: 1,
                    value: Const::Int(1),
                },
                Instr::Lt { dst: 2, lhs: 0, rhs: 1 },
            ],
        );
        let err = run(&mut cx, f, Varargs::none()).unwrap_err();
        assert!(matches!(err, ThreadError::Script(ScriptError::Comparison { .. })));
    }

    #[test]
    fn test_varargs_pass_through() {
        let mut cx = context();
        let inner = Closure::from_proto(
            Prototype::new(
                "inner",
                vec![
                    Instr::VarArg { dst: 0, count: None },
                    Instr::Return { base: 0, count: None },
                ],
            )
            .with_vararg(VarargMode::Ellipsis),
        );
        cx.globals().borrow_mut().set_str("inner", Value::Closure(inner));

        // outer(first, ...) return inner(...)
        let outer = Closure::from_proto(
            Prototype::new(
                "outer",
                vec![
                    Instr::GetGlobal {
                        dst: 1,
                        name: "inner".into(),
                    },
                    Instr::VarArg { dst: 2, count: None },
                    Instr::Call {
                        func: 1,
                        nargs: None,
                        nresults: None,
                    },
                    Instr::Return { base: 1, count: None },
                ],
            )
            .with_params(1)
            .with_vararg(VarargMode::Ellipsis),
        );
        let values = run(&mut cx, outer, ints(&[1, 2, 3, 4])).unwrap();
        assert_eq!(values, ints(&[2, 3, 4]));
    }

    #[test]
    fn test_fixed_vararg_count() {
        let mut cx = context();
        let f = Closure::from_proto(
            Prototype::new(
                "f",
                vec![
                    Instr::VarArg { dst: 0, count: Some(3) },
                    Instr::Return { base: 0, count: Some(3) },
                ],
            )
            .with_vararg(VarargMode::Ellipsis),
        );
        let values = run(&mut cx, f, ints(&[5, 6])).unwrap();
        assert_eq!(values, Varargs::from_vec(vec![Value::Int(5), Value::Int(6), Value::Nil]));
    }

    #[test]
    fn test_upvalue_shared_until_close() {
        let mut cx = context();
        // local n = 10; get = function() return n end; n = 11; return get()
        let get = Prototype::new(
            "get",
            vec![
                Instr::GetUpval { dst: 0, index: 0 },
                Instr::Return { base: 0, count: Some(1) },
            ],
        )
        .with_upvalue(true, 0);
        let main = Closure::from_proto(
            Prototype::new(
                "main",
                vec![
                    Instr::LoadK {
                        dst: 0,
                        value: Const::Int(10),
                    },
                    Instr::Closure { dst: 1, proto: 0 },
                    Instr::SetGlobal {
                        name: "get".into(),
                        src: 1,
                    },
                    Instr::LoadK {
                        dst: 0,
                        value: Const::Int(11),
                    },
                    Instr::Call {
                        func: 1,
                        nargs: Some(0),
                        nresults: Some(1),
                    },
                    Instr::Return { base: 1, count: Some(1) },
                ],
            )
            .with_child(get),
        );
        let values = run(&mut cx, main, Varargs::none()).unwrap();
        assert_eq!(values, ints(&[11]));

        // Closed on return with the final value
        let get = cx.globals().borrow().get_str("get");
        let get = get.as_closure().expect("get closure").clone();
        assert!(get.upvalue(0).is_some_and(|up| !up.borrow().is_open()));
        let values = run(&mut cx, get, Varargs::none()).unwrap();
        assert_eq!(values, ints(&[11]));
    }

    #[test]
    fn test_set_upvalue() {
        let mut cx = context();
        // local n = 1; (function() n = 2 end)(); return n
        let set = Prototype::new(
            "set",
            vec![
                Instr::LoadK {
                    dst: 0,
                    value: Const::Int(2),
                },
                Instr::SetUpval { index: 0, src: 0 },
            ],
        )
        .with_upvalue(true, 0);
        let main = Closure::from_proto(
            Prototype::new(
                "main",
                vec![
                    Instr::LoadK {
                        dst: 0,
                        value: Const::Int(1),
                    },
                    Instr::Closure { dst: 1, proto: 0 },
                    Instr::Call {
                        func: 1,
                        nargs: Some(0),
                        nresults: Some(0),
                    },
                    Instr::Return { base: 0, count: Some(1) },
                ],
            )
            .with_child(set),
        );
        let values = run(&mut cx, main, Varargs::none()).unwrap();
        assert_eq!(values, ints(&[2]));
    }

    #[test]
    fn test_missing_global_function() {
        let mut cx = context();
        let f = closure(
            "f",
            vec![
                Instr::GetGlobal {
                    dst: 0,
                    name: "no_such_function".into(),
                },
                Instr::LoadK {
                    dst: 1,
                    value: Const::Int(1),
                },
                Instr::Call {
                    func: 0,
                    nargs: Some(1),
                    nresults: Some(0),
                },
            ],
        );
        let err = run(&mut cx, f, Varargs::none()).unwrap_err();
        assert_eq!(err, ThreadError::Script(ScriptError::MissingBinding("no_such_function".into())));
    }

    #[test]
    fn test_calling_a_number() {
        let mut cx = context();
        let f = closure(
            "f",
            vec![
                Instr::LoadK {
                    dst: 0,
                    value: Const::Int(3),
                },
                Instr::Call {
                    func: 0,
                    nargs: Some(0),
                    nresults: Some(0),
                },
            ],
        );
        let err = run(&mut cx, f, Varargs::none()).unwrap_err();
        assert_eq!(err, ThreadError::Script(ScriptError::NotCallable("number")));
    }

    #[test]
    fn test_bad_yield_argument() {
        let mut cx = context();
        let mut code = vec![Instr::LoadK {
            dst: 1,
            value: Const::from("soon"),
        }];
        code.extend(thread_call(0, "yield", 1));
        let err = run(&mut cx, closure("f", code), Varargs::none()).unwrap_err();
        assert!(matches!(
            err,
            ThreadError::Script(ScriptError::BadArgument { index: 1, .. })
        ));
    }
}
