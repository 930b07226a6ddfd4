//! Frame tests
//!
//! Call setup, result storing, upvalue bookkeeping and teardown.

use std::rc::{Rc, Weak};

use super::{closure, ints};
use crate::vm::frames::release_callstack;
use crate::vm::{
    Closure, Frame, FrameId, FramePool, FrameStatus, Instr, Prototype, UpValue, Value, VarargMode, Varargs,
    MULTI_RETURN,
};

fn ret() -> Vec<Instr> {
    vec![Instr::Return { base: 0, count: Some(0) }]
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn test_new_call_binds_params() {
        let mut pool = FramePool::new();
        let f = Closure::from_proto(Prototype::new("f", ret()).with_params(2).with_max_stack(4));
        let frame = Frame::new_call(&mut pool, f, ints(&[1, 2, 3]), None, 0, 1);

        assert_eq!(frame.status(), FrameStatus::Fresh);
        assert_eq!(frame.stack().len(), 4);
        assert_eq!(frame.slot(0), Value::Int(1));
        assert_eq!(frame.slot(1), Value::Int(2));
        assert_eq!(frame.slot(2), Value::Nil);
        assert!(frame.varargs().is_empty());
        assert_eq!(frame.args().len(), 3);
        assert_eq!(frame.size(), 1);
    }

    #[test]
    fn test_new_call_collects_varargs() {
        let mut pool = FramePool::new();
        let f = Closure::from_proto(
            Prototype::new("f", ret())
                .with_params(1)
                .with_vararg(VarargMode::Ellipsis),
        );
        let frame = Frame::new_call(&mut pool, f, ints(&[1, 2, 3]), None, 0, 0);
        assert_eq!(frame.varargs(), &ints(&[2, 3]));
    }

    #[test]
    fn test_classic_varargs_table() {
        let mut pool = FramePool::new();
        let f = Closure::from_proto(
            Prototype::new("f", ret())
                .with_params(1)
                .with_vararg(VarargMode::Classic),
        );
        let frame = Frame::new_call(&mut pool, f, ints(&[1, 2, 3]), None, 0, 0);

        let arg = frame.slot(1);
        let table = arg.as_table().expect("arg table");
        assert_eq!(table.borrow().len(), 2);
        assert_eq!(table.borrow().get_str("n"), Value::Int(2));
    }

    #[test]
    fn test_parent_chain() {
        let mut pool = FramePool::new();
        let f = closure("f", ret());
        let bottom = Frame::new_call(&mut pool, Rc::clone(&f), Varargs::none(), None, 0, 0);
        let middle = Frame::new_call(&mut pool, Rc::clone(&f), Varargs::none(), Some((FrameId(0), &bottom)), 2, 1);
        let top = Frame::new_call(&mut pool, f, Varargs::none(), Some((FrameId(1), &middle)), 0, MULTI_RETURN);

        assert_eq!(middle.parent(), Some(FrameId(0)));
        assert_eq!(middle.size(), 2);
        assert_eq!(top.size(), 3);
        assert_eq!(top.parent_count(), 2);
        assert_eq!(middle.return_base(), 2);
        assert_eq!(top.return_count(), MULTI_RETURN);
    }

    #[test]
    fn test_store_results_fixed_count() {
        let mut pool = FramePool::new();
        let mut frame = Frame::new_call(&mut pool, closure("f", ret()), Varargs::none(), None, 0, 0);

        frame.store_results(2, 3, &ints(&[7, 8]));
        assert_eq!(frame.slot(2), Value::Int(7));
        assert_eq!(frame.slot(3), Value::Int(8));
        // Missing values are padded with nil
        assert_eq!(frame.slot(4), Value::Nil);
        assert!(frame.pending().is_empty());
    }

    #[test]
    fn test_store_results_multi() {
        let mut pool = FramePool::new();
        let mut frame = Frame::new_call(&mut pool, closure("f", ret()), Varargs::none(), None, 0, 0);

        frame.store_results(5, MULTI_RETURN, &ints(&[1, 2, 3]));
        assert_eq!(frame.pending(), &ints(&[1, 2, 3]));
        assert_eq!(frame.top(), 5);
        assert_eq!(frame.slot(5), Value::Nil);
    }

    #[test]
    fn test_find_upvalue_is_shared_per_slot() {
        let mut pool = FramePool::new();
        let mut frame = Frame::new_call(&mut pool, closure("f", ret()), Varargs::none(), None, 0, 0);

        let a = frame.find_upvalue(&Weak::new(), FrameId(0), 3);
        let b = frame.find_upvalue(&Weak::new(), FrameId(0), 3);
        let c = frame.find_upvalue(&Weak::new(), FrameId(0), 4);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_close_upvalues_from() {
        let mut pool = FramePool::new();
        let mut frame = Frame::new_call(&mut pool, closure("f", ret()), Varargs::none(), None, 0, 0);
        frame.set_slot(1, Value::Int(10));
        frame.set_slot(2, Value::Int(20));
        let low = frame.find_upvalue(&Weak::new(), FrameId(0), 1);
        let high = frame.find_upvalue(&Weak::new(), FrameId(0), 2);

        frame.close_upvalues_from(2);
        assert!(low.borrow().is_open());
        assert!(matches!(&*high.borrow(), UpValue::Closed(Value::Int(20))));
    }

    #[test]
    fn test_tailcall_keeps_identity() {
        let mut pool = FramePool::new();
        let f = closure("f", ret());
        let g = Closure::from_proto(Prototype::new("g", ret()).with_params(1));
        let parent = Frame::new_call(&mut pool, Rc::clone(&f), Varargs::none(), None, 0, 0);
        let mut frame = Frame::new_call(&mut pool, f, Varargs::none(), Some((FrameId(0), &parent)), 4, 2);
        frame.set_status(FrameStatus::Running);
        frame.set_pc(3);
        frame.set_slot(0, Value::Int(1));
        let up = frame.find_upvalue(&Weak::new(), FrameId(1), 0);

        frame.prepare_tailcall(&mut pool, g, ints(&[42]));

        assert_eq!(frame.closure().map(|c| c.proto().name.as_str()), Some("g"));
        assert_eq!(frame.status(), FrameStatus::Running);
        assert_eq!(frame.pc(), 0);
        assert_eq!(frame.slot(0), Value::Int(42));
        assert_eq!(frame.parent(), Some(FrameId(0)));
        assert_eq!(frame.size(), 2);
        assert_eq!(frame.return_base(), 4);
        assert_eq!(frame.return_count(), 2);
        assert!(matches!(&*up.borrow(), UpValue::Closed(Value::Int(1))));
    }

    #[test]
    fn test_close_marks_dead_and_recycles_stack() {
        let mut pool = FramePool::new();
        let mut frame = Frame::new_call(&mut pool, closure("f", ret()), ints(&[1]), None, 0, 0);
        let len = frame.stack().len();

        frame.close(&mut pool);

        assert_eq!(frame.status(), FrameStatus::Dead);
        assert!(frame.closure().is_none());
        assert!(frame.args().is_empty());
        assert!(frame.stack().is_empty());
        assert!(pool.cached_array_lens().contains(&Some(len)));
    }

    #[test]
    fn test_pooled_stack_keeps_full_length() {
        let mut pool = FramePool::new();
        pool.give_array(vec![Value::Int(9); 16]);
        let f = Closure::from_proto(Prototype::new("f", ret()).with_max_stack(4));
        let mut frame = Frame::new_call(&mut pool, f, Varargs::none(), None, 0, 0);

        assert_eq!(frame.stack().len(), 16);
        assert!(frame.stack().iter().all(Value::is_nil));

        frame.close(&mut pool);
        assert!(pool.cached_array_lens().contains(&Some(16)));
    }

    #[test]
    fn test_release_callstack_closes_chain() {
        let mut pool = FramePool::new();
        let f = closure("f", ret());
        let bottom = Frame::new_call(&mut pool, Rc::clone(&f), Varargs::none(), None, 0, 0);
        let top = Frame::new_call(&mut pool, f, Varargs::none(), Some((FrameId(0), &bottom)), 0, 0);
        let mut frames = vec![bottom, top];
        frames[0].set_slot(0, Value::Int(5));
        let up = frames[0].find_upvalue(&Weak::new(), FrameId(0), 0);

        release_callstack(&mut frames, FrameId(1), &mut pool);

        assert!(frames.iter().all(|f| f.status() == FrameStatus::Dead));
        assert!(matches!(&*up.borrow(), UpValue::Closed(Value::Int(5))));
    }
}
