//! FramePool tests

use std::rc::{Rc, Weak};

use proptest::prelude::*;

use super::{closure, ints};
use crate::vm::{FrameId, FramePool, FrameStatus, Instr, Value};

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn test_take_frame_allocates_then_reuses() {
        let mut pool = FramePool::new();
        let frame = pool.take_frame();
        assert_eq!(pool.stats().frames_allocated, 1);

        pool.give_frame(frame);
        assert_eq!(pool.cached_frames(), 1);

        let _frame = pool.take_frame();
        assert_eq!(pool.stats().frames_reused, 1);
        assert_eq!(pool.cached_frames(), 0);
    }

    #[test]
    fn test_give_frame_drops_when_full() {
        let mut pool = FramePool::with_capacity(2, 2);
        for _ in 0..3 {
            let frame = pool.take_frame();
            pool.give_frame(frame);
        }
        assert_eq!(pool.cached_frames(), 1);

        let frames: Vec<_> = (0..3).map(|_| pool.take_frame()).collect();
        for frame in frames {
            pool.give_frame(frame);
        }
        assert_eq!(pool.cached_frames(), 2);
        assert_eq!(pool.frame_capacity(), 2);
    }

    #[test]
    fn test_give_frame_closes_and_clears() {
        let mut pool = FramePool::new();
        let f = closure("f", vec![Instr::Return { base: 0, count: Some(0) }]);
        let mut frame = crate::vm::Frame::new_call(&mut pool, Rc::clone(&f), ints(&[1, 2]), None, 3, 1);
        frame.set_slot(0, Value::Int(9));
        let up = frame.find_upvalue(&Weak::new(), FrameId(0), 0);
        assert!(up.borrow().is_open());

        pool.give_frame(frame);
        assert!(!up.borrow().is_open());

        let reused = pool.take_frame();
        assert_eq!(reused.status(), FrameStatus::Dead);
        assert!(reused.closure().is_none());
        assert!(reused.args().is_empty());
        assert_eq!(reused.return_base(), 0);
        assert_eq!(reused.parent(), None);
    }

    #[test]
    fn test_take_array_best_fit() {
        let mut pool = FramePool::new();
        pool.give_array(vec![Value::Nil; 4]);
        pool.give_array(vec![Value::Nil; 16]);
        pool.give_array(vec![Value::Nil; 8]);

        let array = pool.take_array(5);
        assert_eq!(array.len(), 8);
        assert_eq!(pool.stats().arrays_reused, 1);

        let array = pool.take_array(20);
        assert_eq!(array.len(), 20);
        assert_eq!(pool.stats().arrays_allocated, 1);
    }

    #[test]
    fn test_give_array_evicts_smallest_smaller() {
        let mut pool = FramePool::with_capacity(2, 2);
        pool.give_array(vec![Value::Nil; 4]);
        pool.give_array(vec![Value::Nil; 8]);
        assert_eq!(pool.cached_array_lens(), vec![Some(4), Some(8)]);

        pool.give_array(vec![Value::Nil; 16]);
        assert_eq!(pool.cached_array_lens(), vec![Some(16), Some(8)]);

        // Smaller than everything cached: dropped
        pool.give_array(vec![Value::Nil; 2]);
        assert_eq!(pool.cached_array_lens(), vec![Some(16), Some(8)]);
    }

    #[test]
    fn test_given_arrays_are_cleared() {
        let mut pool = FramePool::new();
        pool.give_array(vec![Value::Int(1); 4]);
        let array = pool.take_array(4);
        assert!(array.iter().all(Value::is_nil));
    }

    proptest! {
        #[test]
        fn prop_array_cache_bounded(ops in prop::collection::vec((any::<bool>(), 0usize..32), 0..64)) {
            let mut pool = FramePool::with_capacity(2, 3);
            let mut held = Vec::new();
            for (take, size) in ops {
                if take {
                    let array = pool.take_array(size);
                    prop_assert!(array.len() >= size);
                    prop_assert!(array.iter().all(Value::is_nil));
                    held.push(array);
                } else if let Some(mut array) = held.pop() {
                    array.fill(Value::Int(1));
                    pool.give_array(array);
                }
                prop_assert_eq!(pool.cached_array_lens().len(), 3);
            }
        }
    }
}
