//! VM call frames
//!
//! A thread keeps its frames in an arena; `FrameId` is the arena index and
//! the parent link is the id of the calling frame. A chain never branches,
//! so the arena behaves like a stack whose top is the running frame.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::vm::closure::{UpValue, UpValueRef, VarargMode};
use crate::vm::pool::FramePool;
use crate::vm::thread::Thread;
use crate::vm::value::{ClosureRef, Table, Value, Varargs};

/// Index of a frame in its thread's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u32);

impl FrameId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

/// Frame execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameStatus {
    #[default]
    Fresh,
    Running,
    Paused,
    Dead,
}

/// Return count meaning "all values"
pub const MULTI_RETURN: i32 = -1;

/// Call frame
// --- Persisted field by field, in this order; see FrameRecord. Don't add fields. ---
#[derive(Default)]
pub struct Frame {
    pub(crate) status: FrameStatus,
    /// The closure being called
    pub(crate) closure: Option<ClosureRef>,
    /// The args given
    pub(crate) args: Varargs,
    /// The part of the args beyond the declared parameters
    pub(crate) varargs: Varargs,
    pub(crate) stack: Vec<Value>,
    /// Open upvalues, indexed by stack slot
    pub(crate) openups: Vec<Option<UpValueRef>>,
    /// Multi-value results waiting to be consumed
    pub(crate) v: Varargs,
    pub(crate) top: usize,
    pub(crate) pc: usize,
    pub(crate) parent: Option<FrameId>,
    pub(crate) parent_count: usize,
    /// Stack offset in the parent to write return values to
    pub(crate) return_base: usize,
    /// Number of return values to write in the parent, or `MULTI_RETURN`
    pub(crate) return_count: i32,
}

impl Frame {
    /// Create a frame for a call
    pub fn new_call(
        pool: &mut FramePool,
        closure: ClosureRef,
        args: Varargs,
        parent: Option<(FrameId, &Frame)>,
        return_base: usize,
        return_count: i32,
    ) -> Self {
        let mut frame = pool.take_frame();
        frame.prepare_call(pool, closure, args, parent, return_base, return_count);
        frame
    }

    /// Set up this frame for a fresh call
    pub fn prepare_call(
        &mut self,
        pool: &mut FramePool,
        closure: ClosureRef,
        args: Varargs,
        parent: Option<(FrameId, &Frame)>,
        return_base: usize,
        return_count: i32,
    ) {
        self.status = FrameStatus::Fresh;
        self.parent = parent.map(|(id, _)| id);
        self.parent_count = parent.map_or(0, |(_, frame)| frame.size());
        self.return_base = return_base;
        self.return_count = return_count;
        self.bind(pool, closure, args);
    }

    /// Reuse this frame for a tail call
    ///
    /// Identity, status, parent and return target are kept.
    pub fn prepare_tailcall(
        &mut self,
        pool: &mut FramePool,
        closure: ClosureRef,
        args: Varargs,
    ) {
        // The stack is about to be clobbered
        self.close_upvalues();
        self.bind(pool, closure, args);
    }

    fn bind(
        &mut self,
        pool: &mut FramePool,
        closure: ClosureRef,
        args: Varargs,
    ) {
        let proto = Rc::clone(closure.proto());
        self.varargs = match proto.vararg {
            VarargMode::None => Varargs::none(),
            VarargMode::Ellipsis | VarargMode::Classic => args.subargs(proto.num_params),
        };
        self.reset_execution_state(pool, proto.frame_size(), proto.protos.len());

        for i in 0..proto.num_params {
            self.stack[i] = args.get(i);
        }
        if proto.vararg == VarargMode::Classic {
            let table = Table::from_varargs(&self.varargs);
            self.stack[proto.num_params] = Value::Table(Rc::new(RefCell::new(table)));
        }

        self.closure = Some(closure);
        self.args = args;
    }

    fn reset_execution_state(
        &mut self,
        pool: &mut FramePool,
        min_stack_size: usize,
        sub_function_count: usize,
    ) {
        // Pooled arrays keep their full length, extra slots included
        if self.stack.len() < min_stack_size {
            let old = std::mem::take(&mut self.stack);
            if !old.is_empty() {
                pool.give_array(old);
            }
            self.stack = pool.take_array(min_stack_size);
        }
        self.stack.fill(Value::Nil);

        self.openups.clear();
        if sub_function_count > 0 {
            self.openups.resize(min_stack_size, None);
        }

        self.v = Varargs::none();
        self.top = 0;
        self.pc = 0;
    }

    /// Mark dead, close upvalues and hand the stack array back
    pub fn close(
        &mut self,
        pool: &mut FramePool,
    ) {
        self.close_upvalues();
        let stack = std::mem::take(&mut self.stack);
        if !stack.is_empty() {
            pool.give_array(stack);
        }
        self.kill();
    }

    /// Like `close`, for teardown paths without a pool
    pub(crate) fn close_detached(&mut self) {
        self.close_upvalues();
        self.stack = Vec::new();
        self.kill();
    }

    fn kill(&mut self) {
        self.status = FrameStatus::Dead;
        self.closure = None;
        self.args = Varargs::none();
        self.varargs = Varargs::none();
        self.v = Varargs::none();
        self.openups.clear();
    }

    /// Close every open upvalue of this frame
    pub fn close_upvalues(&mut self) {
        self.close_upvalues_from(0);
    }

    /// Close open upvalues for slots `from..`
    pub fn close_upvalues_from(
        &mut self,
        from: usize,
    ) {
        for slot in (from..self.openups.len()).rev() {
            if let Some(up) = self.openups[slot].take() {
                let value = self.stack.get(slot).cloned().unwrap_or_default();
                up.borrow_mut().close(value);
            }
        }
    }

    /// Existing open upvalue for `slot`, or a new one owned by `thread`
    pub fn find_upvalue(
        &mut self,
        thread: &Weak<RefCell<Thread>>,
        id: FrameId,
        slot: usize,
    ) -> UpValueRef {
        if slot >= self.openups.len() {
            self.openups.resize(slot + 1, None);
        }
        if let Some(up) = &self.openups[slot] {
            return Rc::clone(up);
        }
        let up = Rc::new(RefCell::new(UpValue::Open {
            thread: thread.clone(),
            frame: id,
            slot,
        }));
        self.openups[slot] = Some(Rc::clone(&up));
        up
    }

    /// Write call results at `base`, honoring the expected count
    ///
    /// `MULTI_RETURN` keeps the values in `v` and moves `top` to `base`.
    pub fn store_results(
        &mut self,
        base: usize,
        count: i32,
        values: &Varargs,
    ) {
        if count < 0 {
            self.v = values.clone();
            self.top = base;
            return;
        }
        for i in 0..count as usize {
            if let Some(slot) = self.stack.get_mut(base + i) {
                *slot = values.get(i);
            }
        }
    }

    /// Number of frames in the chain ending at this one
    #[inline]
    pub fn size(&self) -> usize {
        self.parent_count + 1
    }

    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn set_status(
        &mut self,
        status: FrameStatus,
    ) {
        self.status = status;
    }

    pub fn closure(&self) -> Option<&ClosureRef> {
        self.closure.as_ref()
    }

    pub fn args(&self) -> &Varargs {
        &self.args
    }

    pub fn varargs(&self) -> &Varargs {
        &self.varargs
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    #[inline]
    pub fn set_pc(
        &mut self,
        pc: usize,
    ) {
        self.pc = pc;
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn set_top(
        &mut self,
        top: usize,
    ) {
        self.top = top;
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut [Value] {
        &mut self.stack
    }

    /// Read a slot; out-of-range reads as nil
    pub fn slot(
        &self,
        index: usize,
    ) -> Value {
        self.stack.get(index).cloned().unwrap_or_default()
    }

    /// Write a slot, growing the stack if the prototype undersized it
    pub fn set_slot(
        &mut self,
        index: usize,
        value: Value,
    ) {
        if index >= self.stack.len() {
            self.stack.resize(index + 1, Value::Nil);
        }
        self.stack[index] = value;
    }

    pub fn open_upvalues(&self) -> &[Option<UpValueRef>] {
        &self.openups
    }

    pub fn pending(&self) -> &Varargs {
        &self.v
    }

    /// Take the pending multi-value results
    pub fn take_pending(&mut self) -> Varargs {
        std::mem::take(&mut self.v)
    }

    pub fn set_pending(
        &mut self,
        values: Varargs,
    ) {
        self.v = values;
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    #[inline]
    pub fn parent_count(&self) -> usize {
        self.parent_count
    }

    pub fn return_base(&self) -> usize {
        self.return_base
    }

    pub fn return_count(&self) -> i32 {
        self.return_count
    }
}

impl fmt::Debug for Frame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Frame")
            .field("status", &self.status)
            .field("closure", &self.closure.as_ref().map(|c| c.proto().name.clone()))
            .field("pc", &self.pc)
            .field("top", &self.top)
            .field("parent", &self.parent)
            .field("parent_count", &self.parent_count)
            .finish()
    }
}

/// Close every frame in the chain ending at `from`
pub fn release_callstack(
    frames: &mut [Frame],
    from: FrameId,
    pool: &mut FramePool,
) {
    let mut current = Some(from);
    while let Some(id) = current {
        let Some(frame) = frames.get_mut(id.index()) else {
            break;
        };
        current = frame.parent;
        frame.close(pool);
    }
}
