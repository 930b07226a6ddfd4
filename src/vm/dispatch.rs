//! Seam between the thread driver and instruction execution
//!
//! A [`Thread`] owns the call stack and decides what happens on calls,
//! returns and suspensions. A [`Dispatch`] implementation runs the top
//! frame until it needs the thread to do one of those things and reports
//! it as a [`Control`].

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use crate::runtime::{Context, Link};
use crate::vm::closure::{UpValue, UpValueRef};
use crate::vm::errors::{StructuralError, ThreadResult};
use crate::vm::frames::{Frame, FrameId};
use crate::vm::thread::Thread;
use crate::vm::value::{ClosureRef, NativeFunction, TableRef, Value, Varargs};

/// What the running frame asks of its thread
#[derive(Debug)]
pub enum Control {
    /// Push a new frame; results go to `return_base` of the caller
    Call {
        closure: ClosureRef,
        args: Varargs,
        return_base: usize,
        return_count: i32,
    },
    /// Replace the running frame's callee
    TailCall { closure: ClosureRef, args: Varargs },
    /// Pop the running frame
    Return(Varargs),
    /// Suspend, keeping the stack
    Yield(Varargs),
    /// Pop the running frame, then suspend
    EndCall(Varargs),
    /// Abandon the stack and queue a new entry point
    Jump { closure: ClosureRef, args: Varargs },
}

/// Outcome of a native function call
#[derive(Debug)]
pub enum NativeResult {
    Return(Varargs),
    Yield(Varargs),
    EndCall(Varargs),
    Jump { closure: ClosureRef, args: Varargs },
}

impl NativeResult {
    pub fn none() -> Self {
        NativeResult::Return(Varargs::none())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        NativeResult::Return(Varargs::from_vec(vec![value.into()]))
    }
}

/// Executes frames
pub trait Dispatch {
    /// Run the top frame until it needs the thread
    fn execute(
        &self,
        exec: &mut Execution<'_>,
    ) -> ThreadResult<Control>;

    /// Hand values to a frame suspended inside a call, as that call's results
    fn deliver(
        &self,
        frame: &mut Frame,
        values: Varargs,
    );
}

/// View of a running thread handed to the dispatcher
pub struct Execution<'a> {
    frames: &'a mut Vec<Frame>,
    env: &'a TableRef,
    thread: &'a Weak<RefCell<Thread>>,
    cancel: &'a Cell<bool>,
    cx: &'a mut Context,
}

impl<'a> Execution<'a> {
    pub fn new(
        frames: &'a mut Vec<Frame>,
        env: &'a TableRef,
        thread: &'a Weak<RefCell<Thread>>,
        cancel: &'a Cell<bool>,
        cx: &'a mut Context,
    ) -> Self {
        Self {
            frames,
            env,
            thread,
            cancel,
            cx,
        }
    }

    /// Whether the thread was destroyed while this frame executed
    pub fn is_cancelled(&self) -> bool {
        self.cancel.get()
    }

    /// The running frame
    pub fn frame(&self) -> Result<&Frame, StructuralError> {
        self.frames
            .last()
            .ok_or_else(|| StructuralError::InvalidState("no running frame".into()))
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame, StructuralError> {
        self.frames
            .last_mut()
            .ok_or_else(|| StructuralError::InvalidState("no running frame".into()))
    }

    pub fn frame_id(&self) -> FrameId {
        FrameId(self.frames.len().saturating_sub(1) as u32)
    }

    /// Call stack depth of the running frame
    pub fn depth(&self) -> usize {
        self.frames.last().map_or(0, Frame::size)
    }

    /// The running closure
    pub fn closure(&self) -> Result<ClosureRef, StructuralError> {
        self.frame()?
            .closure()
            .cloned()
            .ok_or_else(|| StructuralError::InvalidState("frame has no closure".into()))
    }

    pub fn env(&self) -> &TableRef {
        self.env
    }

    pub fn context(&mut self) -> &mut Context {
        &mut *self.cx
    }

    /// Read through an upvalue
    ///
    /// Open upvalues of this thread read the live stack slot. Open upvalues
    /// of another thread borrow that thread, which fails if it is running.
    pub fn get_upvalue(
        &self,
        up: &UpValueRef,
    ) -> ThreadResult<Value> {
        match &*up.borrow() {
            UpValue::Closed(value) => Ok(value.clone()),
            UpValue::Open { thread, frame, slot } => {
                if Weak::ptr_eq(thread, self.thread) {
                    return Ok(self
                        .frames
                        .get(frame.index())
                        .map(|f| f.slot(*slot))
                        .unwrap_or_default());
                }
                let Some(owner) = thread.upgrade() else {
                    return Ok(Value::Nil);
                };
                let owner = owner.try_borrow().map_err(|_| StructuralError::ThreadBusy)?;
                Ok(owner.frame(*frame).map(|f| f.slot(*slot)).unwrap_or_default())
            }
        }
    }

    /// Write through an upvalue
    pub fn set_upvalue(
        &mut self,
        up: &UpValueRef,
        value: Value,
    ) -> ThreadResult<()> {
        match &mut *up.borrow_mut() {
            UpValue::Closed(current) => *current = value,
            UpValue::Open { thread, frame, slot } => {
                if Weak::ptr_eq(thread, self.thread) {
                    if let Some(f) = self.frames.get_mut(frame.index()) {
                        f.set_slot(*slot, value);
                    }
                } else if let Some(owner) = thread.upgrade() {
                    let mut owner = owner.try_borrow_mut().map_err(|_| StructuralError::ThreadBusy)?;
                    if let Some(f) = owner.frame_mut(*frame) {
                        f.set_slot(*slot, value);
                    }
                }
            }
        }
        Ok(())
    }

    /// Open upvalue for a slot of the running frame
    pub fn capture(
        &mut self,
        slot: usize,
    ) -> Result<UpValueRef, StructuralError> {
        let id = self.frame_id();
        let thread = self.thread.clone();
        Ok(self.frame_mut()?.find_upvalue(&thread, id, slot))
    }

    /// Invoke a native function on behalf of the running frame
    ///
    /// Fails with [`StructuralError::Cancelled`] if the native destroyed
    /// this thread; the dispatcher must not run another instruction.
    pub fn call_native(
        &mut self,
        native: &NativeFunction,
        args: Varargs,
    ) -> ThreadResult<NativeResult> {
        let depth = self.depth();
        let mut call = NativeCall::new(&mut *self.cx, self.env, depth);
        let result = native.invoke(&mut call, args);
        if self.cancel.get() {
            return Err(StructuralError::Cancelled.into());
        }
        result
    }
}

/// What a native function sees of its caller
pub struct NativeCall<'a> {
    cx: &'a mut Context,
    env: &'a TableRef,
    depth: usize,
}

impl<'a> NativeCall<'a> {
    pub fn new(
        cx: &'a mut Context,
        env: &'a TableRef,
        depth: usize,
    ) -> Self {
        Self { cx, env, depth }
    }

    pub fn context(&mut self) -> &mut Context {
        &mut *self.cx
    }

    /// Link whose update is running this code, if any
    pub fn current_link(&self) -> Option<Link> {
        self.cx.current_link()
    }

    /// Environment of the calling thread
    pub fn env(&self) -> &TableRef {
        self.env
    }

    /// Call stack depth of the calling frame
    pub fn depth(&self) -> usize {
        self.depth
    }
}
