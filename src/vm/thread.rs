//! Script threads
//!
//! A thread is a possibly-suspended chain of frames plus at most one queued
//! call. It runs on the caller's stack: `resume` executes until the script
//! yields, the bottom frame returns, the budget runs out or an error occurs.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::runtime::Context;
use crate::vm::dispatch::{Control, Execution};
use crate::vm::errors::{StructuralError, ThreadError, ThreadResult};
use crate::vm::frames::{self, Frame, FrameId, FrameStatus};
use crate::vm::pool::FramePool;
use crate::vm::value::{ClosureRef, TableRef, Varargs};

/// Shared thread handle
pub type ThreadRef = Rc<RefCell<Thread>>;

/// Thread lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadStatus {
    /// Nothing on the stack; ready for a new call
    #[default]
    Fresh,
    Running,
    Paused,
    Dead,
}

/// A call queued for the next resume
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub closure: ClosureRef,
    pub args: Varargs,
}

/// Script thread
pub struct Thread {
    status: ThreadStatus,
    env: TableRef,
    /// Frame arena; the last frame is the top of the call stack
    frames: Vec<Frame>,
    pending: Option<PendingCall>,
    this: Weak<RefCell<Thread>>,
    /// Set to tear the thread down as soon as control returns to it
    cancel: Rc<Cell<bool>>,
}

impl Thread {
    /// Create a thread running against the given environment table
    pub fn new_ref(env: TableRef) -> ThreadRef {
        Rc::new_cyclic(|this| {
            RefCell::new(Thread {
                status: ThreadStatus::Fresh,
                env,
                frames: Vec::new(),
                pending: None,
                this: this.clone(),
                cancel: Rc::default(),
            })
        })
    }

    /// Queue a call for the next resume, replacing any queued call
    pub fn push_pending(
        &mut self,
        closure: ClosureRef,
        args: Varargs,
    ) {
        if let Some(old) = &self.pending {
            debug!(replaced = %old.closure.proto().name, "replacing pending call");
        }
        self.pending = Some(PendingCall { closure, args });
    }

    /// Continue execution
    ///
    /// A queued call is first pushed on top of the stack. With `n < 0` the
    /// slice runs until a yield, the bottom frame returning, or an error.
    /// With `n >= 0` it also ends once `n` frames below the entry top have
    /// returned, so `resume(1)` runs a freshly queued call to completion
    /// and hands back its results.
    pub fn resume(
        &mut self,
        cx: &mut Context,
        n: i32,
    ) -> ThreadResult<Varargs> {
        match self.status {
            ThreadStatus::Dead => return Err(StructuralError::DeadThread.into()),
            ThreadStatus::Running => return Err(StructuralError::AlreadyRunning.into()),
            ThreadStatus::Fresh | ThreadStatus::Paused => {}
        }

        if let Some(call) = self.pending.take() {
            // A suspended frame below keeps its own state; write nothing back
            if let Err(err) = self.push_frame(cx, call.closure, call.args, 0, 0) {
                return Err(self.fail(err.into()));
            }
        } else if let Some(top) = self.frames.last_mut() {
            if top.status == FrameStatus::Paused {
                top.status = FrameStatus::Running;
                cx.dispatcher().deliver(top, Varargs::none());
            }
        }

        if self.frames.is_empty() {
            self.status = ThreadStatus::Fresh;
            return Ok(Varargs::none());
        }

        let floor = usize::try_from(n)
            .ok()
            .map(|n| self.frames.len().saturating_sub(n));
        debug!(depth = self.frames.len(), budget = n, "resuming thread");

        self.status = ThreadStatus::Running;
        match self.run(cx, floor) {
            Ok(values) => Ok(values),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn run(
        &mut self,
        cx: &mut Context,
        floor: Option<usize>,
    ) -> ThreadResult<Varargs> {
        let dispatcher = cx.dispatcher();
        loop {
            if floor.is_some_and(|floor| self.frames.len() <= floor) {
                self.status = ThreadStatus::Paused;
                return Ok(Varargs::none());
            }

            let Some(top) = self.frames.last_mut() else {
                self.status = ThreadStatus::Fresh;
                return Ok(Varargs::none());
            };
            match top.status {
                FrameStatus::Paused => {
                    // Reached by returning from a call queued on top of it
                    top.status = FrameStatus::Running;
                    dispatcher.deliver(top, Varargs::none());
                }
                FrameStatus::Fresh => top.status = FrameStatus::Running,
                FrameStatus::Running | FrameStatus::Dead => {}
            }

            let result = {
                let mut exec = Execution::new(&mut self.frames, &self.env, &self.this, &self.cancel, cx);
                dispatcher.execute(&mut exec)
            };
            if self.cancel.get() {
                debug!(depth = self.frames.len(), "thread destroyed while executing");
                self.release_callstack(&mut cx.pool);
                self.destroy();
                return Ok(Varargs::none());
            }
            let control = result?;

            match control {
                Control::Call {
                    closure,
                    args,
                    return_base,
                    return_count,
                } => {
                    self.push_frame(cx, closure, args, return_base, return_count)?;
                }
                Control::TailCall { closure, args } => {
                    let Some(top) = self.frames.last_mut() else {
                        return Err(StructuralError::InvalidState("tail call without a frame".into()).into());
                    };
                    trace!(callee = %closure.proto().name, depth = top.size(), "tail call");
                    top.prepare_tailcall(&mut cx.pool, closure, args);
                    top.status = FrameStatus::Running;
                }
                Control::Return(values) => {
                    self.pop_frame(&mut cx.pool, &values);
                    if self.frames.is_empty() {
                        self.status = ThreadStatus::Fresh;
                        return Ok(values);
                    }
                    if floor.is_some_and(|floor| self.frames.len() <= floor) {
                        self.status = ThreadStatus::Paused;
                        return Ok(values);
                    }
                }
                Control::Yield(values) => {
                    return Ok(self.yield_now(values)?);
                }
                Control::EndCall(values) => {
                    return Ok(self.end_call(&mut cx.pool, values)?);
                }
                Control::Jump { closure, args } => {
                    debug!(target = %closure.proto().name, "jumping to new entry point");
                    self.reset(&mut cx.pool);
                    self.push_pending(closure, args);
                    return Ok(Varargs::none());
                }
            }
        }
    }

    /// Suspend the running thread at its current frame
    ///
    /// The stack is kept intact; the next resume continues at the same pc.
    pub fn yield_now(
        &mut self,
        values: Varargs,
    ) -> Result<Varargs, StructuralError> {
        if self.status != ThreadStatus::Running {
            return Err(StructuralError::NotRunning);
        }
        if let Some(top) = self.frames.last_mut() {
            top.status = FrameStatus::Paused;
        }
        self.status = ThreadStatus::Paused;
        trace!(depth = self.frames.len(), "thread yielded");
        Ok(values)
    }

    /// Return from the current frame, then yield
    pub fn end_call(
        &mut self,
        pool: &mut FramePool,
        values: Varargs,
    ) -> Result<Varargs, StructuralError> {
        if self.status != ThreadStatus::Running {
            return Err(StructuralError::NotRunning);
        }
        self.pop_frame(pool, &values);
        self.status = if self.frames.is_empty() {
            ThreadStatus::Fresh
        } else {
            ThreadStatus::Paused
        };
        Ok(values)
    }

    /// Abandon the call stack and any queued call; ready for a new call
    pub fn reset(
        &mut self,
        pool: &mut FramePool,
    ) {
        self.release_callstack(pool);
        self.pending = None;
        self.status = ThreadStatus::Fresh;
    }

    /// Tear the thread down for good
    pub fn destroy(&mut self) {
        for frame in self.frames.iter_mut().rev() {
            frame.close_detached();
        }
        self.frames.clear();
        self.pending = None;
        self.status = ThreadStatus::Dead;
        self.cancel.set(false);
    }

    /// True once the bottom frame has returned and nothing is queued
    pub fn is_finished(&self) -> bool {
        self.status == ThreadStatus::Dead || (self.frames.is_empty() && self.pending.is_none())
    }

    /// True once the thread was destroyed or failed
    pub fn is_dead(&self) -> bool {
        self.status == ThreadStatus::Dead
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn env(&self) -> &TableRef {
        &self.env
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The running (or suspended) frame
    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn frame(
        &self,
        id: FrameId,
    ) -> Option<&Frame> {
        self.frames.get(id.index())
    }

    pub(crate) fn frame_mut(
        &mut self,
        id: FrameId,
    ) -> Option<&mut Frame> {
        self.frames.get_mut(id.index())
    }

    /// Call stack depth
    pub fn depth(&self) -> usize {
        self.frames.last().map_or(0, Frame::size)
    }

    pub fn pending(&self) -> Option<&PendingCall> {
        self.pending.as_ref()
    }

    /// Closure `level` frames up the call stack (1 = the top frame)
    pub fn callstack_function(
        &self,
        level: usize,
    ) -> Option<ClosureRef> {
        let mut frame = self.frames.last()?;
        for _ in 1..level {
            frame = self.frames.get(frame.parent?.index())?;
        }
        frame.closure.clone()
    }

    /// Flag that destroys the thread at its next chance while it executes
    ///
    /// Checked after every dispatcher step and after every native call.
    pub fn cancel_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.cancel)
    }

    /// Weak handle to this thread, as recorded in open upvalues
    pub fn handle(&self) -> &Weak<RefCell<Thread>> {
        &self.this
    }

    pub(crate) fn restore(
        &mut self,
        status: ThreadStatus,
        env: TableRef,
        frames: Vec<Frame>,
        pending: Option<PendingCall>,
    ) {
        self.status = status;
        self.env = env;
        self.frames = frames;
        self.pending = pending;
    }

    fn push_frame(
        &mut self,
        cx: &mut Context,
        closure: ClosureRef,
        args: Varargs,
        return_base: usize,
        return_count: i32,
    ) -> Result<(), StructuralError> {
        let limit = cx.config().max_call_depth;
        if self.frames.len() >= limit {
            return Err(StructuralError::CallDepthExceeded(limit));
        }

        let parent = self
            .frames
            .len()
            .checked_sub(1)
            .map(|index| (FrameId(index as u32), &self.frames[index]));
        trace!(callee = %closure.proto().name, depth = self.frames.len() + 1, "push frame");
        let frame = Frame::new_call(&mut cx.pool, closure, args, parent, return_base, return_count);
        self.frames.push(frame);
        Ok(())
    }

    fn pop_frame(
        &mut self,
        pool: &mut FramePool,
        values: &Varargs,
    ) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        let (base, count) = (frame.return_base, frame.return_count);
        frame.close_upvalues();
        pool.give_frame(frame);

        if let Some(parent) = self.frames.last_mut() {
            parent.store_results(base, count, values);
        }
    }

    fn release_callstack(
        &mut self,
        pool: &mut FramePool,
    ) {
        if let Some(top) = self.frames.len().checked_sub(1) {
            frames::release_callstack(&mut self.frames, FrameId(top as u32), pool);
        }
        for frame in self.frames.drain(..) {
            pool.give_frame(frame);
        }
    }

    fn fail(
        &mut self,
        err: ThreadError,
    ) -> ThreadError {
        debug!(error = %err, "thread failed");
        for frame in self.frames.iter_mut().rev() {
            frame.close_detached();
        }
        self.frames.clear();
        self.pending = None;
        self.status = ThreadStatus::Dead;
        err
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        // Closures elsewhere may still hold our open upvalues
        for frame in self.frames.iter_mut().rev() {
            frame.close_upvalues();
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Thread")
            .field("status", &self.status)
            .field("depth", &self.frames.len())
            .field("pending", &self.pending.as_ref().map(|p| p.closure.proto().name.clone()))
            .finish()
    }
}
