//! Links: host-side handles on script threads
//!
//! A link owns one thread and decides when it runs. It carries the wait
//! counter (`< 0` blocks forever, `0` runs on the next update, `> 0` counts
//! updates down), the one-time entry call and the persistence flag.
//!
//! During `update` and `call` the link is the context's current link, so
//! natives such as `Thread.yield` can change its wait counter. The thread
//! itself is mutably borrowed for the whole slice; `destroy` called from
//! inside that slice raises the thread's cancel flag, which stops the
//! script as soon as control leaves the native that destroyed it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::runtime::context::Context;
use crate::runtime::errors::LinkError;
use crate::vm::errors::{StructuralError, ThreadError};
use crate::vm::thread::{Thread, ThreadRef};
use crate::vm::value::{ClosureRef, TableRef, Value, Varargs};

/// What a link runs on its first update
#[derive(Debug, Clone)]
pub enum Entry {
    /// A closure with its arguments
    Function { closure: ClosureRef, args: Varargs },
    /// A dotted global name, resolved at init time
    Named { name: String, args: Varargs },
}

pub(crate) struct LinkState {
    pub(crate) thread: ThreadRef,
    pub(crate) wait: i32,
    pub(crate) persistent: bool,
    pub(crate) inited: bool,
    /// Cancel flag of `thread`
    pub(crate) cancel: Rc<Cell<bool>>,
    pub(crate) entry: Option<Entry>,
}

/// Shared link handle
#[derive(Clone)]
pub struct Link(Rc<RefCell<LinkState>>);

impl Link {
    /// A link with a fresh thread and no entry call
    pub fn new(env: TableRef) -> Self {
        Self::with_entry(env, None)
    }

    /// A link that calls `closure(args)` on its first update
    pub fn with_function(
        env: TableRef,
        closure: ClosureRef,
        args: Varargs,
    ) -> Self {
        Self::with_entry(env, Some(Entry::Function { closure, args }))
    }

    /// A link that calls the function named `name` on its first update
    pub fn with_named(
        env: TableRef,
        name: &str,
        args: Varargs,
    ) -> Self {
        Self::with_entry(
            env,
            Some(Entry::Named {
                name: name.to_string(),
                args,
            }),
        )
    }

    fn with_entry(
        env: TableRef,
        entry: Option<Entry>,
    ) -> Self {
        Self::from_parts(Thread::new_ref(env), 0, false, false, entry)
    }

    pub(crate) fn from_parts(
        thread: ThreadRef,
        wait: i32,
        persistent: bool,
        inited: bool,
        entry: Option<Entry>,
    ) -> Self {
        let cancel = thread.borrow().cancel_flag();
        Link(Rc::new(RefCell::new(LinkState {
            thread,
            wait,
            persistent,
            inited,
            cancel,
            entry,
        })))
    }

    pub(crate) fn set_thread(
        &self,
        thread: ThreadRef,
    ) {
        let cancel = thread.borrow().cancel_flag();
        let mut state = self.0.borrow_mut();
        state.thread = thread;
        state.cancel = cancel;
    }

    pub(crate) fn set_entry(
        &self,
        entry: Option<Entry>,
    ) {
        self.0.borrow_mut().entry = entry;
    }

    pub fn thread(&self) -> ThreadRef {
        Rc::clone(&self.0.borrow().thread)
    }

    pub fn entry(&self) -> Option<Entry> {
        self.0.borrow().entry.clone()
    }

    pub fn is_inited(&self) -> bool {
        self.0.borrow().inited
    }

    /// Identity comparison
    pub fn ptr_eq(
        &self,
        other: &Link,
    ) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    // ---- wait counter ----

    pub fn wait(&self) -> i32 {
        self.0.borrow().wait
    }

    pub fn set_wait(
        &self,
        wait: i32,
    ) {
        self.0.borrow_mut().wait = wait;
    }

    /// Add `dt` to a finite wait
    ///
    /// Returns whether the counter changed; an infinite wait or `dt == 0`
    /// leaves it alone.
    pub fn add_wait(
        &self,
        dt: i32,
    ) -> Result<bool, StructuralError> {
        if dt < 0 {
            return Err(StructuralError::NegativeWait(dt));
        }
        let mut state = self.0.borrow_mut();
        if state.wait >= 0 && dt > 0 {
            state.wait = state.wait.saturating_add(dt);
            return Ok(true);
        }
        Ok(false)
    }

    /// Count a positive wait down by `dt`, stopping at zero
    pub fn decrease_wait(
        &self,
        dt: i32,
    ) -> Result<bool, StructuralError> {
        if dt < 0 {
            return Err(StructuralError::NegativeWait(dt));
        }
        let mut state = self.0.borrow_mut();
        if state.wait > 0 && dt > 0 {
            state.wait = (state.wait - dt).max(0);
            return Ok(true);
        }
        Ok(false)
    }

    /// Raise a finite wait to at least `w`; a negative `w` makes it infinite
    pub fn set_minimum_wait(
        &self,
        w: i32,
    ) -> bool {
        let mut state = self.0.borrow_mut();
        if state.wait >= 0 && (w < 0 || w > state.wait) {
            state.wait = w;
            return true;
        }
        false
    }

    // ---- lifecycle ----

    pub fn is_persistent(&self) -> bool {
        self.0.borrow().persistent
    }

    /// A persistent link stays alive after its thread returns; it only
    /// counts as finished once the thread is dead.
    pub fn set_persistent(
        &self,
        persistent: bool,
    ) {
        self.0.borrow_mut().persistent = persistent;
    }

    /// Kill the thread; safe to call from inside the thread itself
    ///
    /// An executing thread stops before its next instruction, with every
    /// open upvalue closed.
    pub fn destroy(&self) {
        let thread = {
            let mut state = self.0.borrow_mut();
            state.persistent = false;
            Rc::clone(&state.thread)
        };
        let busy = match thread.try_borrow_mut() {
            Ok(mut thread) => {
                thread.destroy();
                false
            }
            Err(_) => true,
        };
        if busy {
            debug!("thread is executing, cancelling it");
            self.0.borrow().cancel.set(true);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        let state = self.0.borrow();
        if state.cancel.get() {
            return true;
        }
        state.thread.try_borrow().is_ok_and(|t| t.is_dead())
    }

    /// Whether the group may drop this link
    ///
    /// Never true before the first update, nor while the thread executes.
    pub fn is_finished(&self) -> bool {
        let state = self.0.borrow();
        if !state.inited {
            return false;
        }
        if state.cancel.get() {
            return true;
        }
        let Ok(thread) = state.thread.try_borrow() else {
            return false;
        };
        if state.persistent {
            thread.is_dead()
        } else {
            thread.is_finished()
        }
    }

    /// Whether an update could still run script code
    pub fn is_runnable(&self) -> bool {
        let state = self.0.borrow();
        if !state.inited {
            return true;
        }
        state.thread.try_borrow().is_ok_and(|t| !t.is_finished())
    }

    // ---- execution ----

    fn init(&self) -> Result<(), LinkError> {
        let Some(entry) = self.entry() else {
            return Ok(());
        };
        match entry {
            Entry::Function { closure, args } => self.push_call(closure, args),
            Entry::Named { name, args } => {
                let closure = self.function(&name)?;
                self.push_call(closure, args)
            }
        }
    }

    /// Queue a call for the next update
    pub fn push_call(
        &self,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<(), LinkError> {
        let thread = self.thread();
        let mut thread = thread.try_borrow_mut().map_err(|_| StructuralError::ThreadBusy)?;
        thread.push_pending(closure, args);
        Ok(())
    }

    /// Run one tick
    ///
    /// The first update performs the entry call setup. Afterwards a finished
    /// link does nothing, a waiting link counts its wait down, and otherwise
    /// the thread runs until it yields or its bottom frame returns. Returns
    /// whether anything happened.
    pub fn update(
        &self,
        cx: &mut Context,
    ) -> Result<bool, LinkError> {
        let mut changed = false;

        if !self.is_inited() {
            self.0.borrow_mut().inited = true;
            changed = true;
            self.init()?;
        }

        if self.is_finished() {
            return Ok(changed);
        }

        if self.wait() != 0 {
            self.decrease_wait(1)?;
            return Ok(changed);
        }

        self.run(cx, -1, Varargs::none(), None)
            .map(|_| true)
            .map_err(|err| LinkError::from_thread("Error running thread", err))
    }

    /// Call `closure` on this link's thread and return its results
    ///
    /// A suspended script stays suspended underneath the call.
    pub fn call(
        &self,
        cx: &mut Context,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<Varargs, LinkError> {
        let context = format!("Error calling function: {}", closure.proto().name);
        self.run(cx, 1, args, Some(closure))
            .map_err(|err| LinkError::from_thread(context, err))
    }

    /// Call a function looked up by dotted name
    pub fn call_named(
        &self,
        cx: &mut Context,
        name: &str,
        args: Varargs,
    ) -> Result<Varargs, LinkError> {
        let closure = self.function(name)?;
        self.call(cx, closure, args)
    }

    fn run(
        &self,
        cx: &mut Context,
        budget: i32,
        args: Varargs,
        closure: Option<ClosureRef>,
    ) -> Result<Varargs, ThreadError> {
        let thread = self.thread();
        let previous = cx.set_current_link(Some(self.clone()));
        let result = match thread.try_borrow_mut() {
            Ok(mut thread) => {
                if let Some(closure) = closure {
                    thread.push_pending(closure, args);
                }
                thread.resume(cx, budget)
            }
            Err(_) => Err(StructuralError::ThreadBusy.into()),
        };
        cx.set_current_link(previous);
        self.finish_cancelled();
        result
    }

    /// Tear down a thread cancelled outside its dispatcher loop
    fn finish_cancelled(&self) {
        let thread = {
            let state = self.0.borrow();
            if !state.cancel.get() {
                return;
            }
            Rc::clone(&state.thread)
        };
        let borrowed = thread.try_borrow_mut();
        if let Ok(mut thread) = borrowed {
            thread.destroy();
        }
    }

    /// Abandon whatever the thread was doing and run `closure` next update
    pub fn jump(
        &self,
        cx: &mut Context,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<(), LinkError> {
        let thread = self.thread();
        let mut thread = thread.try_borrow_mut().map_err(|_| StructuralError::ThreadBusy)?;
        thread.reset(cx.pool_mut());
        thread.push_pending(closure, args);
        Ok(())
    }

    /// Resolve `a.b.c` through the thread's environment
    ///
    /// None if a segment is missing or not a table, or the final value is
    /// not a script function. Also None while the thread is executing.
    pub fn find_function(
        &self,
        name: &str,
    ) -> Option<ClosureRef> {
        let env = {
            let thread = self.thread();
            let thread = thread.try_borrow().ok()?;
            Rc::clone(thread.env())
        };

        let mut segments = name.split('.');
        let last = segments.next_back()?;
        let mut table = env;
        for segment in segments {
            let next = table.borrow().get_str(segment);
            match next {
                Value::Table(t) => table = t,
                _ => return None,
            }
        }
        let value = table.borrow().get_str(last);
        value.as_closure().cloned()
    }

    pub fn function(
        &self,
        name: &str,
    ) -> Result<ClosureRef, LinkError> {
        self.find_function(name)
            .ok_or_else(|| LinkError::FunctionNotFound(name.to_string()))
    }

    pub fn has_function(
        &self,
        name: &str,
    ) -> bool {
        self.find_function(name).is_some()
    }
}

impl fmt::Debug for Link {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.0.borrow();
        let entry = match &state.entry {
            Some(Entry::Function { closure, .. }) => format!("closure{{{}}}", closure.proto().name),
            Some(Entry::Named { name, .. }) => name.clone(),
            None => "-".to_string(),
        };
        f.debug_struct("Link")
            .field("entry", &entry)
            .field("wait", &state.wait)
            .field("persistent", &state.persistent)
            .field("inited", &state.inited)
            .finish()
    }
}
