//! Tick driver
//!
//! The host owns a [`Runtime`] and calls [`Runtime::update`] once per tick.
//! Each live thread group is updated in order; a failing group is logged
//! and reported without stopping the others.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use tracing::{info, warn};

use crate::runtime::context::{Context, NativeRegistry};
use crate::runtime::errors::{LinkError, PersistError};
use crate::runtime::group::ThreadGroup;
use crate::runtime::link::Link;
use crate::runtime::persist::{self, Snapshot};
use crate::runtime::stdlib;
use crate::util::config::RuntimeConfig;
use crate::vm::dispatch::{NativeCall, NativeResult};
use crate::vm::errors::{StructuralError, ThreadResult};
use crate::vm::interpreter::Interpreter;
use crate::vm::value::{ClosureRef, NativeFunction, TableRef, Value, Varargs};
use crate::vm::Dispatch;

/// Outcome of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Whether any link did something
    pub changed: bool,
    /// Errors of groups whose update failed
    pub errors: Vec<LinkError>,
}

impl TickReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Script runtime
#[derive(Debug)]
pub struct Runtime {
    cx: Context,
}

impl Runtime {
    /// Runtime with the default configuration and the reference interpreter
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_dispatcher(config, Rc::new(Interpreter::new()))
    }

    /// Runtime driving a custom dispatcher
    pub fn with_dispatcher(
        config: RuntimeConfig,
        dispatcher: Rc<dyn Dispatch>,
    ) -> Self {
        let mut cx = Context::new(config, dispatcher);
        stdlib::install(&mut cx);
        Self { cx }
    }

    /// Rebuild a runtime from a snapshot
    ///
    /// `natives` must contain every host native the saved state refers to;
    /// the `Thread` library is registered automatically.
    pub fn load(
        snapshot: &Snapshot,
        natives: NativeRegistry,
        config: RuntimeConfig,
        dispatcher: Rc<dyn Dispatch>,
    ) -> Result<Self, PersistError> {
        let mut runtime = Self::with_dispatcher(config, dispatcher);
        for name in natives.names() {
            if let Some(native) = natives.get(name) {
                runtime.cx.natives_mut().register(native.clone());
            }
        }
        runtime.restore(snapshot)?;
        Ok(runtime)
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.cx
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.cx.config()
    }

    pub fn globals(&self) -> TableRef {
        Rc::clone(self.cx.globals())
    }

    pub fn set_global(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) {
        self.cx.globals().borrow_mut().set_str(name, value);
    }

    pub fn get_global(
        &self,
        name: &str,
    ) -> Value {
        self.cx.globals().borrow().get_str(name)
    }

    pub fn natives(&self) -> &NativeRegistry {
        self.cx.natives()
    }

    /// Register a host function and bind it as a global of the same name
    pub fn register_native<F>(
        &mut self,
        name: &str,
        func: F,
    ) -> NativeFunction
    where
        F: Fn(&mut NativeCall<'_>, Varargs) -> ThreadResult<NativeResult> + 'static,
    {
        let native = NativeFunction::new(name, func);
        self.cx.natives_mut().register(native.clone());
        self.set_global(name, native.clone());
        native
    }

    pub fn default_group(&mut self) -> ThreadGroup {
        self.cx.default_group()
    }

    pub fn new_thread_group(&mut self) -> ThreadGroup {
        self.cx.new_thread_group()
    }

    /// Start `closure(args)` in the default group
    pub fn new_thread(
        &mut self,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<Link, StructuralError> {
        self.cx.default_group().new_thread(closure, args)
    }

    /// Start the function named `name` in the default group
    pub fn new_named_thread(
        &mut self,
        name: &str,
        args: Varargs,
    ) -> Result<Link, StructuralError> {
        self.cx.default_group().new_named_thread(name, args)
    }

    pub fn groups(&self) -> &[ThreadGroup] {
        self.cx.groups()
    }

    /// Run one tick
    pub fn update(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let groups = self.cx.groups().to_vec();
        for group in groups {
            if group.is_destroyed() {
                continue;
            }
            match group.update(&mut self.cx) {
                Ok(changed) => report.changed |= changed,
                Err(err) => {
                    warn!(error = %err, "thread group update failed");
                    report.errors.push(err);
                }
            }
        }
        self.cx.prune_groups();
        report
    }

    /// Call `closure` on a fresh link outside any group
    pub fn call(
        &mut self,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<Varargs, LinkError> {
        let link = Link::new(self.globals());
        link.call(&mut self.cx, closure, args)
    }

    /// Destroy every thread group
    pub fn destroy(&mut self) {
        for group in self.cx.groups().to_vec() {
            group.destroy();
        }
        self.cx.prune_groups();
    }

    /// Capture the globals and every live thread group
    pub fn save(&self) -> Result<Snapshot, PersistError> {
        let groups: Vec<ThreadGroup> = self
            .cx
            .groups()
            .iter()
            .filter(|g| !g.is_destroyed())
            .cloned()
            .collect();
        let snapshot = persist::save(self.cx.globals(), &groups)?;
        info!(objects = snapshot.objects.len(), groups = groups.len(), "saved runtime");
        Ok(snapshot)
    }

    /// Replace the globals and thread groups with those of `snapshot`
    pub fn restore(
        &mut self,
        snapshot: &Snapshot,
    ) -> Result<(), PersistError> {
        let restored = persist::restore(snapshot, self.cx.natives())?;
        info!(
            objects = snapshot.objects.len(),
            groups = restored.groups.len(),
            "restored runtime"
        );
        self.cx.set_globals(restored.globals);
        self.cx.set_groups(restored.groups);
        self.cx.set_current_link(None);
        Ok(())
    }

    /// Save to a file in the configured format
    pub fn save_file(
        &self,
        path: &Path,
    ) -> Result<(), PersistError> {
        let text = self.save()?.encode(self.config().snapshot_format)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Restore from a file in the configured format
    pub fn load_file(
        &mut self,
        path: &Path,
    ) -> Result<(), PersistError> {
        let text = fs::read_to_string(path)?;
        let snapshot = Snapshot::decode(self.config().snapshot_format, &text)?;
        self.restore(&snapshot)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
