//! Shared scheduling context
//!
//! Everything a running thread may need besides its own stack: the frame
//! pool, the dispatcher, registered natives, configuration, the global
//! table, the thread groups and the link currently being updated.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::runtime::group::ThreadGroup;
use crate::runtime::link::Link;
use crate::util::config::RuntimeConfig;
use crate::vm::dispatch::Dispatch;
use crate::vm::interpreter::Interpreter;
use crate::vm::pool::FramePool;
use crate::vm::value::{NativeFunction, Table, TableRef};

/// Natives by persisted name
#[derive(Debug, Default, Clone)]
pub struct NativeRegistry {
    entries: IndexMap<String, NativeFunction>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native under its own name, replacing an older one
    pub fn register(
        &mut self,
        native: NativeFunction,
    ) {
        self.entries.insert(native.name().to_string(), native);
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&NativeFunction> {
        self.entries.get(name)
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Runtime context
pub struct Context {
    pub(crate) pool: FramePool,
    dispatcher: Rc<dyn Dispatch>,
    natives: NativeRegistry,
    config: RuntimeConfig,
    globals: TableRef,
    /// First entry is the default group
    groups: Vec<ThreadGroup>,
    current_link: Option<Link>,
}

impl Context {
    pub fn new(
        config: RuntimeConfig,
        dispatcher: Rc<dyn Dispatch>,
    ) -> Self {
        let pool = FramePool::with_capacity(config.frame_cache_size, config.array_cache_size);
        Self {
            pool,
            dispatcher,
            natives: NativeRegistry::new(),
            config,
            globals: Rc::new(RefCell::new(Table::new())),
            groups: Vec::new(),
            current_link: None,
        }
    }

    pub fn dispatcher(&self) -> Rc<dyn Dispatch> {
        Rc::clone(&self.dispatcher)
    }

    pub fn set_dispatcher(
        &mut self,
        dispatcher: Rc<dyn Dispatch>,
    ) {
        self.dispatcher = dispatcher;
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut FramePool {
        &mut self.pool
    }

    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    pub(crate) fn set_globals(
        &mut self,
        globals: TableRef,
    ) {
        self.globals = globals;
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    pub fn natives_mut(&mut self) -> &mut NativeRegistry {
        &mut self.natives
    }

    /// Link whose update is running, if any
    pub fn current_link(&self) -> Option<Link> {
        self.current_link.clone()
    }

    /// Swap the current link, returning the previous one
    pub fn set_current_link(
        &mut self,
        link: Option<Link>,
    ) -> Option<Link> {
        std::mem::replace(&mut self.current_link, link)
    }

    /// The default thread group
    ///
    /// Created on first use, and again if the previous default was destroyed.
    pub fn default_group(&mut self) -> ThreadGroup {
        match self.groups.first() {
            Some(group) if !group.is_destroyed() => group.clone(),
            _ => {
                debug!("creating default thread group");
                let group = ThreadGroup::new(Rc::clone(&self.globals));
                self.groups.retain(|g| !g.is_destroyed());
                self.groups.insert(0, group.clone());
                group
            }
        }
    }

    /// Create and register another thread group
    pub fn new_thread_group(&mut self) -> ThreadGroup {
        // Make sure the default group keeps the first position
        self.default_group();
        let group = ThreadGroup::new(Rc::clone(&self.globals));
        self.groups.push(group.clone());
        group
    }

    pub fn groups(&self) -> &[ThreadGroup] {
        &self.groups
    }

    pub(crate) fn set_groups(
        &mut self,
        groups: Vec<ThreadGroup>,
    ) {
        self.groups = groups;
    }

    /// Forget destroyed groups
    pub(crate) fn prune_groups(&mut self) {
        self.groups.retain(|g| !g.is_destroyed());
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), Rc::new(Interpreter::new()))
    }
}

impl fmt::Debug for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("natives", &self.natives.len())
            .field("groups", &self.groups.len())
            .field("pool", &self.pool.stats())
            .finish()
    }
}
