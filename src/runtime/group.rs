//! Thread groups
//!
//! An ordered collection of links ticked together. Links run in insertion
//! order from a snapshot taken before the first one runs, so links added
//! during an update run on the next one. Finished links are dropped
//! lazily whenever the member list is read.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::info;

use crate::runtime::context::Context;
use crate::runtime::errors::LinkError;
use crate::runtime::link::Link;
use crate::vm::errors::StructuralError;
use crate::vm::value::{ClosureRef, TableRef, Varargs};

pub(crate) struct GroupState {
    pub(crate) env: TableRef,
    pub(crate) links: Vec<Link>,
    pub(crate) suspended: bool,
    pub(crate) destroyed: bool,
}

/// Shared thread group handle
#[derive(Clone)]
pub struct ThreadGroup(Rc<RefCell<GroupState>>);

impl ThreadGroup {
    /// An empty group whose new threads run against `env`
    pub fn new(env: TableRef) -> Self {
        Self::from_parts(env, false, false)
    }

    pub(crate) fn from_parts(
        env: TableRef,
        suspended: bool,
        destroyed: bool,
    ) -> Self {
        ThreadGroup(Rc::new(RefCell::new(GroupState {
            env,
            links: Vec::new(),
            suspended,
            destroyed,
        })))
    }

    pub(crate) fn set_links(
        &self,
        links: Vec<Link>,
    ) {
        self.0.borrow_mut().links = links;
    }

    /// Members as stored, finished ones included
    pub(crate) fn raw_links(&self) -> Vec<Link> {
        self.0.borrow().links.clone()
    }

    pub(crate) fn set_env(
        &self,
        env: TableRef,
    ) {
        self.0.borrow_mut().env = env;
    }

    pub fn env(&self) -> TableRef {
        Rc::clone(&self.0.borrow().env)
    }

    pub fn ptr_eq(
        &self,
        other: &ThreadGroup,
    ) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    fn check_destroyed(&self) -> Result<(), StructuralError> {
        if self.is_destroyed() {
            return Err(StructuralError::GroupDestroyed);
        }
        Ok(())
    }

    /// Add a link; the same link may be added more than once
    pub fn add(
        &self,
        link: Link,
    ) -> Result<(), StructuralError> {
        self.check_destroyed()?;
        self.0.borrow_mut().links.push(link);
        Ok(())
    }

    /// Add every live member of `other`
    pub fn add_all(
        &self,
        other: &ThreadGroup,
    ) -> Result<(), StructuralError> {
        for link in other.links() {
            self.add(link)?;
        }
        Ok(())
    }

    /// Create a link that calls `closure(args)` and add it
    pub fn new_thread(
        &self,
        closure: ClosureRef,
        args: Varargs,
    ) -> Result<Link, StructuralError> {
        self.check_destroyed()?;
        let link = Link::with_function(self.env(), closure, args);
        self.add(link.clone())?;
        Ok(link)
    }

    /// Create a link that calls the function named `name` and add it
    pub fn new_named_thread(
        &self,
        name: &str,
        args: Varargs,
    ) -> Result<Link, StructuralError> {
        self.check_destroyed()?;
        let link = Link::with_named(self.env(), name, args);
        self.add(link.clone())?;
        Ok(link)
    }

    /// Update every member once
    ///
    /// Stops early if a member destroys the group. The first link error
    /// ends the pass and is returned.
    pub fn update(
        &self,
        cx: &mut Context,
    ) -> Result<bool, LinkError> {
        self.check_destroyed()?;

        let mut changed = false;
        for link in self.links() {
            if !self.is_suspended() {
                changed |= link.update(cx)?;
            }
            if self.is_destroyed() {
                break;
            }
        }
        Ok(changed)
    }

    /// Live members, dropping finished ones first
    pub fn links(&self) -> Vec<Link> {
        let mut state = self.0.borrow_mut();
        state.links.retain(|link| !link.is_finished());
        state.links.clone()
    }

    pub fn len(&self) -> usize {
        self.links().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn suspend(&self) -> Result<(), StructuralError> {
        self.set_suspended(true)
    }

    pub fn resume(&self) -> Result<(), StructuralError> {
        self.set_suspended(false)
    }

    pub fn set_suspended(
        &self,
        suspended: bool,
    ) -> Result<(), StructuralError> {
        self.check_destroyed()?;
        self.0.borrow_mut().suspended = suspended;
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.0.borrow().suspended
    }

    /// Destroy the group and every member; repeated calls do nothing
    pub fn destroy(&self) {
        let links = {
            let mut state = self.0.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            std::mem::take(&mut state.links)
        };
        info!(links = links.len(), "destroying thread group");
        for link in links {
            link.destroy();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.borrow().destroyed
    }
}

impl fmt::Debug for ThreadGroup {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("ThreadGroup")
            .field("links", &state.links.len())
            .field("suspended", &state.suspended)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
