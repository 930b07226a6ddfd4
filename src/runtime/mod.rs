//! Scheduling runtime
//!
//! Links, thread groups, the shared context, the `Thread` script library,
//! the tick driver and persistence.

pub use context::{Context, NativeRegistry};
pub use driver::{Runtime, TickReport};
pub use errors::{LinkError, PersistError};
pub use group::ThreadGroup;
pub use link::{Entry, Link};
pub use persist::Snapshot;

pub mod context;
pub mod driver;
pub mod errors;
pub mod group;
pub mod link;
pub mod persist;
pub mod stdlib;

#[cfg(test)]
mod tests;
