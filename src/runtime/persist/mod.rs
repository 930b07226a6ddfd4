//! Saving and restoring runtime state
//!
//! The writer flattens the live object graph into a [`Snapshot`]; the
//! reader rebuilds it against a native registry. Natives are stored by
//! name only, so the restoring runtime must register the same ones.

pub mod reader;
pub mod records;
pub mod writer;

pub use reader::{Reader, Restored};
pub use records::{FrameRecord, ObjId, ObjectRecord, ProtoRecord, Snapshot, FORMAT_VERSION};
pub use writer::Writer;

use crate::runtime::context::NativeRegistry;
use crate::runtime::errors::PersistError;
use crate::runtime::group::ThreadGroup;
use crate::vm::value::TableRef;

/// Snapshot everything reachable from `globals` and `groups`
pub fn save(
    globals: &TableRef,
    groups: &[ThreadGroup],
) -> Result<Snapshot, PersistError> {
    Writer::new().finish(globals, groups)
}

/// Rebuild the object graph of `snapshot`
pub fn restore(
    snapshot: &Snapshot,
    natives: &NativeRegistry,
) -> Result<Restored, PersistError> {
    Reader::new(snapshot, natives).read()
}
