//! Snapshot reader
//!
//! Decoding runs in three steps:
//!
//! 1. create an empty placeholder for every object, so any record may refer
//!    to any other regardless of order (prototypes are built right after,
//!    children first, then closures from their prototype and upvalue
//!    placeholders);
//! 2. fill in every placeholder's contents;
//! 3. run the references registered with `read_delayed`, which need the
//!    whole graph in place (link → thread, group → links).

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::runtime::context::NativeRegistry;
use crate::runtime::errors::PersistError;
use crate::runtime::group::ThreadGroup;
use crate::runtime::link::{Entry, Link};
use crate::runtime::persist::records::{
    EntryRecord, FrameRecord, KeyRecord, ObjId, ObjectRecord, Snapshot, UpValueRecord, ValueRecord, FORMAT_VERSION,
};
use crate::vm::closure::{Closure, Prototype, UpValue, UpValueRef};
use crate::vm::frames::Frame;
use crate::vm::thread::{PendingCall, Thread, ThreadRef};
use crate::vm::value::{ClosureRef, Key, Table, TableRef, Value, Varargs};

enum Slot {
    Table(TableRef),
    /// Prototypes and closures are filled right after the other placeholders
    Proto(Option<Rc<Prototype>>),
    Closure(Option<ClosureRef>),
    UpValue(UpValueRef),
    Thread(ThreadRef),
    Link(Link),
    Group(ThreadGroup),
}

type Patch = Box<dyn FnOnce(&Reader<'_>) -> Result<(), PersistError>>;

/// Restored object graph
#[derive(Debug)]
pub struct Restored {
    pub globals: TableRef,
    pub groups: Vec<ThreadGroup>,
}

/// Decodes a [`Snapshot`] into live objects
pub struct Reader<'a> {
    snapshot: &'a Snapshot,
    natives: &'a NativeRegistry,
    slots: Vec<Slot>,
    patches: Vec<Patch>,
}

impl<'a> Reader<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        natives: &'a NativeRegistry,
    ) -> Self {
        Self {
            snapshot,
            natives,
            slots: Vec::with_capacity(snapshot.objects.len()),
            patches: Vec::new(),
        }
    }

    /// Rebuild the graph and return its roots
    pub fn read(mut self) -> Result<Restored, PersistError> {
        if self.snapshot.format != FORMAT_VERSION {
            return Err(PersistError::Version {
                found: self.snapshot.format,
                expected: FORMAT_VERSION,
            });
        }

        let snapshot = self.snapshot;
        self.create_placeholders();
        self.build_protos()?;
        self.build_closures()?;
        for (index, record) in snapshot.objects.iter().enumerate() {
            self.fill(ObjId(index as u32), record)?;
        }

        let root = &snapshot.root;
        let globals = self.table(root.globals)?;
        let groups = root
            .groups
            .iter()
            .map(|id| self.group(*id))
            .collect::<Result<Vec<_>, _>>()?;

        let patches = std::mem::take(&mut self.patches);
        debug!(objects = self.slots.len(), patches = patches.len(), "resolving delayed references");
        for patch in patches {
            patch(&self)?;
        }

        Ok(Restored { globals, groups })
    }

    /// Defer `patch` until every object has been decoded
    fn read_delayed(
        &mut self,
        patch: impl FnOnce(&Reader<'_>) -> Result<(), PersistError> + 'static,
    ) {
        self.patches.push(Box::new(patch));
    }

    fn create_placeholders(&mut self) {
        let snapshot = self.snapshot;
        for record in &snapshot.objects {
            let slot = match record {
                ObjectRecord::Table(_) => Slot::Table(Rc::new(RefCell::new(Table::new()))),
                ObjectRecord::Proto(_) => Slot::Proto(None),
                ObjectRecord::Closure(_) => Slot::Closure(None),
                ObjectRecord::UpValue(_) => Slot::UpValue(Rc::new(RefCell::new(UpValue::Closed(Value::Nil)))),
                ObjectRecord::Thread(_) => Slot::Thread(Thread::new_ref(Rc::new(RefCell::new(Table::new())))),
                ObjectRecord::Link(record) => Slot::Link(Link::from_parts(
                    // Replaced by the real thread once everything is decoded
                    Thread::new_ref(Rc::new(RefCell::new(Table::new()))),
                    record.wait,
                    record.persistent,
                    record.inited,
                    None,
                )),
                ObjectRecord::Group(record) => Slot::Group(ThreadGroup::from_parts(
                    Rc::new(RefCell::new(Table::new())),
                    record.suspended,
                    record.destroyed,
                )),
            };
            self.slots.push(slot);
        }
    }

    /// Prototypes are immutable once shared, so each one is built after all
    /// of its children. The walk uses an explicit stack; a prototype reached
    /// again while its own children are pending nests itself.
    fn build_protos(&mut self) -> Result<(), PersistError> {
        let snapshot = self.snapshot;
        let mut pending = vec![false; snapshot.objects.len()];
        for (index, record) in snapshot.objects.iter().enumerate() {
            if !matches!(record, ObjectRecord::Proto(_)) {
                continue;
            }
            let mut stack = vec![(ObjId(index as u32), false)];
            while let Some((id, children_done)) = stack.pop() {
                let record = match snapshot.objects.get(id.index()) {
                    Some(ObjectRecord::Proto(record)) => record,
                    Some(_) => return Err(Self::mismatch(id, "prototype")),
                    None => return Err(PersistError::Dangling(id)),
                };
                if children_done {
                    let protos = record
                        .protos
                        .iter()
                        .map(|child| self.proto(*child))
                        .collect::<Result<Vec<_>, _>>()?;
                    let proto = Prototype {
                        name: record.name.clone(),
                        num_params: record.num_params,
                        vararg: record.vararg,
                        max_stack: record.max_stack,
                        code: record.code.clone(),
                        upvalues: record.upvalues.clone(),
                        protos,
                    };
                    self.slots[id.index()] = Slot::Proto(Some(Rc::new(proto)));
                    pending[id.index()] = false;
                    continue;
                }
                if matches!(self.slots[id.index()], Slot::Proto(Some(_))) {
                    continue;
                }
                if pending[id.index()] {
                    return Err(PersistError::Malformed(format!("prototype {} contains itself", id)));
                }
                pending[id.index()] = true;
                stack.push((id, true));
                stack.extend(record.protos.iter().map(|child| (*child, false)));
            }
        }
        Ok(())
    }

    fn build_closures(&mut self) -> Result<(), PersistError> {
        let snapshot = self.snapshot;
        for (index, record) in snapshot.objects.iter().enumerate() {
            let ObjectRecord::Closure(record) = record else {
                continue;
            };
            let proto = self.proto(record.proto)?;
            let upvalues = record
                .upvalues
                .iter()
                .map(|id| self.upvalue(*id))
                .collect::<Result<Vec<_>, _>>()?;
            self.slots[index] = Slot::Closure(Some(Rc::new(Closure::new(proto, upvalues))));
        }
        Ok(())
    }

    fn fill(
        &mut self,
        id: ObjId,
        record: &ObjectRecord,
    ) -> Result<(), PersistError> {
        match record {
            ObjectRecord::Table(record) => {
                let table = self.table(id)?;
                let mut contents = Table::new();
                for (key, value) in &record.entries {
                    let key = match key {
                        KeyRecord::Bool(b) => Key::Bool(*b),
                        KeyRecord::Int(i) => Key::Int(*i),
                        KeyRecord::Str(s) => Key::str(s),
                    };
                    contents.set(key, self.value(value)?);
                }
                *table.borrow_mut() = contents;
            }
            ObjectRecord::Proto(_) | ObjectRecord::Closure(_) => {}
            ObjectRecord::UpValue(record) => {
                let up = self.upvalue(id)?;
                let contents = match record {
                    UpValueRecord::Closed(value) => UpValue::Closed(self.value(value)?),
                    UpValueRecord::Open { thread, frame, slot } => UpValue::Open {
                        thread: Rc::downgrade(&self.thread(*thread)?),
                        frame: *frame,
                        slot: *slot,
                    },
                };
                *up.borrow_mut() = contents;
            }
            ObjectRecord::Thread(record) => {
                let thread = self.thread(id)?;
                let env = self.table(record.env)?;
                let frames = record
                    .frames
                    .iter()
                    .map(|f| self.frame(f))
                    .collect::<Result<Vec<_>, _>>()?;
                let pending = match &record.pending {
                    Some(call) => Some(PendingCall {
                        closure: self.closure(call.closure)?,
                        args: self.varargs(&call.args)?,
                    }),
                    None => None,
                };
                thread.borrow_mut().restore(record.status, env, frames, pending);
            }
            ObjectRecord::Link(record) => {
                let link = self.link(id)?;
                let entry = match &record.entry {
                    Some(EntryRecord::Function { closure, args }) => Some(Entry::Function {
                        closure: self.closure(*closure)?,
                        args: self.varargs(args)?,
                    }),
                    Some(EntryRecord::Named { name, args }) => Some(Entry::Named {
                        name: name.clone(),
                        args: self.varargs(args)?,
                    }),
                    None => None,
                };
                link.set_entry(entry);

                let thread_id = record.thread;
                self.read_delayed(move |reader| {
                    link.set_thread(reader.thread(thread_id)?);
                    Ok(())
                });
            }
            ObjectRecord::Group(record) => {
                let group = self.group(id)?;
                group.set_env(self.table(record.env)?);

                let link_ids = record.links.clone();
                self.read_delayed(move |reader| {
                    let links = link_ids
                        .iter()
                        .map(|id| reader.link(*id))
                        .collect::<Result<Vec<_>, _>>()?;
                    group.set_links(links);
                    Ok(())
                });
            }
        }
        Ok(())
    }

    fn frame(
        &self,
        record: &FrameRecord,
    ) -> Result<Frame, PersistError> {
        Ok(Frame {
            status: record.status,
            closure: record.closure.map(|id| self.closure(id)).transpose()?,
            args: self.varargs(&record.args)?,
            varargs: self.varargs(&record.varargs)?,
            stack: record
                .stack
                .iter()
                .map(|v| self.value(v))
                .collect::<Result<Vec<_>, _>>()?,
            openups: record
                .openups
                .iter()
                .map(|id| id.map(|id| self.upvalue(id)).transpose())
                .collect::<Result<Vec<_>, _>>()?,
            v: self.varargs(&record.v)?,
            top: record.top,
            pc: record.pc,
            parent: record.parent,
            parent_count: record.parent_count,
            return_base: record.return_base,
            return_count: record.return_count,
        })
    }

    fn value(
        &self,
        record: &ValueRecord,
    ) -> Result<Value, PersistError> {
        Ok(match record {
            ValueRecord::Nil => Value::Nil,
            ValueRecord::Bool(b) => Value::Bool(*b),
            ValueRecord::Int(i) => Value::Int(*i),
            ValueRecord::Float(bits) => Value::Float(f64::from_bits(*bits)),
            ValueRecord::Str(s) => Value::str(s),
            ValueRecord::Table(id) => Value::Table(self.table(*id)?),
            ValueRecord::Closure(id) => Value::Closure(self.closure(*id)?),
            ValueRecord::Native(name) => Value::Native(
                self.natives
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PersistError::UnknownNative(name.clone()))?,
            ),
        })
    }

    fn varargs(
        &self,
        records: &[ValueRecord],
    ) -> Result<Varargs, PersistError> {
        records.iter().map(|v| self.value(v)).collect()
    }

    fn slot(
        &self,
        id: ObjId,
    ) -> Result<&Slot, PersistError> {
        self.slots.get(id.index()).ok_or(PersistError::Dangling(id))
    }

    fn mismatch(
        id: ObjId,
        expected: &'static str,
    ) -> PersistError {
        PersistError::KindMismatch { id, expected }
    }

    fn table(
        &self,
        id: ObjId,
    ) -> Result<TableRef, PersistError> {
        match self.slot(id)? {
            Slot::Table(t) => Ok(Rc::clone(t)),
            _ => Err(Self::mismatch(id, "table")),
        }
    }

    fn proto(
        &self,
        id: ObjId,
    ) -> Result<Rc<Prototype>, PersistError> {
        match self.slot(id)? {
            Slot::Proto(Some(p)) => Ok(Rc::clone(p)),
            _ => Err(Self::mismatch(id, "prototype")),
        }
    }

    fn closure(
        &self,
        id: ObjId,
    ) -> Result<ClosureRef, PersistError> {
        match self.slot(id)? {
            Slot::Closure(Some(c)) => Ok(Rc::clone(c)),
            _ => Err(Self::mismatch(id, "closure")),
        }
    }

    fn upvalue(
        &self,
        id: ObjId,
    ) -> Result<UpValueRef, PersistError> {
        match self.slot(id)? {
            Slot::UpValue(u) => Ok(Rc::clone(u)),
            _ => Err(Self::mismatch(id, "upvalue")),
        }
    }

    fn thread(
        &self,
        id: ObjId,
    ) -> Result<ThreadRef, PersistError> {
        match self.slot(id)? {
            Slot::Thread(t) => Ok(Rc::clone(t)),
            _ => Err(Self::mismatch(id, "thread")),
        }
    }

    fn link(
        &self,
        id: ObjId,
    ) -> Result<Link, PersistError> {
        match self.slot(id)? {
            Slot::Link(l) => Ok(l.clone()),
            _ => Err(Self::mismatch(id, "link")),
        }
    }

    fn group(
        &self,
        id: ObjId,
    ) -> Result<ThreadGroup, PersistError> {
        match self.slot(id)? {
            Slot::Group(g) => Ok(g.clone()),
            _ => Err(Self::mismatch(id, "thread group")),
        }
    }
}
