//! Snapshot writer
//!
//! Objects are numbered the first time they are reached and queued; the
//! queue is drained in a loop, so deep or cyclic graphs never recurse.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::runtime::errors::PersistError;
use crate::runtime::group::ThreadGroup;
use crate::runtime::link::{Entry, Link};
use crate::runtime::persist::records::{
    ClosureRecord, EntryRecord, FrameRecord, GroupRecord, KeyRecord, LinkRecord, ObjId, ObjectRecord, PendingRecord,
    ProtoRecord, RootRecord, Snapshot, TableRecord, ThreadRecord, UpValueRecord, ValueRecord, FORMAT_VERSION,
};
use crate::vm::closure::{Prototype, UpValue, UpValueRef};
use crate::vm::frames::{Frame, FrameStatus};
use crate::vm::thread::ThreadRef;
use crate::vm::value::{ClosureRef, Key, TableRef, Value, Varargs};

/// An object waiting to be encoded
enum Queued {
    Table(TableRef),
    Proto(Rc<Prototype>),
    Closure(ClosureRef),
    UpValue(UpValueRef),
    Thread(ThreadRef),
    Link(Link),
    Group(ThreadGroup),
}

impl Queued {
    /// Identity key: kind tag plus allocation address
    fn key(&self) -> (u8, *const ()) {
        match self {
            Queued::Table(t) => (0, Rc::as_ptr(t) as *const ()),
            Queued::Proto(p) => (1, Rc::as_ptr(p) as *const ()),
            Queued::Closure(c) => (2, Rc::as_ptr(c) as *const ()),
            Queued::UpValue(u) => (3, Rc::as_ptr(u) as *const ()),
            Queued::Thread(t) => (4, Rc::as_ptr(t) as *const ()),
            Queued::Link(l) => (5, l.as_ptr()),
            Queued::Group(g) => (6, g.as_ptr()),
        }
    }
}

/// Builds a [`Snapshot`]
#[derive(Default)]
pub struct Writer {
    ids: HashMap<(u8, *const ()), ObjId>,
    objects: Vec<Option<ObjectRecord>>,
    queue: VecDeque<(ObjId, Queued)>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number an object, queueing it the first time it is seen
    fn write_delayed(
        &mut self,
        obj: Queued,
    ) -> ObjId {
        let key = obj.key();
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = ObjId(self.objects.len() as u32);
        self.ids.insert(key, id);
        self.objects.push(None);
        self.queue.push_back((id, obj));
        id
    }

    pub fn table(
        &mut self,
        table: &TableRef,
    ) -> ObjId {
        self.write_delayed(Queued::Table(Rc::clone(table)))
    }

    pub fn closure(
        &mut self,
        closure: &ClosureRef,
    ) -> ObjId {
        self.write_delayed(Queued::Closure(Rc::clone(closure)))
    }

    pub fn thread(
        &mut self,
        thread: &ThreadRef,
    ) -> ObjId {
        self.write_delayed(Queued::Thread(Rc::clone(thread)))
    }

    pub fn link(
        &mut self,
        link: &Link,
    ) -> ObjId {
        self.write_delayed(Queued::Link(link.clone()))
    }

    pub fn group(
        &mut self,
        group: &ThreadGroup,
    ) -> ObjId {
        self.write_delayed(Queued::Group(group.clone()))
    }

    /// Encode everything reachable from `globals` and `groups`
    pub fn finish(
        mut self,
        globals: &TableRef,
        groups: &[ThreadGroup],
    ) -> Result<Snapshot, PersistError> {
        let globals = self.table(globals);
        let groups = groups.iter().map(|g| self.group(g)).collect();
        self.drain()?;

        let objects = self
            .objects
            .into_iter()
            .enumerate()
            .map(|(i, record)| record.ok_or_else(|| PersistError::Dangling(ObjId(i as u32))))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(objects = objects.len(), "snapshot written");

        Ok(Snapshot {
            format: FORMAT_VERSION,
            objects,
            root: RootRecord { globals, groups },
        })
    }

    fn drain(&mut self) -> Result<(), PersistError> {
        while let Some((id, obj)) = self.queue.pop_front() {
            let record = match obj {
                Queued::Table(table) => ObjectRecord::Table(self.encode_table(&table)),
                Queued::Proto(proto) => ObjectRecord::Proto(self.encode_proto(&proto)),
                Queued::Closure(closure) => ObjectRecord::Closure(ClosureRecord {
                    proto: self.write_delayed(Queued::Proto(Rc::clone(closure.proto()))),
                    upvalues: closure
                        .upvalues()
                        .iter()
                        .map(|up| self.write_delayed(Queued::UpValue(Rc::clone(up))))
                        .collect(),
                }),
                Queued::UpValue(up) => ObjectRecord::UpValue(self.encode_upvalue(&up)?),
                Queued::Thread(thread) => ObjectRecord::Thread(self.encode_thread(&thread)?),
                Queued::Link(link) => ObjectRecord::Link(self.encode_link(&link)),
                Queued::Group(group) => ObjectRecord::Group(GroupRecord {
                    env: self.table(&group.env()),
                    links: group.raw_links().iter().map(|l| self.link(l)).collect(),
                    suspended: group.is_suspended(),
                    destroyed: group.is_destroyed(),
                }),
            };
            trace!(%id, kind = record.kind(), "encoded object");
            self.objects[id.index()] = Some(record);
        }
        Ok(())
    }

    fn value(
        &mut self,
        value: &Value,
    ) -> ValueRecord {
        match value {
            Value::Nil => ValueRecord::Nil,
            Value::Bool(b) => ValueRecord::Bool(*b),
            Value::Int(i) => ValueRecord::Int(*i),
            Value::Float(f) => ValueRecord::Float(f.to_bits()),
            Value::Str(s) => ValueRecord::Str(s.to_string()),
            Value::Table(t) => ValueRecord::Table(self.table(t)),
            Value::Closure(c) => ValueRecord::Closure(self.closure(c)),
            Value::Native(n) => ValueRecord::Native(n.name().to_string()),
        }
    }

    fn values(
        &mut self,
        values: &[Value],
    ) -> Vec<ValueRecord> {
        values.iter().map(|v| self.value(v)).collect()
    }

    fn varargs(
        &mut self,
        values: &Varargs,
    ) -> Vec<ValueRecord> {
        self.values(values.as_slice())
    }

    fn encode_table(
        &mut self,
        table: &TableRef,
    ) -> TableRecord {
        let entries: Vec<(Key, Value)> = table
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        TableRecord {
            entries: entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Key::Bool(b) => KeyRecord::Bool(*b),
                        Key::Int(i) => KeyRecord::Int(*i),
                        Key::Str(s) => KeyRecord::Str(s.to_string()),
                    };
                    (key, self.value(v))
                })
                .collect(),
        }
    }

    fn encode_proto(
        &mut self,
        proto: &Rc<Prototype>,
    ) -> ProtoRecord {
        ProtoRecord {
            name: proto.name.clone(),
            num_params: proto.num_params,
            vararg: proto.vararg,
            max_stack: proto.max_stack,
            code: proto.code.clone(),
            upvalues: proto.upvalues.clone(),
            protos: proto
                .protos
                .iter()
                .map(|child| self.write_delayed(Queued::Proto(Rc::clone(child))))
                .collect(),
        }
    }

    /// Open upvalues stay open only while their frame is live; anything
    /// else is closed on the spot and written closed.
    fn encode_upvalue(
        &mut self,
        up: &UpValueRef,
    ) -> Result<UpValueRecord, PersistError> {
        let (thread, frame, slot) = match &*up.borrow() {
            UpValue::Closed(value) => return Ok(UpValueRecord::Closed(self.value(value))),
            UpValue::Open { thread, frame, slot } => (thread.clone(), *frame, *slot),
        };

        if let Some(owner) = thread.upgrade() {
            let state = owner.try_borrow().map_err(|_| PersistError::Busy)?;
            let live = state
                .frame(frame)
                .is_some_and(|f| f.status() != FrameStatus::Dead);
            if live {
                drop(state);
                let thread = self.thread(&owner);
                return Ok(UpValueRecord::Open { thread, frame, slot });
            }
            let value = state.frame(frame).map(|f| f.slot(slot)).unwrap_or_default();
            drop(state);
            up.borrow_mut().close(value);
        } else {
            up.borrow_mut().close(Value::Nil);
        }

        match &*up.borrow() {
            UpValue::Closed(value) => Ok(UpValueRecord::Closed(self.value(value))),
            UpValue::Open { .. } => Err(PersistError::Malformed("upvalue failed to close".into())),
        }
    }

    fn encode_frame(
        &mut self,
        frame: &Frame,
    ) -> FrameRecord {
        FrameRecord {
            status: frame.status(),
            closure: frame.closure().map(|c| self.closure(c)),
            args: self.varargs(frame.args()),
            varargs: self.varargs(frame.varargs()),
            stack: self.values(frame.stack()),
            openups: frame
                .open_upvalues()
                .iter()
                .map(|up| up.as_ref().map(|up| self.write_delayed(Queued::UpValue(Rc::clone(up)))))
                .collect(),
            v: self.varargs(frame.pending()),
            top: frame.top(),
            pc: frame.pc(),
            parent: frame.parent(),
            parent_count: frame.parent_count(),
            return_base: frame.return_base(),
            return_count: frame.return_count(),
        }
    }

    fn encode_thread(
        &mut self,
        thread: &ThreadRef,
    ) -> Result<ThreadRecord, PersistError> {
        let state = thread.try_borrow().map_err(|_| PersistError::Busy)?;
        let env = self.table(state.env());
        let frames = state.frames().iter().map(|f| self.encode_frame(f)).collect();
        let pending = state.pending().map(|call| PendingRecord {
            closure: self.closure(&call.closure),
            args: self.varargs(&call.args),
        });
        Ok(ThreadRecord {
            status: state.status(),
            env,
            frames,
            pending,
        })
    }

    fn encode_link(
        &mut self,
        link: &Link,
    ) -> LinkRecord {
        let entry = link.entry().map(|entry| match entry {
            Entry::Function { closure, args } => EntryRecord::Function {
                closure: self.closure(&closure),
                args: self.varargs(&args),
            },
            Entry::Named { name, args } => EntryRecord::Named {
                name,
                args: self.varargs(&args),
            },
        });
        LinkRecord {
            thread: self.thread(&link.thread()),
            wait: link.wait(),
            persistent: link.is_persistent(),
            inited: link.is_inited(),
            entry,
        }
    }
}
