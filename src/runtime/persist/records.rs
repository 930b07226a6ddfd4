//! Snapshot records
//!
//! A snapshot is a flat object table plus a root. Shared objects (tables,
//! prototypes, closures, upvalues, threads, links, groups) are written once and
//! referenced by [`ObjId`], which is how cycles survive the round trip.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::runtime::errors::PersistError;
use crate::util::config::SnapshotFormat;
use crate::vm::closure::{UpvalDesc, VarargMode};
use crate::vm::interpreter::Instr;
use crate::vm::frames::{FrameId, FrameStatus};
use crate::vm::thread::ThreadStatus;

/// Snapshot layout version
pub const FORMAT_VERSION: u32 = 1;

/// Index into [`Snapshot::objects`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId(pub u32);

impl ObjId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueRecord {
    Nil,
    Bool(bool),
    Int(i64),
    /// IEEE 754 bit pattern; JSON has no NaN or infinities
    Float(u64),
    Str(String),
    Table(ObjId),
    Closure(ObjId),
    /// Native function by registered name
    Native(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyRecord {
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub entries: Vec<(KeyRecord, ValueRecord)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpValueRecord {
    Open { thread: ObjId, frame: FrameId, slot: usize },
    Closed(ValueRecord),
}

/// Function prototype; nested prototypes are objects of their own so a
/// child shared by several parents keeps its identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoRecord {
    pub name: String,
    pub num_params: usize,
    pub vararg: VarargMode,
    pub max_stack: usize,
    pub code: Vec<Instr>,
    pub upvalues: Vec<UpvalDesc>,
    pub protos: Vec<ObjId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureRecord {
    pub proto: ObjId,
    pub upvalues: Vec<ObjId>,
}

/// One call frame
///
/// Written as a fixed tuple in field order; adding a field changes the
/// layout and needs a new [`FORMAT_VERSION`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub status: FrameStatus,
    pub closure: Option<ObjId>,
    pub args: Vec<ValueRecord>,
    pub varargs: Vec<ValueRecord>,
    pub stack: Vec<ValueRecord>,
    pub openups: Vec<Option<ObjId>>,
    pub v: Vec<ValueRecord>,
    pub top: usize,
    pub pc: usize,
    pub parent: Option<FrameId>,
    pub parent_count: usize,
    pub return_base: usize,
    pub return_count: i32,
}

const FRAME_FIELDS: usize = 13;

impl Serialize for FrameRecord {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(FRAME_FIELDS)?;
        tuple.serialize_element(&self.status)?;
        tuple.serialize_element(&self.closure)?;
        tuple.serialize_element(&self.args)?;
        tuple.serialize_element(&self.varargs)?;
        tuple.serialize_element(&self.stack)?;
        tuple.serialize_element(&self.openups)?;
        tuple.serialize_element(&self.v)?;
        tuple.serialize_element(&self.top)?;
        tuple.serialize_element(&self.pc)?;
        tuple.serialize_element(&self.parent)?;
        tuple.serialize_element(&self.parent_count)?;
        tuple.serialize_element(&self.return_base)?;
        tuple.serialize_element(&self.return_count)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for FrameRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_tuple(FRAME_FIELDS, FrameRecordVisitor)
    }
}

struct FrameRecordVisitor;

impl<'de> Visitor<'de> for FrameRecordVisitor {
    type Value = FrameRecord;

    fn expecting(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "a frame tuple of {} fields", FRAME_FIELDS)
    }

    fn visit_seq<A: SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> Result<FrameRecord, A::Error> {
        macro_rules! field {
            ($index:expr) => {
                seq.next_element()?
                    .ok_or_else(|| de::Error::invalid_length($index, &self))?
            };
        }

        Ok(FrameRecord {
            status: field!(0),
            closure: field!(1),
            args: field!(2),
            varargs: field!(3),
            stack: field!(4),
            openups: field!(5),
            v: field!(6),
            top: field!(7),
            pc: field!(8),
            parent: field!(9),
            parent_count: field!(10),
            return_base: field!(11),
            return_count: field!(12),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub closure: ObjId,
    pub args: Vec<ValueRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub status: ThreadStatus,
    pub env: ObjId,
    pub frames: Vec<FrameRecord>,
    pub pending: Option<PendingRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryRecord {
    Function { closure: ObjId, args: Vec<ValueRecord> },
    Named { name: String, args: Vec<ValueRecord> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub thread: ObjId,
    pub wait: i32,
    pub persistent: bool,
    pub inited: bool,
    pub entry: Option<EntryRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub env: ObjId,
    pub links: Vec<ObjId>,
    pub suspended: bool,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectRecord {
    Table(TableRecord),
    Proto(ProtoRecord),
    Closure(ClosureRecord),
    UpValue(UpValueRecord),
    Thread(ThreadRecord),
    Link(LinkRecord),
    Group(GroupRecord),
}

impl ObjectRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            ObjectRecord::Table(_) => "table",
            ObjectRecord::Proto(_) => "prototype",
            ObjectRecord::Closure(_) => "closure",
            ObjectRecord::UpValue(_) => "upvalue",
            ObjectRecord::Thread(_) => "thread",
            ObjectRecord::Link(_) => "link",
            ObjectRecord::Group(_) => "thread group",
        }
    }
}

/// Entry points of the object graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRecord {
    pub globals: ObjId,
    /// The first group is the default group
    pub groups: Vec<ObjId>,
}

/// Saved runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub objects: Vec<ObjectRecord>,
    pub root: RootRecord,
}

impl Snapshot {
    pub fn to_ron(&self) -> Result<String, PersistError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    pub fn from_ron(text: &str) -> Result<Self, PersistError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(
        &self,
        format: SnapshotFormat,
    ) -> Result<String, PersistError> {
        match format {
            SnapshotFormat::Ron => self.to_ron(),
            SnapshotFormat::Json => self.to_json(),
        }
    }

    pub fn decode(
        format: SnapshotFormat,
        text: &str,
    ) -> Result<Self, PersistError> {
        match format {
            SnapshotFormat::Ron => Self::from_ron(text),
            SnapshotFormat::Json => Self::from_json(text),
        }
    }
}
