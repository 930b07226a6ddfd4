//! Prototypes, closures and upvalues

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::vm::frames::FrameId;
use crate::vm::interpreter::Instr;
use crate::vm::thread::Thread;
use crate::vm::value::Value;

/// Default stack size for prototypes that don't declare one
pub const DEFAULT_MAX_STACK: usize = 16;

/// How a function receives arguments beyond its declared parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VarargMode {
    /// Extra arguments are dropped
    #[default]
    None,
    /// Extra arguments are reachable through `...`
    Ellipsis,
    /// Classic capture: extra arguments are also boxed into an `arg` table
    /// stored in the slot right after the parameters
    Classic,
}

/// Where a closure finds one of its upvalues when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpvalDesc {
    /// Capture a stack slot of the enclosing frame (else: one of its upvalues)
    pub in_stack: bool,
    pub index: usize,
}

/// Function prototype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub name: String,
    pub num_params: usize,
    pub vararg: VarargMode,
    pub max_stack: usize,
    pub code: Vec<Instr>,
    pub upvalues: Vec<UpvalDesc>,
    pub protos: Vec<Rc<Prototype>>,
}

impl Prototype {
    pub fn new(
        name: &str,
        code: Vec<Instr>,
    ) -> Self {
        Self {
            name: name.to_string(),
            num_params: 0,
            vararg: VarargMode::None,
            max_stack: DEFAULT_MAX_STACK,
            code,
            upvalues: Vec::new(),
            protos: Vec::new(),
        }
    }

    pub fn with_params(
        mut self,
        num_params: usize,
    ) -> Self {
        self.num_params = num_params;
        self
    }

    pub fn with_vararg(
        mut self,
        mode: VarargMode,
    ) -> Self {
        self.vararg = mode;
        self
    }

    pub fn with_max_stack(
        mut self,
        max_stack: usize,
    ) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn with_upvalue(
        mut self,
        in_stack: bool,
        index: usize,
    ) -> Self {
        self.upvalues.push(UpvalDesc { in_stack, index });
        self
    }

    pub fn with_child(
        mut self,
        proto: Prototype,
    ) -> Self {
        self.protos.push(Rc::new(proto));
        self
    }

    /// Stack slots a frame for this prototype needs
    pub fn frame_size(&self) -> usize {
        let extra = usize::from(self.vararg == VarargMode::Classic);
        self.max_stack.max(self.num_params + extra)
    }
}

/// A prototype bound to its captured upvalues
pub struct Closure {
    proto: Rc<Prototype>,
    upvalues: Box<[UpValueRef]>,
}

impl Closure {
    pub fn new(
        proto: Rc<Prototype>,
        upvalues: Vec<UpValueRef>,
    ) -> Self {
        Self {
            proto,
            upvalues: upvalues.into_boxed_slice(),
        }
    }

    /// A closure without upvalues, for top-level chunks
    pub fn from_proto(proto: Prototype) -> Rc<Closure> {
        Rc::new(Self::new(Rc::new(proto), Vec::new()))
    }

    pub fn proto(&self) -> &Rc<Prototype> {
        &self.proto
    }

    pub fn upvalues(&self) -> &[UpValueRef] {
        &self.upvalues
    }

    pub fn upvalue(
        &self,
        index: usize,
    ) -> Option<&UpValueRef> {
        self.upvalues.get(index)
    }
}

impl fmt::Debug for Closure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Closure")
            .field("proto", &self.proto.name)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

/// Shared upvalue cell
pub type UpValueRef = Rc<RefCell<UpValue>>;

/// Variable captured by one or more closures
///
/// While open, the variable still lives in a stack slot of its frame;
/// closing copies the slot value into the cell so the frame's array can be
/// recycled.
#[derive(Debug)]
pub enum UpValue {
    Open {
        thread: Weak<RefCell<Thread>>,
        frame: FrameId,
        slot: usize,
    },
    Closed(Value),
}

impl UpValue {
    pub fn is_open(&self) -> bool {
        matches!(self, UpValue::Open { .. })
    }

    /// Detach from the frame, keeping `value` as the final contents
    pub fn close(
        &mut self,
        value: Value,
    ) {
        *self = UpValue::Closed(value);
    }
}
