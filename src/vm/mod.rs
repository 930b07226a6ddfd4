//! Virtual machine core
//!
//! Frames, the frame pool, threads and the dispatch seam. Everything here is
//! single-threaded: handles are `Rc`-based and the pool belongs to one
//! runtime.

pub use closure::{Closure, Prototype, UpValue, UpValueRef, UpvalDesc, VarargMode};
pub use dispatch::{Control, Dispatch, Execution, NativeCall, NativeResult};
pub use errors::{ScriptError, ScriptResult, StructuralError, ThreadError, ThreadResult};
pub use frames::{Frame, FrameId, FrameStatus, MULTI_RETURN};
pub use interpreter::{ArithOp, Const, Instr, Interpreter};
pub use pool::{FramePool, PoolStats};
pub use thread::{PendingCall, Thread, ThreadRef, ThreadStatus};
pub use value::{ClosureRef, Key, NativeFunction, Table, TableRef, Value, Varargs};

pub mod closure;
pub mod dispatch;
pub mod errors;
pub mod frames;
pub mod interpreter;
pub mod pool;
pub mod thread;
pub mod value;

#[cfg(test)]
mod tests;
