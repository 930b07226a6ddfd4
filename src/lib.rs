//! spool: persistable cooperative script threads
//!
//! Many script threads advance cooperatively, one host tick at a time, and
//! the whole execution state, suspended call stacks included, can be saved
//! and resumed later.
//!
//! # Example
//!
//! ```rust
//! use spool::runtime::Runtime;
//! use spool::vm::{Closure, Const, Instr, Prototype, Varargs};
//!
//! let mut runtime = Runtime::new();
//! let proto = Prototype::new(
//!     "main",
//!     vec![
//!         Instr::GetGlobal { dst: 0, name: "Thread".into() },
//!         Instr::GetField { dst: 0, table: 0, key: Const::from("yield") },
//!         Instr::Call { func: 0, nargs: Some(0), nresults: Some(0) },
//!         Instr::LoadK { dst: 1, value: Const::Int(42) },
//!         Instr::Return { base: 1, count: Some(1) },
//!     ],
//! );
//! let link = runtime.new_thread(Closure::from_proto(proto), Varargs::none()).unwrap();
//!
//! runtime.update(); // runs until the yield
//! runtime.update(); // returns
//! assert!(link.is_finished());
//! ```

#![warn(rust_2018_idioms)]

pub mod demo;
pub mod runtime;
pub mod util;
pub mod vm;

pub use runtime::{Link, LinkError, PersistError, Runtime, Snapshot, ThreadGroup, TickReport};
pub use vm::{ScriptError, StructuralError, ThreadError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "spool";
