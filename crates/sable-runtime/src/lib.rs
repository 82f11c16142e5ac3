//! # Sable Runtime
//!
//! Dynamic value model, runtime helper operations, and the bytecode
//! execution engine for Sable.
//!
//! Execution is single-threaded and cooperative: only `await`,
//! generator suspension, and promise continuations transfer control.
//! Heap values are `Rc`-shared; the microtask queue preserves promise
//! continuation ordering.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod console;
pub mod error;
pub mod globals;
pub mod host;
pub mod intrinsics;
pub mod iterator;
pub mod machine;
pub mod modules;
pub mod number;
pub mod ops;
pub mod promise;
pub mod value;
pub mod vm;

pub use console::{CaptureConsole, ConsoleSink, StdConsole};
pub use error::{VmError, VmResult};
pub use machine::{Machine, MachineKind};
pub use modules::{ExportTable, FsResolver, ModuleCtx, ModuleResolver};
pub use promise::{PromiseData, PromiseState};
pub use value::{UpvalueCell, Value};
pub use vm::{ModuleLoader, Vm};
