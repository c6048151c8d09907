//! The debugger core: value marshalling, frame inspection, breakpoints,
//! and the execution controller that turns VM hook events into pause
//! decisions. VM-agnostic apart from the [`glint_vm::VmContract`] trait
//! object it is handed.

#![forbid(unsafe_code)]

pub mod breakpoint;
pub mod controller;
pub mod error;
pub mod frame;
pub mod state;
pub mod value;

pub use breakpoint::{BreakpointDescriptor, BreakpointId, BreakpointTable};
pub use controller::{ExecutionController, PausePump, TickPump};
pub use error::Error;
pub use frame::{EvalOptions, FrameInspector};
pub use state::{DebuggerState, PauseReason, StepMode};
