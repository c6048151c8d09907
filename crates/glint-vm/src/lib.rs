//! The boundary between the debugger core and a host scripting VM.
//!
//! Everything in [`contract`] is a trait a real embedder implements against
//! its own interpreter. [`demo`] is a tiny reference VM used by the test
//! suite and the CLI's demo mode — it is not meant to be a language.

#![forbid(unsafe_code)]

pub mod contract;
pub mod demo;

pub use contract::{
    Activation, ActivationKind, ChunkHandle, HookEvent, HookSink, VmContract, VmError, VmValue,
};
pub use demo::DemoVm;
