//! Debugger-core error type. Never unwinds across the hook boundary —
//! callers convert it to a protocol error or a safe default.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stack level {0} has no frame")]
    NoSuchFrame(u32),

    #[error("script compile error: {0}")]
    Compile(String),

    #[error("script runtime error: {0}")]
    Eval(String),

    #[error("no such local or upvalue: {0}")]
    NoSuchVariable(String),
}
