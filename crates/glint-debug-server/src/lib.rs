//! Wire protocol, command dispatch, server loop, and transport
//! implementations sitting on top of the VM-agnostic debugger core.

#![forbid(unsafe_code)]

pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod transport;

pub use server::{build_controller, teardown, Transport, PROTOCOL_VERSION};
pub use transport::{StdioTransport, TcpTransport};
