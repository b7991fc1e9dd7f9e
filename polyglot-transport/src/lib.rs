#![deny(missing_docs)]
//! Concrete transports for polyglot kernels.
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`connected_pair`] | Two hosts in one process, e.g. tests and embedding |
//! | [`JsonLinesTransport`] | Pipes, sockets and subprocess stdio |
//!
//! Both implement the sender and receiver traits from `polyglot-protocol`,
//! so either can back a `ProxyKernel` or a kernel host.

pub mod in_process;
pub mod json_lines;

pub use in_process::{InProcessSender, InProcessTransport, connected_pair};
pub use json_lines::{JsonLinesSender, JsonLinesTransport};
