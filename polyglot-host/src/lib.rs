#![deny(missing_docs)]
//! Kernel hosts for polyglot kernels.
//!
//! A [`KernelHost`] owns a composite kernel and exposes it to peers in
//! other processes. It forwards every event the composite produces,
//! dispatches inbound commands in arrival order, and announces its kernels
//! with `KernelReady` once connected.
//!
//! Remote kernels are brought in as proxies through a [`Connector`], the
//! pairing of a transport with the remote hosts it reaches. Proxies can be
//! added explicitly with [`KernelHost::connect_proxy_kernel`], spawned as
//! child processes with [`KernelHost::connect_subprocess`], or discovered
//! from peer announcements when [`KernelHostConfig::proxy_discovery`] is on.

mod config;
mod connector;
mod error;
mod host;

pub use config::{KernelHostConfig, SubprocessConnectorConfig};
pub use connector::Connector;
pub use error::HostError;
pub use host::KernelHost;
