//! Host errors.

use polyglot_kernel::KernelError;
use polyglot_protocol::{ProtocolError, RoutingSlipError, TransportError};
use thiserror::Error;

/// Errors raised while wiring or running a kernel host.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HostError {
    /// No connector can reach the host of the given kernel URI.
    #[error("Cannot find connector to reach {0}")]
    NoConnector(String),

    /// A connector for one of these remote hosts is already registered.
    #[error("a connector already reaches {0}")]
    ConnectorConflict(String),

    /// `connect` was called twice.
    #[error("host is already connected")]
    AlreadyConnected,

    /// The configuration could not be parsed.
    #[error("invalid host configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A kernel process could not be started or talked to.
    #[error("kernel process error: {0}")]
    Process(#[from] std::io::Error),

    /// Kernel wiring failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Sending to a peer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A URI or envelope was invalid.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A routing slip rejected a stamp.
    #[error(transparent)]
    RoutingSlip(#[from] RoutingSlipError),
}
