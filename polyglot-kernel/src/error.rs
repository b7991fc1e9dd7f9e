//! Kernel errors.

use polyglot_protocol::{ProtocolError, RoutingSlipError, TransportError};
use polyglot_scheduler::SchedulerError;
use thiserror::Error;

/// Errors raised while routing or handling a command.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KernelError {
    /// No kernel answers to the requested name.
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// The kernel has no handler for the command type.
    #[error("No handler found for command type {0}")]
    NoHandler(String),

    /// A kernel with this name or alias is already registered.
    #[error("kernel with name or alias {0} already exists")]
    DuplicateKernelName(String),

    /// A command handler reported a failure.
    #[error("{0}")]
    HandlerFailed(String),

    /// The command ended with `CommandFailed`.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The kernel was dropped while a command was routed to it.
    #[error("kernel dropped")]
    KernelDropped,

    /// A routing slip could not be stamped.
    #[error(transparent)]
    RoutingSlip(#[from] RoutingSlipError),

    /// An envelope could not be built or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The scheduler rejected the operation.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl KernelError {
    /// A handler failure with a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerFailed(message.into())
    }
}
