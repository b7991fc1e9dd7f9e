//! Error types for the protocol layer.

use thiserror::Error;

/// Envelope (de)serialization and validation errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The `commandType` tag is neither built in nor registered.
    #[error("unknown command type: {0}")]
    UnknownCommandType(String),

    /// The `eventType` tag is neither built in nor registered.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Neither `commandType` nor `eventType` was present.
    #[error("envelope has no commandType or eventType")]
    MissingDiscriminator,

    /// A required field was absent or had the wrong shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// A URI could not be parsed.
    #[error("invalid uri {uri}: {reason}")]
    InvalidUri {
        /// The offending input.
        uri: String,
        /// Parser message.
        reason: String,
    },

    /// The routing slip carried on the wire is invalid.
    #[error("invalid routing slip: {0}")]
    RoutingSlip(#[from] RoutingSlipError),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Routing slip stamping errors.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingSlipError {
    /// The URI was already stamped.
    #[error("the uri {uri} is already in the routing slip [{slip}]")]
    AlreadyStamped {
        /// Normalized URI that was being stamped.
        uri: String,
        /// Slip contents at the time of the failure.
        slip: String,
    },

    /// Completion was stamped without a matching arrival.
    #[error("the uri {uri} is not in the routing slip [{slip}]")]
    NotArrived {
        /// The arrival entry that was expected.
        uri: String,
        /// Slip contents at the time of the failure.
        slip: String,
    },

    /// A continuation would have introduced a duplicate entry.
    #[error("the uri {uri} is already in the routing slip [{slip}], cannot continue with routing slip [{other}]")]
    ContinuationConflict {
        /// The duplicate entry.
        uri: String,
        /// Slip being extended.
        slip: String,
        /// Slip that was being appended.
        other: String,
    },

    /// An entry was not a valid absolute URI.
    #[error("invalid uri {0}")]
    InvalidUri(String),
}

/// Transport errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer went away or the transport was shut down.
    #[error("transport closed")]
    Closed,

    /// An envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
