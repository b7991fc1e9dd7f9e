//! # polyglot-protocol: wire types and routing primitives for polyglot kernels
//!
//! This crate defines everything two kernel hosts must agree on to route
//! commands and events between each other, and nothing about how kernels
//! execute code.
//!
//! ## The Pieces
//!
//! | Piece | Types | What it does |
//! |-------|-------|-------------|
//! | Commands | [`KernelCommand`], [`CommandPayload`] | Requests addressed to a kernel |
//! | Events | [`KernelEvent`] | Notifications raised while handling a command |
//! | Envelopes | [`KernelCommandEnvelope`], [`KernelEventEnvelope`] | Token, id and routing slip around a command or event |
//! | Registry | [`EnvelopeRegistry`] | `commandType`/`eventType` tag to payload shape |
//! | Routing slip | [`RoutingSlip`] | Provenance and loop detection |
//! | Kernel info | [`KernelInfo`] | Discovery metadata |
//! | Subjects | [`Subject`], [`Subscription`] | Synchronous multicast with RAII unsubscribe |
//! | Transport | [`KernelCommandAndEventSender`], [`KernelCommandAndEventReceiver`] | The boundary to another process |
//!
//! ## Wire Shape
//!
//! ```json
//! { "token": "…", "id": "…", "commandType": "SubmitCode",
//!   "command": { "code": "1+1", "targetKernelName": "csharp" },
//!   "routingSlip": ["kernel://local/?tag=arrived"] }
//! ```
//!
//! Event envelopes carry `eventType`, `event`, the causing `command`
//! envelope (or `null`) and their own `routingSlip`.
//!
//! ## Extensibility
//!
//! Command and event payloads are closed enums at the serialization
//! boundary with an `Extension` variant for kinds registered at runtime.
//! Routing code only ever looks at the type tag.

#![deny(missing_docs)]

pub mod command;
pub mod envelope;
pub mod error;
pub mod event;
pub mod id;
pub mod kernel_info;
pub mod registry;
pub mod routing_slip;
pub mod subject;
pub mod transport;
pub mod uri;
pub mod value;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use command::{CommandPayload, ExtensionPayload, KernelCommand};
pub use envelope::{KernelCommandEnvelope, KernelCommandOrEventEnvelope, KernelEventEnvelope};
pub use error::{ProtocolError, RoutingSlipError, TransportError};
pub use event::{ExtensionEvent, KernelEvent};
pub use id::{CommandId, Token};
pub use kernel_info::{KernelCommandInfo, KernelDirectiveInfo, KernelInfo};
pub use registry::EnvelopeRegistry;
pub use routing_slip::RoutingSlip;
pub use subject::{Subject, Subscription};
pub use transport::{EnvelopeObserver, KernelCommandAndEventReceiver, KernelCommandAndEventSender};
pub use value::{FormattedValue, LinePosition, LinePositionSpan};
