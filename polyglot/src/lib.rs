#![deny(missing_docs)]
//! # polyglot: umbrella crate
//!
//! One import surface for routing commands and events between notebook
//! kernels. Re-exports the protocol and the kernel implementations behind
//! feature flags, plus a `prelude` for the common path.
//!
//! | Feature | Brings in |
//! |---------|-----------|
//! | `core` (default) | protocol types, scheduler, local and composite kernels |
//! | `proxy` | proxy kernels for kernels in other processes |
//! | `transport` | in-process and newline-delimited JSON transports |
//! | `host` | kernel hosts, connectors, subprocess kernels |

#[cfg(feature = "host")]
pub use polyglot_host as host;
#[cfg(feature = "core")]
pub use polyglot_kernel as kernel;
#[cfg(feature = "core")]
pub use polyglot_protocol as protocol;
#[cfg(feature = "proxy")]
pub use polyglot_proxy as proxy;
#[cfg(feature = "core")]
pub use polyglot_scheduler as scheduler;
#[cfg(feature = "transport")]
pub use polyglot_transport as transport;

/// Common imports for building and wiring kernels.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use polyglot_protocol::{
        CommandPayload, KernelCommand, KernelCommandAndEventReceiver, KernelCommandAndEventSender,
        KernelCommandEnvelope, KernelCommandOrEventEnvelope, KernelEvent, KernelEventEnvelope,
        KernelInfo, RoutingSlip, Subject, Subscription, Token,
    };

    #[cfg(feature = "core")]
    pub use polyglot_protocol::command::SubmitCode;

    #[cfg(feature = "core")]
    pub use polyglot_kernel::{
        CommandHandler, CompositeKernel, Kernel, KernelCommandResult, KernelError,
        KernelInvocation, LocalKernel, handler_fn, submit_command_and_get_result,
    };

    #[cfg(feature = "proxy")]
    pub use polyglot_proxy::ProxyKernel;

    #[cfg(feature = "transport")]
    pub use polyglot_transport::{JsonLinesTransport, connected_pair};

    #[cfg(feature = "host")]
    pub use polyglot_host::{Connector, HostError, KernelHost, KernelHostConfig};
}
