//! Transport boundary: how envelopes leave and enter a process.
//!
//! A transport is a sender paired with a receiver. Framing, encoding and
//! authentication are the transport's business; the kernels only see
//! [`KernelCommandOrEventEnvelope`] values.

use crate::envelope::KernelCommandOrEventEnvelope;
use crate::error::TransportError;
use crate::subject::{Subject, Subscription};
use async_trait::async_trait;
use std::sync::Arc;

/// Callback registered with a [`KernelCommandAndEventReceiver`].
pub type EnvelopeObserver = Box<dyn Fn(&KernelCommandOrEventEnvelope) + Send + Sync>;

/// Outbound half of a transport.
///
/// Implementations must accept concurrent `send` calls; several proxy
/// kernels may share one sender.
#[async_trait]
pub trait KernelCommandAndEventSender: Send + Sync {
    /// Submit an envelope to the peer.
    async fn send(&self, envelope: KernelCommandOrEventEnvelope) -> Result<(), TransportError>;

    /// URI of the host on the other side, when known.
    fn remote_host_uri(&self) -> Option<&str> {
        None
    }
}

/// Inbound half of a transport.
pub trait KernelCommandAndEventReceiver: Send + Sync {
    /// Observe every envelope that arrives from the peer.
    fn subscribe(&self, observer: EnvelopeObserver) -> Subscription;
}

impl KernelCommandAndEventReceiver for Subject<KernelCommandOrEventEnvelope> {
    fn subscribe(&self, observer: EnvelopeObserver) -> Subscription {
        Subject::subscribe(self, observer)
    }
}

#[async_trait]
impl<S: KernelCommandAndEventSender + ?Sized> KernelCommandAndEventSender for Arc<S> {
    async fn send(&self, envelope: KernelCommandOrEventEnvelope) -> Result<(), TransportError> {
        (**self).send(envelope).await
    }

    fn remote_host_uri(&self) -> Option<&str> {
        (**self).remote_host_uri()
    }
}

impl<R: KernelCommandAndEventReceiver + ?Sized> KernelCommandAndEventReceiver for Arc<R> {
    fn subscribe(&self, observer: EnvelopeObserver) -> Subscription {
        (**self).subscribe(observer)
    }
}
