//! Two transports wired back to back inside one process.
//!
//! Every envelope is serialized and parsed again on its way across, so
//! each side only ever sees its own wire-faithful copy.

use async_trait::async_trait;
use polyglot_protocol::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandOrEventEnvelope,
    Subject, TransportError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One end of an in-process connection.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    sender: Arc<InProcessSender>,
    inbound: Subject<KernelCommandOrEventEnvelope>,
}

impl InProcessTransport {
    /// Outbound half, ready to hand to a host or proxy kernel.
    pub fn sender(&self) -> Arc<dyn KernelCommandAndEventSender> {
        Arc::clone(&self.sender) as Arc<dyn KernelCommandAndEventSender>
    }

    /// Inbound half.
    pub fn receiver(&self) -> Arc<dyn KernelCommandAndEventReceiver> {
        Arc::new(self.inbound.clone())
    }

    /// Every envelope the peer sends arrives here.
    pub fn inbound(&self) -> &Subject<KernelCommandOrEventEnvelope> {
        &self.inbound
    }

    /// Stop delivering in both directions.
    pub fn close(&self) {
        self.sender.closed.store(true, Ordering::Release);
    }
}

/// Sending half of an [`InProcessTransport`].
#[derive(Debug)]
pub struct InProcessSender {
    peer: Subject<KernelCommandOrEventEnvelope>,
    remote_host_uri: Option<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl KernelCommandAndEventSender for InProcessSender {
    async fn send(&self, envelope: KernelCommandOrEventEnvelope) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let json = envelope.to_json()?;
        let copy = KernelCommandOrEventEnvelope::from_json(&json)?;
        self.peer.publish(&copy);
        Ok(())
    }

    fn remote_host_uri(&self) -> Option<&str> {
        self.remote_host_uri.as_deref()
    }
}

/// Connect two transports. `left_host_uri` names the host behind the
/// left end and is what the right end reports as its remote host, and
/// the other way around.
pub fn connected_pair(
    left_host_uri: Option<&str>,
    right_host_uri: Option<&str>,
) -> (InProcessTransport, InProcessTransport) {
    let closed = Arc::new(AtomicBool::new(false));
    let left_inbound = Subject::new();
    let right_inbound = Subject::new();

    let left = InProcessTransport {
        sender: Arc::new(InProcessSender {
            peer: right_inbound.clone(),
            remote_host_uri: right_host_uri.map(str::to_owned),
            closed: Arc::clone(&closed),
        }),
        inbound: left_inbound.clone(),
    };
    let right = InProcessTransport {
        sender: Arc::new(InProcessSender {
            peer: left_inbound,
            remote_host_uri: left_host_uri.map(str::to_owned),
            closed,
        }),
        inbound: right_inbound,
    };
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_protocol::KernelCommandEnvelope;
    use polyglot_protocol::command::SubmitCode;
    use polyglot_protocol::test_utils::RecordingObserver;

    #[tokio::test]
    async fn envelopes_cross_as_copies() {
        let (left, right) = connected_pair(Some("kernel://a"), Some("kernel://b"));
        let seen = RecordingObserver::attach(right.inbound());

        let mut command = KernelCommandEnvelope::new(SubmitCode::new("1"));
        command.routing_slip_mut().stamp_as_arrived("kernel://a/x").unwrap();
        left.sender().send(command.clone().into()).await.unwrap();

        let received = seen.values();
        assert_eq!(received.len(), 1);
        let copy = received[0].as_command().unwrap();
        assert_eq!(copy.id(), command.id());
        assert_eq!(copy.command_type(), "SubmitCode");
        assert_eq!(copy.routing_slip(), command.routing_slip());
        assert_eq!(left.sender().remote_host_uri(), Some("kernel://b"));
        assert_eq!(right.sender().remote_host_uri(), Some("kernel://a"));
    }

    #[tokio::test]
    async fn closed_pair_refuses_to_send() {
        let (left, right) = connected_pair(None, None);
        right.close();
        let err = left
            .sender()
            .send(KernelCommandEnvelope::new(SubmitCode::new("1")).into())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
