#![deny(missing_docs)]
//! Proxy kernels for polyglot hosts.
//!
//! A [`ProxyKernel`] looks like any other kernel to its composite, but it
//! runs nothing itself. Every command it receives is forwarded over a
//! transport to a kernel in another process, and the events that come
//! back for that command are replayed into the local invocation context
//! until the remote terminal event arrives.
//!
//! `KernelInfoProduced` events describing the remote kernel are folded
//! into the proxy's own descriptor instead of being passed through, so
//! ancestors see one merged capability set for the proxy.

use async_trait::async_trait;
use parking_lot::Mutex;
use polyglot_kernel::{
    CommandHandler, InvocationContext, Kernel, KernelCore, KernelError, KernelInvocation,
};
use polyglot_protocol::event::KernelInfoProduced;
use polyglot_protocol::{
    CommandId, KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandEnvelope,
    KernelCommandOrEventEnvelope, KernelEvent, KernelEventEnvelope, KernelInfo, Subscription,
    Token, uri,
};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

/// A kernel that forwards commands to a remote kernel.
pub struct ProxyKernel {
    core: KernelCore,
    sender: Arc<dyn KernelCommandAndEventSender>,
    receiver: Arc<dyn KernelCommandAndEventReceiver>,
    forwarder: Arc<dyn CommandHandler>,
    _announcements: Subscription,
}

impl std::fmt::Debug for ProxyKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.core.kernel_info();
        f.debug_struct("ProxyKernel")
            .field("name", &info.local_name)
            .field("uri", &info.uri)
            .field("remote_uri", &info.remote_uri)
            .finish()
    }
}

impl ProxyKernel {
    /// A proxy named `name` for the kernel at `remote_uri`.
    pub fn new(
        name: impl Into<String>,
        remote_uri: &str,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
    ) -> Result<Arc<Self>, KernelError> {
        let mut info = KernelInfo::new(name);
        info.remote_uri = Some(remote_uri.to_owned());
        Self::with_info(info, sender, receiver)
    }

    /// A proxy described by `info`, which must carry the remote URI.
    pub fn with_info(
        mut info: KernelInfo,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
    ) -> Result<Arc<Self>, KernelError> {
        let remote = info
            .remote_uri
            .as_deref()
            .ok_or_else(|| KernelError::handler(format!("proxy {} has no remote uri", info.local_name)))?;
        info.remote_uri = Some(uri::normalize(remote)?);
        info.is_proxy = true;

        Ok(Arc::new_cyclic(|this: &Weak<Self>| {
            let announcements = Self::watch_announcements(this.clone(), receiver.as_ref());
            Self {
                core: KernelCore::new(info, this.clone()),
                sender,
                receiver,
                forwarder: Arc::new(Forwarder(this.clone())),
                _announcements: announcements,
            }
        }))
    }

    /// URI of the kernel this proxy forwards to.
    pub fn remote_uri(&self) -> Option<String> {
        self.core.kernel_info().remote_uri
    }

    fn is_remote(&self, uri: &str) -> bool {
        self.remote_uri()
            .is_some_and(|remote| uri::same_kernel(&remote, uri))
    }

    fn merge_remote_info(&self, remote: &KernelInfo) -> KernelInfo {
        self.core.update_kernel_info(|info| {
            info.merge_from(remote);
            info.clone()
        })
    }

    /// Unsolicited descriptors of the remote kernel update this proxy's
    /// descriptor and are re-announced locally.
    fn watch_announcements(
        proxy: Weak<Self>,
        receiver: &dyn KernelCommandAndEventReceiver,
    ) -> Subscription {
        receiver.subscribe(Box::new(move |envelope| {
            let Some(event) = envelope.as_event() else {
                return;
            };
            if event.command().is_some() {
                return;
            }
            let KernelEvent::KernelInfoProduced(produced) = event.event() else {
                return;
            };
            let Some(proxy) = proxy.upgrade() else {
                return;
            };
            if proxy.is_remote(&produced.kernel_info.uri) {
                let info = proxy.merge_remote_info(&produced.kernel_info);
                tracing::debug!(proxy = %info.local_name, "remote kernel info updated");
                proxy
                    .events()
                    .publish(&KernelEventEnvelope::new(KernelInfoProduced { kernel_info: info }, None));
            }
        }))
    }

    /// Republish a remote event locally, unless it has already passed
    /// through this proxy or belongs to a command another kernel forwarded.
    fn delegate(&self, event: KernelEventEnvelope, context: &InvocationContext) {
        let own = self.uri();
        if event.routing_slip().contains(&own, false) {
            tracing::trace!(proxy = self.name(), event_type = event.event_type(), "event already seen");
            return;
        }
        let same_origin = event
            .command()
            .and_then(KernelCommandEnvelope::origin_uri)
            .is_none_or(|origin| uri::same_kernel(origin, &own));
        if !same_origin {
            return;
        }
        if let Err(e) = context.publish(event) {
            tracing::warn!(proxy = self.name(), error = %e, "could not republish remote event");
        }
    }

    fn on_remote_event(&self, event: &KernelEventEnvelope, pending: &Pending) {
        let Some(remote_command) = event.command() else {
            return;
        };
        if remote_command.token() != Some(&pending.token) {
            return;
        }

        tracing::trace!(proxy = self.name(), event_type = event.event_type(), "remote event");
        if let Err(e) = pending
            .command
            .lock()
            .routing_slip_mut()
            .continue_with(remote_command.routing_slip())
        {
            tracing::warn!(proxy = self.name(), error = %e, "could not continue command routing slip");
        }

        match event.event() {
            KernelEvent::KernelInfoProduced(produced) if self.is_remote(&produced.kernel_info.uri) => {
                let info = self.merge_remote_info(&produced.kernel_info);
                let mut merged = KernelEventEnvelope::new(
                    KernelInfoProduced { kernel_info: info },
                    Some(&*pending.command.lock()),
                );
                if let Err(e) = merged.routing_slip_mut().continue_with(event.routing_slip()) {
                    tracing::warn!(proxy = self.name(), error = %e, "could not continue event routing slip");
                }
                self.delegate(merged, &pending.context);
            }
            KernelEvent::CommandSucceeded(_)
            | KernelEvent::CommandFailed(_)
            | KernelEvent::CommandCancelled(_)
                if *remote_command.id() == pending.id =>
            {
                if let Some(tx) = pending.completion.lock().take() {
                    let _ = tx.send(event.clone());
                }
            }
            _ => self.delegate(event.clone(), &pending.context),
        }
    }
}

#[async_trait]
impl Kernel for ProxyKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn command_handler(&self, _command_type: &str) -> Option<Arc<dyn CommandHandler>> {
        Some(Arc::clone(&self.forwarder))
    }

    fn supports_command(&self, command_type: &str) -> bool {
        self.core.kernel_info().supports_command(command_type)
    }
}

/// Everything the receiver callback needs while a command is in flight.
struct Pending {
    token: Token,
    id: CommandId,
    command: Mutex<KernelCommandEnvelope>,
    context: Arc<InvocationContext>,
    completion: Mutex<Option<oneshot::Sender<KernelEventEnvelope>>>,
}

struct Forwarder(Weak<ProxyKernel>);

#[async_trait]
impl CommandHandler for Forwarder {
    async fn handle(&self, invocation: &mut KernelInvocation) -> Result<(), KernelError> {
        let proxy = self.0.upgrade().ok_or(KernelError::KernelDropped)?;
        let remote_uri = proxy.remote_uri();

        invocation
            .command
            .fill_routing_uris(Some(&proxy.uri()), remote_uri.as_deref());
        if invocation.command.command_type() == "RequestKernelInfo" {
            let already_there = remote_uri
                .as_deref()
                .is_some_and(|remote| invocation.command.routing_slip().contains(remote, true));
            if already_there {
                return Ok(());
            }
        }

        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Pending {
            token: invocation.command.get_or_create_token().clone(),
            id: invocation.command.id().clone(),
            command: Mutex::new(invocation.command.clone()),
            context: Arc::clone(&invocation.context),
            completion: Mutex::new(Some(tx)),
        });

        let subscription = {
            let weak = Arc::downgrade(&proxy);
            let pending = Arc::clone(&pending);
            proxy.receiver.subscribe(Box::new(move |envelope| {
                if let (Some(event), Some(proxy)) = (envelope.as_event(), weak.upgrade()) {
                    proxy.on_remote_event(event, &pending);
                }
            }))
        };

        tracing::debug!(
            proxy = proxy.name(),
            command_type = invocation.command.command_type(),
            destination = ?invocation.command.destination_uri(),
            "forwarding command"
        );
        proxy
            .sender
            .send(KernelCommandOrEventEnvelope::Command(invocation.command.clone()))
            .await?;

        let cancelled = invocation.context.cancellation_token();
        let terminal = tokio::select! {
            terminal = rx => terminal.ok(),
            _ = cancelled.cancelled() => None,
        };
        drop(subscription);
        invocation.command = pending.command.lock().clone();

        match terminal.as_ref().map(KernelEventEnvelope::event) {
            Some(KernelEvent::CommandFailed(failed)) => {
                invocation
                    .context
                    .fail(failed.message.clone(), failed.exception.clone());
            }
            Some(KernelEvent::CommandCancelled(_)) => invocation.context.cancel(),
            // `None` only follows local cancellation, which has already
            // completed the context.
            Some(_) | None => {}
        }
        Ok(())
    }
}
