//! A transport plus the set of remote hosts reachable through it.

use parking_lot::RwLock;
use polyglot_protocol::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandOrEventEnvelope,
    KernelEvent, Subscription, uri,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A sender/receiver pair and the remote hosts it is known to reach.
///
/// Reachable hosts are seeded from the constructor and the sender's
/// `remote_host_uri`, then learned from traffic: every non-proxy
/// `KernelInfoProduced` names its host, and so does the first stamp on
/// any inbound event's routing slip.
pub struct Connector {
    sender: Arc<dyn KernelCommandAndEventSender>,
    receiver: Arc<dyn KernelCommandAndEventReceiver>,
    remote_hosts: Arc<RwLock<BTreeSet<String>>>,
    _listener: Subscription,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("remote_hosts", &*self.remote_hosts.read())
            .finish_non_exhaustive()
    }
}

fn learn(hosts: &RwLock<BTreeSet<String>>, kernel_uri: &str) {
    if let Some(host) = uri::host_of(kernel_uri) {
        if !hosts.read().contains(&host) {
            tracing::debug!(%host, "connector learned remote host");
            hosts.write().insert(host);
        }
    }
}

impl Connector {
    /// Wrap a transport. `remote_uris` are kernel or host URIs known to be
    /// reachable up front.
    pub fn new(
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
        remote_uris: &[&str],
    ) -> Arc<Self> {
        let remote_hosts = Arc::new(RwLock::new(BTreeSet::new()));
        for remote in remote_uris.iter().copied().chain(sender.remote_host_uri()) {
            learn(&remote_hosts, remote);
        }

        let hosts = Arc::clone(&remote_hosts);
        let listener = receiver.subscribe(Box::new(move |envelope| {
            let KernelCommandOrEventEnvelope::Event(event) = envelope else {
                return;
            };
            if let KernelEvent::KernelInfoProduced(produced) = event.event() {
                if produced.kernel_info.remote_uri.is_none() {
                    learn(&hosts, &produced.kernel_info.uri);
                }
            }
            if let Some(origin) = event.routing_slip().first() {
                learn(&hosts, origin);
            }
        }));

        Arc::new(Self {
            sender,
            receiver,
            remote_hosts,
            _listener: listener,
        })
    }

    /// Outbound half.
    pub fn sender(&self) -> Arc<dyn KernelCommandAndEventSender> {
        Arc::clone(&self.sender)
    }

    /// Inbound half.
    pub fn receiver(&self) -> Arc<dyn KernelCommandAndEventReceiver> {
        Arc::clone(&self.receiver)
    }

    /// Hosts this connector reaches, as `scheme://authority`.
    pub fn remote_host_uris(&self) -> Vec<String> {
        self.remote_hosts.read().iter().cloned().collect()
    }

    /// Mark the host of `remote_uri` as reachable.
    pub fn add_remote_host_uri(&self, remote_uri: &str) {
        learn(&self.remote_hosts, remote_uri);
    }

    /// Whether the host of `remote_uri` is reachable through this connector.
    pub fn can_reach(&self, remote_uri: &str) -> bool {
        uri::host_of(remote_uri).is_some_and(|host| self.remote_hosts.read().contains(&host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_protocol::event::KernelInfoProduced;
    use polyglot_protocol::{KernelEventEnvelope, KernelInfo, Subject};
    use polyglot_transport::connected_pair;

    #[test]
    fn seeded_hosts_are_reachable() {
        let (left, _right) = connected_pair(None, Some("kernel://pid-9"));
        let connector = Connector::new(left.sender(), left.receiver(), &["kernel://vscode/csharp"]);
        assert!(connector.can_reach("kernel://vscode/fsharp"));
        assert!(connector.can_reach("kernel://pid-9/"));
        assert!(!connector.can_reach("kernel://elsewhere/python"));
        assert_eq!(connector.remote_host_uris(), ["kernel://pid-9", "kernel://vscode"]);
    }

    #[test]
    fn hosts_are_learned_from_inbound_events() {
        let inbound = Subject::new();
        let (left, _right) = connected_pair(None, None);
        let connector = Connector::new(left.sender(), Arc::new(inbound.clone()), &[]);

        let mut info = KernelInfo::new("python");
        info.uri = "kernel://pid-1/python".into();
        inbound.publish(&KernelCommandOrEventEnvelope::Event(KernelEventEnvelope::new(
            KernelInfoProduced { kernel_info: info },
            None,
        )));
        assert!(connector.can_reach("kernel://pid-1/python"));

        let mut proxied = KernelInfo::new("js");
        proxied.uri = "kernel://pid-2/js".into();
        proxied.remote_uri = Some("kernel://browser/js".into());
        inbound.publish(&KernelCommandOrEventEnvelope::Event(KernelEventEnvelope::new(
            KernelInfoProduced { kernel_info: proxied },
            None,
        )));
        assert!(!connector.can_reach("kernel://pid-2/js"));

        let mut stamped = KernelEventEnvelope::new(polyglot_protocol::event::CommandSucceeded {}, None);
        stamped.routing_slip_mut().stamp("kernel://pid-3/fsharp").unwrap();
        inbound.publish(&KernelCommandOrEventEnvelope::Event(stamped));
        assert!(connector.can_reach("kernel://pid-3/"));

        connector.add_remote_host_uri("kernel://pid-4/sql");
        assert!(connector.can_reach("kernel://pid-4/kql"));
    }
}
