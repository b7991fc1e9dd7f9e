//! The kernel host: one composite kernel exposed over one or more
//! connectors.

use crate::config::{KernelHostConfig, SubprocessConnectorConfig};
use crate::connector::Connector;
use crate::error::HostError;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use polyglot_kernel::{CompositeKernel, Kernel};
use polyglot_protocol::event::{KernelInfoProduced, KernelReady};
use polyglot_protocol::{
    KernelCommandAndEventReceiver, KernelCommandAndEventSender, KernelCommandEnvelope,
    KernelCommandOrEventEnvelope, KernelEvent, KernelEventEnvelope, KernelInfo, Subscription, uri,
};
use polyglot_proxy::ProxyKernel;
use polyglot_scheduler::KernelScheduler;
use polyglot_transport::JsonLinesTransport;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Inbound command types that skip the host queue. The first two answer
/// a handler that is blocked waiting on them; `Cancel` has to reach the
/// kernel while the command it cancels is still running.
const BYPASS_QUEUE: &[&str] = &["RequestInput", "SendEditableCode", "Cancel"];

/// A spawned kernel process and the transport over its stdio.
struct Subprocess {
    _child: tokio::process::Child,
    _transport: JsonLinesTransport,
}

/// Exposes a [`CompositeKernel`] to remote peers and proxies remote
/// kernels into it.
pub struct KernelHost {
    kernel: Arc<CompositeKernel>,
    uri: String,
    config: KernelHostConfig,
    scheduler: KernelScheduler<KernelCommandEnvelope, ()>,
    default_connector: Arc<Connector>,
    connectors: RwLock<Vec<Arc<Connector>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    outbound: Mutex<Option<JoinHandle<()>>>,
    subprocesses: Mutex<Vec<Subprocess>>,
    connected: AtomicBool,
    this: Weak<KernelHost>,
}

impl std::fmt::Debug for KernelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHost")
            .field("uri", &self.uri)
            .field("kernel", &self.kernel.name())
            .field("connectors", &self.connectors.read().len())
            .finish()
    }
}

impl KernelHost {
    /// Host `kernel` under `config.host_uri`, talking to its first peer
    /// through `sender` and `receiver`.
    pub fn new(
        kernel: Arc<CompositeKernel>,
        sender: Arc<dyn KernelCommandAndEventSender>,
        receiver: Arc<dyn KernelCommandAndEventReceiver>,
        config: KernelHostConfig,
    ) -> Result<Arc<Self>, HostError> {
        let host_uri = uri::normalize(&config.host_uri)?;
        kernel.set_host_uri(&host_uri)?;
        kernel
            .core()
            .runtime()
            .set_noop_command_types(config.noop_command_types.iter().map(String::as_str));
        if let Some(name) = &config.default_kernel_name {
            kernel.set_default_kernel_name(name.clone());
        }

        let default_connector = Connector::new(sender, receiver, &[]);
        let host = Arc::new_cyclic(|this: &Weak<Self>| Self {
            kernel,
            uri: host_uri,
            config,
            scheduler: KernelScheduler::new(),
            default_connector: Arc::clone(&default_connector),
            connectors: RwLock::new(vec![Arc::clone(&default_connector)]),
            subscriptions: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            subprocesses: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            this: this.clone(),
        });
        host.watch_for_kernels(&default_connector);
        tracing::info!(host = %host.uri, kernel = host.kernel.name(), "kernel host created");
        Ok(host)
    }

    /// The hosted composite.
    pub fn kernel(&self) -> &Arc<CompositeKernel> {
        &self.kernel
    }

    /// URI of this host.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The connector passed to [`KernelHost::new`].
    pub fn default_connector(&self) -> &Arc<Connector> {
        &self.default_connector
    }

    /// Every registered connector, the default one first.
    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors.read().clone()
    }

    /// The kernel a command addresses: by destination URI, then origin
    /// URI, then target name, falling back to the composite itself.
    pub fn get_kernel(&self, envelope: &KernelCommandEnvelope) -> Arc<dyn Kernel> {
        let command = envelope.command();
        let by_uri = [command.destination_uri.as_deref(), command.origin_uri.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|u| self.kernel.find_kernel_by_uri(u));
        let kernel = by_uri
            .or_else(|| {
                command
                    .target_kernel_name
                    .as_deref()
                    .and_then(|name| self.kernel.find_kernel_by_name(name))
            })
            .unwrap_or_else(|| Arc::clone(&self.kernel) as Arc<dyn Kernel>);
        tracing::debug!(kernel = kernel.name(), command_type = envelope.command_type(), "resolved kernel");
        kernel
    }

    /// The first connector that reaches the host of `remote_uri`.
    pub fn try_get_connector(&self, remote_uri: &str) -> Option<Arc<Connector>> {
        self.connectors
            .read()
            .iter()
            .find(|c| c.can_reach(remote_uri))
            .cloned()
    }

    /// Register another connector. Refused when one of its remote hosts
    /// is already reachable through a registered connector.
    pub fn try_add_connector(&self, connector: Arc<Connector>) -> bool {
        {
            let mut connectors = self.connectors.write();
            let clash = connector
                .remote_host_uris()
                .into_iter()
                .find(|host| connectors.iter().any(|c| c.can_reach(host)));
            if let Some(host) = clash {
                tracing::debug!(%host, "connector refused, host already reachable");
                return false;
            }
            connectors.push(Arc::clone(&connector));
        }
        self.watch_for_kernels(&connector);
        true
    }

    /// Drop every connector that reaches one of `remote_uris`. Returns
    /// whether any was removed.
    pub fn try_remove_connector(&self, remote_uris: &[&str]) -> bool {
        let mut connectors = self.connectors.write();
        let before = connectors.len();
        connectors.retain(|c| !remote_uris.iter().any(|u| c.can_reach(u)));
        before != connectors.len()
    }

    /// Add a proxy named `local_name` for the kernel at `remote_uri`,
    /// through whichever connector reaches its host.
    pub fn connect_proxy_kernel(
        &self,
        local_name: &str,
        remote_uri: &str,
        aliases: &[&str],
    ) -> Result<Arc<ProxyKernel>, HostError> {
        let connector = self
            .try_get_connector(remote_uri)
            .ok_or_else(|| HostError::NoConnector(remote_uri.to_owned()))?;
        self.add_proxy(&connector, local_name, remote_uri, aliases)
    }

    /// Add a proxy on the default connector, whether or not it is known
    /// to reach `remote_uri` yet.
    pub fn connect_proxy_kernel_on_default_connector(
        &self,
        local_name: &str,
        remote_uri: &str,
        aliases: &[&str],
    ) -> Result<Arc<ProxyKernel>, HostError> {
        self.add_proxy(&self.default_connector, local_name, remote_uri, aliases)
    }

    fn add_proxy(
        &self,
        connector: &Connector,
        local_name: &str,
        remote_uri: &str,
        aliases: &[&str],
    ) -> Result<Arc<ProxyKernel>, HostError> {
        let proxy = ProxyKernel::new(local_name, remote_uri, connector.sender(), connector.receiver())?;
        self.kernel.add(Arc::clone(&proxy) as Arc<dyn Kernel>, aliases)?;
        tracing::info!(kernel = local_name, remote = remote_uri, "connected proxy kernel");
        Ok(proxy)
    }

    /// Start a kernel process that speaks newline-delimited JSON on its
    /// stdio and proxy its kernel `remote_name` as `local_name`.
    ///
    /// The process lives as long as the host and is killed with it.
    pub fn connect_subprocess(
        &self,
        config: &SubprocessConnectorConfig,
        local_name: &str,
        remote_name: &str,
    ) -> Result<Arc<ProxyKernel>, HostError> {
        let mut command = tokio::process::Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(HostError::Process(std::io::Error::other(
                "kernel process has no stdio pipes",
            )));
        };
        tracing::info!(program = %config.program, pid = ?child.id(), "started kernel process");

        let transport =
            JsonLinesTransport::new(stdout, stdin).with_remote_host_uri(&config.remote_host_uri);
        let connector = Connector::new(transport.sender(), transport.receiver(), &[]);
        if !self.try_add_connector(Arc::clone(&connector)) {
            return Err(HostError::ConnectorConflict(config.remote_host_uri.clone()));
        }

        let remote_uri = uri::child_uri(&config.remote_host_uri, remote_name)?;
        let proxy = self.add_proxy(&connector, local_name, &remote_uri, &[])?;
        self.subprocesses.lock().push(Subprocess {
            _child: child,
            _transport: transport,
        });
        Ok(proxy)
    }

    /// Start serving: forward every composite event to the default
    /// connector, dispatch inbound commands to the composite, and announce
    /// the local kernels with `KernelReady`.
    pub async fn connect(&self) -> Result<KernelReady, HostError> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(HostError::AlreadyConnected);
        }

        let (events, mut outbound) = self.kernel.events().channel();
        let sender = self.default_connector.sender();
        *self.outbound.lock() = Some(tokio::spawn(async move {
            while let Some(event) = outbound.recv().await {
                tracing::trace!(event_type = event.event_type(), "forwarding event");
                if let Err(e) = sender.send(KernelCommandOrEventEnvelope::Event(event)).await {
                    tracing::error!(error = %e, "could not forward event");
                }
            }
        }));

        let host = self.this.clone();
        let commands = self
            .default_connector
            .receiver()
            .subscribe(Box::new(move |envelope| {
                if let (KernelCommandOrEventEnvelope::Command(command), Some(host)) =
                    (envelope, host.upgrade())
                {
                    host.dispatch(command.clone());
                }
            }));
        self.subscriptions.lock().extend([events, commands]);

        let root = self.kernel.kernel_info();
        let mut kernel_infos = vec![root.clone()];
        kernel_infos.extend(
            self.kernel
                .children()
                .iter()
                .map(|k| k.kernel_info())
                .filter(|info| !info.is_proxy),
        );
        let ready = KernelReady { kernel_infos };
        let mut event = KernelEventEnvelope::new(ready.clone(), None);
        event.routing_slip_mut().stamp(&root.uri)?;
        self.default_connector
            .sender()
            .send(KernelCommandOrEventEnvelope::Event(event))
            .await?;
        tracing::info!(host = %self.uri, kernels = ready.kernel_infos.len(), "kernel host ready");
        Ok(ready)
    }

    fn dispatch(&self, command: KernelCommandEnvelope) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!(command_type = command.command_type(), "no runtime to dispatch inbound command");
            return;
        }
        tracing::debug!(
            command_type = command.command_type(),
            target = ?command.target_kernel_name(),
            destination = ?command.destination_uri(),
            "dispatching inbound command"
        );

        let kernel = Arc::clone(&self.kernel);
        if BYPASS_QUEUE.contains(&command.command_type()) {
            tokio::spawn(run_inbound(kernel, command));
            return;
        }
        let scope = command.token().map(ToString::to_string);
        let queued = self
            .scheduler
            .schedule(command, scope, move |command, _| run_inbound(kernel, command).boxed());
        tokio::spawn(queued);
    }

    /// Descriptors of the composite and every child.
    pub fn get_kernel_infos(&self) -> Vec<KernelInfo> {
        std::iter::once(self.kernel.kernel_info())
            .chain(self.kernel.children().iter().map(|k| k.kernel_info()))
            .collect()
    }

    /// One `KernelInfoProduced` per descriptor, each stamped with the
    /// kernel it describes.
    pub fn get_kernel_info_produced(&self) -> Vec<KernelEventEnvelope> {
        self.get_kernel_infos()
            .into_iter()
            .filter_map(|kernel_info| {
                let uri = kernel_info.uri.clone();
                let mut event = KernelEventEnvelope::new(KernelInfoProduced { kernel_info }, None);
                match event.routing_slip_mut().stamp(&uri) {
                    Ok(()) => Some(event),
                    Err(e) => {
                        tracing::warn!(%uri, error = %e, "skipping kernel info with invalid uri");
                        None
                    }
                }
            })
            .collect()
    }

    /// Create or patch the proxy for a kernel a peer announced.
    ///
    /// Proxies that point back at this host are skipped. A kernel already
    /// present is only patched when it is itself a proxy.
    pub fn ensure_or_update_proxy_for_kernel_info(&self, info: &KernelInfo) -> Result<(), HostError> {
        let lookup = if info.is_proxy {
            let Some(remote) = info.remote_uri.as_deref() else {
                return Ok(());
            };
            if uri::host_of(remote) == uri::host_of(&self.uri) {
                tracing::debug!(kernel = %info.local_name, "skipping proxy that points back at this host");
                return Ok(());
            }
            remote
        } else {
            info.uri.as_str()
        };

        let kernel = match self.kernel.find_kernel_by_uri(lookup) {
            Some(kernel) => {
                tracing::debug!(uri = lookup, "patching kernel info");
                kernel
            }
            None => {
                let aliases: Vec<&str> = info.aliases.iter().map(String::as_str).collect();
                self.connect_proxy_kernel(&info.local_name, lookup, &aliases)? as Arc<dyn Kernel>
            }
        };
        if kernel.kernel_info().is_proxy {
            kernel.core().update_kernel_info(|own| own.merge_from(info));
        }
        Ok(())
    }

    /// With proxy discovery on, watch `connector` for kernels its peer
    /// announces.
    fn watch_for_kernels(&self, connector: &Connector) {
        if !self.config.proxy_discovery {
            return;
        }
        let host = self.this.clone();
        let subscription = connector.receiver().subscribe(Box::new(move |envelope| {
            let (Some(event), Some(host)) = (envelope.as_event(), host.upgrade()) else {
                return;
            };
            let infos = match event.event() {
                KernelEvent::KernelReady(ready) => ready.kernel_infos.as_slice(),
                KernelEvent::KernelInfoProduced(produced) => std::slice::from_ref(&produced.kernel_info),
                _ => return,
            };
            for info in infos {
                if let Err(e) = host.ensure_or_update_proxy_for_kernel_info(info) {
                    tracing::warn!(kernel = %info.local_name, uri = %info.uri, error = %e, "could not discover kernel");
                }
            }
        }));
        self.subscriptions.lock().push(subscription);
    }
}

impl Drop for KernelHost {
    fn drop(&mut self) {
        if let Some(task) = self.outbound.lock().take() {
            task.abort();
        }
    }
}

async fn run_inbound(kernel: Arc<CompositeKernel>, command: KernelCommandEnvelope) {
    let command_type = command.command_type().to_owned();
    match kernel.send(command).await {
        Ok(result) => {
            tracing::debug!(%command_type, terminal = ?result.terminal().map(|e| e.event_type()), "inbound command finished");
        }
        Err(e) => tracing::error!(%command_type, error = %e, "inbound command could not be sent"),
    }
}
