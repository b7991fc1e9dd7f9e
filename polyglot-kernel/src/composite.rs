//! Composite kernels: a kernel that routes commands to named children.

use crate::context::{HandlingKernel, InvocationContext};
use crate::error::KernelError;
use crate::handler::{CommandHandler, KernelInvocation};
use crate::kernel::{Kernel, KernelCore, handle_command_base};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use polyglot_protocol::command::RequestKernelInfo;
use polyglot_protocol::event::KernelInfoProduced;
use polyglot_protocol::{
    KernelCommand, KernelCommandEnvelope, KernelEventEnvelope, KernelInfo, Subscription, uri,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct KernelCollection {
    children: Vec<Arc<dyn Kernel>>,
    by_name: HashMap<String, Arc<dyn Kernel>>,
    by_local_uri: HashMap<String, Arc<dyn Kernel>>,
    by_remote_uri: HashMap<String, Arc<dyn Kernel>>,
}

impl KernelCollection {
    fn by_uri(&self, normalized: &str) -> Option<Arc<dyn Kernel>> {
        self.by_local_uri
            .get(normalized)
            .or_else(|| self.by_remote_uri.get(normalized))
            .cloned()
    }

    /// Give `kernel` its URI under `base` and index it by that URI and,
    /// for proxies, by the remote URI.
    fn index_uris(&mut self, kernel: &Arc<dyn Kernel>, base: &str) -> Result<(), KernelError> {
        let local = uri::child_uri(base, kernel.name())?;
        let info = kernel.core().update_kernel_info(|info| {
            info.uri.clone_from(&local);
            info.clone()
        });
        self.by_local_uri.insert(local, Arc::clone(kernel));
        if info.is_proxy {
            if let Some(remote) = info.remote_uri.as_deref() {
                self.by_remote_uri
                    .insert(uri::normalize(remote)?, Arc::clone(kernel));
            }
        }
        Ok(())
    }
}

/// A kernel that owns child kernels and routes each command to one of
/// them by destination URI, target name or alias, per-command-type
/// default, or the default child.
pub struct CompositeKernel {
    core: KernelCore,
    children: RwLock<KernelCollection>,
    default_kernel_name: RwLock<Option<String>>,
    default_kernel_names_by_command_type: RwLock<HashMap<String, String>>,
    host_uri: RwLock<Option<String>>,
    child_subscriptions: Mutex<Vec<Subscription>>,
    this: Weak<CompositeKernel>,
}

impl std::fmt::Debug for CompositeKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let children: Vec<String> = self
            .children
            .read()
            .children
            .iter()
            .map(|k| k.name().to_owned())
            .collect();
        f.debug_struct("CompositeKernel")
            .field("name", &self.core.name())
            .field("uri", &self.core.uri())
            .field("children", &children)
            .finish()
    }
}

impl CompositeKernel {
    /// An empty composite named `name`.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let mut info = KernelInfo::new(name);
        info.is_composite = true;
        Arc::new_cyclic(|this: &Weak<Self>| {
            let core = KernelCore::new(info, this.clone());
            core.register_command_handler(
                "RequestKernelInfo",
                Arc::new(CompositeKernelInfoHandler(this.clone())),
            );
            Self {
                core,
                children: RwLock::new(KernelCollection::default()),
                default_kernel_name: RwLock::new(None),
                default_kernel_names_by_command_type: RwLock::new(HashMap::new()),
                host_uri: RwLock::new(None),
                child_subscriptions: Mutex::new(Vec::new()),
                this: this.clone(),
            }
        })
    }

    fn as_kernel(&self) -> Result<Arc<dyn Kernel>, KernelError> {
        self.core.this()
    }

    fn base_uri(&self) -> String {
        self.host_uri.read().clone().unwrap_or_else(|| self.core.uri())
    }

    /// Add a child kernel, optionally under extra aliases.
    ///
    /// The first child added becomes the default. Names and aliases must
    /// be unique across children. The child is re-homed under this
    /// composite's URI and its events are republished here.
    pub fn add(&self, kernel: Arc<dyn Kernel>, aliases: &[&str]) -> Result<(), KernelError> {
        let info = {
            let mut children = self.children.write();
            let name = kernel.name().to_owned();
            if children.by_name.contains_key(&name) {
                return Err(KernelError::DuplicateKernelName(name));
            }
            if let Some(taken) = aliases.iter().find(|a| children.by_name.contains_key(**a)) {
                return Err(KernelError::DuplicateKernelName((*taken).to_owned()));
            }

            let parent: Weak<dyn Kernel> = self.this.clone();
            kernel.core().set_parent(Some(parent));

            let names = kernel.core().update_kernel_info(|info| {
                for alias in aliases {
                    if !info.aliases.iter().any(|a| a == alias) {
                        info.aliases.push((*alias).to_owned());
                    }
                }
                info.names().map(str::to_owned).collect::<Vec<_>>()
            });
            for n in &names {
                children.by_name.insert(n.clone(), Arc::clone(&kernel));
            }
            children.index_uris(&kernel, &self.base_uri())?;
            children.children.push(Arc::clone(&kernel));

            self.default_kernel_name
                .write()
                .get_or_insert_with(|| name.clone());
            kernel.kernel_info()
        };

        let composite = self.this.clone();
        let subscription = kernel.events().subscribe(move |event: &KernelEventEnvelope| {
            let Some(composite) = composite.upgrade() else {
                return;
            };
            let uri = composite.uri();
            let mut event = event.clone();
            if !event.routing_slip().contains(&uri, false) {
                if let Err(e) = event.routing_slip_mut().stamp(&uri) {
                    tracing::warn!(%uri, error = %e, "could not stamp child event");
                }
            }
            composite.events().publish(&event);
        });
        self.child_subscriptions.lock().push(subscription);

        tracing::debug!(composite = self.core.name(), kernel = %info.local_name, uri = %info.uri, "added child kernel");
        self.core.events().publish(&KernelEventEnvelope::new(
            KernelInfoProduced { kernel_info: info },
            None,
        ));
        Ok(())
    }

    /// Children in the order they were added.
    pub fn children(&self) -> Vec<Arc<dyn Kernel>> {
        self.children
            .read()
            .children
            .clone()
    }

    /// Name the kernel that commands without a target go to.
    pub fn set_default_kernel_name(&self, name: impl Into<String>) {
        *self.default_kernel_name.write() = Some(name.into());
    }

    /// The kernel that commands without a target go to.
    pub fn default_kernel_name(&self) -> Option<String> {
        self.default_kernel_name.read().clone()
    }

    /// Route untargeted commands of `command_type` to `kernel_name`.
    pub fn set_default_target_kernel_name_for_command(
        &self,
        command_type: impl Into<String>,
        kernel_name: impl Into<String>,
    ) {
        self.default_kernel_names_by_command_type
            .write()
            .insert(command_type.into(), kernel_name.into());
    }

    /// Re-home this composite and its children under `host_uri`.
    pub fn set_host_uri(&self, host_uri: &str) -> Result<(), KernelError> {
        let host_uri = uri::normalize(host_uri)?;
        *self.host_uri.write() = Some(host_uri.clone());
        self.core
            .update_kernel_info(|info| info.uri.clone_from(&host_uri));

        let mut children = self.children.write();
        children.by_local_uri.clear();
        children.by_remote_uri.clear();
        let kernels = children.children.clone();
        for kernel in &kernels {
            children.index_uris(kernel, &host_uri)?;
        }
        Ok(())
    }

    /// The URI of the host this composite lives in, once set.
    pub fn host_uri(&self) -> Option<String> {
        self.host_uri.read().clone()
    }

    /// This composite or the child with URI `uri`. Proxies also match
    /// on their remote URI.
    pub fn find_kernel_by_uri(&self, uri: &str) -> Option<Arc<dyn Kernel>> {
        let normalized = uri::normalize(uri).ok()?;
        if normalized == self.core.uri() {
            return self.as_kernel().ok();
        }
        self.children.read().by_uri(&normalized)
    }

    /// This composite or the child answering to `name`.
    pub fn find_kernel_by_name(&self, name: &str) -> Option<Arc<dyn Kernel>> {
        if self.core.kernel_info().names().any(|n| n == name) {
            return self.as_kernel().ok();
        }
        self.children.read().by_name.get(name).cloned()
    }

    /// This composite and every child that satisfies `predicate`.
    pub fn find_kernels(&self, predicate: impl Fn(&dyn Kernel) -> bool) -> Vec<Arc<dyn Kernel>> {
        let mut found = Vec::new();
        if let Ok(this) = self.as_kernel() {
            if predicate(this.as_ref()) {
                found.push(this);
            }
        }
        found.extend(
            self.children()
                .into_iter()
                .filter(|k| predicate(k.as_ref())),
        );
        found
    }

    /// The first of this composite and its children that satisfies
    /// `predicate`.
    pub fn find_kernel(&self, predicate: impl Fn(&dyn Kernel) -> bool) -> Option<Arc<dyn Kernel>> {
        if let Ok(this) = self.as_kernel() {
            if predicate(this.as_ref()) {
                return Some(this);
            }
        }
        self.children().into_iter().find(|k| predicate(k.as_ref()))
    }

    /// Pick the kernel that should handle `command`.
    ///
    /// In order: the child whose URI matches `destinationUri`; this
    /// composite if the command is untargeted and it can handle it; the
    /// child named by the target, the per-type default or the default
    /// name; the only child; the context's handling kernel; this
    /// composite. A target name that matches no child is an error.
    pub fn get_handling_kernel(
        &self,
        command: &KernelCommandEnvelope,
        context: Option<&InvocationContext>,
    ) -> Result<Arc<dyn Kernel>, KernelError> {
        let this = self.as_kernel()?;

        if let Some(destination) = command.destination_uri() {
            let found = uri::normalize(destination)
                .ok()
                .and_then(|normalized| self.children.read().by_uri(&normalized));
            if let Some(kernel) = found {
                return Ok(kernel);
            }
        }

        let target = match command.target_kernel_name() {
            Some(target) => Some(target.to_owned()),
            None => {
                if self.can_handle(command) {
                    return Ok(this);
                }
                self.default_kernel_names_by_command_type
                    .read()
                    .get(command.command_type())
                    .cloned()
                    .or_else(|| self.default_kernel_name())
            }
        };

        let children = self.children.read();
        if let Some(target) = target {
            return match children.by_name.get(&target) {
                Some(kernel) => Ok(Arc::clone(kernel)),
                None => {
                    tracing::error!(composite = self.core.name(), %target, "kernel not found");
                    Err(KernelError::KernelNotFound(target))
                }
            };
        }
        if let [only] = children.children.as_slice() {
            return Ok(Arc::clone(only));
        }
        drop(children);

        let handling = context
            .and_then(InvocationContext::handling_kernel)
            .and_then(|h| h.kernel.upgrade());
        Ok(handling.unwrap_or(this))
    }
}

#[async_trait]
impl Kernel for CompositeKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    async fn handle_command(
        &self,
        command: &mut KernelCommandEnvelope,
        context: &Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        let this = self.as_kernel()?;
        let kernel = if command.target_kernel_name() == Some(self.name()) {
            Arc::clone(&this)
        } else {
            self.get_handling_kernel(command, Some(context))?
        };

        let previous = context.handling_kernel();
        context.set_handling_kernel(Some(HandlingKernel::of(&kernel)));

        if std::ptr::addr_eq(Arc::as_ptr(&kernel), Arc::as_ptr(&this)) {
            let outcome = handle_command_base(&this, command, context).await;
            context.set_handling_kernel(previous);
            return outcome;
        }

        let kernel_uri = kernel.uri();
        if command.routing_slip().contains(&kernel_uri, true) {
            tracing::warn!(command_type = command.command_type(), uri = %kernel_uri, "command already arrived at kernel");
        } else {
            command.routing_slip_mut().stamp_as_arrived(&kernel_uri)?;
        }

        let outcome = kernel.handle_command(command, context).await;
        context.set_handling_kernel(previous);

        if command.routing_slip().contains(&kernel_uri, false) {
            tracing::warn!(command_type = command.command_type(), uri = %kernel_uri, "command already completed at kernel");
        } else if let Err(e) = command.routing_slip_mut().stamp_as_completed(&kernel_uri) {
            tracing::warn!(uri = %kernel_uri, error = %e, "could not stamp command as completed");
        }
        outcome
    }
}

/// Describes the composite, then asks every child that supports it to
/// describe itself.
struct CompositeKernelInfoHandler(Weak<CompositeKernel>);

#[async_trait]
impl CommandHandler for CompositeKernelInfoHandler {
    async fn handle(&self, invocation: &mut KernelInvocation) -> Result<(), KernelError> {
        let composite = self.0.upgrade().ok_or(KernelError::KernelDropped)?;
        invocation.publish(KernelInfoProduced {
            kernel_info: composite.kernel_info(),
        });

        for child in composite.children() {
            if !child.supports_command("RequestKernelInfo") {
                continue;
            }
            let mut request = KernelCommandEnvelope::new(
                KernelCommand::new(RequestKernelInfo {}).with_target_kernel_name(child.name()),
            );
            request.inherit_token(invocation.context.token());
            request
                .routing_slip_mut()
                .continue_with(invocation.command.routing_slip())?;
            invocation.context.add_child(&request);
            child.handle_command(&mut request, &invocation.context).await?;
        }
        Ok(())
    }
}
