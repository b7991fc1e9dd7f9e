//! The kernel trait and the command pipeline every kernel shares.
//!
//! A command enters a kernel tree through [`Kernel::send`]:
//!
//! 1. The invocation context is found or created (minting the token).
//! 2. The command is stamped as arrived at the receiving kernel.
//! 3. Execution is queued on the tree's scheduler, scoped by token so
//!    nested commands of the same root run inline.
//! 4. [`Kernel::handle_command`] runs, by default through
//!    [`handle_command_base`], which looks up the handler, completes or
//!    fails the command, and forwards context events onto the kernel's
//!    event subject.
//! 5. The command is stamped as completed and the collected events are
//!    returned.

use crate::context::{HandlingKernel, InvocationContext};
use crate::error::KernelError;
use crate::handler::{CommandHandler, KernelInfoHandler, KernelInvocation};
use crate::result::KernelCommandResult;
use crate::runtime::KernelRuntime;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use polyglot_protocol::command::CommandPayload;
use polyglot_protocol::event::KernelInfoProduced;
use polyglot_protocol::{
    KernelCommandEnvelope, KernelEventEnvelope, KernelInfo, Subject, Subscription, Token, uri,
};
use polyglot_scheduler::SchedulerError;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// State every kernel carries.
pub struct KernelCore {
    name: String,
    info: RwLock<KernelInfo>,
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    events: Subject<KernelEventEnvelope>,
    parent: RwLock<Option<Weak<dyn Kernel>>>,
    runtime: Mutex<Option<Arc<KernelRuntime>>>,
    this: Weak<dyn Kernel>,
}

impl KernelCore {
    /// Core state for the kernel behind `this`, which is usually the weak
    /// handle passed to [`Arc::new_cyclic`].
    pub fn new(info: KernelInfo, this: Weak<dyn Kernel>) -> Self {
        let core = Self {
            name: info.local_name.clone(),
            info: RwLock::new(info),
            handlers: RwLock::new(HashMap::new()),
            events: Subject::new(),
            parent: RwLock::new(None),
            runtime: Mutex::new(None),
            this,
        };
        core.register_command_handler("RequestKernelInfo", Arc::new(KernelInfoHandler));
        core
    }

    /// The kernel's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the kernel's descriptor.
    pub fn kernel_info(&self) -> KernelInfo {
        self.info.read().clone()
    }

    /// Mutate the kernel's descriptor.
    pub fn update_kernel_info<R>(&self, f: impl FnOnce(&mut KernelInfo) -> R) -> R {
        f(&mut self.info.write())
    }

    /// The kernel's URI.
    pub fn uri(&self) -> String {
        self.info.read().uri.clone()
    }

    /// Events raised by this kernel and, for composites, its children.
    pub fn events(&self) -> &Subject<KernelEventEnvelope> {
        &self.events
    }

    /// The handler registered for `command_type`.
    pub fn handler(&self, command_type: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().get(command_type).cloned()
    }

    /// Whether a handler is registered for `command_type`.
    pub fn has_handler(&self, command_type: &str) -> bool {
        self.handlers.read().contains_key(command_type)
    }

    /// Register `handler` for `command_type`, replacing any earlier one.
    ///
    /// The first registration of a type adds it to the kernel's supported
    /// commands and announces the new descriptor with an unsolicited
    /// `KernelInfoProduced`.
    pub fn register_command_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers
            .write()
            .insert(command_type.to_owned(), handler);

        let (added, info) = {
            let mut info = self.info.write();
            (info.add_supported_command(command_type), info.clone())
        };
        if added {
            let uri = info.uri.clone();
            let mut event = KernelEventEnvelope::new(KernelInfoProduced { kernel_info: info }, None);
            if let Err(e) = event.routing_slip_mut().stamp(&uri) {
                tracing::warn!(kernel = %self.name, error = %e, "could not stamp kernel info announcement");
            }
            self.events.publish(&event);
        }
    }

    /// The kernel this one belongs to.
    pub fn parent(&self) -> Option<Arc<dyn Kernel>> {
        self.parent.read().as_ref().and_then(Weak::upgrade)
    }

    /// Attach the kernel to a parent. The kernel switches to the parent's
    /// runtime.
    pub fn set_parent(&self, parent: Option<Weak<dyn Kernel>>) {
        *self.parent.write() = parent;
        *self.runtime.lock() = None;
    }

    /// The runtime of the kernel tree: the root kernel's, created on first
    /// use.
    pub fn runtime(&self) -> Arc<KernelRuntime> {
        if let Some(runtime) = self.runtime.lock().as_ref() {
            return Arc::clone(runtime);
        }
        let runtime = match self.parent() {
            Some(parent) => parent.core().runtime(),
            None => KernelRuntime::new(),
        };
        let mut slot = self.runtime.lock();
        Arc::clone(slot.get_or_insert(runtime))
    }

    /// Strong handle to the kernel that owns this core.
    pub fn this(&self) -> Result<Arc<dyn Kernel>, KernelError> {
        self.this.upgrade().ok_or(KernelError::KernelDropped)
    }
}

/// A kernel: something that handles commands and raises events.
///
/// Implementors hold a [`KernelCore`] and usually only override
/// [`Kernel::handle_command`] or [`Kernel::command_handler`].
#[async_trait]
pub trait Kernel: Send + Sync + 'static {
    /// Shared kernel state.
    fn core(&self) -> &KernelCore;

    /// The kernel's name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Snapshot of the kernel's descriptor.
    fn kernel_info(&self) -> KernelInfo {
        self.core().kernel_info()
    }

    /// The kernel's URI.
    fn uri(&self) -> String {
        self.core().uri()
    }

    /// The kernel's event subject.
    fn events(&self) -> &Subject<KernelEventEnvelope> {
        self.core().events()
    }

    /// Register `handler` for `command_type`.
    fn register_command_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.core().register_command_handler(command_type, handler);
    }

    /// The handler to run for `command_type`.
    fn command_handler(&self, command_type: &str) -> Option<Arc<dyn CommandHandler>> {
        self.core().handler(command_type)
    }

    /// Whether the kernel has a handler for `command_type`.
    fn supports_command(&self, command_type: &str) -> bool {
        self.core().has_handler(command_type)
    }

    /// Whether `command` is addressed to this kernel and of a supported
    /// type.
    fn can_handle(&self, command: &KernelCommandEnvelope) -> bool {
        if command.target_kernel_name().is_some_and(|t| t != self.name()) {
            return false;
        }
        if let Some(destination) = command.destination_uri() {
            if !uri::same_kernel(destination, &self.uri()) {
                return false;
            }
        }
        self.supports_command(command.command_type())
    }

    /// Handle a command within `context`.
    async fn handle_command(
        &self,
        command: &mut KernelCommandEnvelope,
        context: &Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        let this = self.core().this()?;
        handle_command_base(&this, command, context).await
    }

    /// Send a command into this kernel and wait for it to finish.
    ///
    /// A command that fails still returns `Ok`; its failure shows up as a
    /// `CommandFailed` event in the result. `Err` means the command could
    /// not be run at all.
    async fn send(&self, command: KernelCommandEnvelope) -> Result<KernelCommandResult, KernelError> {
        let this = self.core().this()?;
        send_command(this, command).await
    }
}

impl HandlingKernel {
    /// Describe `kernel` as the handling kernel.
    pub fn of(kernel: &Arc<dyn Kernel>) -> Self {
        Self {
            name: kernel.name().to_owned(),
            uri: kernel.uri(),
            kernel: Arc::downgrade(kernel),
        }
    }
}

/// The outermost ancestor of `kernel`.
pub fn root_kernel(kernel: &Arc<dyn Kernel>) -> Arc<dyn Kernel> {
    let mut current = Arc::clone(kernel);
    while let Some(parent) = current.core().parent() {
        current = parent;
    }
    current
}

/// Republish context events on `kernel`'s subject, stamped with its URI.
pub(crate) fn forward_context_events(
    kernel: &Arc<dyn Kernel>,
    context: &InvocationContext,
) -> Subscription {
    let events = kernel.events().clone();
    let uri = kernel.uri();
    context.subscribe(move |event| {
        let mut event = event.clone();
        if !event.routing_slip().contains(&uri, false) {
            if let Err(e) = event.routing_slip_mut().stamp(&uri) {
                tracing::warn!(%uri, error = %e, "could not stamp event");
            }
        }
        events.publish(&event);
    })
}

/// Default command handling: run the registered handler and complete or
/// fail the command.
///
/// For the root command this also forwards the context's events onto the
/// kernel's subject for as long as the command runs, then disposes the
/// context.
pub async fn handle_command_base(
    kernel: &Arc<dyn Kernel>,
    command: &mut KernelCommandEnvelope,
    context: &Arc<InvocationContext>,
) -> Result<(), KernelError> {
    let previous = context.set_handling_kernel(Some(HandlingKernel::of(kernel)));
    let is_root = context.is_root(command);
    let forwarding = is_root.then(|| forward_context_events(kernel, context));

    let command_type = command.command_type().to_owned();
    match kernel.command_handler(&command_type) {
        Some(handler) => {
            let mut invocation = KernelInvocation {
                command: command.clone(),
                context: Arc::clone(context),
                kernel: Arc::clone(kernel),
            };
            let outcome = handler.handle(&mut invocation).await;
            *command = invocation.command;
            match outcome {
                Ok(()) => context.complete(command),
                Err(e) => {
                    tracing::debug!(kernel = kernel.name(), %command_type, error = %e, "handler failed");
                    context.fail(e.to_string(), None);
                }
            }
        }
        None if kernel.core().runtime().is_noop_command_type(&command_type) => {
            context.complete(command);
        }
        None => {
            context.fail(KernelError::NoHandler(command_type).to_string(), None);
        }
    }

    context.set_handling_kernel(previous);
    if is_root {
        drop(forwarding);
        kernel.core().runtime().dispose_context(context);
    }
    Ok(())
}

/// Fail `context` for an error raised outside any handler. The failure
/// is forwarded to the kernel's subject when `command` is the root.
fn fail_unhandled(
    kernel: &Arc<dyn Kernel>,
    context: &Arc<InvocationContext>,
    command: &KernelCommandEnvelope,
    message: String,
) {
    let is_root = context.is_root(command);
    if !context.is_complete() {
        let _forwarding = is_root.then(|| forward_context_events(kernel, context));
        context.fail(message, None);
    }
    if is_root {
        kernel.core().runtime().dispose_context(context);
    }
}

async fn execute_command(
    kernel: Arc<dyn Kernel>,
    mut command: KernelCommandEnvelope,
    context: Arc<InvocationContext>,
) -> KernelCommandEnvelope {
    if let Err(e) = kernel.handle_command(&mut command, &context).await {
        tracing::debug!(kernel = kernel.name(), command_type = command.command_type(), error = %e, "command could not be handled");
        fail_unhandled(&kernel, &context, &command, e.to_string());
    }
    command
}

fn collect_events(
    context: &InvocationContext,
    command: &KernelCommandEnvelope,
) -> (Subscription, Arc<Mutex<Vec<KernelEventEnvelope>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let is_root = context.is_root(command);
    let own = command.clone();
    let subscription = context.subscribe(move |event| {
        let relevant = is_root || event.command().is_some_and(|c| c.is_same_command(&own));
        if relevant {
            sink.lock().push(event.clone());
        }
    });
    (subscription, events)
}

fn stamp_completed(kernel: &dyn Kernel, command: &mut KernelCommandEnvelope, uri: &str) {
    if command.routing_slip().contains(uri, false) {
        return;
    }
    if let Err(e) = command.routing_slip_mut().stamp_as_completed(uri) {
        tracing::warn!(kernel = kernel.name(), error = %e, "could not stamp command as completed");
    }
}

fn take_events(events: &Mutex<Vec<KernelEventEnvelope>>) -> Vec<KernelEventEnvelope> {
    std::mem::take(&mut *events.lock())
}

async fn send_command(
    kernel: Arc<dyn Kernel>,
    mut command: KernelCommandEnvelope,
) -> Result<KernelCommandResult, KernelError> {
    let runtime = kernel.core().runtime();
    let uri = kernel.uri();

    if matches!(command.command().payload, CommandPayload::Cancel(_)) {
        return cancel(&kernel, &runtime, command);
    }

    if !command.routing_slip().contains(&uri, true) {
        command.routing_slip_mut().stamp_as_arrived(&uri)?;
    }
    let context = runtime.get_or_create_context(&mut command);
    let is_root = context.is_root(&command);
    let (collector, events) = collect_events(&context, &command);

    tracing::debug!(
        kernel = kernel.name(),
        command_type = command.command_type(),
        token = %context.token(),
        root = is_root,
        "sending command"
    );

    let scope = Some(context.token().to_string());
    let fallback = command.clone();
    let exec_kernel = Arc::clone(&kernel);
    let exec_context = Arc::clone(&context);
    let outcome = runtime
        .scheduler()
        .run(command, scope, move |command, _cancel| {
            // Runs to completion even when cancelled: handlers observe the
            // context's cancellation token and the queue waits for them.
            execute_command(exec_kernel, command, exec_context).boxed()
        })
        .await;

    let mut command = match outcome {
        Ok(command) => command,
        Err(SchedulerError::Cancelled) => fallback,
        Err(e) => {
            fail_unhandled(&kernel, &context, &fallback, e.to_string());
            fallback
        }
    };
    if is_root {
        runtime.dispose_context(&context);
    }

    stamp_completed(kernel.as_ref(), &mut command, &uri);
    drop(collector);
    Ok(KernelCommandResult::new(command, take_events(&events)))
}

/// `Cancel` bypasses the scheduler: it cancels whatever is in flight,
/// then completes on its own.
fn cancel(
    kernel: &Arc<dyn Kernel>,
    runtime: &KernelRuntime,
    mut command: KernelCommandEnvelope,
) -> Result<KernelCommandResult, KernelError> {
    let uri = kernel.uri();
    if !command.routing_slip().contains(&uri, true) {
        command.routing_slip_mut().stamp_as_arrived(&uri)?;
    }

    // Cancel the context first so its terminal event is still forwarded
    // by the handling kernel, then release the scheduler.
    let in_flight = runtime
        .scheduler()
        .current_scope()
        .flatten()
        .and_then(|token| runtime.context(&Token::new(token)));
    if let Some(cancelled) = in_flight {
        tracing::info!(token = %cancelled.token(), "cancelling in-flight command");
        cancelled.cancel();
    }
    runtime.scheduler().cancel_current_operation();

    let context = runtime.get_or_create_context(&mut command);
    let (collector, events) = collect_events(&context, &command);
    {
        let _forwarding = context
            .is_root(&command)
            .then(|| forward_context_events(kernel, &context));
        context.complete(&command);
    }
    if context.is_root(&command) {
        runtime.dispose_context(&context);
    }

    stamp_completed(kernel.as_ref(), &mut command, &uri);
    drop(collector);
    Ok(KernelCommandResult::new(command, take_events(&events)))
}

/// A kernel with no behaviour beyond its registered handlers.
pub struct LocalKernel {
    core: KernelCore,
}

impl LocalKernel {
    /// A kernel named `name` with only the built-in `RequestKernelInfo`
    /// handler.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_info(KernelInfo::new(name))
    }

    /// A kernel described by `info`.
    pub fn with_info(info: KernelInfo) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            core: KernelCore::new(info, this.clone()),
        })
    }
}

impl Kernel for LocalKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }
}

impl std::fmt::Debug for LocalKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKernel")
            .field("name", &self.core.name())
            .field("uri", &self.core.uri())
            .finish()
    }
}
