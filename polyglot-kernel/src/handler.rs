//! Command handlers and the invocation they receive.

use crate::context::InvocationContext;
use crate::error::KernelError;
use crate::kernel::{Kernel, root_kernel};
use crate::result::KernelCommandResult;
use async_trait::async_trait;
use polyglot_protocol::event::KernelInfoProduced;
use polyglot_protocol::{KernelCommandEnvelope, KernelEvent, KernelEventEnvelope};
use std::future::Future;
use std::sync::Arc;

/// Handles one command type for a kernel.
///
/// Returning `Ok` completes the command; returning `Err` fails the whole
/// root command with the error's message. Handlers never publish terminal
/// events themselves.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle `invocation.command`. Changes the handler makes to the
    /// envelope's routing slip are kept.
    async fn handle(&self, invocation: &mut KernelInvocation) -> Result<(), KernelError>;
}

/// What a handler gets to work with.
#[derive(Clone)]
pub struct KernelInvocation {
    /// The command being handled.
    pub command: KernelCommandEnvelope,
    /// The context of the root command.
    pub context: Arc<InvocationContext>,
    /// The kernel the handler is registered on.
    pub kernel: Arc<dyn Kernel>,
}

impl std::fmt::Debug for KernelInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelInvocation")
            .field("command_type", &self.command.command_type())
            .field("kernel", &self.kernel.name())
            .finish()
    }
}

impl KernelInvocation {
    /// Publish `event` as raised by this command.
    pub fn publish(&self, event: impl Into<KernelEvent>) {
        let envelope = KernelEventEnvelope::new(event, Some(&self.command));
        if let Err(e) = self.context.publish(envelope) {
            tracing::warn!(kernel = self.kernel.name(), error = %e, "dropped event with looping routing slip");
        }
    }

    /// Send a command on behalf of this one. It shares the root's token
    /// and is routed from the root of the kernel tree.
    pub async fn send(
        &self,
        command: impl Into<KernelCommandEnvelope>,
    ) -> Result<KernelCommandResult, KernelError> {
        let child = self.context.derive(command);
        root_kernel(&self.kernel).send(child).await
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(KernelInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), KernelError>> + Send,
{
    async fn handle(&self, invocation: &mut KernelInvocation) -> Result<(), KernelError> {
        (self.0)(invocation.clone()).await
    }
}

/// Build a handler from an async closure.
///
/// ```
/// use polyglot_kernel::{Kernel, LocalKernel, handler_fn};
/// use polyglot_protocol::event::CodeSubmissionReceived;
///
/// let kernel = LocalKernel::new("echo");
/// kernel.register_command_handler(
///     "SubmitCode",
///     handler_fn(|inv| async move {
///         inv.publish(CodeSubmissionReceived { code: "1 + 1".into() });
///         Ok(())
///     }),
/// );
/// assert!(kernel.supports_command("SubmitCode"));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(KernelInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), KernelError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Answers `RequestKernelInfo` with the kernel's own descriptor.
pub(crate) struct KernelInfoHandler;

#[async_trait]
impl CommandHandler for KernelInfoHandler {
    async fn handle(&self, invocation: &mut KernelInvocation) -> Result<(), KernelError> {
        invocation.publish(KernelInfoProduced {
            kernel_info: invocation.kernel.kernel_info(),
        });
        Ok(())
    }
}
