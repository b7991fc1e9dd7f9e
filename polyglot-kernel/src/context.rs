//! Invocation contexts.
//!
//! One [`InvocationContext`] exists per root command while it is live. It
//! tracks the child commands spawned on the root's behalf, the kernel that
//! is currently handling a command, and fans published events out to its
//! subscribers. Events that belong to an unrelated root never pass
//! through it.
//!
//! Relevance is decided by the event's command: the root, a tracked
//! child, or any command carrying the root's token. The token clause
//! admits descendants that were never tracked here, such as commands a
//! remote kernel spawned while handling a forwarded command; their
//! events reach this context only through a proxy replaying them. Such
//! an event, terminal or not, never completes the context.
//!
//! Lifecycle: `Active` from creation until the first of `complete(root)`,
//! `fail` or `cancel`, then `Complete`. Exactly one terminal event is
//! published per context.

use crate::kernel::Kernel;
use parking_lot::Mutex;
use polyglot_protocol::event::{CommandCancelled, CommandFailed, CommandSucceeded};
use polyglot_protocol::{
    KernelCommandEnvelope, KernelEvent, KernelEventEnvelope, RoutingSlipError, Subject,
    Subscription, Token,
};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The kernel currently executing within a context.
#[derive(Clone)]
pub struct HandlingKernel {
    /// Kernel name.
    pub name: String,
    /// Kernel URI, stamped onto events published while it is handling.
    pub uri: String,
    /// The kernel itself.
    pub kernel: Weak<dyn Kernel>,
}

impl std::fmt::Debug for HandlingKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlingKernel")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Complete,
}

struct State {
    phase: Phase,
    children: Vec<KernelCommandEnvelope>,
    handling_kernel: Option<HandlingKernel>,
}

/// Live state of one root command.
pub struct InvocationContext {
    command: KernelCommandEnvelope,
    token: Token,
    state: Mutex<State>,
    events: Subject<KernelEventEnvelope>,
    done: watch::Sender<bool>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("command_type", &self.command.command_type())
            .field("token", &self.token)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl InvocationContext {
    /// A context rooted at `command`. The command is given a token if it
    /// has none.
    pub fn new(command: &mut KernelCommandEnvelope) -> Arc<Self> {
        let token = command.get_or_create_token().clone();
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            command: command.clone(),
            token,
            state: Mutex::new(State {
                phase: Phase::Active,
                children: Vec::new(),
                handling_kernel: None,
            }),
            events: Subject::new(),
            done,
            cancellation: CancellationToken::new(),
        })
    }

    /// The root command, as it was when the context was created.
    pub fn command(&self) -> &KernelCommandEnvelope {
        &self.command
    }

    /// Token shared by the root and all of its children.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Whether a terminal event has been published.
    pub fn is_complete(&self) -> bool {
        self.state.lock().phase == Phase::Complete
    }

    /// Triggered when the root command is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Whether `command` is this context's root.
    pub fn is_root(&self, command: &KernelCommandEnvelope) -> bool {
        self.command.is_same_command(command)
    }

    /// Whether `command` is a tracked child of the root.
    pub fn is_child(&self, command: &KernelCommandEnvelope) -> bool {
        self.state
            .lock()
            .children
            .iter()
            .any(|c| c.is_same_command(command))
    }

    /// Track `command` as a child of the root. Idempotent; the root
    /// itself is never tracked as a child.
    pub fn add_child(&self, command: &KernelCommandEnvelope) {
        if self.is_root(command) {
            return;
        }
        let mut state = self.state.lock();
        if !state.children.iter().any(|c| c.is_same_command(command)) {
            state.children.push(command.clone());
        }
    }

    /// Wrap `command` so it joins this context when sent: the token is
    /// inherited and the command is tracked as a child.
    pub fn derive(&self, command: impl Into<KernelCommandEnvelope>) -> KernelCommandEnvelope {
        let mut envelope = command.into();
        envelope.inherit_token(&self.token);
        self.add_child(&envelope);
        envelope
    }

    /// The kernel currently handling a command in this context.
    pub fn handling_kernel(&self) -> Option<HandlingKernel> {
        self.state.lock().handling_kernel.clone()
    }

    /// Replace the handling kernel, returning the previous one so the
    /// caller can restore it.
    pub fn set_handling_kernel(&self, kernel: Option<HandlingKernel>) -> Option<HandlingKernel> {
        std::mem::replace(&mut self.state.lock().handling_kernel, kernel)
    }

    /// Observe events published into this context.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&KernelEventEnvelope) + Send + Sync + 'static,
    {
        self.events.subscribe(observer)
    }

    /// Publish an event raised while handling a command of this context.
    ///
    /// Ignored once the context is complete. The event is attached to the
    /// root command if it has none, and stamped with the URI of the
    /// handling kernel; a slip that already carries that URI is a routing
    /// loop and is reported as an error.
    pub fn publish(&self, event: KernelEventEnvelope) -> Result<(), RoutingSlipError> {
        if self.is_complete() {
            tracing::trace!(event_type = event.event_type(), "dropping event for completed context");
            return Ok(());
        }
        self.publish_unchecked(event)
    }

    fn publish_unchecked(&self, mut event: KernelEventEnvelope) -> Result<(), RoutingSlipError> {
        event.set_command_if_missing(&self.command);

        let (handling_uri, relevant) = {
            let state = self.state.lock();
            let relevant = match event.command() {
                None => true,
                Some(command) => {
                    self.command.is_same_command(command)
                        || state.children.iter().any(|c| c.is_same_command(command))
                        || command.token() == Some(&self.token)
                }
            };
            (state.handling_kernel.as_ref().map(|h| h.uri.clone()), relevant)
        };

        if let Some(uri) = handling_uri {
            event.routing_slip_mut().stamp(&uri)?;
        }

        if relevant {
            self.events.publish(&event);
        }
        Ok(())
    }

    fn publish_terminal(&self, event: impl Into<KernelEvent>, command: &KernelCommandEnvelope) {
        let event = KernelEventEnvelope::new(event, Some(command));
        let event_type = event.event_type().to_owned();
        if let Err(e) = self.publish_unchecked(event) {
            tracing::warn!(token = %self.token, %event_type, error = %e, "terminal event could not be stamped");
        }
        self.done.send_replace(true);
    }

    fn transition_to_complete(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase == Phase::Complete {
            return false;
        }
        state.phase = Phase::Complete;
        true
    }

    /// Mark `command` as done. For the root this publishes
    /// `CommandSucceeded` and completes the context; for a child it just
    /// stops tracking it.
    pub fn complete(&self, command: &KernelCommandEnvelope) {
        if self.is_root(command) {
            if self.transition_to_complete() {
                tracing::debug!(token = %self.token, command_type = command.command_type(), "command succeeded");
                self.publish_terminal(CommandSucceeded {}, command);
            }
        } else {
            self.state
                .lock()
                .children
                .retain(|c| !c.is_same_command(command));
        }
    }

    /// Fail the root command, whichever command caused the failure.
    pub fn fail(&self, message: impl Into<String>, exception: Option<String>) {
        if self.transition_to_complete() {
            let message = message.into();
            tracing::debug!(token = %self.token, %message, "command failed");
            self.publish_terminal(CommandFailed { message, exception }, &self.command);
        }
    }

    /// Cancel the root command: trigger the cancellation token and publish
    /// `CommandCancelled`.
    pub fn cancel(&self) {
        if self.transition_to_complete() {
            tracing::debug!(token = %self.token, "command cancelled");
            self.cancellation.cancel();
            self.publish_terminal(CommandCancelled {}, &self.command);
        }
    }

    /// Wait until a terminal event has been published.
    pub async fn completed(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_protocol::command::SubmitCode;
    use polyglot_protocol::event::CodeSubmissionReceived;
    use polyglot_protocol::test_utils::RecordingObserver;

    fn root() -> KernelCommandEnvelope {
        KernelCommandEnvelope::new(SubmitCode::new("1"))
    }

    #[test]
    fn root_completion_publishes_exactly_one_terminal() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        let recorder = RecordingObserver::attach(&ctx.events);

        ctx.complete(&command);
        ctx.complete(&command);
        ctx.fail("too late", None);

        let types: Vec<_> = recorder.values().iter().map(|e| e.event_type().to_owned()).collect();
        assert_eq!(types, ["CommandSucceeded"]);
        assert!(ctx.is_complete());
    }

    #[test]
    fn child_completion_only_untracks() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        let child = ctx.derive(KernelCommandEnvelope::new(SubmitCode::new("2")));
        assert!(ctx.is_child(&child));
        assert_eq!(child.token(), Some(ctx.token()));

        ctx.complete(&child);
        assert!(!ctx.is_child(&child));
        assert!(!ctx.is_complete());
    }

    #[test]
    fn events_for_unrelated_roots_are_filtered() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        let recorder = RecordingObserver::attach(&ctx.events);

        let mut stranger = root();
        stranger.get_or_create_token();
        ctx.publish(KernelEventEnvelope::new(
            CodeSubmissionReceived { code: "x".into() },
            Some(&stranger),
        ))
        .unwrap();
        ctx.publish(KernelEventEnvelope::new(
            CodeSubmissionReceived { code: "y".into() },
            None,
        ))
        .unwrap();

        let values = recorder.values();
        assert_eq!(values.len(), 1);
        assert!(values[0].command().is_some_and(|c| ctx.is_root(c)));
    }

    #[test]
    fn untracked_descendant_events_pass_without_completing() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        let recorder = RecordingObserver::attach(&ctx.events);

        let descendant = KernelCommandEnvelope::new(SubmitCode::new("2")).with_token(ctx.token().clone());
        assert!(!ctx.is_child(&descendant));
        ctx.publish(KernelEventEnvelope::new(
            CommandFailed::new("nested boom"),
            Some(&descendant),
        ))
        .unwrap();

        assert_eq!(recorder.len(), 1);
        assert!(!ctx.is_complete());
    }

    #[test]
    fn publishing_twice_through_same_kernel_is_a_loop() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        ctx.set_handling_kernel(Some(HandlingKernel {
            name: "csharp".into(),
            uri: "kernel://local/csharp".into(),
            kernel: Weak::<crate::LocalKernel>::new(),
        }));

        let mut event =
            KernelEventEnvelope::new(CodeSubmissionReceived { code: "x".into() }, Some(&command));
        event.routing_slip_mut().stamp("kernel://local/csharp").unwrap();
        assert!(matches!(
            ctx.publish(event),
            Err(RoutingSlipError::AlreadyStamped { .. })
        ));
    }

    #[tokio::test]
    async fn completed_resolves_after_fail() {
        let mut command = root();
        let ctx = InvocationContext::new(&mut command);
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.completed().await })
        };
        ctx.fail("boom", Some("stack".into()));
        waiter.await.unwrap();
    }
}
