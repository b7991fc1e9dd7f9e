//! State shared by every kernel in one tree.

use crate::context::InvocationContext;
use parking_lot::{Mutex, RwLock};
use polyglot_protocol::{KernelCommandEnvelope, Token};
use polyglot_scheduler::KernelScheduler;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Scheduler type used for commands.
pub type CommandScheduler = KernelScheduler<KernelCommandEnvelope, KernelCommandEnvelope>;

/// Command types that complete silently when a kernel has no handler
/// for them. Editors fire these speculatively at every kernel.
pub const DEFAULT_NOOP_COMMAND_TYPES: &[&str] = &[
    "RequestCompletions",
    "RequestSignatureHelp",
    "RequestDiagnostics",
    "RequestHoverText",
];

/// The scheduler and the table of live invocation contexts for a kernel
/// tree. The root kernel owns it; children reach it through their parent.
pub struct KernelRuntime {
    scheduler: CommandScheduler,
    contexts: Mutex<HashMap<Token, Arc<InvocationContext>>>,
    noop_command_types: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for KernelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRuntime")
            .field("busy", &self.scheduler.is_busy())
            .field("pending", &self.scheduler.pending())
            .field("live_contexts", &self.live_contexts())
            .finish()
    }
}

impl KernelRuntime {
    /// A fresh runtime with the default no-op command types.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scheduler: CommandScheduler::new(),
            contexts: Mutex::new(HashMap::new()),
            noop_command_types: RwLock::new(
                DEFAULT_NOOP_COMMAND_TYPES
                    .iter()
                    .map(|s| (*s).to_owned())
                    .collect(),
            ),
        })
    }

    /// The command scheduler.
    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// The live context for `command`'s token, or a new root context.
    ///
    /// A command whose token belongs to a live context joins it as a
    /// child. Anything else becomes the root of a new context, minting a
    /// token if the command has none.
    pub fn get_or_create_context(
        &self,
        command: &mut KernelCommandEnvelope,
    ) -> Arc<InvocationContext> {
        let mut contexts = self.contexts.lock();
        if let Some(token) = command.token() {
            if let Some(existing) = contexts.get(token) {
                let existing = Arc::clone(existing);
                existing.add_child(command);
                return existing;
            }
        }
        let context = InvocationContext::new(command);
        contexts.insert(context.token().clone(), Arc::clone(&context));
        tracing::trace!(token = %context.token(), command_type = command.command_type(), "created invocation context");
        context
    }

    /// The live context for `token`, if any.
    pub fn context(&self, token: &Token) -> Option<Arc<InvocationContext>> {
        self.contexts.lock().get(token).cloned()
    }

    /// Complete `context` for its root command and forget it.
    pub fn dispose_context(&self, context: &InvocationContext) {
        context.complete(context.command());
        let mut contexts = self.contexts.lock();
        let same = contexts
            .get(context.token())
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), context));
        if same {
            contexts.remove(context.token());
        }
    }

    /// Number of live contexts.
    pub fn live_contexts(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Whether a missing handler for `command_type` completes silently.
    pub fn is_noop_command_type(&self, command_type: &str) -> bool {
        self.noop_command_types.read().contains(command_type)
    }

    /// Replace the set of silently completed command types.
    pub fn set_noop_command_types<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.noop_command_types.write() = types.into_iter().map(Into::into).collect();
    }
}
