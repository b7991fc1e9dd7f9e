//! What [`Kernel::send`](crate::Kernel::send) returns.

use crate::error::KernelError;
use crate::kernel::Kernel;
use polyglot_protocol::event::CommandFailed;
use polyglot_protocol::{KernelCommandEnvelope, KernelEvent, KernelEventEnvelope};

/// The command as it left the kernel tree, plus every event observed for
/// it, in publication order.
#[derive(Debug, Clone)]
pub struct KernelCommandResult {
    /// The command, with its final routing slip.
    pub command: KernelCommandEnvelope,
    /// Events raised while it ran.
    pub events: Vec<KernelEventEnvelope>,
}

impl KernelCommandResult {
    /// Bundle a command with its events.
    pub fn new(command: KernelCommandEnvelope, events: Vec<KernelEventEnvelope>) -> Self {
        Self { command, events }
    }

    /// `eventType` tags, in order.
    pub fn event_types(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.event_type()).collect()
    }

    /// The terminal event for this command, if one was observed.
    ///
    /// Terminal events of other commands sharing the token, such as
    /// nested commands replayed from a remote kernel, do not end this one.
    pub fn terminal(&self) -> Option<&KernelEventEnvelope> {
        self.events.iter().find(|e| {
            e.is_terminal() && e.command().is_some_and(|c| c.is_same_command(&self.command))
        })
    }

    /// Whether the command ended with `CommandSucceeded`.
    pub fn succeeded(&self) -> bool {
        self.terminal()
            .is_some_and(|e| matches!(e.event(), KernelEvent::CommandSucceeded(_)))
    }

    /// The failure, if the command ended with `CommandFailed`.
    pub fn failure(&self) -> Option<&CommandFailed> {
        self.terminal().and_then(|e| match e.event() {
            KernelEvent::CommandFailed(failed) => Some(failed),
            _ => None,
        })
    }

    /// The first event of type `event_type`.
    pub fn first_of(&self, event_type: &str) -> Option<&KernelEventEnvelope> {
        self.events.iter().find(|e| e.event_type() == event_type)
    }
}

/// Send `command` and return the first event of type `event_type`.
///
/// A `CommandFailed` outcome, or a success without such an event, is an
/// error.
pub async fn submit_command_and_get_result(
    kernel: &dyn Kernel,
    command: impl Into<KernelCommandEnvelope>,
    event_type: &str,
) -> Result<KernelEventEnvelope, KernelError> {
    let result = kernel.send(command.into()).await?;
    if let Some(event) = result.first_of(event_type) {
        return Ok(event.clone());
    }
    match result.failure() {
        Some(failed) => Err(KernelError::CommandFailed(failed.message.clone())),
        None => Err(KernelError::handler(format!(
            "{} completed without producing {event_type}",
            result.command.command_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_protocol::command::SubmitCode;
    use polyglot_protocol::event::CommandSucceeded;
    use polyglot_protocol::Token;

    fn root() -> KernelCommandEnvelope {
        KernelCommandEnvelope::new(SubmitCode::new("root")).with_token(Token::new("t1"))
    }

    #[test]
    fn nested_failure_does_not_end_the_root() {
        let root = root();
        let nested = KernelCommandEnvelope::new(SubmitCode::new("nested")).with_token(Token::new("t1"));
        assert_ne!(nested.id(), root.id());

        let result = KernelCommandResult::new(
            root.clone(),
            vec![
                KernelEventEnvelope::new(CommandFailed::new("nested boom"), Some(&nested)),
                KernelEventEnvelope::new(CommandSucceeded {}, Some(&root)),
            ],
        );
        assert!(result.succeeded());
        assert!(result.failure().is_none());
    }

    #[test]
    fn only_nested_terminals_leave_the_outcome_open() {
        let root = root();
        let nested = KernelCommandEnvelope::new(SubmitCode::new("nested")).with_token(Token::new("t1"));
        let result = KernelCommandResult::new(
            root,
            vec![KernelEventEnvelope::new(CommandFailed::new("boom"), Some(&nested))],
        );
        assert!(result.terminal().is_none());
        assert!(result.failure().is_none());
        assert!(!result.succeeded());
    }
}
