//! Envelopes: a command or event plus its correlation metadata.

use crate::command::{CommandPayload, KernelCommand};
use crate::error::ProtocolError;
use crate::event::KernelEvent;
use crate::id::{CommandId, Token};
use crate::registry::EnvelopeRegistry;
use crate::routing_slip::RoutingSlip;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A command with its token, id and routing slip.
///
/// The id is minted at construction and never changes. The token is
/// assigned once, either inherited from a parent command or minted when
/// the command is sent. Apart from that, only the routing slip mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCommandEnvelope {
    command: KernelCommand,
    token: Option<Token>,
    id: CommandId,
    routing_slip: RoutingSlip,
}

impl KernelCommandEnvelope {
    /// Wrap a command, minting a fresh id. Extension command types are
    /// registered with the global registry so the envelope can be
    /// deserialized later.
    pub fn new(command: impl Into<KernelCommand>) -> Self {
        let command = command.into();
        if let CommandPayload::Extension(ext) = &command.payload {
            EnvelopeRegistry::global().register_command_type(&ext.type_name);
        }
        Self {
            command,
            token: None,
            id: CommandId::mint(),
            routing_slip: RoutingSlip::new(),
        }
    }

    pub(crate) fn from_parts(
        command: KernelCommand,
        token: Option<Token>,
        id: CommandId,
        routing_slip: RoutingSlip,
    ) -> Self {
        Self {
            command,
            token,
            id,
            routing_slip,
        }
    }

    /// Builder: set the token.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// The wrapped command.
    pub fn command(&self) -> &KernelCommand {
        &self.command
    }

    /// The `commandType` tag.
    pub fn command_type(&self) -> &str {
        self.command.command_type()
    }

    /// Target kernel name, if any.
    pub fn target_kernel_name(&self) -> Option<&str> {
        self.command.target_kernel_name.as_deref()
    }

    /// Destination URI, if any.
    pub fn destination_uri(&self) -> Option<&str> {
        self.command.destination_uri.as_deref()
    }

    /// Origin URI, if any.
    pub fn origin_uri(&self) -> Option<&str> {
        self.command.origin_uri.as_deref()
    }

    /// Fill origin and destination URIs that are not already set.
    pub fn fill_routing_uris(&mut self, origin: Option<&str>, destination: Option<&str>) {
        if self.command.origin_uri.is_none() {
            self.command.origin_uri = origin.map(str::to_owned);
        }
        if self.command.destination_uri.is_none() {
            self.command.destination_uri = destination.map(str::to_owned);
        }
    }

    /// The token, if one has been assigned.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Adopt `token` unless a token is already set.
    pub fn inherit_token(&mut self, token: &Token) {
        if self.token.is_none() {
            self.token = Some(token.clone());
        }
    }

    /// The token, minting one first if none is set.
    pub fn get_or_create_token(&mut self) -> &Token {
        self.token.get_or_insert_with(Token::mint)
    }

    /// The command id.
    pub fn id(&self) -> &CommandId {
        &self.id
    }

    /// The routing slip.
    pub fn routing_slip(&self) -> &RoutingSlip {
        &self.routing_slip
    }

    /// Mutable access to the routing slip, which only supports appends.
    pub fn routing_slip_mut(&mut self) -> &mut RoutingSlip {
        &mut self.routing_slip
    }

    /// Whether two envelopes wrap the same command instance: equal ids,
    /// and equal tokens when both carry one.
    pub fn is_same_command(&self, other: &KernelCommandEnvelope) -> bool {
        if self.id != other.id {
            return false;
        }
        match (&self.token, &other.token) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Serialize with the global registry.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        EnvelopeRegistry::global().serialize_command(self)
    }

    /// Deserialize with the global registry.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        EnvelopeRegistry::global().deserialize_command(json)
    }
}

impl From<KernelCommand> for KernelCommandEnvelope {
    fn from(command: KernelCommand) -> Self {
        Self::new(command)
    }
}

/// An event with the command that caused it and its routing slip.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelEventEnvelope {
    event: KernelEvent,
    command: Option<KernelCommandEnvelope>,
    routing_slip: RoutingSlip,
}

impl KernelEventEnvelope {
    /// Wrap an event raised on behalf of `command`. Extension event types
    /// are registered with the global registry.
    pub fn new(event: impl Into<KernelEvent>, command: Option<&KernelCommandEnvelope>) -> Self {
        let event = event.into();
        if let KernelEvent::Extension(ext) = &event {
            EnvelopeRegistry::global().register_event_type(&ext.type_name);
        }
        Self {
            event,
            command: command.cloned(),
            routing_slip: RoutingSlip::new(),
        }
    }

    pub(crate) fn from_parts(
        event: KernelEvent,
        command: Option<KernelCommandEnvelope>,
        routing_slip: RoutingSlip,
    ) -> Self {
        Self {
            event,
            command,
            routing_slip,
        }
    }

    /// The wrapped event.
    pub fn event(&self) -> &KernelEvent {
        &self.event
    }

    /// The `eventType` tag.
    pub fn event_type(&self) -> &str {
        self.event.event_type()
    }

    /// The command that caused the event, if any.
    pub fn command(&self) -> Option<&KernelCommandEnvelope> {
        self.command.as_ref()
    }

    /// Attach `command` if the event has none.
    pub fn set_command_if_missing(&mut self, command: &KernelCommandEnvelope) {
        if self.command.is_none() {
            self.command = Some(command.clone());
        }
    }

    /// The routing slip.
    pub fn routing_slip(&self) -> &RoutingSlip {
        &self.routing_slip
    }

    /// Mutable access to the routing slip, which only supports appends.
    pub fn routing_slip_mut(&mut self) -> &mut RoutingSlip {
        &mut self.routing_slip
    }

    /// Whether the event ends its command.
    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }

    /// Serialize with the global registry.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        EnvelopeRegistry::global().serialize_event(self)
    }

    /// Deserialize with the global registry.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        EnvelopeRegistry::global().deserialize_event(json)
    }
}

/// What travels over a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelCommandOrEventEnvelope {
    /// A command.
    Command(KernelCommandEnvelope),
    /// An event.
    Event(KernelEventEnvelope),
}

impl KernelCommandOrEventEnvelope {
    /// The command, if this is one.
    pub fn as_command(&self) -> Option<&KernelCommandEnvelope> {
        match self {
            Self::Command(c) => Some(c),
            Self::Event(_) => None,
        }
    }

    /// The event, if this is one.
    pub fn as_event(&self) -> Option<&KernelEventEnvelope> {
        match self {
            Self::Command(_) => None,
            Self::Event(e) => Some(e),
        }
    }

    /// The routing slip of whichever envelope this is.
    pub fn routing_slip(&self) -> &RoutingSlip {
        match self {
            Self::Command(c) => c.routing_slip(),
            Self::Event(e) => e.routing_slip(),
        }
    }

    /// Serialize with the global registry.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        match self {
            Self::Command(c) => c.to_json(),
            Self::Event(e) => e.to_json(),
        }
    }

    /// Deserialize with the global registry, dispatching on whichever
    /// discriminator is present.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        EnvelopeRegistry::global().deserialize(json)
    }
}

impl From<KernelCommandEnvelope> for KernelCommandOrEventEnvelope {
    fn from(envelope: KernelCommandEnvelope) -> Self {
        Self::Command(envelope)
    }
}

impl From<KernelEventEnvelope> for KernelCommandOrEventEnvelope {
    fn from(envelope: KernelEventEnvelope) -> Self {
        Self::Event(envelope)
    }
}

macro_rules! serde_via_registry {
    ($ty:ty, $to:ident, $from:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                EnvelopeRegistry::global()
                    .$to(self)
                    .map_err(serde::ser::Error::custom)?
                    .serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = serde_json::Value::deserialize(deserializer)?;
                EnvelopeRegistry::global()
                    .$from(value)
                    .map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_via_registry!(KernelCommandEnvelope, command_to_value, command_from_value);
serde_via_registry!(KernelEventEnvelope, event_to_value, event_from_value);
serde_via_registry!(KernelCommandOrEventEnvelope, envelope_to_value, envelope_from_value);
