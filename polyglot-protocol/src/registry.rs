//! The envelope registry maps `commandType`/`eventType` tags to payload
//! shapes.
//!
//! Built-in kinds are always known. Other tags must be registered before
//! an envelope carrying them can be deserialized; an unknown tag is a
//! hard error rather than a silent default. Registered extension kinds
//! are decoded into [`ExtensionPayload`]/[`ExtensionEvent`] field maps.

use crate::command::{CommandPayload, ExtensionPayload, KernelCommand};
use crate::envelope::{KernelCommandEnvelope, KernelCommandOrEventEnvelope, KernelEventEnvelope};
use crate::error::ProtocolError;
use crate::event::{ExtensionEvent, KernelEvent};
use crate::id::{CommandId, Token};
use crate::routing_slip::RoutingSlip;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

const TARGET_KERNEL_NAME: &str = "targetKernelName";
const ORIGIN_URI: &str = "originUri";
const DESTINATION_URI: &str = "destinationUri";

/// Registry of known command and event type tags.
#[derive(Debug, Default)]
pub struct EnvelopeRegistry {
    command_types: RwLock<HashSet<String>>,
    event_types: RwLock<HashSet<String>>,
}

static GLOBAL: OnceLock<EnvelopeRegistry> = OnceLock::new();

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn read_routing_slip(obj: &Map<String, Value>) -> Result<RoutingSlip, ProtocolError> {
    match obj.get("routingSlip") {
        None | Some(Value::Null) => Ok(RoutingSlip::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

impl EnvelopeRegistry {
    /// A registry that knows only the built-in kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by envelope constructors and
    /// serde impls.
    pub fn global() -> &'static EnvelopeRegistry {
        GLOBAL.get_or_init(EnvelopeRegistry::new)
    }

    /// Make `command_type` deserializable as an extension payload.
    pub fn register_command_type(&self, command_type: &str) {
        if CommandPayload::BUILT_IN.contains(&command_type) {
            return;
        }
        if self.command_types.write().insert(command_type.to_owned()) {
            tracing::debug!(command_type, "registered extension command type");
        }
    }

    /// Make `event_type` deserializable as an extension event.
    pub fn register_event_type(&self, event_type: &str) {
        if KernelEvent::BUILT_IN.contains(&event_type) {
            return;
        }
        if self.event_types.write().insert(event_type.to_owned()) {
            tracing::debug!(event_type, "registered extension event type");
        }
    }

    /// Whether `command_type` is built in or registered.
    pub fn knows_command_type(&self, command_type: &str) -> bool {
        CommandPayload::BUILT_IN.contains(&command_type)
            || self.command_types.read().contains(command_type)
    }

    /// Whether `event_type` is built in or registered.
    pub fn knows_event_type(&self, event_type: &str) -> bool {
        KernelEvent::BUILT_IN.contains(&event_type) || self.event_types.read().contains(event_type)
    }

    /// Encode a command envelope as its wire JSON value.
    pub fn command_to_value(&self, envelope: &KernelCommandEnvelope) -> Result<Value, ProtocolError> {
        let command = envelope.command();
        let mut fields = command.payload.to_fields()?;
        if let Some(name) = &command.target_kernel_name {
            fields.insert(TARGET_KERNEL_NAME.into(), Value::String(name.clone()));
        }
        if let Some(uri) = &command.origin_uri {
            fields.insert(ORIGIN_URI.into(), Value::String(uri.clone()));
        }
        if let Some(uri) = &command.destination_uri {
            fields.insert(DESTINATION_URI.into(), Value::String(uri.clone()));
        }

        let mut obj = Map::new();
        if let Some(token) = envelope.token() {
            obj.insert("token".into(), Value::String(token.to_string()));
        }
        obj.insert("id".into(), Value::String(envelope.id().to_string()));
        obj.insert(
            "commandType".into(),
            Value::String(command.command_type().to_owned()),
        );
        obj.insert("command".into(), Value::Object(fields));
        obj.insert(
            "routingSlip".into(),
            serde_json::to_value(envelope.routing_slip())?,
        );
        Ok(Value::Object(obj))
    }

    /// Decode a command envelope from its wire JSON value.
    pub fn command_from_value(&self, value: Value) -> Result<KernelCommandEnvelope, ProtocolError> {
        let Value::Object(obj) = value else {
            return Err(ProtocolError::Malformed(
                "command envelope must be an object".into(),
            ));
        };
        let command_type = match obj.get("commandType") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => return Err(ProtocolError::MissingDiscriminator),
        };
        let mut fields = match obj.get("command") {
            Some(Value::Object(fields)) => fields.clone(),
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "{command_type} envelope has no command object"
                )));
            }
        };

        let target_kernel_name = take_string(&mut fields, TARGET_KERNEL_NAME);
        let origin_uri = take_string(&mut fields, ORIGIN_URI);
        let destination_uri = take_string(&mut fields, DESTINATION_URI);

        let payload = match CommandPayload::from_fields(&command_type, fields.clone())? {
            Some(payload) => payload,
            None if self.command_types.read().contains(&command_type) => {
                CommandPayload::Extension(ExtensionPayload {
                    type_name: command_type,
                    fields,
                })
            }
            None => return Err(ProtocolError::UnknownCommandType(command_type)),
        };

        let token = match obj.get("token") {
            Some(Value::String(t)) => Some(Token::new(t.clone())),
            _ => None,
        };
        let id = match obj.get("id") {
            Some(Value::String(id)) => CommandId::new(id.clone()),
            _ => CommandId::mint(),
        };
        let routing_slip = read_routing_slip(&obj)?;

        let command = KernelCommand {
            target_kernel_name,
            origin_uri,
            destination_uri,
            payload,
        };
        Ok(KernelCommandEnvelope::from_parts(
            command,
            token,
            id,
            routing_slip,
        ))
    }

    /// Encode an event envelope as its wire JSON value.
    pub fn event_to_value(&self, envelope: &KernelEventEnvelope) -> Result<Value, ProtocolError> {
        let mut obj = Map::new();
        obj.insert(
            "eventType".into(),
            Value::String(envelope.event_type().to_owned()),
        );
        obj.insert("event".into(), envelope.event().to_value()?);
        let command = match envelope.command() {
            Some(command) => self.command_to_value(command)?,
            None => Value::Null,
        };
        obj.insert("command".into(), command);
        obj.insert(
            "routingSlip".into(),
            serde_json::to_value(envelope.routing_slip())?,
        );
        Ok(Value::Object(obj))
    }

    /// Decode an event envelope from its wire JSON value.
    pub fn event_from_value(&self, value: Value) -> Result<KernelEventEnvelope, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::Malformed(
                "event envelope must be an object".into(),
            ));
        };
        let event_type = match obj.get("eventType") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => return Err(ProtocolError::MissingDiscriminator),
        };
        let routing_slip = read_routing_slip(&obj)?;

        let body = match obj.remove("event") {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(body) => body,
        };
        let event = match KernelEvent::from_value(&event_type, body.clone())? {
            Some(event) => event,
            None if self.event_types.read().contains(&event_type) => {
                let Value::Object(fields) = body else {
                    return Err(ProtocolError::Malformed(format!(
                        "{event_type} event must be an object"
                    )));
                };
                KernelEvent::Extension(ExtensionEvent {
                    type_name: event_type,
                    fields,
                })
            }
            None => return Err(ProtocolError::UnknownEventType(event_type)),
        };

        let command = match obj.remove("command") {
            Some(Value::Null) | None => None,
            Some(command) => Some(self.command_from_value(command)?),
        };
        Ok(KernelEventEnvelope::from_parts(event, command, routing_slip))
    }

    /// Encode either kind of envelope.
    pub fn envelope_to_value(
        &self,
        envelope: &KernelCommandOrEventEnvelope,
    ) -> Result<Value, ProtocolError> {
        match envelope {
            KernelCommandOrEventEnvelope::Command(c) => self.command_to_value(c),
            KernelCommandOrEventEnvelope::Event(e) => self.event_to_value(e),
        }
    }

    /// Decode either kind of envelope, dispatching on the discriminator.
    pub fn envelope_from_value(
        &self,
        value: Value,
    ) -> Result<KernelCommandOrEventEnvelope, ProtocolError> {
        if value.get("commandType").is_some() {
            self.command_from_value(value).map(Into::into)
        } else if value.get("eventType").is_some() {
            self.event_from_value(value).map(Into::into)
        } else {
            Err(ProtocolError::MissingDiscriminator)
        }
    }

    /// Serialize a command envelope to a JSON string.
    pub fn serialize_command(&self, envelope: &KernelCommandEnvelope) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.command_to_value(envelope)?)?)
    }

    /// Deserialize a command envelope from a JSON string.
    pub fn deserialize_command(&self, json: &str) -> Result<KernelCommandEnvelope, ProtocolError> {
        self.command_from_value(serde_json::from_str(json)?)
    }

    /// Serialize an event envelope to a JSON string.
    pub fn serialize_event(&self, envelope: &KernelEventEnvelope) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.event_to_value(envelope)?)?)
    }

    /// Deserialize an event envelope from a JSON string.
    pub fn deserialize_event(&self, json: &str) -> Result<KernelEventEnvelope, ProtocolError> {
        self.event_from_value(serde_json::from_str(json)?)
    }

    /// Deserialize whichever envelope `json` holds.
    pub fn deserialize(&self, json: &str) -> Result<KernelCommandOrEventEnvelope, ProtocolError> {
        self.envelope_from_value(serde_json::from_str(json)?)
    }
}
