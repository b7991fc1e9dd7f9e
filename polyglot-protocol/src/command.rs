//! Commands: requests addressed to a kernel.
//!
//! A [`KernelCommand`] is the routing fields every command shares plus a
//! [`CommandPayload`] carrying the type-specific data. Built-in payloads
//! are plain structs; anything else travels as an [`ExtensionPayload`],
//! a type tag plus a JSON field map.

use crate::value::{FormattedValue, LinePosition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Submit code for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitCode {
    /// Source text.
    pub code: String,
}

impl SubmitCode {
    /// Submit `code`.
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Ask a kernel (and, for composites, its children) to describe itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestKernelInfo {}

/// Ask a kernel for the value of a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestValue {
    /// Variable name.
    pub name: String,
    /// Preferred MIME type of the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Ask a kernel to list its variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestValueInfos {
    /// Preferred MIME type of the previews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Set a variable in a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendValue {
    /// Variable name.
    pub name: String,
    /// The value, rendered in some MIME type.
    pub formatted_value: FormattedValue,
}

/// Ask for completions at a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompletions {
    /// Code being edited.
    pub code: String,
    /// Cursor position.
    pub line_position: LinePosition,
}

/// Ask for hover text at a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHoverText {
    /// Code being edited.
    pub code: String,
    /// Cursor position.
    pub line_position: LinePosition,
}

/// Ask for signature help at a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignatureHelp {
    /// Code being edited.
    pub code: String,
    /// Cursor position.
    pub line_position: LinePosition,
}

/// Ask for diagnostics on a piece of code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDiagnostics {
    /// Code to analyze.
    pub code: String,
}

/// Ask the front end for user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    /// Prompt shown to the user.
    pub prompt: String,
    /// Whether the input should be masked.
    #[serde(default)]
    pub is_password: bool,
}

/// Ask the front end to insert code into a new cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEditableCode {
    /// Kernel the new cell should target.
    pub kernel_name: String,
    /// Code for the cell.
    pub code: String,
}

/// Display a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayValue {
    /// Value to show.
    pub formatted_value: FormattedValue,
    /// Id used by later updates.
    pub value_id: String,
}

/// Replace a previously displayed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDisplayedValue {
    /// Replacement value.
    pub formatted_value: FormattedValue,
    /// Id of the displayed value.
    pub value_id: String,
}

/// Cancel whatever the kernel tree is doing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cancel {}

/// Shut the kernel down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quit {}

/// A command kind that is not built in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionPayload {
    /// The `commandType` tag.
    pub type_name: String,
    /// Payload fields, excluding the shared routing fields.
    pub fields: Map<String, Value>,
}

impl ExtensionPayload {
    /// An extension payload with no fields.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Map::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

macro_rules! command_payloads {
    ($($name:ident),* $(,)?) => {
        /// Type-specific part of a [`KernelCommand`].
        #[non_exhaustive]
        #[derive(Debug, Clone, PartialEq)]
        pub enum CommandPayload {
            $(
                #[doc = concat!("`", stringify!($name), "`")]
                $name($name),
            )*
            /// A command kind registered at runtime.
            Extension(ExtensionPayload),
        }

        impl CommandPayload {
            /// Built-in command type tags.
            pub const BUILT_IN: &'static [&'static str] = &[$(stringify!($name)),*];

            /// The `commandType` tag.
            pub fn command_type(&self) -> &str {
                match self {
                    $(Self::$name(_) => stringify!($name),)*
                    Self::Extension(e) => &e.type_name,
                }
            }

            pub(crate) fn to_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
                let value = match self {
                    $(Self::$name(p) => serde_json::to_value(p)?,)*
                    Self::Extension(e) => return Ok(e.fields.clone()),
                };
                Ok(match value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                })
            }

            /// Decode a built-in payload. `Ok(None)` means the tag is not
            /// built in.
            pub(crate) fn from_fields(
                command_type: &str,
                fields: Map<String, Value>,
            ) -> Result<Option<Self>, serde_json::Error> {
                match command_type {
                    $(stringify!($name) => {
                        serde_json::from_value(Value::Object(fields)).map(|p| Some(Self::$name(p)))
                    })*
                    _ => Ok(None),
                }
            }
        }

        $(
            impl From<$name> for CommandPayload {
                fn from(payload: $name) -> Self {
                    Self::$name(payload)
                }
            }

            impl From<$name> for KernelCommand {
                fn from(payload: $name) -> Self {
                    KernelCommand::new(payload)
                }
            }
        )*
    };
}

command_payloads!(
    SubmitCode,
    RequestKernelInfo,
    RequestValue,
    RequestValueInfos,
    SendValue,
    RequestCompletions,
    RequestHoverText,
    RequestSignatureHelp,
    RequestDiagnostics,
    RequestInput,
    SendEditableCode,
    DisplayValue,
    UpdateDisplayedValue,
    Cancel,
    Quit,
);

impl From<ExtensionPayload> for CommandPayload {
    fn from(payload: ExtensionPayload) -> Self {
        Self::Extension(payload)
    }
}

impl From<ExtensionPayload> for KernelCommand {
    fn from(payload: ExtensionPayload) -> Self {
        KernelCommand::new(payload)
    }
}

/// A request addressed to a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCommand {
    /// Name or alias of the kernel that should handle the command.
    pub target_kernel_name: Option<String>,
    /// URI of the kernel that first forwarded the command across hosts.
    pub origin_uri: Option<String>,
    /// URI of the kernel the command is destined for.
    pub destination_uri: Option<String>,
    /// Type-specific data.
    pub payload: CommandPayload,
}

impl KernelCommand {
    /// A command with no routing fields set.
    pub fn new(payload: impl Into<CommandPayload>) -> Self {
        Self {
            target_kernel_name: None,
            origin_uri: None,
            destination_uri: None,
            payload: payload.into(),
        }
    }

    /// Address the command to a kernel by name or alias.
    pub fn with_target_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.target_kernel_name = Some(name.into());
        self
    }

    /// Address the command to a kernel by URI.
    pub fn with_destination_uri(mut self, uri: impl Into<String>) -> Self {
        self.destination_uri = Some(uri.into());
        self
    }

    /// Record where the command came from.
    pub fn with_origin_uri(mut self, uri: impl Into<String>) -> Self {
        self.origin_uri = Some(uri.into());
        self
    }

    /// The `commandType` tag.
    pub fn command_type(&self) -> &str {
        self.payload.command_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_tags_match_variant_names() {
        assert_eq!(
            CommandPayload::from(SubmitCode::new("1+1")).command_type(),
            "SubmitCode"
        );
        assert!(CommandPayload::BUILT_IN.contains(&"RequestKernelInfo"));
        assert_eq!(CommandPayload::BUILT_IN.len(), 15);
    }

    #[test]
    fn empty_payload_serializes_to_empty_object() {
        let fields = CommandPayload::from(RequestKernelInfo {}).to_fields().unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn unknown_tag_is_not_built_in() {
        let decoded = CommandPayload::from_fields("Frobnicate", Map::new()).unwrap();
        assert!(decoded.is_none());
    }
}
