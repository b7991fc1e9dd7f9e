//! Events: notifications published by kernels while handling commands.

use crate::kernel_info::KernelInfo;
use crate::value::{
    CompletionItem, Diagnostic, FormattedValue, KernelValueInfo, SignatureInformation,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The command completed successfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSucceeded {}

/// The command failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailed {
    /// Human readable reason.
    pub message: String,
    /// Underlying cause, if one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl CommandFailed {
    /// A failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exception: None,
        }
    }
}

/// The command was cancelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandCancelled {}

/// A kernel describes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfoProduced {
    /// The descriptor.
    pub kernel_info: KernelInfo,
}

/// A host is ready and announces the kernels it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelReady {
    /// Descriptors of the exposed kernels.
    pub kernel_infos: Vec<KernelInfo>,
}

/// Code was received for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSubmissionReceived {
    /// The code.
    pub code: String,
}

/// Submitted code parsed as a complete submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteCodeSubmissionReceived {
    /// The code.
    pub code: String,
}

/// Submitted code was incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncompleteCodeSubmissionReceived {}

/// Execution produced a return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnValueProduced {
    /// Renderings of the value.
    pub formatted_values: Vec<FormattedValue>,
    /// Id for later updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

/// A value was displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedValueProduced {
    /// Renderings of the value.
    pub formatted_values: Vec<FormattedValue>,
    /// Id for later updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

/// A displayed value was replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedValueUpdated {
    /// New renderings.
    pub formatted_values: Vec<FormattedValue>,
    /// Id of the displayed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

/// Output written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardOutputValueProduced {
    /// The output.
    pub formatted_values: Vec<FormattedValue>,
}

/// Output written to stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardErrorValueProduced {
    /// The output.
    pub formatted_values: Vec<FormattedValue>,
}

/// Answer to `RequestValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueProduced {
    /// Variable name.
    pub name: String,
    /// The value.
    pub formatted_value: FormattedValue,
}

/// Answer to `RequestValueInfos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfosProduced {
    /// Variables.
    pub value_infos: Vec<KernelValueInfo>,
}

/// Execution reported an error without failing the command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProduced {
    /// Error message.
    pub message: String,
    /// Renderings of the error.
    #[serde(default)]
    pub formatted_values: Vec<FormattedValue>,
}

/// Answer to `RequestDiagnostics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsProduced {
    /// Diagnostics found.
    pub diagnostics: Vec<Diagnostic>,
}

/// Answer to `RequestCompletions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionsProduced {
    /// Completion items.
    pub completions: Vec<CompletionItem>,
}

/// Answer to `RequestHoverText`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverTextProduced {
    /// Hover content.
    pub content: Vec<FormattedValue>,
}

/// Answer to `RequestSignatureHelp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpProduced {
    /// Candidate signatures.
    pub signatures: Vec<SignatureInformation>,
    /// Index of the active signature.
    #[serde(default)]
    pub active_signature_index: u32,
    /// Index of the active parameter.
    #[serde(default)]
    pub active_parameter_index: u32,
}

/// Answer to `RequestInput`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputProduced {
    /// What the user typed.
    pub value: String,
}

/// An event kind that is not built in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionEvent {
    /// The `eventType` tag.
    pub type_name: String,
    /// Event fields.
    pub fields: Map<String, Value>,
}

impl ExtensionEvent {
    /// An extension event with no fields.
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

macro_rules! event_payloads {
    ($($name:ident),* $(,)?) => {
        /// A kernel event.
        #[non_exhaustive]
        #[derive(Debug, Clone, PartialEq)]
        pub enum KernelEvent {
            $(
                #[doc = concat!("`", stringify!($name), "`")]
                $name($name),
            )*
            /// An event kind registered at runtime.
            Extension(ExtensionEvent),
        }

        impl KernelEvent {
            /// Built-in event type tags.
            pub const BUILT_IN: &'static [&'static str] = &[$(stringify!($name)),*];

            /// The `eventType` tag.
            pub fn event_type(&self) -> &str {
                match self {
                    $(Self::$name(_) => stringify!($name),)*
                    Self::Extension(e) => &e.type_name,
                }
            }

            pub(crate) fn to_value(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(Self::$name(p) => serde_json::to_value(p),)*
                    Self::Extension(e) => Ok(Value::Object(e.fields.clone())),
                }
            }

            /// Decode a built-in event. `Ok(None)` means the tag is not
            /// built in.
            pub(crate) fn from_value(
                event_type: &str,
                value: Value,
            ) -> Result<Option<Self>, serde_json::Error> {
                match event_type {
                    $(stringify!($name) => {
                        serde_json::from_value(value).map(|p| Some(Self::$name(p)))
                    })*
                    _ => Ok(None),
                }
            }
        }

        $(
            impl From<$name> for KernelEvent {
                fn from(event: $name) -> Self {
                    Self::$name(event)
                }
            }
        )*
    };
}

event_payloads!(
    CommandSucceeded,
    CommandFailed,
    CommandCancelled,
    KernelInfoProduced,
    KernelReady,
    CodeSubmissionReceived,
    CompleteCodeSubmissionReceived,
    IncompleteCodeSubmissionReceived,
    ReturnValueProduced,
    DisplayedValueProduced,
    DisplayedValueUpdated,
    StandardOutputValueProduced,
    StandardErrorValueProduced,
    ValueProduced,
    ValueInfosProduced,
    ErrorProduced,
    DiagnosticsProduced,
    CompletionsProduced,
    HoverTextProduced,
    SignatureHelpProduced,
    InputProduced,
);

impl From<ExtensionEvent> for KernelEvent {
    fn from(event: ExtensionEvent) -> Self {
        Self::Extension(event)
    }
}

impl KernelEvent {
    /// Whether this event ends a command: succeeded, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CommandSucceeded(_) | Self::CommandFailed(_) | Self::CommandCancelled(_)
        )
    }
}
