//! Value types shared by several command and event payloads.

use serde::{Deserialize, Serialize};

/// A value rendered for a particular MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValue {
    /// MIME type of `value`, e.g. `text/plain`.
    pub mime_type: String,
    /// The rendered value.
    pub value: String,
    /// Whether front ends should skip displaying this value.
    #[serde(default)]
    pub suppress_display: bool,
}

impl FormattedValue {
    /// A value rendered as `mime_type`.
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
            suppress_display: false,
        }
    }

    /// A `text/plain` value.
    pub fn plain_text(value: impl Into<String>) -> Self {
        Self::new("text/plain", value)
    }
}

/// Zero-based position in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinePosition {
    /// Line number.
    pub line: u32,
    /// Character offset within the line.
    pub character: u32,
}

/// A range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinePositionSpan {
    /// Inclusive start.
    pub start: LinePosition,
    /// Exclusive end.
    pub end: LinePosition,
}

/// Description of a variable held by a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelValueInfo {
    /// Variable name.
    pub name: String,
    /// Value preview.
    pub formatted_value: FormattedValue,
    /// Runtime type name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// One entry in a completion list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    /// Text shown in the list.
    pub display_text: String,
    /// Kind of symbol, e.g. `Method`.
    pub kind: String,
    /// Text inserted on accept.
    pub insert_text: String,
    /// Optional documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// Not shown.
    Hidden,
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// A compiler or analyzer message attached to a code range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Affected range.
    pub line_position_span: LinePositionSpan,
    /// Severity.
    pub severity: DiagnosticSeverity,
    /// Diagnostic code, e.g. `CS0103`.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

/// One overload shown by signature help.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInformation {
    /// Full signature text.
    pub label: String,
    /// Documentation for the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<FormattedValue>,
}
