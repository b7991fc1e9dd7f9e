//! Kernel descriptors exchanged in `KernelInfoProduced` and `KernelReady`.

use crate::uri;
use serde::{Deserialize, Serialize};

/// A command kind a kernel can handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelCommandInfo {
    /// The command type tag, e.g. `SubmitCode`.
    pub name: String,
}

impl KernelCommandInfo {
    /// Describe a command type.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A magic command (directive) a kernel understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelDirectiveInfo {
    /// Directive name including its prefix, e.g. `#!time`.
    pub name: String,
}

/// Everything a peer needs to know about a kernel in order to route to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfo {
    /// Name of the kernel within its composite.
    pub local_name: String,
    /// Alternative names that resolve to this kernel.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human-facing name.
    pub display_name: String,
    /// Whether the kernel is a composite of other kernels.
    #[serde(default)]
    pub is_composite: bool,
    /// Whether the kernel forwards to a remote kernel.
    #[serde(default)]
    pub is_proxy: bool,
    /// Language the kernel evaluates, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_name: Option<String>,
    /// Version of that language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    /// Normalized URI of the kernel.
    pub uri: String,
    /// For proxies, the URI of the kernel on the other side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    /// Command types the kernel accepts.
    #[serde(default)]
    pub supported_kernel_commands: Vec<KernelCommandInfo>,
    /// Directives the kernel accepts.
    #[serde(default)]
    pub supported_directives: Vec<KernelDirectiveInfo>,
}

impl KernelInfo {
    /// Describe a local kernel named `local_name`, addressed as
    /// `kernel://local/<local_name>` until a composite re-homes it.
    pub fn new(local_name: impl Into<String>) -> Self {
        let local_name = local_name.into();
        let raw = format!("kernel://local/{local_name}");
        let uri = uri::normalize(&raw).unwrap_or(raw);
        Self {
            display_name: local_name.clone(),
            local_name,
            aliases: Vec::new(),
            description: None,
            is_composite: false,
            is_proxy: false,
            language_name: None,
            language_version: None,
            uri,
            remote_uri: None,
            supported_kernel_commands: Vec::new(),
            supported_directives: Vec::new(),
        }
    }

    /// Set language name and version.
    pub fn with_language(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.language_name = Some(name.into());
        self.language_version = Some(version.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Add aliases.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Whether `command_type` is listed as supported.
    pub fn supports_command(&self, command_type: &str) -> bool {
        self.supported_kernel_commands
            .iter()
            .any(|c| c.name == command_type)
    }

    /// Record `command_type` as supported. Returns `false` if it already was.
    pub fn add_supported_command(&mut self, command_type: &str) -> bool {
        if self.supports_command(command_type) {
            return false;
        }
        self.supported_kernel_commands
            .push(KernelCommandInfo::new(command_type));
        true
    }

    /// Fold a remote descriptor into this one. Commands and directives are
    /// unioned; language, display name and composite flag follow the
    /// source when it has them.
    pub fn merge_from(&mut self, source: &KernelInfo) {
        if source.language_name.is_some() {
            self.language_name.clone_from(&source.language_name);
        }
        if source.language_version.is_some() {
            self.language_version.clone_from(&source.language_version);
        }
        if !source.display_name.is_empty() {
            self.display_name.clone_from(&source.display_name);
        }
        self.is_composite = source.is_composite;

        for command in &source.supported_kernel_commands {
            if !self.supported_kernel_commands.contains(command) {
                self.supported_kernel_commands.push(command.clone());
            }
        }
        for directive in &source.supported_directives {
            if !self.supported_directives.contains(directive) {
                self.supported_directives.push(directive.clone());
            }
        }
    }

    /// Every name the kernel answers to.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.local_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}
