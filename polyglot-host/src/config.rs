//! Host and connector configuration.

use crate::error::HostError;
use polyglot_kernel::DEFAULT_NOOP_COMMAND_TYPES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static configuration for a [`KernelHost`](crate::KernelHost).
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```
/// # use polyglot_host::KernelHostConfig;
/// let config = KernelHostConfig::from_json(r#"{ "hostUri": "kernel://pid-42" }"#).unwrap();
/// assert_eq!(config.host_uri, "kernel://pid-42");
/// assert!(!config.proxy_discovery);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelHostConfig {
    /// URI the composite and its children are homed under.
    pub host_uri: String,

    /// Child that receives commands with no target.
    pub default_kernel_name: Option<String>,

    /// Create proxies for kernels announced by connected peers.
    pub proxy_discovery: bool,

    /// Command types that succeed silently when no handler is registered.
    pub noop_command_types: Vec<String>,
}

impl Default for KernelHostConfig {
    fn default() -> Self {
        Self {
            host_uri: "kernel://local/".into(),
            default_kernel_name: None,
            proxy_discovery: false,
            noop_command_types: DEFAULT_NOOP_COMMAND_TYPES
                .iter()
                .map(|t| (*t).to_owned())
                .collect(),
        }
    }
}

impl KernelHostConfig {
    /// Parse a JSON document, filling missing keys with defaults.
    pub fn from_json(json: &str) -> Result<Self, HostError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How to start a kernel process that speaks newline-delimited JSON on
/// its stdin and stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubprocessConnectorConfig {
    /// Executable to run.
    pub program: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory. Inherited when unset.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// URI of the host inside the process, e.g. `kernel://pid-1234`.
    pub remote_host_uri: String,
}
