//! Plugin descriptors as they appear in configuration.

use serde::{Deserialize, Serialize};

/// Describes where a plugin lives and which file it manages.
///
/// ```json
/// {
///   "name": "pyproject",
///   "url": "https://example.com/pyproject.wasm",
///   "sha256": "af31d6d6...",
///   "versionedFile": "pyproject.toml"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Human-readable plugin name, also used as the module instance name.
    pub name: String,
    /// Source of the WASM binary (`file://` or `https://`).
    pub url: String,
    /// Pinned SHA-256 digest of the binary, lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Path of the file the plugin reads and writes, relative to the working directory.
    pub versioned_file: String,
}

impl PluginDescriptor {
    /// The pinned digest, treating an empty string as unset.
    pub fn expected_digest(&self) -> Option<&str> {
        self.sha256
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
