//! Project configuration in `.changeset/config.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use changesets_plugin::PluginDescriptor;
use serde::{Deserialize, Serialize};

use crate::changeset::CHANGESET_DIR;

/// File name of the configuration inside the changeset directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Project configuration.
///
/// ```json
/// {
///   "plugin": {
///     "name": "version-file",
///     "url": "https://example.com/version-file.wasm",
///     "sha256": "5d41402a...",
///     "versionedFile": "VERSION"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The plugin that reads and writes the project version.
    pub plugin: PluginDescriptor,
}

impl Config {
    /// Location of the configuration for the project at `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(CHANGESET_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load the configuration for the project at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }

        let contents =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::debug!(plugin = %config.plugin.name, url = %config.plugin.url, "loaded config");
        Ok(config)
    }
}
