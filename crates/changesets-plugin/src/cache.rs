//! Digest-addressed disk cache for plugin binaries.
//!
//! # Cache layout
//!
//! ```text
//! <root>/<sha256>/plugin.wasm              verified raw binary
//! <root>/wasmtime/<sha256>-<engine>.cwasm  precompiled module for this host
//! ```
//!
//! The default root is `~/.cache/changesets`. Entries are never invalidated
//! automatically; remove the directory to force a re-fetch.
//!
//! Raw binaries are write-once. A precompiled module that the engine
//! rejects is replaced in place. Each write goes to a temporary file in the target
//! directory and is renamed into place, so a concurrent reader (possibly in
//! another process) never sees a partially written binary.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{HostError, Result};

/// File name of a cached raw binary inside its digest directory.
const PLUGIN_FILE_NAME: &str = "plugin.wasm";

/// Directory holding precompiled modules.
const COMPILED_DIR_NAME: &str = "wasmtime";

/// Get the default cache root, `<home>/.cache/changesets`.
pub fn default_cache_root() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| HostError::Cache {
        path: "~".to_string(),
        cause: "could not determine home directory".to_string(),
    })?;
    Ok(home.join(".cache").join("changesets"))
}

/// Disk cache rooted at a fixed directory.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Create a cache rooted at `root`. Nothing is created on disk until a write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the raw binary for `digest`.
    pub fn plugin_path(&self, digest: &str) -> PathBuf {
        self.root.join(digest).join(PLUGIN_FILE_NAME)
    }

    /// Path of the precompiled module for `digest` built by an engine with `fingerprint`.
    pub fn compiled_path(&self, digest: &str, fingerprint: &str) -> PathBuf {
        self.root
            .join(COMPILED_DIR_NAME)
            .join(format!("{digest}-{fingerprint}.cwasm"))
    }

    /// Check whether an entry exists at `path`.
    pub fn has(path: &Path) -> bool {
        path.is_file()
    }

    /// Store `bytes` at `path` as a read-only file.
    ///
    /// An existing entry is left untouched: the content under a digest is
    /// immutable, so whichever writer got there first wrote the same bytes.
    pub fn write(path: &Path, bytes: &[u8]) -> Result<()> {
        if Self::has(path) {
            return Ok(());
        }

        match Self::stage(path, bytes)?.persist_noclobber(path) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(HostError::cache(path, e.error)),
        }
    }

    /// Atomically overwrite the entry at `path` with `bytes`.
    ///
    /// Only for derived entries such as precompiled modules, which can be
    /// rebuilt locally. Raw binaries go through [`write`](Self::write).
    pub fn replace(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::stage(path, bytes)?
            .persist(path)
            .map(drop)
            .map_err(|e| HostError::cache(path, e.error))
    }

    /// Write `bytes` to a read-only temporary file next to `path`.
    fn stage(path: &Path, bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
        let dir = path
            .parent()
            .ok_or_else(|| HostError::cache(path, "cache path has no parent directory"))?;
        std::fs::create_dir_all(dir).map_err(|e| HostError::cache(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| HostError::cache(dir, e))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| HostError::cache(tmp.path(), e))?;

        let mut permissions = tmp
            .as_file()
            .metadata()
            .map_err(|e| HostError::cache(tmp.path(), e))?
            .permissions();
        permissions.set_readonly(true);
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| HostError::cache(tmp.path(), e))?;
        Ok(tmp)
    }
}
