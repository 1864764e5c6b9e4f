//! Source fetcher for plugin binaries.
//!
//! Plugins are read either from the local filesystem (`file://`) or over
//! HTTPS (`https://`). The SHA-256 digest is always computed from the bytes
//! actually read; nothing the source claims about itself is trusted.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::{HostError, Result};

const FILE_SCHEME: &str = "file://";
const HTTPS_SCHEME: &str = "https://";

/// Default ceiling for a downloaded plugin binary (64MB).
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// Raw plugin bytes together with the digest computed from them.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Binary contents.
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`.
    pub digest: String,
}

impl FetchedArtifact {
    /// Wrap bytes, computing their digest.
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = sha256_hex(&bytes);
        Self { bytes, digest }
    }
}

/// Something that can retrieve plugin bytes from a URI.
pub trait Fetch: Send + Sync {
    /// Read the resource at `uri`.
    fn fetch(&self, uri: &str, cancel: &CancelToken) -> Result<FetchedArtifact>;
}

/// The default fetcher: local files and HTTPS.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    max_bytes: u64,
}

impl SourceFetcher {
    /// Create a fetcher with the default download ceiling.
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_DOWNLOAD_BYTES)
    }

    /// Create a fetcher that refuses bodies larger than `max_bytes`.
    pub const fn with_limit(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    fn fetch_file(&self, uri: &str, path: &str, cancel: &CancelToken) -> Result<FetchedArtifact> {
        let file = std::fs::File::open(path).map_err(|e| HostError::fetch(uri, e))?;
        let bytes = read_limited(file, uri, self.max_bytes, cancel)?;
        Ok(FetchedArtifact::new(bytes))
    }

    fn fetch_https(&self, uri: &str, cancel: &CancelToken) -> Result<FetchedArtifact> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(cancel.remaining())
            .build()
            .into();

        let mut response = agent.get(uri).call().map_err(|e| {
            if cancel.is_cancelled() {
                HostError::Cancelled
            } else {
                HostError::fetch(uri, e)
            }
        })?;

        let reader = response.body_mut().as_reader();
        let bytes = read_limited(reader, uri, self.max_bytes, cancel)?;
        Ok(FetchedArtifact::new(bytes))
    }
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for SourceFetcher {
    fn fetch(&self, uri: &str, cancel: &CancelToken) -> Result<FetchedArtifact> {
        cancel.check()?;

        if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            self.fetch_file(uri, path, cancel)
        } else if uri.starts_with(HTTPS_SCHEME) {
            tracing::debug!(uri, "downloading plugin");
            self.fetch_https(uri, cancel)
        } else {
            Err(HostError::UnsupportedScheme {
                uri: uri.to_string(),
            })
        }
    }
}

/// Read a body in chunks, polling the cancel token and enforcing a size limit.
fn read_limited(
    mut reader: impl Read,
    uri: &str,
    max_bytes: u64,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut buffer = [0u8; 8192];
    loop {
        cancel.check()?;
        let read = reader
            .read(&mut buffer)
            .map_err(|e| HostError::fetch(uri, e))?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&buffer[..read]);
        if bytes.len() as u64 > max_bytes {
            return Err(HostError::fetch(
                uri,
                format!("body exceeds {max_bytes} bytes"),
            ));
        }
    }
    Ok(bytes)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build a `file://` URI for a local path.
pub fn file_uri(path: &std::path::Path) -> String {
    format!("{FILE_SCHEME}{}", path.display())
}

/// Encode bytes as hex string.
mod hex {
    use std::fmt::Write;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(String::new(), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }
}
