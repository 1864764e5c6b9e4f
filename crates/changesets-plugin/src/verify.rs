//! Checksum verification for plugin binaries.

use crate::cancel::CancelToken;
use crate::descriptor::PluginDescriptor;
use crate::error::{HostError, Result};
use crate::fetch::Fetch;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// Determine the digest a plugin binary must have.
///
/// A pinned digest is returned as-is (lowercased) without touching the
/// network. Otherwise the source is fetched once purely to compute it, and
/// a warning recommends pinning the value in the configuration.
pub fn resolve_expected_digest(
    descriptor: &PluginDescriptor,
    fetcher: &dyn Fetch,
    cancel: &CancelToken,
) -> Result<String> {
    if let Some(pinned) = descriptor.expected_digest() {
        let pinned = pinned.to_ascii_lowercase();
        if pinned.len() != SHA256_HEX_LEN || !pinned.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HostError::InvalidDescriptor(format!(
                "sha256 for plugin '{}' must be {SHA256_HEX_LEN} hex characters, got '{pinned}'",
                descriptor.name
            )));
        }
        return Ok(pinned);
    }

    let artifact = fetcher.fetch(&descriptor.url, cancel)?;
    tracing::warn!(
        plugin = %descriptor.name,
        sha256 = %artifact.digest,
        "fetching WASM binary to calculate sha256. Set this value in your config file to prevent unneeded work"
    );
    Ok(artifact.digest)
}

/// Check that `actual` matches `expected`.
pub fn verify(actual: &str, expected: &str) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(HostError::IntegrityMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{sha256_hex, FetchedArtifact};

    struct StaticFetcher(&'static [u8]);

    impl Fetch for StaticFetcher {
        fn fetch(&self, _uri: &str, _cancel: &CancelToken) -> Result<FetchedArtifact> {
            Ok(FetchedArtifact::new(self.0.to_vec()))
        }
    }

    struct PanickingFetcher;

    impl Fetch for PanickingFetcher {
        fn fetch(&self, uri: &str, _cancel: &CancelToken) -> Result<FetchedArtifact> {
            panic!("unexpected fetch of {uri}");
        }
    }

    fn descriptor(sha256: Option<&str>) -> PluginDescriptor {
        PluginDescriptor {
            name: "test".to_string(),
            url: "https://example.com/test.wasm".to_string(),
            sha256: sha256.map(String::from),
            versioned_file: "VERSION".to_string(),
        }
    }

    #[test]
    fn test_pinned_digest_skips_fetch() {
        let pinned = sha256_hex(b"plugin").to_ascii_uppercase();
        let digest =
            resolve_expected_digest(&descriptor(Some(&pinned)), &PanickingFetcher, &CancelToken::new())
                .unwrap();
        assert_eq!(digest, sha256_hex(b"plugin"));
    }

    #[test]
    fn test_missing_digest_is_computed() {
        let digest = resolve_expected_digest(
            &descriptor(None),
            &StaticFetcher(b"plugin"),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(digest, sha256_hex(b"plugin"));
    }

    #[test]
    fn test_malformed_digest_rejected() {
        let err = resolve_expected_digest(
            &descriptor(Some("not-a-digest")),
            &PanickingFetcher,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, HostError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_verify() {
        assert!(verify("abc", "abc").is_ok());
        assert_eq!(
            verify("abc", "def"),
            Err(HostError::IntegrityMismatch {
                expected: "def".to_string(),
                actual: "abc".to_string(),
            })
        );
    }
}
