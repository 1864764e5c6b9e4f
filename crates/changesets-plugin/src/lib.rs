//! Sandboxed WASM plugin host for changesets.
//!
//! Version plugins read and write the release version kept in a project
//! file (`pyproject.toml`, `Cargo.toml`, a plain `VERSION` file, ...). They
//! are WASI preview1 commands compiled to WebAssembly and are run by this
//! crate once per call.
//!
//! # Architecture
//!
//! A call flows through these stages:
//!
//! - **Fetch**: read the binary from a `file://` or `https://` source
//! - **Verify**: check it against the pinned SHA-256 digest, or compute one
//! - **Cache**: store verified binaries under `~/.cache/changesets/<digest>/`
//! - **Coordinate**: concurrent loads of the same digest run only once
//! - **Execute**: run the module in a fresh wasmtime sandbox with the request
//!   on stdin and the response read back from stdout
//!
//! Requests and responses are `MessagePack` encoded, see [`protocol`].
//!
//! # Example
//!
//! ```ignore
//! use changesets_plugin::{CancelToken, HostConfig, PluginDescriptor, PluginHost, VersionClient};
//!
//! let descriptor = PluginDescriptor {
//!     name: "version-file".to_string(),
//!     url: "file:///opt/plugins/version-file.wasm".to_string(),
//!     sha256: None,
//!     versioned_file: "VERSION".to_string(),
//! };
//!
//! let client = VersionClient::for_host(PluginHost::new(descriptor, HostConfig::new()?));
//! let current = client.get_version(&CancelToken::new())?;
//! client.set_version("1.2.0", &CancelToken::new())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cancel;
pub mod client;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod protocol;
pub mod rpc;
pub mod runtime;
pub mod verify;

pub use cache::{default_cache_root, ArtifactCache};
pub use cancel::CancelToken;
pub use client::VersionClient;
pub use coordinator::CompileCoordinator;
pub use descriptor::PluginDescriptor;
pub use error::{HostError, Result};
pub use fetch::{sha256_hex, Fetch, FetchedArtifact, SourceFetcher};
pub use protocol::{Method, RequestMessage, Response, Status};
pub use rpc::{HostConfig, Invoke, PluginHost};
pub use runtime::{validate_plugin_module, CompiledPlugin, MountPolicy, RuntimeConfig};
