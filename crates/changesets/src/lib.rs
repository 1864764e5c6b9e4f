//! Changesets: record changes, then release them as a new version.
//!
//! Changes are markdown notes in `.changeset/` tagged with a bump type. When
//! a release is cut, the most significant bump is applied to the current
//! version. Reading and writing the version is delegated to a sandboxed WASM
//! plugin (see [`changesets_plugin`]), so any file format can be supported.
//!
//! # Example Usage
//!
//! ```bash
//! changeset add -t minor -m "Support workspaces"
//! changeset version --dry-run
//! changeset version
//! changeset get-version
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod changeset;
pub mod cmd;
pub mod config;
pub mod version;
