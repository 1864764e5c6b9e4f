//! `changeset get-version`: print the current project version.

use std::io::Write;

use anyhow::{Context, Result};
use changesets_plugin::{CancelToken, Invoke, VersionClient};

use super::Project;
use crate::version::Version;

/// Ask the plugin for the current version and parse it.
pub fn current_version<I: Invoke>(client: &VersionClient<I>, cancel: &CancelToken) -> Result<Version> {
    let raw = client
        .get_version(cancel)
        .context("failed to get version")?;
    raw.parse()
        .with_context(|| format!("plugin returned an unusable version for {}", client.file_path()))
}

/// Run `changeset get-version`.
pub fn run<W: Write>(project: &Project, out: &mut W) -> Result<()> {
    let client = project.version_client()?;
    let version = current_version(&client, &CancelToken::new())?;
    writeln!(out, "{version}")?;
    Ok(())
}
