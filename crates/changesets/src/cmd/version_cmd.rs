//! `changeset version`: apply pending changes to the project version.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use changesets_plugin::{CancelToken, Invoke, VersionClient};

use super::get_version::current_version;
use super::Project;
use crate::changeset::{self, Change, Changeset};
use crate::version::BumpType;

/// Arguments for `changeset version`.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Show the next version without writing it or consuming changes.
    #[arg(long)]
    pub dry_run: bool,
}

/// Compute the next version from `changes` and, unless dry-running, write it.
///
/// The new version is written before the change notes are removed, so a
/// failing plugin leaves the pending changes in place.
pub fn apply<I: Invoke, W: Write>(
    args: &Args,
    changes: Vec<Change>,
    client: &VersionClient<I>,
    out: &mut W,
) -> Result<()> {
    let cancel = CancelToken::new();
    let changeset = Changeset {
        current_version: current_version(client, &cancel)?,
        changes,
    };

    let bump_type = changeset.final_bump_type();
    if bump_type <= BumpType::None {
        writeln!(
            out,
            "The version will remain at {} as all changes are not version impacting.",
            changeset.current_version
        )?;
        return Ok(());
    }

    let next_version = changeset
        .next_version()
        .context("failed to compute next version")?;
    writeln!(
        out,
        "The version will be bumped to: `{next_version}` because a {bump_type} change was determined from the changes."
    )?;

    if args.dry_run {
        return Ok(());
    }

    client
        .set_version(&next_version.to_string(), &cancel)
        .context("failed to set version")?;
    changeset.consume()?;

    writeln!(out, "Changeset consumed successfully.")?;
    Ok(())
}

/// Run `changeset version` for changes recorded under `root`.
pub fn run_in<I, W, F>(args: &Args, root: &Path, connect: F, out: &mut W) -> Result<()>
where
    I: Invoke,
    W: Write,
    F: FnOnce() -> Result<VersionClient<I>>,
{
    let changes = changeset::read_changes(root)?;
    if changes.is_empty() {
        writeln!(out, "No changesets found. Please run 'changeset add' to add changes.")?;
        return Ok(());
    }

    let client = connect().context("failed to load version plugin")?;
    apply(args, changes, &client, out)
}

/// Run `changeset version`.
pub fn run<W: Write>(args: &Args, project: &Project, out: &mut W) -> Result<()> {
    run_in(args, &project.root, || project.version_client(), out)
}
