//! `changeset add`: record a new change.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};

use super::Project;
use crate::changeset;
use crate::version::BumpType;

/// Arguments for `changeset add`.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Type of change: major, minor, patch or none. Prompted for when omitted.
    #[arg(short = 't', long)]
    pub bump_type: Option<BumpType>,

    /// Summary of the change. Prompted for when omitted.
    #[arg(short, long)]
    pub message: Option<String>,
}

const PROMPT_CHOICES: [(&str, BumpType); 3] = [
    ("Major", BumpType::Major),
    ("Minor", BumpType::Minor),
    ("Patch", BumpType::Patch),
];

fn prompt_bump_type() -> Result<BumpType> {
    let labels: Vec<&str> = PROMPT_CHOICES.iter().map(|(label, _)| *label).collect();
    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Type of change")
        .items(&labels)
        .default(2)
        .interact()
        .context("failed to read type of change")?;
    Ok(PROMPT_CHOICES[index].1)
}

fn prompt_message() -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Message")
        .interact_text()
        .context("failed to read message")
}

/// Write the change note and report where it went.
pub fn create<W: Write>(
    root: &Path,
    bump_type: BumpType,
    message: &str,
    out: &mut W,
) -> Result<PathBuf> {
    let path = changeset::create_change_file(root, bump_type, message)?;
    let shown = path.strip_prefix(root).unwrap_or(&path);
    writeln!(out, "Created changeset {}", shown.display())?;
    writeln!(out, "You can now edit the file and commit it to version control.")?;
    Ok(path)
}

/// Run `changeset add`.
pub fn run<W: Write>(args: &Args, project: &Project, out: &mut W) -> Result<()> {
    let bump_type = match args.bump_type {
        Some(bump_type) => bump_type,
        None => prompt_bump_type()?,
    };
    let message = match &args.message {
        Some(message) => message.clone(),
        None => prompt_message()?,
    };

    create(&project.root, bump_type, &message, out).map(drop)
}
