//! Pending changes recorded as markdown notes.
//!
//! Each change lives in `.changeset/<name>.md`:
//!
//! ```text
//! ---
//! changeset/type: minor
//! ---
//!
//! # Add support for workspaces
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;

use crate::version::{BumpType, Version, VersionError};

/// Directory holding configuration and pending changes.
pub const CHANGESET_DIR: &str = ".changeset";

/// Front-matter key naming the bump type of a change.
pub const BUMP_TYPE_KEY: &str = "changeset/type";

const FRONT_MATTER_DELIMITER: &str = "---";

/// Words joined to build change file names.
const NAMES: &[&str] = &[
    "hello", "world", "dog", "arnold", "cat", "kitten", "puppy", "armadillo", "giraffe", "happy",
    "sad", "emotional", "earth", "mars", "car", "robot", "whale", "python",
];

const NAME_PARTS: usize = 3;

/// Attempts at finding an unused file name before giving up.
const MAX_NAME_ATTEMPTS: usize = 100;

/// One pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// How much this change moves the version.
    pub bump_type: BumpType,
    /// The body of the note.
    pub message: String,
    /// Where the note is stored.
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct FrontMatter {
    #[serde(rename = "changeset/type")]
    bump_type: Option<String>,
}

/// The current version together with every pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// Version before any of the changes are applied.
    pub current_version: Version,
    /// Pending changes.
    pub changes: Vec<Change>,
}

impl Changeset {
    /// The most significant bump among the changes, or `Undetermined` if there are none.
    pub fn final_bump_type(&self) -> BumpType {
        self.changes
            .iter()
            .map(|change| change.bump_type)
            .max()
            .unwrap_or(BumpType::Undetermined)
    }

    /// The version once every change is applied.
    pub fn next_version(&self) -> Result<Version, VersionError> {
        self.current_version.bumped(self.final_bump_type())
    }

    /// Delete the change notes and return the version they lead to.
    pub fn consume(&self) -> Result<Version> {
        if self.changes.is_empty() {
            bail!("no changesets found");
        }

        let next = self.next_version()?;
        for change in &self.changes {
            fs::remove_file(&change.path)
                .with_context(|| format!("failed to remove {}", change.path.display()))?;
        }
        tracing::debug!(count = self.changes.len(), %next, "consumed changes");
        Ok(next)
    }
}

/// Build a random `word-word-word` name.
pub fn generate_name(rng: &mut impl Rng) -> String {
    (0..NAME_PARTS)
        .map(|_| NAMES[rng.gen_range(0..NAMES.len())])
        .collect::<Vec<_>>()
        .join("-")
}

/// Render a change note.
pub fn render(bump_type: BumpType, message: &str) -> String {
    format!("---\n{BUMP_TYPE_KEY}: {bump_type}\n---\n\n# {message}\n")
}

/// Write a new change note under `root` and return its path.
pub fn create_change_file(root: &Path, bump_type: BumpType, message: &str) -> Result<PathBuf> {
    let dir = root.join(CHANGESET_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let contents = render(bump_type, message);
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(format!("{}.md", generate_name(&mut rng)));
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(contents.as_bytes())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", path.display()))
            }
        }
    }
    bail!("could not find an unused changeset name in {}", dir.display())
}

/// Parse a change note.
pub fn parse_change(path: &Path, contents: &str) -> Result<Change> {
    let (front_matter, body) = split_front_matter(contents)
        .with_context(|| format!("{} has no front matter", path.display()))?;

    let front_matter: FrontMatter = serde_yaml::from_str(front_matter)
        .with_context(|| format!("invalid front matter in {}", path.display()))?;
    let bump_type = match front_matter.bump_type.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("invalid {BUMP_TYPE_KEY} in {}", path.display()))?,
        _ => bail!("changeset file {} does not have a type", path.display()),
    };

    let message = body.trim();
    let message = message.strip_prefix("# ").unwrap_or(message).to_string();

    Ok(Change {
        bump_type,
        message,
        path: path.to_path_buf(),
    })
}

/// Split `---`-delimited front matter from the rest of a document.
fn split_front_matter(contents: &str) -> Option<(&str, &str)> {
    let rest = contents.strip_prefix(FRONT_MATTER_DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Read every pending change under `root`, sorted by path.
pub fn read_changes(root: &Path) -> Result<Vec<Change>> {
    let dir = root.join(CHANGESET_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed to read {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    let changes = paths
        .iter()
        .map(|path| {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            parse_change(path, &contents)
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(count = changes.len(), "read pending changes");
    Ok(changes)
}
