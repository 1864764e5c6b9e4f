//! Semantic versions and the bump types that change them.

use std::fmt;
use std::str::FromStr;

/// Errors from parsing versions and bump types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The string is not `MAJOR.MINOR.PATCH`.
    #[error("invalid version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),

    /// The string is not a known bump type.
    #[error("invalid bump type '{0}'. Must be one of: major, minor, patch, none")]
    InvalidBumpType(String),

    /// A bump would push a component past `u64::MAX`.
    #[error("cannot apply {bump} bump to {version}: component overflow")]
    Overflow {
        /// Version being bumped.
        version: String,
        /// Bump that overflowed.
        bump: BumpType,
    },
}

/// A `MAJOR.MINOR.PATCH` release version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl Version {
    /// Create a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Apply `bump` in place. `None` and `Undetermined` leave the version alone.
    ///
    /// On overflow the version is left unchanged.
    pub fn bump(&mut self, bump: BumpType) -> Result<(), VersionError> {
        *self = self.bumped(bump)?;
        Ok(())
    }

    /// The version after applying `bump`.
    pub fn bumped(self, bump: BumpType) -> Result<Self, VersionError> {
        match bump {
            BumpType::Major => self.bump_major(),
            BumpType::Minor => self.bump_minor(),
            BumpType::Patch => self.bump_patch(),
            BumpType::None | BumpType::Undetermined => Ok(self),
        }
    }

    /// Increment the patch component.
    pub fn bump_patch(self) -> Result<Self, VersionError> {
        let patch = self.increment(self.patch, BumpType::Patch)?;
        Ok(Self::new(self.major, self.minor, patch))
    }

    /// Increment the minor component and reset patch.
    pub fn bump_minor(self) -> Result<Self, VersionError> {
        let minor = self.increment(self.minor, BumpType::Minor)?;
        Ok(Self::new(self.major, minor, 0))
    }

    /// Increment the major component and reset minor and patch.
    pub fn bump_major(self) -> Result<Self, VersionError> {
        let major = self.increment(self.major, BumpType::Major)?;
        Ok(Self::new(major, 0, 0))
    }

    fn increment(self, component: u64, bump: BumpType) -> Result<u64, VersionError> {
        component.checked_add(1).ok_or_else(|| VersionError::Overflow {
            version: self.to_string(),
            bump,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersion(s.to_string());

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64, VersionError> {
            parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())
        };
        let version = Self::new(next()?, next()?, next()?);

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// How much a change moves the version.
///
/// Ordered from least to most significant, so the bump for a set of changes
/// is the maximum of their bump types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum BumpType {
    /// No changes have been seen yet.
    Undetermined = -1,
    /// The change does not affect the version.
    None = 0,
    /// Backwards compatible fix.
    Patch = 1,
    /// Backwards compatible feature.
    Minor = 2,
    /// Breaking change.
    Major = 3,
}

impl BumpType {
    /// The name used in changeset files and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::None => "none",
            Self::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for BumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BumpType {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            "none" => Ok(Self::None),
            other => Err(VersionError::InvalidBumpType(other.to_string())),
        }
    }
}
