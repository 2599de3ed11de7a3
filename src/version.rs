//! Version values exchanged between members and the comparator rules that
//! govern how the agreed cluster version may move.

use crate::error::VersionError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Lowest cluster version a freshly bootstrapped cluster assumes when no
/// member version can be proven.
pub const MIN_CLUSTER_VERSION: ClusterVersion = ClusterVersion::new(3, 0);

/// Major.minor capability level agreed across the whole membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterVersion {
    pub major: u64,
    pub minor: u64,
}

impl ClusterVersion {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Accepts `major.minor` or longer dotted forms. Anything past the minor
    /// component (patch, pre-release, build) is ignored.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let mut parts = trimmed.splitn(3, '.');
        let major = parts
            .next()
            .and_then(parse_component)
            .ok_or_else(|| VersionError::invalid(input))?;
        let minor = parts
            .next()
            .and_then(parse_component)
            .ok_or_else(|| VersionError::invalid(input))?;
        if let Some(rest) = parts.next() {
            if rest.is_empty() {
                return Err(VersionError::invalid(input));
            }
        }
        Ok(Self { major, minor })
    }

    pub fn to_short_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    pub fn to_server_version(self) -> ServerVersion {
        ServerVersion(semver::Version::new(self.major, self.minor, 0))
    }
}

fn parse_component(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.0", self.major, self.minor)
    }
}

impl FromStr for ClusterVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ClusterVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClusterVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ClusterVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Full version of a running binary, as reported by a member.
///
/// Equality and ordering follow semver precedence, so build metadata
/// (`3.4.0+git1`) never distinguishes two versions.
#[derive(Debug, Clone)]
pub struct ServerVersion(semver::Version);

impl ServerVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parses a semver string. A bare `major.minor` is normalized to patch 0.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if let Ok(version) = semver::Version::parse(trimmed) {
            return Ok(Self(version));
        }
        let short = ClusterVersion::parse(trimmed)?;
        if trimmed.matches('.').count() != 1 {
            return Err(VersionError::invalid(input));
        }
        Ok(short.to_server_version())
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// Drops patch and pre-release information.
    pub fn cluster_version(&self) -> ClusterVersion {
        ClusterVersion::new(self.0.major, self.0.minor)
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl PartialEq for ServerVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ServerVersion {}

impl Hash for ServerVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.major.hash(state);
        self.0.minor.hash(state);
        self.0.patch.hash(state);
        self.0.pre.hash(state);
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_precedence(&other.0)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ServerVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for ServerVersion {
    fn from(version: semver::Version) -> Self {
        Self(version)
    }
}

/// Orders two cluster versions by major then minor.
pub fn compare(a: &ClusterVersion, b: &ClusterVersion) -> Ordering {
    a.cmp(b)
}

/// A cluster version may only move one step at a time: one minor up or down
/// within the same major, or to the next major at minor zero.
pub fn is_valid_transition(current: &ClusterVersion, candidate: &ClusterVersion) -> bool {
    if current.major == candidate.major {
        return current.minor.abs_diff(candidate.minor) == 1;
    }
    current.major.checked_add(1) == Some(candidate.major) && candidate.minor == 0
}
