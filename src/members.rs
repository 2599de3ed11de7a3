//! Point-in-time view of the versions reported by every member plus the
//! all-or-nothing scans the monitor runs over it.

use crate::version::ServerVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Versions a member reports about itself: the binary it runs and the
/// cluster version it believes is agreed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVersions {
    pub server: String,
    pub cluster: String,
}

impl MemberVersions {
    pub fn new(server: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            cluster: cluster.into(),
        }
    }
}

/// `None` marks a member whose versions could not be fetched this cycle.
pub type MemberVersionSnapshot = BTreeMap<MemberId, Option<MemberVersions>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownMember {
    NoMembers,
    Missing {
        member: MemberId,
    },
    Unparsable {
        member: MemberId,
        value: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HigherPeer {
    pub member: MemberId,
    pub version: ServerVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimalVersionScan {
    pub minimal: Option<ServerVersion>,
    pub unknown: Option<UnknownMember>,
    pub higher_peers: Vec<HigherPeer>,
}

impl MinimalVersionScan {
    fn unknown(reason: UnknownMember, higher_peers: Vec<HigherPeer>) -> Self {
        Self {
            minimal: None,
            unknown: Some(reason),
            higher_peers,
        }
    }
}

/// Smallest server version across the snapshot. A single missing or
/// unparsable member makes the result unknown instead of a partial minimum.
/// Peers running a newer binary than `local` are collected along the way.
pub fn members_minimal_version(
    snapshot: &MemberVersionSnapshot,
    local: &ServerVersion,
) -> MinimalVersionScan {
    let mut minimal: Option<ServerVersion> = None;
    let mut higher_peers = Vec::new();
    if snapshot.is_empty() {
        return MinimalVersionScan::unknown(UnknownMember::NoMembers, higher_peers);
    }
    for (member, versions) in snapshot {
        let Some(versions) = versions else {
            return MinimalVersionScan::unknown(
                UnknownMember::Missing {
                    member: member.clone(),
                },
                higher_peers,
            );
        };
        let version = match ServerVersion::parse(&versions.server) {
            Ok(version) => version,
            Err(err) => {
                return MinimalVersionScan::unknown(
                    UnknownMember::Unparsable {
                        member: member.clone(),
                        value: versions.server.clone(),
                        error: err.to_string(),
                    },
                    higher_peers,
                );
            }
        };
        if *local < version {
            higher_peers.push(HigherPeer {
                member: member.clone(),
                version: version.clone(),
            });
        }
        minimal = match minimal {
            Some(current) if current <= version => Some(current),
            _ => Some(version),
        };
    }
    MinimalVersionScan {
        minimal,
        unknown: None,
        higher_peers,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMatch {
    Matched,
    NoMembers,
    Unknown {
        member: MemberId,
    },
    Unparsable {
        member: MemberId,
        value: String,
        error: String,
    },
    Mismatch {
        member: MemberId,
        reported: ServerVersion,
    },
}

impl TargetMatch {
    pub fn is_matched(&self) -> bool {
        matches!(self, TargetMatch::Matched)
    }
}

/// Whether every member reports `target` as its cluster version.
pub fn versions_match_target(snapshot: &MemberVersionSnapshot, target: &ServerVersion) -> TargetMatch {
    if snapshot.is_empty() {
        return TargetMatch::NoMembers;
    }
    for (member, versions) in snapshot {
        let Some(versions) = versions else {
            return TargetMatch::Unknown {
                member: member.clone(),
            };
        };
        let reported = match ServerVersion::parse(&versions.cluster) {
            Ok(version) => version,
            Err(err) => {
                return TargetMatch::Unparsable {
                    member: member.clone(),
                    value: versions.cluster.clone(),
                    error: err.to_string(),
                }
            }
        };
        if reported != *target {
            return TargetMatch::Mismatch {
                member: member.clone(),
                reported,
            };
        }
    }
    TargetMatch::Matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, Option<(&str, &str)>)]) -> MemberVersionSnapshot {
        entries
            .iter()
            .map(|(id, versions)| {
                (
                    MemberId::from(*id),
                    versions.map(|(server, cluster)| MemberVersions::new(server, cluster)),
                )
            })
            .collect()
    }

    #[test]
    fn minimal_version_picks_lowest_binary() {
        let members = snapshot(&[
            ("a", Some(("3.5.2", "3.5.0"))),
            ("b", Some(("3.5.0", "3.5.0"))),
            ("c", Some(("3.6.0", "3.5.0"))),
        ]);
        let scan = members_minimal_version(&members, &ServerVersion::new(3, 6, 0));
        assert_eq!(scan.minimal, Some(ServerVersion::new(3, 5, 0)));
        assert!(scan.unknown.is_none());
        assert!(scan.higher_peers.is_empty());
    }

    #[test]
    fn missing_member_makes_minimum_unknown() {
        let members = snapshot(&[("a", Some(("3.5.0", "3.5.0"))), ("b", None)]);
        let scan = members_minimal_version(&members, &ServerVersion::new(3, 5, 0));
        assert_eq!(scan.minimal, None);
        assert_eq!(
            scan.unknown,
            Some(UnknownMember::Missing {
                member: MemberId::from("b")
            })
        );
    }

    #[test]
    fn unparsable_member_makes_minimum_unknown() {
        let members = snapshot(&[("a", Some(("garbage", "3.5.0")))]);
        let scan = members_minimal_version(&members, &ServerVersion::new(3, 5, 0));
        assert!(matches!(
            scan.unknown,
            Some(UnknownMember::Unparsable { ref value, .. }) if value == "garbage"
        ));
    }

    #[test]
    fn higher_peers_are_reported() {
        let members = snapshot(&[
            ("a", Some(("3.5.0", "3.5.0"))),
            ("b", Some(("3.6.1", "3.5.0"))),
        ]);
        let scan = members_minimal_version(&members, &ServerVersion::new(3, 5, 0));
        assert_eq!(scan.minimal, Some(ServerVersion::new(3, 5, 0)));
        assert_eq!(scan.higher_peers.len(), 1);
        assert_eq!(scan.higher_peers[0].member.as_str(), "b");
    }

    #[test]
    fn target_match_requires_every_member() {
        let target = ServerVersion::new(3, 4, 0);
        let all = snapshot(&[
            ("a", Some(("3.4.0", "3.4.0"))),
            ("b", Some(("3.4.1", "3.4.0"))),
        ]);
        assert!(versions_match_target(&all, &target).is_matched());

        let one_off = snapshot(&[
            ("a", Some(("3.4.0", "3.4.0"))),
            ("b", Some(("3.5.0", "3.5.0"))),
        ]);
        assert!(matches!(
            versions_match_target(&one_off, &target),
            TargetMatch::Mismatch { ref member, .. } if member.as_str() == "b"
        ));

        let unknown = snapshot(&[("a", Some(("3.4.0", "3.4.0"))), ("b", None)]);
        assert!(matches!(
            versions_match_target(&unknown, &target),
            TargetMatch::Unknown { .. }
        ));
        assert_eq!(
            versions_match_target(&MemberVersionSnapshot::new(), &target),
            TargetMatch::NoMembers
        );
    }
}
