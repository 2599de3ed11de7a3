#[path = "support/ports.rs"]
mod ports;

use ports::{members, RecordingCluster, RecordingStorage};
use std::cmp::Ordering;
use vermon::{
    compare, is_valid_transition, ClusterVersion, ClusterVersionDecision, DeferReason,
    MonitorConfig, ServerVersion, VersionMonitor,
};

fn grid() -> Vec<ClusterVersion> {
    let mut versions: Vec<_> = (0..=6).map(|minor| ClusterVersion::new(3, minor)).collect();
    versions.extend([ClusterVersion::new(4, 0), ClusterVersion::new(4, 1)]);
    versions
}

#[test]
fn proposes_exactly_the_valid_forward_transitions() {
    for current in grid() {
        for minimal in grid() {
            let server = minimal.to_server_version().to_string();
            let cluster = RecordingCluster::new()
                .with_cluster_version(Some(current))
                .with_members(members(&[
                    ("a", Some((server.as_str(), "3.0.0"))),
                    ("b", Some(("9.9.9", "3.0.0"))),
                ]));
            let monitor = VersionMonitor::new(
                cluster,
                RecordingStorage::default(),
                &MonitorConfig::for_local_version("9.9.9"),
            )
            .unwrap();
            let decision = monitor.update_cluster_version_if_needed();
            let expected = compare(&minimal, &current) == Ordering::Greater
                && is_valid_transition(&current, &minimal);
            assert_eq!(
                decision.proposed().is_some(),
                expected,
                "current={current} minimal={minimal} decision={decision:?}"
            );
            if expected {
                assert_eq!(monitor.cluster().proposed(), vec![minimal]);
            } else {
                assert!(monitor.cluster().proposed().is_empty());
                assert!(matches!(
                    decision,
                    ClusterVersionDecision::Unchanged(
                        DeferReason::NotAhead { .. } | DeferReason::InvalidTransition { .. }
                    )
                ));
            }
        }
    }
}

#[test]
fn major_bump_only_from_any_minor_to_zero() {
    assert!(is_valid_transition(
        &ClusterVersion::new(3, 6),
        &ClusterVersion::new(4, 0)
    ));
    assert!(!is_valid_transition(
        &ClusterVersion::new(3, 6),
        &ClusterVersion::new(4, 1)
    ));
    assert!(!is_valid_transition(
        &ClusterVersion::new(4, 0),
        &ClusterVersion::new(3, 6)
    ));
}

#[test]
fn patch_and_prerelease_do_not_affect_cluster_version() {
    let release = ServerVersion::parse("3.5.2").unwrap();
    let prerelease = ServerVersion::parse("3.5.0-alpha.1").unwrap();
    assert_eq!(release.cluster_version(), prerelease.cluster_version());
    assert!(prerelease < release);
    assert_eq!(
        ServerVersion::parse("3.5").unwrap(),
        ServerVersion::new(3, 5, 0)
    );
}
