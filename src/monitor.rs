//! Leader-side decision engine for cluster version, storage schema version,
//! and downgrade completion.
//!
//! The monitor holds no state between calls. Each entry point reads fresh
//! state through its ports, decides, and writes back only when a change is
//! warranted. Any uncertainty defers the decision to the next tick.

use crate::config::MonitorConfig;
use crate::error::{ConfigError, MonitorError, PortError};
use crate::members::{
    members_minimal_version, versions_match_target, HigherPeer, TargetMatch, UnknownMember,
};
use crate::ports::{ClusterPort, ProposalContext, StoragePort, StorageTxn};
use crate::telemetry::{self, version_gauge, MonitorMetrics};
use crate::version::{is_valid_transition, ClusterVersion, ServerVersion};
use log::{debug, error, info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapSource {
    Members,
    MinimumSupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    MembersUnknown(UnknownMember),
    NotAhead {
        current: ClusterVersion,
        minimal: ClusterVersion,
    },
    InvalidTransition {
        current: ClusterVersion,
        candidate: ClusterVersion,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterVersionDecision {
    Bootstrap {
        version: ClusterVersion,
        source: BootstrapSource,
    },
    Advance {
        from: ClusterVersion,
        to: ClusterVersion,
    },
    Unchanged(DeferReason),
}

impl ClusterVersionDecision {
    pub fn proposed(&self) -> Option<ClusterVersion> {
        match self {
            ClusterVersionDecision::Bootstrap { version, .. } => Some(*version),
            ClusterVersionDecision::Advance { to, .. } => Some(*to),
            ClusterVersionDecision::Unchanged(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVersionDecision {
    ClusterVersionUnknown,
    InSync(ClusterVersion),
    Migrated {
        from: Option<ClusterVersion>,
        to: ClusterVersion,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowngradeDecision {
    NotActive,
    InvalidTarget { raw: String },
    Pending(TargetMatch),
    Cancelled { target: ServerVersion },
    CancelFailed {
        target: ServerVersion,
        error: PortError,
    },
}

pub struct VersionMonitor<C, S> {
    cluster: C,
    storage: S,
    local_version: ServerVersion,
    min_cluster_version: ClusterVersion,
    proposal_timeout: Duration,
    metrics: MonitorMetrics,
}

impl<C, S> VersionMonitor<C, S>
where
    C: ClusterPort,
    S: StoragePort,
{
    pub fn new(cluster: C, storage: S, config: &MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cluster,
            storage,
            local_version: config.parsed_local_version()?,
            min_cluster_version: config.min_cluster_version,
            proposal_timeout: config.proposal_timeout(),
            metrics: MonitorMetrics::default(),
        })
    }

    pub fn with_metrics(mut self, metrics: MonitorMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn local_version(&self) -> &ServerVersion {
        &self.local_version
    }

    /// Proposes a new cluster version when the whole membership runs at
    /// least one step past the current one. The proposal is submitted
    /// without waiting for it to commit.
    pub fn update_cluster_version_if_needed(&self) -> ClusterVersionDecision {
        let decision = self.decide_cluster_version();
        let Some(version) = decision.proposed() else {
            self.metrics
                .inc_counter(telemetry::CLUSTER_VERSION_DEFERRED, 1);
            return decision;
        };
        info!(
            "event=cluster_version_propose version={} decision={:?}",
            version, decision
        );
        self.metrics
            .inc_counter(telemetry::CLUSTER_VERSION_PROPOSED, 1);
        let metrics = self.metrics.clone();
        self.cluster.update_cluster_version(
            version,
            Box::new(move |result| match result {
                Ok(()) => {
                    metrics.set_gauge(
                        telemetry::CLUSTER_VERSION_GAUGE,
                        version_gauge(version.major, version.minor),
                    );
                }
                Err(err) => {
                    metrics.inc_counter(telemetry::CLUSTER_VERSION_PROPOSAL_FAILED, 1);
                    warn!(
                        "event=cluster_version_propose outcome=failed version={} error={}",
                        version, err
                    );
                }
            }),
        );
        decision
    }

    /// Decision half of [`Self::update_cluster_version_if_needed`]; never
    /// writes anything.
    pub fn decide_cluster_version(&self) -> ClusterVersionDecision {
        let current = self.cluster.cluster_version();
        let minimal = self.members_minimal_version();
        let Some(current) = current else {
            return match minimal {
                Ok(minimal) => ClusterVersionDecision::Bootstrap {
                    version: minimal,
                    source: BootstrapSource::Members,
                },
                Err(_) => ClusterVersionDecision::Bootstrap {
                    version: self.min_cluster_version,
                    source: BootstrapSource::MinimumSupported,
                },
            };
        };
        let minimal = match minimal {
            Ok(minimal) => minimal,
            Err(unknown) => {
                return ClusterVersionDecision::Unchanged(DeferReason::MembersUnknown(unknown))
            }
        };
        if minimal <= current {
            debug!(
                "event=cluster_version_unchanged current={} members_minimal={}",
                current, minimal
            );
            return ClusterVersionDecision::Unchanged(DeferReason::NotAhead { current, minimal });
        }
        if !is_valid_transition(&current, &minimal) {
            debug!(
                "event=cluster_version_deferred reason=invalid_transition current={} candidate={}",
                current, minimal
            );
            return ClusterVersionDecision::Unchanged(DeferReason::InvalidTransition {
                current,
                candidate: minimal,
            });
        }
        ClusterVersionDecision::Advance {
            from: current,
            to: minimal,
        }
    }

    /// Minimal member binary version truncated to major.minor.
    fn members_minimal_version(&self) -> Result<ClusterVersion, UnknownMember> {
        let snapshot = self.cluster.members_versions();
        let scan = members_minimal_version(&snapshot, &self.local_version);
        for HigherPeer { member, version } in &scan.higher_peers {
            self.metrics
                .inc_counter(telemetry::HIGHER_VERSION_PEERS, 1);
            warn!(
                "event=higher_version_member local_version={} member={} member_version={}",
                self.local_version, member, version
            );
        }
        match (scan.minimal, scan.unknown) {
            (Some(minimal), None) => Ok(minimal.cluster_version()),
            (_, Some(unknown)) => {
                match &unknown {
                    UnknownMember::Unparsable {
                        member,
                        value,
                        error,
                    } => warn!(
                        "event=member_version_unparsable member={} member_version={:?} error={}",
                        member, value, error
                    ),
                    UnknownMember::Missing { member } => {
                        debug!("event=member_version_unknown member={}", member)
                    }
                    UnknownMember::NoMembers => debug!("event=member_version_unknown members=0"),
                }
                Err(unknown)
            }
            (None, None) => Err(UnknownMember::NoMembers),
        }
    }

    /// Aligns the storage schema with the cluster version. Migration errors
    /// are logged and returned; the schema is left as it was and the next
    /// tick retries.
    pub fn update_storage_version_if_needed(
        &self,
    ) -> Result<StorageVersionDecision, MonitorError> {
        let Some(cluster_version) = self.cluster.cluster_version() else {
            return Ok(StorageVersionDecision::ClusterVersionUnknown);
        };
        let mut txn = self.storage.lock();
        let storage_version = txn.storage_version();
        if storage_version == Some(cluster_version) {
            self.metrics.set_gauge(
                telemetry::STORAGE_VERSION_GAUGE,
                version_gauge(cluster_version.major, cluster_version.minor),
            );
            return Ok(StorageVersionDecision::InSync(cluster_version));
        }
        if let Some(storage_version) = storage_version {
            info!(
                "event=storage_version_mismatch cluster_version={} storage_version={}",
                cluster_version, storage_version
            );
        }
        match txn.update_storage_version(cluster_version) {
            Ok(()) => {
                self.metrics.inc_counter(telemetry::STORAGE_MIGRATIONS, 1);
                self.metrics.set_gauge(
                    telemetry::STORAGE_VERSION_GAUGE,
                    version_gauge(cluster_version.major, cluster_version.minor),
                );
                Ok(StorageVersionDecision::Migrated {
                    from: storage_version,
                    to: cluster_version,
                })
            }
            Err(err) => {
                self.metrics
                    .inc_counter(telemetry::STORAGE_MIGRATION_FAILED, 1);
                error!(
                    "event=storage_version_migrate outcome=failed storage_version={} error={}",
                    cluster_version, err
                );
                Err(MonitorError::Migration(err))
            }
        }
    }

    /// Clears the downgrade flag once every member reports the target as its
    /// cluster version.
    pub fn cancel_downgrade_if_needed(&self) -> DowngradeDecision {
        let Some(info) = self.cluster.downgrade_info().filter(|info| info.enabled) else {
            return DowngradeDecision::NotActive;
        };
        let target = match info.target() {
            Ok(target) => target,
            Err(err) => {
                warn!(
                    "event=downgrade_target_unparsable target_version={:?} error={}",
                    info.target_version, err
                );
                return DowngradeDecision::InvalidTarget {
                    raw: info.target_version,
                };
            }
        };
        let snapshot = self.cluster.members_versions();
        let matched = versions_match_target(&snapshot, &target);
        if !matched.is_matched() {
            self.log_pending_downgrade(&target, &matched);
            self.metrics.inc_counter(telemetry::DOWNGRADE_PENDING, 1);
            return DowngradeDecision::Pending(matched);
        }
        info!(
            "event=downgrade_complete cluster_version={}",
            target
        );
        let ctx = ProposalContext::with_timeout(self.proposal_timeout);
        match self.cluster.downgrade_cancel(&ctx) {
            Ok(()) => {
                self.metrics.inc_counter(telemetry::DOWNGRADE_CANCELLED, 1);
                DowngradeDecision::Cancelled { target }
            }
            Err(err) => {
                self.metrics
                    .inc_counter(telemetry::DOWNGRADE_CANCEL_FAILED, 1);
                warn!(
                    "event=downgrade_cancel outcome=failed target_version={} error={}",
                    target, err
                );
                DowngradeDecision::CancelFailed { target, error: err }
            }
        }
    }

    fn log_pending_downgrade(&self, target: &ServerVersion, matched: &TargetMatch) {
        match matched {
            TargetMatch::Mismatch { member, reported } => warn!(
                "event=downgrade_pending reason=mismatch member={} member_cluster_version={} target_version={}",
                member, reported, target
            ),
            TargetMatch::Unparsable {
                member,
                value,
                error,
            } => warn!(
                "event=downgrade_pending reason=unparsable member={} member_cluster_version={:?} error={}",
                member, value, error
            ),
            TargetMatch::Unknown { member } => debug!(
                "event=downgrade_pending reason=unknown member={} target_version={}",
                member, target
            ),
            TargetMatch::NoMembers => {
                debug!("event=downgrade_pending reason=no_members target_version={}", target)
            }
            TargetMatch::Matched => {}
        }
    }
}
