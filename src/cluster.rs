//! In-process [`ClusterPort`] used by embedders without a consensus layer of
//! their own and by the test suite. Proposals commit immediately and are
//! appended to a record log so callers can inspect what was replicated.

use crate::downgrade::DowngradeInfo;
use crate::error::PortError;
use crate::members::{MemberId, MemberVersionSnapshot, MemberVersions};
use crate::ports::{ClusterPort, ProposalCallback, ProposalContext};
use crate::version::{ClusterVersion, ServerVersion};
use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Instant;

/// Replicated state changes produced by the version subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClusterRecord {
    SetClusterVersion(ClusterVersion),
    SetDowngradeInfo(DowngradeInfo),
}

#[derive(Debug, Default)]
struct ClusterState {
    cluster_version: Option<ClusterVersion>,
    downgrade: Option<DowngradeInfo>,
    members: MemberVersionSnapshot,
    leader: bool,
    replication_failure: Option<String>,
    records: Vec<ClusterRecord>,
    read_barriers: u64,
}

#[derive(Debug)]
pub struct LocalCluster {
    local_id: MemberId,
    state: RwLock<ClusterState>,
}

impl LocalCluster {
    /// Starts as leader with no decided cluster version and no members.
    pub fn new(local_id: impl Into<MemberId>) -> Self {
        Self {
            local_id: local_id.into(),
            state: RwLock::new(ClusterState {
                leader: true,
                ..ClusterState::default()
            }),
        }
    }

    pub fn local_id(&self) -> &MemberId {
        &self.local_id
    }

    /// Seeds the cluster version without producing a replicated record, as a
    /// restart from an existing snapshot would.
    pub fn restore_cluster_version(&self, version: Option<ClusterVersion>) {
        self.state.write().cluster_version = version;
    }

    pub fn restore_downgrade_info(&self, info: Option<DowngradeInfo>) {
        self.state.write().downgrade = info;
    }

    pub fn set_member_versions(&self, member: impl Into<MemberId>, versions: Option<MemberVersions>) {
        self.state.write().members.insert(member.into(), versions);
    }

    pub fn remove_member(&self, member: &MemberId) {
        self.state.write().members.remove(member);
    }

    pub fn set_leader(&self, leader: bool) {
        self.state.write().leader = leader;
    }

    pub fn is_leader(&self) -> bool {
        self.state.read().leader
    }

    /// Makes every following proposal fail with `reason` until cleared.
    pub fn fail_replication(&self, reason: Option<String>) {
        self.state.write().replication_failure = reason;
    }

    pub fn records(&self) -> Vec<ClusterRecord> {
        self.state.read().records.clone()
    }

    pub fn read_barriers(&self) -> u64 {
        self.state.read().read_barriers
    }

    fn propose(&self, ctx: Option<&ProposalContext>, record: ClusterRecord) -> Result<(), PortError> {
        if let Some(ctx) = ctx {
            ctx.check(Instant::now())?;
        }
        let mut state = self.state.write();
        if !state.leader {
            return Err(PortError::NotLeader);
        }
        if let Some(reason) = state.replication_failure.clone() {
            return Err(PortError::Replication(reason));
        }
        match &record {
            ClusterRecord::SetClusterVersion(version) => {
                state.cluster_version = Some(*version);
            }
            ClusterRecord::SetDowngradeInfo(info) => {
                state.downgrade = Some(info.clone());
            }
        }
        state.records.push(record.clone());
        let index = state.records.len();
        drop(state);
        info!(
            "event=cluster_record_applied member={} index={} record={:?}",
            self.local_id, index, record
        );
        Ok(())
    }
}

impl ClusterPort for LocalCluster {
    fn cluster_version(&self) -> Option<ClusterVersion> {
        self.state.read().cluster_version
    }

    fn downgrade_info(&self) -> Option<DowngradeInfo> {
        self.state.read().downgrade.clone()
    }

    fn members_versions(&self) -> MemberVersionSnapshot {
        self.state.read().members.clone()
    }

    fn update_cluster_version(&self, version: ClusterVersion, on_complete: ProposalCallback) {
        let result = self.propose(None, ClusterRecord::SetClusterVersion(version));
        on_complete(result);
    }

    fn linearizable_read_notify(&self, ctx: &ProposalContext) -> Result<(), PortError> {
        ctx.check(Instant::now())?;
        let mut state = self.state.write();
        if let Some(reason) = state.replication_failure.clone() {
            return Err(PortError::Unavailable(reason));
        }
        state.read_barriers += 1;
        debug!(
            "event=read_barrier member={} count={}",
            self.local_id, state.read_barriers
        );
        Ok(())
    }

    fn downgrade_enable(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<(), PortError> {
        self.propose(
            Some(ctx),
            ClusterRecord::SetDowngradeInfo(DowngradeInfo::targeting(target)),
        )
    }

    fn downgrade_cancel(&self, ctx: &ProposalContext) -> Result<(), PortError> {
        self.propose(
            Some(ctx),
            ClusterRecord::SetDowngradeInfo(DowngradeInfo::disabled()),
        )
    }
}
