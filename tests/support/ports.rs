#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vermon::{
    ClusterPort, ClusterVersion, DowngradeInfo, MemberId, MemberVersionSnapshot, MemberVersions,
    MigrationError, PortError, ProposalCallback, ProposalContext, ServerVersion, StoragePort,
    StorageTxn,
};

pub fn members(entries: &[(&str, Option<(&str, &str)>)]) -> MemberVersionSnapshot {
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

/// Cluster port that records every write and holds cluster version
/// proposals until the test settles them.
#[derive(Default)]
pub struct RecordingCluster {
    pub cluster_version: Mutex<Option<ClusterVersion>>,
    pub downgrade: Mutex<Option<DowngradeInfo>>,
    pub members: Mutex<MemberVersionSnapshot>,
    proposed: Mutex<Vec<ClusterVersion>>,
    pending: Mutex<Vec<ProposalCallback>>,
    pub cancel_calls: AtomicUsize,
    pub enable_calls: Mutex<Vec<ServerVersion>>,
    pub read_barriers: AtomicUsize,
    pub cancel_error: Mutex<Option<PortError>>,
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_version(self, version: Option<ClusterVersion>) -> Self {
        *self.cluster_version.lock() = version;
        self
    }

    pub fn with_members(self, snapshot: MemberVersionSnapshot) -> Self {
        *self.members.lock() = snapshot;
        self
    }

    pub fn with_downgrade(self, info: Option<DowngradeInfo>) -> Self {
        *self.downgrade.lock() = info;
        self
    }

    pub fn proposed(&self) -> Vec<ClusterVersion> {
        self.proposed.lock().clone()
    }

    pub fn pending_proposals(&self) -> usize {
        self.pending.lock().len()
    }

    /// Completes every outstanding proposal with `result`.
    pub fn settle(&self, result: Result<(), PortError>) {
        let callbacks: Vec<_> = self.pending.lock().drain(..).collect();
        for callback in callbacks {
            callback(result.clone());
        }
    }

    pub fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

impl ClusterPort for RecordingCluster {
    fn cluster_version(&self) -> Option<ClusterVersion> {
        *self.cluster_version.lock()
    }

    fn downgrade_info(&self) -> Option<DowngradeInfo> {
        self.downgrade.lock().clone()
    }

    fn members_versions(&self) -> MemberVersionSnapshot {
        self.members.lock().clone()
    }

    fn update_cluster_version(&self, version: ClusterVersion, on_complete: ProposalCallback) {
        self.proposed.lock().push(version);
        self.pending.lock().push(on_complete);
    }

    fn linearizable_read_notify(&self, ctx: &ProposalContext) -> Result<(), PortError> {
        ctx.check(std::time::Instant::now())?;
        self.read_barriers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn downgrade_enable(
        &self,
        _ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<(), PortError> {
        self.enable_calls.lock().push(target.clone());
        *self.downgrade.lock() = Some(DowngradeInfo::targeting(target));
        Ok(())
    }

    fn downgrade_cancel(&self, _ctx: &ProposalContext) -> Result<(), PortError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.cancel_error.lock().clone() {
            return Err(err);
        }
        *self.downgrade.lock() = Some(DowngradeInfo::disabled());
        Ok(())
    }
}

/// Storage port that counts lock acquisitions and migration calls and
/// asserts the lock is never taken twice at once.
#[derive(Clone, Default)]
pub struct RecordingStorage {
    inner: Arc<RecordingStorageInner>,
}

#[derive(Default)]
struct RecordingStorageInner {
    version: Mutex<Option<ClusterVersion>>,
    migrations: Mutex<Vec<ClusterVersion>>,
    fail_with: Mutex<Option<String>>,
    held: AtomicBool,
    locks: AtomicUsize,
}

impl RecordingStorage {
    pub fn with_version(version: Option<ClusterVersion>) -> Self {
        let storage = Self::default();
        *storage.inner.version.lock() = version;
        storage
    }

    pub fn fail_migrations(&self, reason: Option<&str>) {
        *self.inner.fail_with.lock() = reason.map(str::to_string);
    }

    pub fn version(&self) -> Option<ClusterVersion> {
        *self.inner.version.lock()
    }

    pub fn migrations(&self) -> Vec<ClusterVersion> {
        self.inner.migrations.lock().clone()
    }

    pub fn locks(&self) -> usize {
        self.inner.locks.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.inner.held.load(Ordering::SeqCst)
    }
}

pub struct RecordingTxn<'a> {
    inner: &'a RecordingStorageInner,
}

impl Drop for RecordingTxn<'_> {
    fn drop(&mut self) {
        self.inner.held.store(false, Ordering::SeqCst);
    }
}

impl StorageTxn for RecordingTxn<'_> {
    fn storage_version(&self) -> Option<ClusterVersion> {
        *self.inner.version.lock()
    }

    fn update_storage_version(&mut self, target: ClusterVersion) -> Result<(), MigrationError> {
        self.inner.migrations.lock().push(target);
        if let Some(reason) = self.inner.fail_with.lock().clone() {
            let from = self.inner.version.lock().unwrap_or(target);
            return Err(MigrationError::StepFailed {
                from,
                to: target,
                reason,
            });
        }
        *self.inner.version.lock() = Some(target);
        Ok(())
    }
}

impl StoragePort for RecordingStorage {
    type Txn<'a> = RecordingTxn<'a> where Self: 'a;

    fn lock(&self) -> Self::Txn<'_> {
        let was_held = self.inner.held.swap(true, Ordering::SeqCst);
        assert!(!was_held, "storage lock acquired while already held");
        self.inner.locks.fetch_add(1, Ordering::SeqCst);
        RecordingTxn { inner: &self.inner }
    }
}
