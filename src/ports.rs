//! Capabilities the monitor consumes from the consensus and storage layers.
//!
//! Both ports are handed to [`crate::monitor::VersionMonitor`] at
//! construction. The monitor keeps no state of its own, so every call goes
//! through these traits.

use crate::downgrade::DowngradeInfo;
use crate::error::{MigrationError, PortError};
use crate::members::MemberVersionSnapshot;
use crate::version::{ClusterVersion, ServerVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Invoked once a non-blocking cluster version proposal settles.
pub type ProposalCallback = Box<dyn FnOnce(Result<(), PortError>) + Send + 'static>;

/// Read and propose access to the replicated cluster state.
pub trait ClusterPort: Send + Sync {
    fn cluster_version(&self) -> Option<ClusterVersion>;

    fn downgrade_info(&self) -> Option<DowngradeInfo>;

    fn members_versions(&self) -> MemberVersionSnapshot;

    /// Submits a replicated "set cluster version" record. Implementations
    /// must return without waiting for the commit and report the outcome
    /// through `on_complete`.
    fn update_cluster_version(&self, version: ClusterVersion, on_complete: ProposalCallback);

    /// Returns once every entry committed before the call is visible locally.
    fn linearizable_read_notify(&self, ctx: &ProposalContext) -> Result<(), PortError>;

    fn downgrade_enable(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<(), PortError>;

    fn downgrade_cancel(&self, ctx: &ProposalContext) -> Result<(), PortError>;
}

/// Exclusive access to the storage transaction. The returned guard holds the
/// lock until it is dropped, so release happens on every exit path.
pub trait StoragePort: Send + Sync {
    type Txn<'a>: StorageTxn
    where
        Self: 'a;

    fn lock(&self) -> Self::Txn<'_>;
}

/// Operations that are only reachable while the storage lock is held.
pub trait StorageTxn {
    /// `None` when the schema marker is absent or cannot be detected.
    fn storage_version(&self) -> Option<ClusterVersion>;

    fn update_storage_version(&mut self, target: ClusterVersion) -> Result<(), MigrationError>;
}

impl<T: ClusterPort + ?Sized> ClusterPort for Arc<T> {
    fn cluster_version(&self) -> Option<ClusterVersion> {
        (**self).cluster_version()
    }

    fn downgrade_info(&self) -> Option<DowngradeInfo> {
        (**self).downgrade_info()
    }

    fn members_versions(&self) -> MemberVersionSnapshot {
        (**self).members_versions()
    }

    fn update_cluster_version(&self, version: ClusterVersion, on_complete: ProposalCallback) {
        (**self).update_cluster_version(version, on_complete)
    }

    fn linearizable_read_notify(&self, ctx: &ProposalContext) -> Result<(), PortError> {
        (**self).linearizable_read_notify(ctx)
    }

    fn downgrade_enable(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<(), PortError> {
        (**self).downgrade_enable(ctx, target)
    }

    fn downgrade_cancel(&self, ctx: &ProposalContext) -> Result<(), PortError> {
        (**self).downgrade_cancel(ctx)
    }
}

impl<T: StoragePort + ?Sized> StoragePort for Arc<T> {
    type Txn<'a> = T::Txn<'a> where Self: 'a;

    fn lock(&self) -> Self::Txn<'_> {
        (**self).lock()
    }
}

/// Cancellation scope attached to synchronous replicated writes.
#[derive(Debug, Clone)]
pub struct ProposalContext {
    started_at: Instant,
    timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl ProposalContext {
    /// No deadline; only explicit cancellation ends it.
    pub fn background() -> Self {
        Self {
            started_at: Instant::now(),
            timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_timeout_from(timeout, Instant::now())
    }

    pub fn with_timeout_from(timeout: Duration, started_at: Instant) -> Self {
        Self {
            started_at,
            timeout: Some(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout
            .and_then(|timeout| self.started_at.checked_add(timeout))
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fails once the context is cancelled or its deadline has passed.
    pub fn check(&self, now: Instant) -> Result<(), PortError> {
        if self.is_cancelled() {
            return Err(PortError::Cancelled);
        }
        match (self.timeout, self.deadline()) {
            (Some(timeout), Some(deadline)) if now >= deadline => {
                Err(PortError::DeadlineExceeded(timeout))
            }
            _ => Ok(()),
        }
    }
}

impl Default for ProposalContext {
    fn default() -> Self {
        Self::background()
    }
}
