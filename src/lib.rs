//! Cluster version negotiation for a replicated key-value store.
//!
//! The elected leader runs [`VersionMonitor`] periodically to agree on a
//! single cluster version, keep the storage schema aligned with it, and
//! detect when an operator-initiated downgrade has finished.

pub mod cluster;
pub mod config;
pub mod downgrade;
pub mod error;
pub mod members;
pub mod monitor;
pub mod ports;
#[cfg(feature = "async-runtime")]
pub mod runtime;
pub mod storage;
pub mod telemetry;
pub mod version;

pub use cluster::{ClusterRecord, LocalCluster};
pub use config::MonitorConfig;
pub use downgrade::{
    allowed_downgrade_version, detect_downgrade, is_valid_downgrade, DowngradeAction,
    DowngradeCoordinator, DowngradeInfo, DowngradeResponse,
};
pub use error::{
    ConfigError, DowngradeError, MigrationError, MonitorError, PortError, StorageError,
    VersionError,
};
pub use members::{
    members_minimal_version, versions_match_target, HigherPeer, MemberId, MemberVersionSnapshot,
    MemberVersions, MinimalVersionScan, TargetMatch, UnknownMember,
};
pub use monitor::{
    BootstrapSource, ClusterVersionDecision, DeferReason, DowngradeDecision,
    StorageVersionDecision, VersionMonitor,
};
pub use ports::{ClusterPort, ProposalCallback, ProposalContext, StoragePort, StorageTxn};
#[cfg(feature = "async-runtime")]
pub use runtime::{LeadershipProbe, MonitorScheduler, MonitorSchedulerHandle, TickSnapshot};
pub use storage::{
    AddKey, BackendTxn, FileMetaStore, MemoryMetaStore, MetaStore, MetaTable, MigrationPlan,
    SchemaBackend, SchemaChange, SchemaRegistry, STORAGE_VERSION_KEY,
};
pub use telemetry::{MetricsSnapshot, MonitorMetrics};
pub use version::{
    compare, is_valid_transition, ClusterVersion, ServerVersion, MIN_CLUSTER_VERSION,
};
