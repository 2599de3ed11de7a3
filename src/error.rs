use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::version::ClusterVersion;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format: {input:?}")]
    InvalidVersionFormat { input: String },
}

impl VersionError {
    pub(crate) fn invalid(input: impl Into<String>) -> Self {
        VersionError::InvalidVersionFormat {
            input: input.into(),
        }
    }
}

/// Failures reported by the replicated-write side of a [`crate::ports::ClusterPort`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("proposal cancelled")]
    Cancelled,
    #[error("proposal deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("local member is not the leader")]
    NotLeader,
    #[error("replication failed: {0}")]
    Replication(String),
    #[error("cluster state unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("meta store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage version marker {raw:?} is not a valid version")]
    CorruptMarker { raw: String },
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("cannot detect storage version: {0}")]
    Detect(String),
    #[error("changing major storage version is not supported ({from} -> {to})")]
    MajorVersionChange {
        from: ClusterVersion,
        to: ClusterVersion,
    },
    #[error("schema step {from} -> {to} failed: {reason}")]
    StepFailed {
        from: ClusterVersion,
        to: ClusterVersion,
        reason: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DowngradeError {
    #[error("cluster version is not yet decided")]
    ClusterVersionUnavailable,
    #[error("the cluster has an ongoing downgrade job to {target}")]
    AlreadyInProgress { target: String },
    #[error("downgrade request requires a target version")]
    MissingTarget,
    #[error("the cluster is not downgrading")]
    NoActiveDowngrade,
    #[error("invalid downgrade target {target}; allowed target from {current} is {allowed}")]
    InvalidTarget {
        current: ClusterVersion,
        target: ClusterVersion,
        allowed: String,
    },
    #[error("local server version {local} does not match downgrade target {target}")]
    TargetMismatch { local: String, target: String },
    #[error("local server version {local} is lower than cluster version {cluster}")]
    LowerThanCluster {
        local: String,
        cluster: ClusterVersion,
    },
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Port(#[from] PortError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid config field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Non-fatal failures surfaced by the monitor entry points. The caller logs
/// them and relies on the next tick to retry.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
