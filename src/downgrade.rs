//! Downgrade state and the administrative path that starts or stops a
//! downgrade. Completion is detected by the monitor, not here.

use crate::error::{DowngradeError, VersionError};
use crate::ports::{ClusterPort, ProposalContext};
use crate::version::{ClusterVersion, ServerVersion};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Replicated downgrade flag. `target_version` is only meaningful while
/// `enabled` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowngradeInfo {
    pub enabled: bool,
    #[serde(default)]
    pub target_version: String,
}

impl DowngradeInfo {
    pub fn targeting(target: &ServerVersion) -> Self {
        Self {
            enabled: true,
            target_version: target.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Result<ServerVersion, VersionError> {
        ServerVersion::parse(&self.target_version)
    }
}

/// The only version a cluster at `current` may be downgraded to.
pub fn allowed_downgrade_version(current: &ClusterVersion) -> Option<ClusterVersion> {
    current
        .minor
        .checked_sub(1)
        .map(|minor| ClusterVersion::new(current.major, minor))
}

pub fn is_valid_downgrade(from: &ClusterVersion, to: &ClusterVersion) -> bool {
    allowed_downgrade_version(from).as_ref() == Some(to)
}

/// Startup check for a member joining a cluster. With a downgrade in
/// progress the local binary must already run the target major.minor;
/// otherwise it must not be older than the agreed cluster version.
pub fn detect_downgrade(
    local: &ServerVersion,
    cluster_version: Option<&ClusterVersion>,
    downgrade: Option<&DowngradeInfo>,
) -> Result<(), DowngradeError> {
    let local_cv = local.cluster_version();
    if let Some(info) = downgrade.filter(|info| info.enabled) {
        let target = info.target()?;
        if target.cluster_version() != local_cv {
            return Err(DowngradeError::TargetMismatch {
                local: local.to_string(),
                target: target.to_string(),
            });
        }
        info!(
            "event=downgrade_detect outcome=allowed local_version={} target_version={}",
            local, target
        );
        return Ok(());
    }
    if let Some(cluster) = cluster_version {
        if local_cv < *cluster {
            return Err(DowngradeError::LowerThanCluster {
                local: local.to_string(),
                cluster: *cluster,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DowngradeAction {
    Validate,
    Enable,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DowngradeResponse {
    pub action: DowngradeAction,
    pub cluster_version: ClusterVersion,
}

/// Serves administrative downgrade requests against the replicated state.
pub struct DowngradeCoordinator<C> {
    cluster: C,
}

impl<C: ClusterPort> DowngradeCoordinator<C> {
    pub fn new(cluster: C) -> Self {
        Self { cluster }
    }

    pub fn handle(
        &self,
        ctx: &ProposalContext,
        action: DowngradeAction,
        target: Option<&ServerVersion>,
    ) -> Result<DowngradeResponse, DowngradeError> {
        match action {
            DowngradeAction::Validate | DowngradeAction::Enable => {
                let target = target.ok_or(DowngradeError::MissingTarget)?;
                if action == DowngradeAction::Validate {
                    self.validate(ctx, target)
                } else {
                    self.enable(ctx, target)
                }
            }
            DowngradeAction::Cancel => self.cancel(ctx),
        }
    }

    pub fn validate(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<DowngradeResponse, DowngradeError> {
        let current = self.validate_inner(ctx, target)?;
        Ok(DowngradeResponse {
            action: DowngradeAction::Validate,
            cluster_version: current,
        })
    }

    pub fn enable(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<DowngradeResponse, DowngradeError> {
        let current = self.validate_inner(ctx, target)?;
        let target = target.cluster_version().to_server_version();
        self.cluster.downgrade_enable(ctx, &target).map_err(|err| {
            warn!(
                "event=downgrade_enable outcome=failed target_version={} error={}",
                target, err
            );
            DowngradeError::from(err)
        })?;
        info!(
            "event=downgrade_enable outcome=proposed cluster_version={} target_version={}",
            current, target
        );
        Ok(DowngradeResponse {
            action: DowngradeAction::Enable,
            cluster_version: current,
        })
    }

    pub fn cancel(&self, ctx: &ProposalContext) -> Result<DowngradeResponse, DowngradeError> {
        self.cluster.linearizable_read_notify(ctx)?;
        let current = self
            .cluster
            .cluster_version()
            .ok_or(DowngradeError::ClusterVersionUnavailable)?;
        let active = self
            .cluster
            .downgrade_info()
            .map(|info| info.enabled)
            .unwrap_or(false);
        if !active {
            return Err(DowngradeError::NoActiveDowngrade);
        }
        self.cluster.downgrade_cancel(ctx)?;
        info!(
            "event=downgrade_cancel outcome=proposed source=admin cluster_version={}",
            current
        );
        Ok(DowngradeResponse {
            action: DowngradeAction::Cancel,
            cluster_version: current,
        })
    }

    fn validate_inner(
        &self,
        ctx: &ProposalContext,
        target: &ServerVersion,
    ) -> Result<ClusterVersion, DowngradeError> {
        self.cluster.linearizable_read_notify(ctx)?;
        let current = self
            .cluster
            .cluster_version()
            .ok_or(DowngradeError::ClusterVersionUnavailable)?;
        if let Some(info) = self.cluster.downgrade_info().filter(|info| info.enabled) {
            return Err(DowngradeError::AlreadyInProgress {
                target: info.target_version,
            });
        }
        let requested = target.cluster_version();
        if !is_valid_downgrade(&current, &requested) {
            return Err(DowngradeError::InvalidTarget {
                current,
                target: requested,
                allowed: allowed_downgrade_version(&current)
                    .map(|allowed| allowed.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_downgrade_is_one_minor_back() {
        assert_eq!(
            allowed_downgrade_version(&ClusterVersion::new(3, 5)),
            Some(ClusterVersion::new(3, 4))
        );
        assert_eq!(allowed_downgrade_version(&ClusterVersion::new(4, 0)), None);
        assert!(is_valid_downgrade(
            &ClusterVersion::new(3, 5),
            &ClusterVersion::new(3, 4)
        ));
        assert!(!is_valid_downgrade(
            &ClusterVersion::new(3, 5),
            &ClusterVersion::new(3, 3)
        ));
    }

    #[test]
    fn detect_rejects_binary_older_than_cluster() {
        let local = ServerVersion::new(3, 4, 9);
        let err = detect_downgrade(&local, Some(&ClusterVersion::new(3, 5)), None).unwrap_err();
        assert!(matches!(err, DowngradeError::LowerThanCluster { .. }));
        assert!(detect_downgrade(&local, Some(&ClusterVersion::new(3, 4)), None).is_ok());
        assert!(detect_downgrade(&local, None, None).is_ok());
    }

    #[test]
    fn detect_requires_target_during_downgrade() {
        let info = DowngradeInfo::targeting(&ServerVersion::new(3, 4, 0));
        let cluster = ClusterVersion::new(3, 5);
        assert!(detect_downgrade(&ServerVersion::new(3, 4, 2), Some(&cluster), Some(&info)).is_ok());
        let err = detect_downgrade(&ServerVersion::new(3, 5, 0), Some(&cluster), Some(&info))
            .unwrap_err();
        assert!(matches!(err, DowngradeError::TargetMismatch { .. }));
        let disabled = DowngradeInfo::disabled();
        assert!(
            detect_downgrade(&ServerVersion::new(3, 5, 0), Some(&cluster), Some(&disabled)).is_ok()
        );
    }

    #[test]
    fn downgrade_info_round_trips_through_json() {
        let info = DowngradeInfo::targeting(&ServerVersion::new(3, 4, 0));
        let raw = serde_json::to_string(&info).unwrap();
        assert_eq!(raw, r#"{"enabled":true,"target_version":"3.4.0"}"#);
        let decoded: DowngradeInfo = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        assert_eq!(decoded, DowngradeInfo::disabled());
    }
}
