//! Storage schema detection and stepwise migration.
//!
//! Every schema change is registered under the cluster version that
//! introduced it. Moving the schema from one version to another replays the
//! changes one minor version at a time, upgrading forward or reverting them
//! backward, and finally rewrites the version marker.

use crate::error::{MigrationError, StorageError};
use crate::storage::meta::MetaTable;
use crate::version::ClusterVersion;
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Meta key holding the schema marker.
pub const STORAGE_VERSION_KEY: &str = "storageVersion";

/// A reversible change to the meta table introduced by a given version.
pub trait SchemaChange: Send + Sync {
    fn name(&self) -> &str;

    fn upgrade(&self, table: &mut MetaTable) -> Result<(), String>;

    fn downgrade(&self, table: &mut MetaTable) -> Result<(), String>;
}

/// Adds a key when upgrading and removes it when downgrading.
#[derive(Debug, Clone)]
pub struct AddKey {
    key: String,
    value: String,
}

impl AddKey {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl SchemaChange for AddKey {
    fn name(&self) -> &str {
        &self.key
    }

    fn upgrade(&self, table: &mut MetaTable) -> Result<(), String> {
        table.put(self.key.clone(), self.value.clone());
        Ok(())
    }

    fn downgrade(&self, table: &mut MetaTable) -> Result<(), String> {
        table.delete(&self.key);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct SchemaRegistry {
    changes: BTreeMap<ClusterVersion, Vec<Arc<dyn SchemaChange>>>,
    legacy: Option<LegacyLayout>,
}

/// Layout written by releases that predate the version marker.
#[derive(Debug, Clone)]
struct LegacyLayout {
    version: ClusterVersion,
    keys: Vec<String>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let changes: BTreeMap<String, Vec<&str>> = self
            .changes
            .iter()
            .map(|(version, changes)| {
                (
                    version.to_string(),
                    changes.iter().map(|change| change.name()).collect(),
                )
            })
            .collect();
        f.debug_struct("SchemaRegistry")
            .field("changes", &changes)
            .field("legacy", &self.legacy)
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, introduced_in: ClusterVersion, change: impl SchemaChange + 'static) -> Self {
        self.changes
            .entry(introduced_in)
            .or_default()
            .push(Arc::new(change));
        self
    }

    /// A table without a marker that contains any of `keys` is treated as
    /// schema `version`.
    pub fn with_legacy_layout<I, K>(mut self, version: ClusterVersion, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.legacy = Some(LegacyLayout {
            version,
            keys: keys.into_iter().map(Into::into).collect(),
        });
        self
    }

    fn changes_for(&self, version: &ClusterVersion) -> &[Arc<dyn SchemaChange>] {
        self.changes
            .get(version)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `Ok(None)` means the table is pristine: nothing has been written yet.
    pub fn detect(&self, table: &MetaTable) -> Result<Option<ClusterVersion>, MigrationError> {
        if let Some(raw) = table.get(STORAGE_VERSION_KEY) {
            return ClusterVersion::parse(raw)
                .map(Some)
                .map_err(|_| {
                    MigrationError::Storage(StorageError::CorruptMarker {
                        raw: raw.to_string(),
                    })
                });
        }
        if table.is_empty() {
            return Ok(None);
        }
        if let Some(legacy) = &self.legacy {
            if legacy.keys.iter().any(|key| table.contains(key)) {
                return Ok(Some(legacy.version));
            }
        }
        Err(MigrationError::Detect(
            "missing storage version marker".into(),
        ))
    }

    pub fn plan(
        &self,
        current: ClusterVersion,
        target: ClusterVersion,
    ) -> Result<MigrationPlan, MigrationError> {
        if current.major != target.major {
            return Err(MigrationError::MajorVersionChange {
                from: current,
                to: target,
            });
        }
        let mut steps = Vec::new();
        let mut at = current;
        while at.minor < target.minor {
            let next = ClusterVersion::new(at.major, at.minor + 1);
            steps.push(MigrationStep {
                from: at,
                to: next,
                direction: Direction::Upgrade,
                changes: self.changes_for(&next).to_vec(),
            });
            at = next;
        }
        while at.minor > target.minor {
            let next = ClusterVersion::new(at.major, at.minor - 1);
            let mut changes = self.changes_for(&at).to_vec();
            changes.reverse();
            steps.push(MigrationStep {
                from: at,
                to: next,
                direction: Direction::Downgrade,
                changes,
            });
            at = next;
        }
        Ok(MigrationPlan {
            current,
            target,
            steps,
        })
    }

    /// Brings `table` to `target`. The table is only modified if every step
    /// succeeds.
    pub fn migrate(&self, table: &mut MetaTable, target: ClusterVersion) -> Result<MigrationPlan, MigrationError> {
        let plan = match self.detect(table)? {
            Some(current) => self.plan(current, target)?,
            None => MigrationPlan {
                current: target,
                target,
                steps: Vec::new(),
            },
        };
        let mut staged = table.clone();
        plan.execute(&mut staged)?;
        *table = staged;
        Ok(plan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

#[derive(Clone)]
pub struct MigrationStep {
    pub from: ClusterVersion,
    pub to: ClusterVersion,
    pub direction: Direction,
    changes: Vec<Arc<dyn SchemaChange>>,
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("direction", &self.direction)
            .field(
                "changes",
                &self.changes.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MigrationStep {
    fn apply(&self, table: &mut MetaTable) -> Result<(), MigrationError> {
        for change in &self.changes {
            let result = match self.direction {
                Direction::Upgrade => change.upgrade(table),
                Direction::Downgrade => change.downgrade(table),
            };
            result.map_err(|reason| MigrationError::StepFailed {
                from: self.from,
                to: self.to,
                reason: format!("{}: {}", change.name(), reason),
            })?;
        }
        table.put(STORAGE_VERSION_KEY, self.to.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub current: ClusterVersion,
    pub target: ClusterVersion,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty() && self.current == self.target
    }

    fn execute(&self, table: &mut MetaTable) -> Result<(), MigrationError> {
        for step in &self.steps {
            step.apply(table)?;
            info!(
                "event=schema_migration_step from={} to={} direction={:?}",
                step.from, step.to, step.direction
            );
        }
        table.put(STORAGE_VERSION_KEY, self.target.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl SchemaChange for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn upgrade(&self, _table: &mut MetaTable) -> Result<(), String> {
            Err("boom".into())
        }

        fn downgrade(&self, _table: &mut MetaTable) -> Result<(), String> {
            Ok(())
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .register(ClusterVersion::new(3, 5), AddKey::new("term", "0"))
            .register(ClusterVersion::new(3, 6), AddKey::new("downgrade", "{}"))
            .with_legacy_layout(ClusterVersion::new(3, 4), ["consistent_index"])
    }

    #[test]
    fn plan_walks_single_minor_steps() {
        let plan = registry()
            .plan(ClusterVersion::new(3, 4), ClusterVersion::new(3, 6))
            .unwrap();
        let hops: Vec<_> = plan.steps.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(
            hops,
            vec![
                (ClusterVersion::new(3, 4), ClusterVersion::new(3, 5)),
                (ClusterVersion::new(3, 5), ClusterVersion::new(3, 6)),
            ]
        );
        let err = registry()
            .plan(ClusterVersion::new(3, 6), ClusterVersion::new(4, 0))
            .unwrap_err();
        assert!(matches!(err, MigrationError::MajorVersionChange { .. }));
    }

    #[test]
    fn detect_uses_marker_then_legacy_layout() {
        let registry = registry();
        let mut table = MetaTable::new();
        assert_eq!(registry.detect(&table).unwrap(), None);
        table.put("consistent_index", "12");
        assert_eq!(
            registry.detect(&table).unwrap(),
            Some(ClusterVersion::new(3, 4))
        );
        table.put(STORAGE_VERSION_KEY, "3.5.0");
        assert_eq!(
            registry.detect(&table).unwrap(),
            Some(ClusterVersion::new(3, 5))
        );
        let mut unknown = MetaTable::new();
        unknown.put("other", "1");
        assert!(registry.detect(&unknown).is_err());
    }

    #[test]
    fn upgrade_then_downgrade_reverts_changes() {
        let registry = registry();
        let mut table = MetaTable::new();
        table.put("consistent_index", "12");
        registry
            .migrate(&mut table, ClusterVersion::new(3, 6))
            .unwrap();
        assert_eq!(table.get(STORAGE_VERSION_KEY), Some("3.6.0"));
        assert!(table.contains("term"));
        assert!(table.contains("downgrade"));

        registry
            .migrate(&mut table, ClusterVersion::new(3, 5))
            .unwrap();
        assert_eq!(table.get(STORAGE_VERSION_KEY), Some("3.5.0"));
        assert!(table.contains("term"));
        assert!(!table.contains("downgrade"));
    }

    #[test]
    fn failed_step_leaves_table_untouched() {
        let registry = registry().register(ClusterVersion::new(3, 6), Failing);
        let mut table = MetaTable::new();
        table.put(STORAGE_VERSION_KEY, "3.5.0");
        let before = table.clone();
        let err = registry
            .migrate(&mut table, ClusterVersion::new(3, 6))
            .unwrap_err();
        assert!(matches!(err, MigrationError::StepFailed { .. }));
        assert_eq!(table, before);
    }
}
