//! Storage backend that tracks its own schema version.
//!
//! All access to the meta table, including ordinary request writes, goes
//! through [`SchemaBackend::lock`]; the returned [`BackendTxn`] holds the
//! backend mutex until it is dropped.

pub mod meta;
pub mod schema;

pub use meta::{FileMetaStore, MemoryMetaStore, MetaStore, MetaTable};
pub use schema::{
    AddKey, Direction, MigrationPlan, MigrationStep, SchemaChange, SchemaRegistry,
    STORAGE_VERSION_KEY,
};

use crate::error::{MigrationError, StorageError};
use crate::ports::{StoragePort, StorageTxn};
use crate::version::ClusterVersion;
use log::{info, warn};
use parking_lot::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct SchemaBackend<M> {
    store: Mutex<M>,
    registry: SchemaRegistry,
}

impl<M: MetaStore> SchemaBackend<M> {
    pub fn new(store: M, registry: SchemaRegistry) -> Self {
        Self {
            store: Mutex::new(store),
            registry,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn lock(&self) -> BackendTxn<'_, M> {
        BackendTxn {
            store: self.store.lock(),
            registry: &self.registry,
        }
    }

    /// Non-blocking variant used by request paths that prefer to back off.
    pub fn try_lock(&self) -> Option<BackendTxn<'_, M>> {
        self.store.try_lock().map(|store| BackendTxn {
            store,
            registry: &self.registry,
        })
    }

    pub fn into_inner(self) -> M {
        self.store.into_inner()
    }
}

/// Exclusive handle on the backend. Dropping it releases the lock.
pub struct BackendTxn<'a, M> {
    store: MutexGuard<'a, M>,
    registry: &'a SchemaRegistry,
}

impl<'a, M: MetaStore> BackendTxn<'a, M> {
    pub fn get(&self, key: &str) -> Option<String> {
        self.store.table().get(key).map(str::to_string)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.store.table_mut().put(key, value);
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.store.table_mut().delete(key)
    }

    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.store.commit()
    }

    pub fn detect_schema_version(&self) -> Result<Option<ClusterVersion>, MigrationError> {
        self.registry.detect(self.store.table())
    }
}

impl<'a, M: MetaStore> StorageTxn for BackendTxn<'a, M> {
    fn storage_version(&self) -> Option<ClusterVersion> {
        match self.detect_schema_version() {
            Ok(version) => version,
            Err(err) => {
                warn!("event=storage_version_detect outcome=failed error={}", err);
                None
            }
        }
    }

    fn update_storage_version(&mut self, target: ClusterVersion) -> Result<(), MigrationError> {
        let previous = self.store.table().clone();
        let plan = self.registry.migrate(self.store.table_mut(), target)?;
        if let Err(err) = self.store.commit() {
            *self.store.table_mut() = previous;
            return Err(MigrationError::Storage(err));
        }
        info!(
            "event=storage_version_migrated from={} to={} steps={}",
            plan.current,
            plan.target,
            plan.steps.len()
        );
        Ok(())
    }
}

impl<M: MetaStore> StoragePort for SchemaBackend<M> {
    type Txn<'a> = BackendTxn<'a, M> where Self: 'a;

    fn lock(&self) -> Self::Txn<'_> {
        SchemaBackend::lock(self)
    }
}
