use crate::error::StorageError;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Key/value table holding backend metadata, including the schema marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaTable {
    entries: BTreeMap<String, String>,
}

impl MetaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<BTreeMap<String, String>> for MetaTable {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

/// Durable home of a [`MetaTable`]. `commit` makes the current table
/// durable; until then a crash may lose the latest changes.
pub trait MetaStore: Send {
    fn table(&self) -> &MetaTable;

    fn table_mut(&mut self) -> &mut MetaTable;

    fn commit(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    table: MetaTable,
    commits: u64,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(table: MetaTable) -> Self {
        Self { table, commits: 0 }
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl MetaStore for MemoryMetaStore {
    fn table(&self) -> &MetaTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut MetaTable {
        &mut self.table
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}

/// JSON document on disk, replaced atomically on every commit.
#[derive(Debug)]
pub struct FileMetaStore {
    path: PathBuf,
    table: MetaTable,
}

impl FileMetaStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let table = match fs::read(&path) {
            Ok(bytes) => {
                let entries: BTreeMap<String, String> = serde_json::from_slice(&bytes)?;
                MetaTable::from(entries)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => MetaTable::new(),
            Err(err) => return Err(StorageError::Io(err)),
        };
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetaStore for FileMetaStore {
    fn table(&self) -> &MetaTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut MetaTable {
        &mut self.table
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        let payload = serde_json::to_vec_pretty(&self.table.entries)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}
