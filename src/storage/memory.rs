//! In-memory archive backend.

use super::{ArchiveFactory, ArchiveSink, Dataset, StoredDataset};
use crate::error::{ExportError, ExportResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Datasets of one committed archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryArchive {
    datasets: BTreeMap<String, StoredDataset>,
}

impl MemoryArchive {
    /// Dataset by name.
    pub fn get(&self, name: &str) -> Option<&StoredDataset> {
        self.datasets.get(name)
    }

    /// Dataset names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }

    /// Whether a dataset exists.
    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }
}

/// Archive factory that keeps committed archives in a shared map.
///
/// Clones share the same storage, so a test can hand one clone to the
/// exporter and inspect the results through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchiveFactory {
    archives: Arc<Mutex<BTreeMap<PathBuf, MemoryArchive>>>,
}

impl MemoryArchiveFactory {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed archive at `path`.
    pub fn archive(&self, path: &Path) -> Option<MemoryArchive> {
        self.archives.lock().ok()?.get(path).cloned()
    }

    /// Paths of all committed archives, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.archives
            .lock()
            .map(|archives| archives.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ArchiveFactory for MemoryArchiveFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self, path: &Path) -> ExportResult<Box<dyn ArchiveSink>> {
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            pending: MemoryArchive::default(),
            store: Arc::clone(&self.archives),
        }))
    }
}

struct MemorySink {
    path: PathBuf,
    pending: MemoryArchive,
    store: Arc<Mutex<BTreeMap<PathBuf, MemoryArchive>>>,
}

impl ArchiveSink for MemorySink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn put(&mut self, name: &str, data: Dataset<'_>) -> ExportResult<()> {
        if self.pending.datasets.contains_key(name) {
            return Err(ExportError::Storage(format!(
                "dataset '{name}' already exists in {}",
                self.path.display()
            )));
        }
        self.pending.datasets.insert(name.to_string(), data.to_stored());
        Ok(())
    }

    fn commit(self: Box<Self>) -> ExportResult<PathBuf> {
        let MemorySink {
            path,
            pending,
            store,
        } = *self;
        store
            .lock()
            .map_err(|_| ExportError::Storage("archive store mutex poisoned".into()))?
            .insert(path.clone(), pending);
        Ok(path)
    }
}
