use crate::{Fingerprint, IndexError, Indexer};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One indexed file. `path` is relative to the indexed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

impl FileRecord {
    /// The string handed out to peers in lookup answers. The indexer only
    /// records UTF-8 names, so this matches the file on disk.
    pub fn locator(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Result of one indexing pass. Never mutated after construction.
///
/// Files with identical content each keep their own record; lookups answer
/// with whichever of them was inserted first.
#[derive(Debug, Default)]
pub struct Index {
    records: Vec<FileRecord>,
    by_fingerprint: HashMap<Fingerprint, usize>,
}

impl Index {
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let mut by_fingerprint = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            by_fingerprint.entry(record.fingerprint).or_insert(i);
        }
        Self {
            records,
            by_fingerprint,
        }
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&FileRecord> {
        self.by_fingerprint
            .get(fingerprint)
            .map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The live index of one directory.
///
/// Readers take a snapshot without locking. [`ContentIndex::refresh`] builds a
/// complete new [`Index`] and swaps it in; refreshes never overlap.
pub struct ContentIndex {
    root: PathBuf,
    indexer: Indexer,
    current: ArcSwap<Index>,
    refresh_lock: Mutex<()>,
}

impl ContentIndex {
    pub fn new(root: impl Into<PathBuf>, indexer: Indexer) -> Self {
        Self {
            root: root.into(),
            indexer,
            current: ArcSwap::from_pointee(Index::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> Arc<Index> {
        self.current.load_full()
    }

    /// Re-index the directory and publish the result.
    ///
    /// Returns the per-file failures of the pass. If the directory cannot be
    /// listed the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<Vec<IndexError>, IndexError> {
        let _guard = self.refresh_lock.lock().await;

        let report = self.indexer.build(&self.root).await?;
        tracing::info!(
            "Index of {} rebuilt: {} files, {} failures",
            self.root.display(),
            report.index.len(),
            report.failures.len()
        );

        self.current.store(Arc::new(report.index));
        Ok(report.failures)
    }
}
