use crate::{FileRecord, Hasher, Index, IndexError, Sha256Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of files hashed at once.
pub const DEFAULT_CONCURRENCY: usize = 64;

/// Outcome of one indexing pass.
#[derive(Debug)]
pub struct IndexReport {
    pub index: Index,
    /// Files that could not be fingerprinted. They are absent from `index`.
    pub failures: Vec<IndexError>,
}

/// Fingerprints the regular files directly inside a directory.
#[derive(Clone)]
pub struct Indexer {
    hasher: Arc<dyn Hasher>,
    concurrency: usize,
}

impl Indexer {
    pub fn new(hasher: Arc<dyn Hasher>, concurrency: usize) -> Self {
        Self {
            hasher,
            concurrency: concurrency.max(1),
        }
    }

    pub fn sha256(concurrency: usize) -> Self {
        Self::new(Arc::new(Sha256Hasher), concurrency)
    }

    /// Run one full pass over `dir`.
    ///
    /// Only a failure to list `dir` is returned as an error. Every listed file
    /// ends up either in the index or in `failures`, and this returns only
    /// once all hashing tasks have reported.
    pub async fn build(&self, dir: &Path) -> Result<IndexReport, IndexError> {
        let (files, mut failures) = list_files(dir).await?;
        tracing::debug!("Hashing {} files in {}", files.len(), dir.display());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for path in files {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?;
            let hasher = Arc::clone(&self.hasher);

            tasks.spawn(async move {
                let _permit = permit;
                let result = hasher.fingerprint(&path).await;
                (path, result)
            });
        }

        let mut records = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(fingerprint))) => {
                    let rel = relative_to(dir, &path);
                    tracing::info!("Indexed {} {}", rel.display(), fingerprint);
                    records.push(FileRecord {
                        path: rel,
                        fingerprint,
                    });
                }
                Ok((_, Err(e))) => {
                    tracing::warn!("Skipping file: {}", e);
                    failures.push(e);
                }
                Err(e) => {
                    tracing::warn!("Hashing task failed: {}", e);
                    failures.push(IndexError::Task(e.to_string()));
                }
            }
        }

        Ok(IndexReport {
            index: Index::from_records(records),
            failures,
        })
    }
}

/// Regular files directly under `dir`, following symlinks. Entries whose
/// metadata cannot be read, or whose names are not UTF-8, are reported as
/// failures.
async fn list_files(dir: &Path) -> Result<(Vec<PathBuf>, Vec<IndexError>), IndexError> {
    let list_err = |source| IndexError::ListDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    let mut files = Vec::new();
    let mut failures = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let path = entry.path();
        if entry.file_name().to_str().is_none() {
            tracing::warn!("Skipping file with non UTF-8 name {}", path.display());
            failures.push(IndexError::NonUtf8Name(path));
            continue;
        }
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => tracing::debug!("Not a regular file, skipping {}", path.display()),
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", path.display(), e);
                failures.push(IndexError::io(path, e));
            }
        }
    }

    Ok((files, failures))
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
