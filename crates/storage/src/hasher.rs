use crate::{Fingerprint, IndexError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const READ_BUF_LEN: usize = 64 * 1024;

/// Computes the fingerprint of one file.
#[async_trait]
pub trait Hasher: Send + Sync {
    async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, IndexError>;
}

/// Streams the file through SHA-256.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

#[async_trait]
impl Hasher for Sha256Hasher {
    async fn fingerprint(&self, path: &Path) -> Result<Fingerprint, IndexError> {
        let mut file = File::open(path)
            .await
            .map_err(|e| IndexError::io(path, e))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| IndexError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Fingerprint::from_digest(&hasher.finalize()))
    }
}
