use crate::model::{PeerAddress, PeerSet};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Flat file with one peer address per line, so a later run can skip the
/// sweep.
#[derive(Debug, Clone)]
pub struct PeerCache {
    path: PathBuf,
}

impl PeerCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no cache has been written yet. Lines that are not IPv4
    /// addresses are skipped.
    pub fn load(&self) -> Result<Option<PeerSet>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading peer cache {}", self.path.display()))?;

        let peers = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match line.parse::<PeerAddress>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!("Ignoring invalid peer cache entry {:?}", line);
                    None
                }
            })
            .collect::<PeerSet>();

        tracing::debug!("Loaded {} peers from {:?}", peers.len(), self.path);
        Ok(Some(peers))
    }

    pub fn store(&self, peers: &PeerSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut text = String::new();
        for peer in peers {
            text.push_str(&peer.to_string());
            text.push('\n');
        }

        fs::write(&self.path, text)
            .with_context(|| format!("writing peer cache {}", self.path.display()))?;
        tracing::info!("Cached {} peers at {:?}", peers.len(), self.path);
        Ok(())
    }
}
