use anyhow::{Context, Result};
use discovery::SweepConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "config.json";
pub const PEER_CACHE_FILE: &str = "peers.txt";
pub const DEFAULT_PORT: u16 = 50051;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding config.json and the peer cache
    pub data_dir: PathBuf,

    /// Directory whose files are indexed and offered to peers
    pub dataset_dir: PathBuf,

    /// Port to serve lookups on; also the port probed on peers
    pub listen_port: u16,

    /// Liveness probe timeout (10 ms keeps a /24 sweep short)
    pub probe_timeout_ms: u64,

    /// Per-peer lookup timeout, connect included
    pub lookup_timeout_ms: u64,

    /// Served connections silent for this long are closed
    pub idle_timeout_ms: u64,

    /// Files hashed at once
    pub index_concurrency: usize,

    /// Probes in flight at once
    pub probe_concurrency: usize,

    /// Wider subnets are narrowed to this prefix around the interface address
    pub min_prefix_len: u8,

    /// Keep our own addresses in the discovered peer set
    pub include_self: bool,

    /// Run a sweep when the server starts
    pub discover_on_start: bool,

    /// Re-index the dataset periodically while serving
    pub reindex_interval_secs: Option<u64>,

    /// Abort outstanding lookups after the first hit
    pub stop_on_first_hit: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".lanfind"),
            dataset_dir: PathBuf::from("./tmp/dataset"),
            listen_port: DEFAULT_PORT,
            probe_timeout_ms: 10,
            lookup_timeout_ms: 1000,
            idle_timeout_ms: 30_000,
            index_concurrency: storage::indexer::DEFAULT_CONCURRENCY,
            probe_concurrency: 256,
            min_prefix_len: 24,
            include_self: false,
            discover_on_start: true,
            reindex_interval_secs: None,
            stop_on_first_hit: false,
        }
    }
}

impl NodeConfig {
    /// Read `config.json` from `data_dir`, falling back to defaults when the
    /// file does not exist. `data_dir` always wins over the stored value.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut cfg = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<NodeConfig>(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            NodeConfig::default()
        };
        cfg.data_dir = data_dir.to_path_buf();
        Ok(cfg)
    }

    pub fn save(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.data_dir.join(CONFIG_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn peer_cache_path(&self) -> PathBuf {
        self.data_dir.join(PEER_CACHE_FILE)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reindex_interval(&self) -> Option<Duration> {
        self.reindex_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            port: self.listen_port,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            concurrency: self.probe_concurrency,
            min_prefix_len: self.min_prefix_len,
            include_self: self.include_self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let cfg = NodeConfig::load_or_default(temp.path())?;
        assert_eq!(cfg.listen_port, DEFAULT_PORT);
        assert_eq!(cfg.data_dir, temp.path());
        assert_eq!(cfg.peer_cache_path(), temp.path().join(PEER_CACHE_FILE));
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            r#"{ "listen_port": 6000, "dataset_dir": "/srv/share" }"#,
        )?;

        let cfg = NodeConfig::load_or_default(temp.path())?;
        assert_eq!(cfg.listen_port, 6000);
        assert_eq!(cfg.dataset_dir, PathBuf::from("/srv/share"));
        assert_eq!(cfg.lookup_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.sweep_config().port, 6000);
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let temp = TempDir::new()?;
        let mut cfg = NodeConfig::load_or_default(temp.path())?;
        cfg.reindex_interval_secs = Some(30);
        cfg.save()?;

        let loaded = NodeConfig::load_or_default(temp.path())?;
        assert_eq!(loaded.reindex_interval(), Some(Duration::from_secs(30)));
        Ok(())
    }
}
