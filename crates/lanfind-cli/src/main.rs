use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use discovery::{Discovery, PeerCache};
use lanfind_core::{resolve_peers, search, Node, NodeConfig, PeerOutcome};
use storage::{Hasher, Sha256Hasher};

#[derive(Parser, Debug)]
#[command(name = "lanfind", version, about = "Find files by content hash on the local network")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Data directory for config and peer cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Lookup port (overrides config)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file for this node
    Init {
        /// Directory whose files are offered to peers
        #[arg(long)]
        dataset: PathBuf,
    },

    /// Index the dataset and answer lookups until Ctrl+C
    Server {
        /// Directory to index (overrides config)
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Skip the peer sweep at startup
        #[arg(long)]
        no_discovery: bool,

        /// Re-index every N seconds (0 = never)
        #[arg(long)]
        reindex_secs: Option<u64>,
    },

    /// Ask every known peer which of them has a file
    Search {
        /// Hex SHA-256 of the file content
        fingerprint: String,

        /// Sweep for peers even if a peer cache exists
        #[arg(long)]
        refresh: bool,

        /// Stop asking once a peer has the file
        #[arg(long)]
        first: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sweep the local subnets for peers and cache the result
    Discovery {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the fingerprint of a file
    Hash {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lanfind")
    });

    let mut cfg = NodeConfig::load_or_default(&data_dir)?;
    if let Some(port) = cli.port {
        cfg.listen_port = port;
    }

    match cli.cmd {
        Commands::Init { dataset } => {
            cfg.dataset_dir = absolute(&dataset)?;
            let path = cfg.save()?;

            println!("✓ Node initialized");
            println!("  Dataset: {}", cfg.dataset_dir.display());
            println!("  Port: {}", cfg.listen_port);
            println!("  Config: {}", path.display());
        }

        Commands::Server {
            dataset,
            no_discovery,
            reindex_secs,
        } => {
            if let Some(dataset) = dataset {
                cfg.dataset_dir = dataset;
            }
            if no_discovery {
                cfg.discover_on_start = false;
            }
            if reindex_secs.is_some() {
                cfg.reindex_interval_secs = reindex_secs;
            }

            run_server(cfg).await?;
        }

        Commands::Search {
            fingerprint,
            refresh,
            first,
            json,
        } => {
            cfg.stop_on_first_hit |= first;
            let found = search_file(&cfg, &fingerprint, refresh, json).await?;
            if !found {
                std::process::exit(1);
            }
        }

        Commands::Discovery { json } => {
            discover_peers(&cfg, json).await?;
        }

        Commands::Hash { file } => {
            let fingerprint = Sha256Hasher.fingerprint(&file).await?;
            println!("{}  {}", fingerprint, file.display());
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

async fn run_server(cfg: NodeConfig) -> Result<()> {
    // The listening address is logged by the node once the port is bound.
    println!("Starting node on port {}", cfg.listen_port);
    println!("  Dataset: {}", cfg.dataset_dir.display());
    println!("  Press Ctrl+C to stop");

    let node = Arc::new(Node::new(cfg));
    node.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

async fn search_file(
    cfg: &NodeConfig,
    fingerprint: &str,
    refresh: bool,
    json: bool,
) -> Result<bool> {
    let peers = resolve_peers(cfg, refresh).await?;
    if !json {
        println!("Asking {} peer(s) for {}", peers.len(), fingerprint);
    }

    let report = search(cfg, fingerprint, &peers)
        .await
        .context("search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &report.peers {
            let mark = match entry.outcome {
                PeerOutcome::Found { .. } => "✓",
                PeerOutcome::NotFound | PeerOutcome::Cancelled => "-",
                PeerOutcome::Unreachable { .. } | PeerOutcome::Protocol { .. } => "✗",
            };
            println!("  {} {}: {}", mark, entry.peer, entry.outcome);
        }
        println!("{}", report.summary());
    }

    Ok(report.summary().found > 0)
}

async fn discover_peers(cfg: &NodeConfig, json: bool) -> Result<()> {
    let discovery = Discovery::new(cfg.sweep_config());
    let peers = discovery.discover().await?;

    let cache = PeerCache::new(cfg.peer_cache_path());
    cache.store(&peers)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
    } else {
        println!("Discovered {} peer(s):", peers.len());
        for peer in &peers {
            println!("  {}", peer);
        }
        println!("  Cached at {}", cache.path().display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use storage::fingerprint_bytes;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_search_with_only_offline_peers_has_no_hit() -> Result<()> {
        let data = TempDir::new()?;
        let closed_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };
        let cfg = NodeConfig {
            data_dir: data.path().to_path_buf(),
            listen_port: closed_port,
            ..NodeConfig::default()
        };
        std::fs::write(cfg.peer_cache_path(), "127.0.0.1\n")?;

        let fp = fingerprint_bytes(b"hello").to_hex();
        assert!(!search_file(&cfg, &fp, false, true).await?);
        Ok(())
    }
}
