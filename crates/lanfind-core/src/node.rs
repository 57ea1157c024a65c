use crate::broadcast::{peer_sockets, SearchBroadcaster, SearchReport};
use crate::config::NodeConfig;
use crate::service::LookupService;
use crate::LookupError;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use discovery::{Discovery, PeerCache, PeerSet};
use std::future::Future;
use std::sync::Arc;
use storage::{ContentIndex, IndexError, Indexer};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

/// State of a serving node: its index and the peers it knows about.
pub struct Node {
    cfg: NodeConfig,
    index: Arc<ContentIndex>,
    peers: ArcSwap<PeerSet>,
    discovery: Discovery,
    cache: PeerCache,
}

impl Node {
    pub fn new(cfg: NodeConfig) -> Self {
        let indexer = Indexer::sha256(cfg.index_concurrency);
        let index = Arc::new(ContentIndex::new(cfg.dataset_dir.clone(), indexer));
        let discovery = Discovery::new(cfg.sweep_config());
        let cache = PeerCache::new(cfg.peer_cache_path());

        Self {
            cfg,
            index,
            peers: ArcSwap::from_pointee(PeerSet::default()),
            discovery,
            cache,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    pub fn content_index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    pub fn peers(&self) -> Arc<PeerSet> {
        self.peers.load_full()
    }

    /// One indexing pass over the dataset directory.
    pub async fn index(&self) -> Result<Vec<IndexError>, IndexError> {
        self.index.refresh().await
    }

    /// Sweep the local subnets, publish the result and write the peer cache.
    pub async fn discover_peers(&self) -> Result<Arc<PeerSet>> {
        let peers = self.discovery.discover().await?;
        if let Err(e) = self.cache.store(&peers) {
            tracing::warn!("Could not write peer cache: {:#}", e);
        }
        self.peers.store(Arc::new(peers));
        Ok(self.peers())
    }

    pub fn lookup_service(&self) -> LookupService {
        LookupService::new(Arc::clone(&self.index)).with_idle_timeout(self.cfg.idle_timeout())
    }

    /// Index, bind the service port and serve until `shutdown` resolves.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = ("0.0.0.0", self.cfg.listen_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding port {}", self.cfg.listen_port))?;
        self.run_on(listener, shutdown).await
    }

    /// Like [`Node::run`] on an already bound listener.
    pub async fn run_on<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let failures = self
            .index()
            .await
            .with_context(|| format!("indexing {}", self.cfg.dataset_dir.display()))?;
        if !failures.is_empty() {
            tracing::warn!("{} files could not be indexed; serving the rest", failures.len());
        }

        tracing::info!("Lookup service listening on {}", listener.local_addr()?);

        let mut background = JoinSet::new();
        if self.cfg.discover_on_start {
            let node = Arc::clone(&self);
            background.spawn(async move {
                match node.discover_peers().await {
                    Ok(peers) => {
                        for peer in peers.iter() {
                            tracing::info!("Known peer: {}", peer);
                        }
                    }
                    Err(e) => tracing::warn!("Peer discovery failed: {:#}", e),
                }
            });
        }

        if let Some(interval) = self.cfg.reindex_interval() {
            let node = Arc::clone(&self);
            background.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = node.index().await {
                        tracing::warn!("Re-index failed, keeping previous index: {}", e);
                    }
                }
            });
        }

        let result = self.lookup_service().serve(listener, shutdown).await;
        background.abort_all();
        result
    }
}

/// Peers for a search: the cache when it has entries and `refresh` is not
/// set, otherwise a fresh sweep (which rewrites the cache).
pub async fn resolve_peers(cfg: &NodeConfig, refresh: bool) -> Result<PeerSet> {
    let cache = PeerCache::new(cfg.peer_cache_path());
    if !refresh {
        match cache.load() {
            Ok(Some(peers)) if !peers.is_empty() => {
                let path = cache.path().display();
                tracing::info!("Using {} cached peers from {}", peers.len(), path);
                return Ok(peers);
            }
            Ok(_) => tracing::debug!("Peer cache empty or missing, sweeping"),
            Err(e) => tracing::warn!("Unreadable peer cache, sweeping instead: {:#}", e),
        }
    }

    let peers = Discovery::new(cfg.sweep_config()).discover().await?;
    if let Err(e) = cache.store(&peers) {
        tracing::warn!("Could not write peer cache: {:#}", e);
    }
    Ok(peers)
}

/// Ask every peer for `fingerprint` over TCP.
pub async fn search(
    cfg: &NodeConfig,
    fingerprint: &str,
    peers: &PeerSet,
) -> Result<SearchReport, LookupError> {
    SearchBroadcaster::tcp(cfg.lookup_timeout())
        .stop_on_first_hit(cfg.stop_on_first_hit)
        .broadcast(fingerprint, &peer_sockets(peers, cfg.listen_port))
        .await
}
