//! Client side: ask every known peer for a fingerprint at once.

use crate::protocol::{recv_message, send_message, LookupQuery, LookupResult};
use crate::LookupError;
use async_trait::async_trait;
use discovery::PeerSet;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storage::Fingerprint;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// One lookup against one peer.
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn lookup(
        &self,
        peer: SocketAddr,
        query: &LookupQuery,
    ) -> Result<LookupResult, LookupError>;
}

/// Opens a fresh TCP connection per lookup. `timeout` bounds connect and
/// exchange together.
#[derive(Debug, Clone)]
pub struct TcpLookupClient {
    timeout: Duration,
}

impl TcpLookupClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LookupClient for TcpLookupClient {
    async fn lookup(
        &self,
        peer: SocketAddr,
        query: &LookupQuery,
    ) -> Result<LookupResult, LookupError> {
        match tokio::time::timeout(self.timeout, exchange(peer, query)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(peer)),
        }
    }
}

async fn exchange(peer: SocketAddr, query: &LookupQuery) -> Result<LookupResult, LookupError> {
    let protocol = |reason: String| LookupError::Protocol { peer, reason };

    let mut stream = TcpStream::connect(peer)
        .await
        .map_err(|source| LookupError::Unreachable { peer, source })?;

    send_message(&mut stream, query)
        .await
        .map_err(|e| protocol(e.to_string()))?;

    match recv_message::<_, LookupResult>(&mut stream).await {
        Ok(Some(result)) => Ok(result),
        Ok(None) => Err(protocol("connection closed before an answer".into())),
        Err(e) => Err(protocol(e.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerOutcome {
    Found { locator: String, responder: String },
    NotFound,
    Unreachable { reason: String },
    Protocol { reason: String },
    /// Dropped after another peer already had the file.
    Cancelled,
}

impl From<Result<LookupResult, LookupError>> for PeerOutcome {
    fn from(result: Result<LookupResult, LookupError>) -> Self {
        match result {
            Ok(LookupResult {
                locator: Some(locator),
                responder,
                ..
            }) => PeerOutcome::Found { locator, responder },
            Ok(_) => PeerOutcome::NotFound,
            Err(e @ (LookupError::Unreachable { .. } | LookupError::Timeout(_))) => {
                PeerOutcome::Unreachable { reason: e.to_string() }
            }
            Err(e) => PeerOutcome::Protocol { reason: e.to_string() },
        }
    }
}

impl fmt::Display for PeerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerOutcome::Found { locator, responder } => {
                write!(f, "found {} (at {})", locator, responder)
            }
            PeerOutcome::NotFound => f.write_str("not found"),
            PeerOutcome::Unreachable { reason } => write!(f, "unreachable: {}", reason),
            PeerOutcome::Protocol { reason } => write!(f, "protocol error: {}", reason),
            PeerOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub peer: SocketAddr,
    pub outcome: PeerOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub fingerprint: String,
    /// One entry per queried peer, in the order the peers were given.
    pub peers: Vec<PeerReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchSummary {
    pub found: usize,
    pub not_found: usize,
    pub unreachable: usize,
    pub protocol_errors: usize,
    pub cancelled: usize,
}

impl SearchReport {
    pub fn hits(&self) -> impl Iterator<Item = &PeerReport> {
        self.peers
            .iter()
            .filter(|r| matches!(r.outcome, PeerOutcome::Found { .. }))
    }

    pub fn outcome_for(&self, peer: SocketAddr) -> Option<&PeerOutcome> {
        self.peers.iter().find(|r| r.peer == peer).map(|r| &r.outcome)
    }

    pub fn summary(&self) -> SearchSummary {
        let mut s = SearchSummary::default();
        for report in &self.peers {
            match report.outcome {
                PeerOutcome::Found { .. } => s.found += 1,
                PeerOutcome::NotFound => s.not_found += 1,
                PeerOutcome::Unreachable { .. } => s.unreachable += 1,
                PeerOutcome::Protocol { .. } => s.protocol_errors += 1,
                PeerOutcome::Cancelled => s.cancelled += 1,
            }
        }
        s
    }
}

impl fmt::Display for SearchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found, {} not found, {} unreachable, {} protocol errors",
            self.found, self.not_found, self.unreachable, self.protocol_errors
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}

/// Socket addresses of `peers` on the shared service port.
pub fn peer_sockets(peers: &PeerSet, port: u16) -> Vec<SocketAddr> {
    peers.iter().map(|ip| SocketAddr::from((*ip, port))).collect()
}

/// Fans a query out to every peer and collects one outcome per peer.
#[derive(Clone)]
pub struct SearchBroadcaster {
    client: Arc<dyn LookupClient>,
    stop_on_first_hit: bool,
}

impl SearchBroadcaster {
    pub fn new(client: Arc<dyn LookupClient>) -> Self {
        Self {
            client,
            stop_on_first_hit: false,
        }
    }

    pub fn tcp(timeout: Duration) -> Self {
        Self::new(Arc::new(TcpLookupClient::new(timeout)))
    }

    /// Abort the remaining lookups once one peer reports the file.
    pub fn stop_on_first_hit(mut self, stop: bool) -> Self {
        self.stop_on_first_hit = stop;
        self
    }

    /// Query every peer concurrently.
    ///
    /// Only an invalid fingerprint fails the whole call. A peer's failure is
    /// recorded as that peer's outcome and never affects the others. Returns
    /// after every lookup has answered, failed or timed out.
    pub async fn broadcast(
        &self,
        fingerprint: &str,
        peers: &[SocketAddr],
    ) -> Result<SearchReport, LookupError> {
        let fingerprint = Fingerprint::from_hex(fingerprint)?.to_hex();
        if peers.is_empty() {
            tracing::warn!("No peers to ask for {}", fingerprint);
        }

        let query = LookupQuery {
            fingerprint: fingerprint.clone(),
        };
        let mut tasks = JoinSet::new();
        for &peer in peers {
            let client = Arc::clone(&self.client);
            let query = query.clone();
            tasks.spawn(async move {
                let result = client.lookup(peer, &query).await;
                (peer, result)
            });
        }

        let mut outcomes: HashMap<SocketAddr, PeerOutcome> = HashMap::with_capacity(peers.len());
        let mut stopped = false;
        while let Some(joined) = tasks.join_next().await {
            let (peer, result) = match joined {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    tracing::warn!("Lookup task failed: {}", e);
                    continue;
                }
            };

            let outcome = PeerOutcome::from(result);
            match &outcome {
                PeerOutcome::Found { locator, .. } => tracing::info!("{}: has {}", peer, locator),
                PeerOutcome::NotFound => tracing::info!("{}: not found", peer),
                other => tracing::warn!("{}: {}", peer, other),
            }

            let hit = matches!(outcome, PeerOutcome::Found { .. });
            outcomes.insert(peer, outcome);
            if hit && self.stop_on_first_hit && !stopped {
                stopped = true;
                tasks.abort_all();
            }
        }

        let peers = peers
            .iter()
            .map(|&peer| {
                let outcome = outcomes.get(&peer).cloned().unwrap_or_else(|| {
                    if stopped {
                        PeerOutcome::Cancelled
                    } else {
                        PeerOutcome::Protocol {
                            reason: "lookup task failed".into(),
                        }
                    }
                });
                PeerReport { peer, outcome }
            })
            .collect();

        Ok(SearchReport { fingerprint, peers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use storage::fingerprint_bytes;
    use tokio::net::TcpListener;

    /// Answers from a fixed table, counting calls per peer. `holder` answers
    /// immediately; everyone else answers after `delay`.
    struct ScriptedClient {
        holder: SocketAddr,
        delay: Duration,
        calls: Mutex<HashMap<SocketAddr, usize>>,
        total: AtomicUsize,
    }

    #[async_trait]
    impl LookupClient for ScriptedClient {
        async fn lookup(
            &self,
            peer: SocketAddr,
            _query: &LookupQuery,
        ) -> Result<LookupResult, LookupError> {
            self.total.fetch_add(1, Ordering::SeqCst);
            *self.calls.lock().unwrap().entry(peer).or_default() += 1;

            if peer == self.holder {
                return Ok(LookupResult {
                    locator: Some("a.txt".into()),
                    responder: peer.to_string(),
                    requester: "127.0.0.1:1".into(),
                });
            }
            tokio::time::sleep(self.delay).await;
            Ok(LookupResult {
                locator: None,
                responder: peer.to_string(),
                requester: "127.0.0.1:1".into(),
            })
        }
    }

    fn peers(n: u16) -> Vec<SocketAddr> {
        (0..n).map(|i| SocketAddr::from(([10, 0, 0, 1 + i as u8], 50051))).collect()
    }

    #[tokio::test]
    async fn test_every_peer_is_queried_even_after_a_fast_hit() -> Result<(), LookupError> {
        let peers = peers(5);
        let client = Arc::new(ScriptedClient {
            holder: peers[0],
            delay: Duration::from_millis(100),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        });

        let broadcaster = SearchBroadcaster::new(client.clone());
        let report = broadcaster
            .broadcast(&fingerprint_bytes(b"hello").to_hex(), &peers)
            .await?;

        assert_eq!(client.total.load(Ordering::SeqCst), 5);
        let calls = client.calls.lock().unwrap();
        assert!(peers.iter().all(|p| calls.get(p) == Some(&1)));

        let summary = report.summary();
        assert_eq!(summary.found, 1);
        assert_eq!(summary.not_found, 4);
        assert_eq!(report.hits().next().map(|r| r.peer), Some(peers[0]));
        assert_eq!(
            report.peers.iter().map(|r| r.peer).collect::<Vec<_>>(),
            peers
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_on_first_hit_cancels_the_rest() -> Result<(), LookupError> {
        let peers = peers(4);
        let client = Arc::new(ScriptedClient {
            holder: peers[2],
            delay: Duration::from_secs(30),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        });

        let broadcaster = SearchBroadcaster::new(client).stop_on_first_hit(true);
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            broadcaster.broadcast(&fingerprint_bytes(b"hello").to_hex(), &peers),
        )
        .await
        .expect("broadcast should stop early")?;

        let summary = report.summary();
        assert_eq!(summary.found, 1);
        assert_eq!(summary.cancelled, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_fingerprint_sends_nothing() {
        let client = Arc::new(ScriptedClient {
            holder: peers(1)[0],
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        });

        let err = SearchBroadcaster::new(client.clone())
            .broadcast("xyz", &peers(3))
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::InvalidFingerprint(_)));
        assert_eq!(client.total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tcp_client_reports_closed_port_as_unreachable() -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let client = TcpLookupClient::new(Duration::from_secs(1));
        let query = LookupQuery {
            fingerprint: fingerprint_bytes(b"x").to_hex(),
        };
        let outcome = PeerOutcome::from(client.lookup(addr, &query).await);
        assert!(matches!(outcome, PeerOutcome::Unreachable { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_tcp_client_reports_silent_peer_as_protocol_error() -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        // Accepts, then hangs up without answering.
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let client = TcpLookupClient::new(Duration::from_secs(1));
        let query = LookupQuery {
            fingerprint: fingerprint_bytes(b"x").to_hex(),
        };
        let outcome = PeerOutcome::from(client.lookup(addr, &query).await);
        assert!(matches!(outcome, PeerOutcome::Protocol { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_hanging_peer_times_out_without_holding_up_others() -> anyhow::Result<()> {
        // Accepts and keeps the connection open, never answering.
        let hanging = TcpListener::bind("127.0.0.1:0").await?;
        let hanging_addr = hanging.local_addr()?;
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = hanging.accept().await {
                held.push(stream);
            }
        });

        // Answers every query with "not found".
        let answering = TcpListener::bind("127.0.0.1:0").await?;
        let answering_addr = answering.local_addr()?;
        tokio::spawn(async move {
            while let Ok((mut stream, peer)) = answering.accept().await {
                while let Ok(Some(_)) = recv_message::<_, LookupQuery>(&mut stream).await {
                    let result = LookupResult {
                        locator: None,
                        responder: answering_addr.to_string(),
                        requester: peer.to_string(),
                    };
                    if send_message(&mut stream, &result).await.is_err() {
                        break;
                    }
                }
            }
        });

        let started = Instant::now();
        let report = SearchBroadcaster::tcp(Duration::from_millis(300))
            .broadcast(
                &fingerprint_bytes(b"hello").to_hex(),
                &[hanging_addr, answering_addr],
            )
            .await?;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
        assert!(matches!(
            report.outcome_for(hanging_addr),
            Some(PeerOutcome::Unreachable { .. })
        ));
        assert_eq!(report.outcome_for(answering_addr), Some(&PeerOutcome::NotFound));
        assert_eq!(report.summary().unreachable, 1);
        Ok(())
    }
}
