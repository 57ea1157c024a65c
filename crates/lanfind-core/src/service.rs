//! Server side of the lookup exchange.

use crate::protocol::{recv_message, send_message, LookupQuery, LookupResult};
use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storage::{ContentIndex, FileRecord, Fingerprint};
use tokio::net::{TcpListener, TcpStream};

/// How long a connection may sit between queries (or inside a partial frame)
/// before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Answers fingerprint queries from the current index snapshot.
#[derive(Clone)]
pub struct LookupService {
    index: Arc<ContentIndex>,
    idle_timeout: Duration,
}

impl LookupService {
    pub fn new(index: Arc<ContentIndex>) -> Self {
        Self {
            index,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Locator of the file matching `fingerprint`, if indexed. Unparsable
    /// fingerprints match nothing.
    pub fn resolve(&self, fingerprint: &str) -> Option<String> {
        match Fingerprint::from_hex(fingerprint) {
            Ok(fp) => self.index.snapshot().lookup(&fp).map(FileRecord::locator),
            Err(e) => {
                tracing::warn!("Unparsable fingerprint {:?}: {}", fingerprint, e);
                None
            }
        }
    }

    /// Accept connections until `shutdown` resolves. Each connection is
    /// served on its own task. Failed accepts (EMFILE and friends) are
    /// retried after a growing delay.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut backoff = AcceptBackoff::new();

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Lookup service stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => {
                    backoff.reset();
                    conn
                }
                Err(e) => {
                    let delay = backoff.fail();
                    tracing::warn!("Accept failed, retrying in {:?}: {}", delay, e);
                    tokio::select! {
                        _ = &mut shutdown => {
                            tracing::info!("Lookup service stopping");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            tracing::debug!("Connection from {}", peer);

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(stream).await {
                    tracing::error!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Serve queries on one connection until the peer closes it.
    ///
    /// The connection idles waiting for a frame, answers exactly one result
    /// per query, then idles again. A connection that stays silent for the
    /// idle timeout is closed. Returns how many queries were answered.
    pub async fn handle_connection(&self, mut stream: TcpStream) -> Result<usize> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let mut served = 0;

        loop {
            let next = recv_message::<_, LookupQuery>(&mut stream);
            let query = match tokio::time::timeout(self.idle_timeout, next).await {
                Ok(received) => match received? {
                    Some(query) => query,
                    None => break,
                },
                Err(_) => {
                    tracing::debug!("{} idle for {:?}, closing", peer, self.idle_timeout);
                    break;
                }
            };

            let result = self.answer(&query, local, peer);
            send_message(&mut stream, &result).await?;
            served += 1;
        }

        tracing::debug!("{} closed after {} queries", peer, served);
        Ok(served)
    }

    fn answer(&self, query: &LookupQuery, local: SocketAddr, peer: SocketAddr) -> LookupResult {
        let locator = self.resolve(&query.fingerprint);
        match &locator {
            Some(path) => tracing::info!("Query {} from {}: {}", query.fingerprint, peer, path),
            None => tracing::info!("Query {} from {}: not found", query.fingerprint, peer),
        }

        LookupResult {
            locator,
            responder: local.to_string(),
            requester: peer.to_string(),
        }
    }
}

/// Delay before retrying a failed accept. Doubles per consecutive failure.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: ACCEPT_BACKOFF_MIN,
        }
    }

    fn fail(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = ACCEPT_BACKOFF_MIN;
    }
}
