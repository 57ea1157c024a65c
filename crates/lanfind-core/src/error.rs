use std::net::SocketAddr;
use thiserror::Error;

/// Failure of one lookup exchange with one peer.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {0} did not answer in time")]
    Timeout(SocketAddr),

    #[error("protocol error with {peer}: {reason}")]
    Protocol { peer: SocketAddr, reason: String },

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(#[from] storage::FingerprintError),
}
