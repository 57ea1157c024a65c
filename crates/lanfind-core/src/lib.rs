//! lanfind core: resolve a content fingerprint to the peer on the local
//! network that holds the file.
//!
//! A serving [`Node`] indexes its dataset directory and answers lookups over a
//! small length-prefixed TCP protocol. A searching node asks every known peer
//! at once through the [`SearchBroadcaster`].

pub mod broadcast;
pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod service;

// Re-export commonly used types
pub use broadcast::{
    LookupClient, PeerOutcome, PeerReport, SearchBroadcaster, SearchReport, SearchSummary,
    TcpLookupClient,
};
pub use config::NodeConfig;
pub use error::LookupError;
pub use node::{resolve_peers, search, Node};
pub use protocol::{LookupQuery, LookupResult};
pub use service::LookupService;
