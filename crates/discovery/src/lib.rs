//! Peer discovery by sweeping the local IPv4 subnets for hosts that accept
//! connections on the lookup port.

pub mod cache;
pub mod error;
pub mod model;
pub mod net;
pub mod probe;
pub mod sweep;

pub use cache::PeerCache;
pub use error::DiscoveryError;
pub use model::{InterfaceV4, PeerAddress, PeerSet, Subnet};
pub use probe::is_port_open;
pub use sweep::{candidates, Discovery, SweepConfig};
