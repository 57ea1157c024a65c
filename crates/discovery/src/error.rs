use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("cannot enumerate network interfaces: {0}")]
    NetworkUnavailable(#[source] std::io::Error),
}
