use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A peer is identified by its IPv4 host; every node listens on the same port.
pub type PeerAddress = Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceV4 {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub is_loopback: bool,
}

impl InterfaceV4 {
    pub fn subnet(&self) -> Subnet {
        Subnet::from_netmask(self.ip, self.netmask)
    }
}

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// The subnet of `prefix_len` bits containing `addr`.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix_len));
        Self { network, prefix_len }
    }

    pub fn from_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self::new(addr, u32::from(netmask).leading_ones() as u8)
    }

    /// Narrow to the /`min_prefix_len` block around `addr` when this subnet is
    /// wider than that.
    pub fn clamp(self, addr: Ipv4Addr, min_prefix_len: u8) -> Self {
        if self.prefix_len < min_prefix_len && self.contains(addr) {
            Self::new(addr, min_prefix_len)
        } else {
            self
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix_len) == u32::from(self.network)
    }

    /// Usable host addresses. Network and broadcast are left out except on
    /// /31 and /32 where every address is a host.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let base = u64::from(u32::from(self.network));
        let size = 1u64 << (32 - u32::from(self.prefix_len));
        let (first, last) = if size <= 2 {
            (base, base + size - 1)
        } else {
            (base + 1, base + size - 2)
        };
        (first..=last).map(|a| Ipv4Addr::from(a as u32))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// Live peers found by a sweep or loaded from the cache. Sorted, no
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet(Vec<PeerAddress>);

impl PeerSet {
    pub fn iter(&self) -> impl Iterator<Item = &PeerAddress> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.0.binary_search(addr).is_ok()
    }
}

impl FromIterator<PeerAddress> for PeerSet {
    fn from_iter<I: IntoIterator<Item = PeerAddress>>(iter: I) -> Self {
        let mut peers: Vec<PeerAddress> = iter.into_iter().collect();
        peers.sort();
        peers.dedup();
        Self(peers)
    }
}

impl<'a> IntoIterator for &'a PeerSet {
    type Item = &'a PeerAddress;
    type IntoIter = std::slice::Iter<'a, PeerAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
