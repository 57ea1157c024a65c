use crate::model::{InterfaceV4, PeerSet};
use crate::net::list_ipv4_interfaces;
use crate::probe::{is_port_open, DEFAULT_PROBE_TIMEOUT};
use crate::DiscoveryError;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Port every node serves lookups on.
    pub port: u16,
    pub probe_timeout: Duration,
    /// Probes in flight at once.
    pub concurrency: usize,
    /// Subnets wider than this are narrowed to the block around the
    /// interface address.
    pub min_prefix_len: u8,
    /// Keep this node's own addresses in the candidate set.
    pub include_self: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            port: 50051,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            concurrency: 256,
            min_prefix_len: 24,
            include_self: false,
        }
    }
}

/// Addresses worth probing for the given interfaces.
///
/// Loopback interfaces are ignored. Unless `include_self` is set, the
/// interfaces' own addresses are removed.
pub fn candidates(interfaces: &[InterfaceV4], cfg: &SweepConfig) -> BTreeSet<Ipv4Addr> {
    let mut hosts = BTreeSet::new();
    for iface in interfaces.iter().filter(|i| !i.is_loopback) {
        let subnet = iface.subnet().clamp(iface.ip, cfg.min_prefix_len);
        tracing::debug!("Interface {} {} -> sweeping {}", iface.name, iface.ip, subnet);
        hosts.extend(subnet.hosts());
    }

    if !cfg.include_self {
        for iface in interfaces {
            hosts.remove(&iface.ip);
        }
    }
    hosts
}

/// Runs sweeps one at a time.
pub struct Discovery {
    cfg: SweepConfig,
    sweep_lock: Mutex<()>,
}

impl Discovery {
    pub fn new(cfg: SweepConfig) -> Self {
        Self {
            cfg,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.cfg
    }

    /// Sweep every subnet the local interfaces are attached to.
    pub async fn discover(&self) -> Result<PeerSet, DiscoveryError> {
        let interfaces = list_ipv4_interfaces()?;
        let hosts = candidates(&interfaces, &self.cfg);
        if hosts.is_empty() {
            tracing::warn!("No non-loopback IPv4 interface to sweep");
        }
        Ok(self.sweep(hosts).await)
    }

    /// Probe each host on the service port and keep the ones that answer.
    ///
    /// Returns only after every probe has finished or timed out.
    pub async fn sweep<I>(&self, hosts: I) -> PeerSet
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let _guard = self.sweep_lock.lock().await;

        let port = self.cfg.port;
        let timeout = self.cfg.probe_timeout;
        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut probed = 0usize;

        for host in hosts {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            probed += 1;
            tasks.spawn(async move {
                let _permit = permit;
                let live = is_port_open(SocketAddr::from((host, port)), timeout).await;
                (host, live)
            });
        }

        let mut live = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((host, true)) => {
                    tracing::info!("Peer found: {}", host);
                    live.push(host);
                }
                Ok((_, false)) => {}
                Err(e) => tracing::warn!("Probe task failed: {}", e),
            }
        }

        let peers: PeerSet = live.into_iter().collect();
        tracing::info!(
            "Sweep done: {}/{} hosts answered on port {}",
            peers.len(),
            probed,
            port
        );
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: [u8; 4], prefix: u8) -> InterfaceV4 {
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) };
        let ip = Ipv4Addr::from(ip);
        InterfaceV4 {
            name: name.to_string(),
            is_loopback: ip.is_loopback(),
            ip,
            netmask: Ipv4Addr::from(mask),
        }
    }

    #[test]
    fn test_candidates_exclude_self_by_default() {
        let ifs = vec![
            iface("lo", [127, 0, 0, 1], 8),
            iface("eth0", [192, 168, 1, 10], 24),
        ];

        let hosts = candidates(&ifs, &SweepConfig::default());
        assert_eq!(hosts.len(), 253);
        assert!(!hosts.contains(&Ipv4Addr::new(192, 168, 1, 10)));
        assert!(!hosts.iter().any(|h| h.is_loopback()));

        let cfg = SweepConfig {
            include_self: true,
            ..SweepConfig::default()
        };
        let hosts = candidates(&ifs, &cfg);
        assert_eq!(hosts.len(), 254);
        assert!(hosts.contains(&Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn test_candidates_clamp_and_merge() {
        let ifs = vec![
            iface("eth0", [10, 1, 2, 3], 16),
            iface("eth1", [10, 1, 2, 200], 24),
        ];
        let hosts = candidates(&ifs, &SweepConfig::default());
        // Both collapse to 10.1.2.0/24, minus the two local addresses.
        assert_eq!(hosts.len(), 252);
        assert!(hosts.iter().all(|h| h.octets()[..3] == [10, 1, 2]));
    }

    // Linux routes all of 127.0.0.0/8 to loopback without extra setup.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sweep_finds_exactly_listening_hosts() -> std::io::Result<()> {
        use tokio::net::TcpListener;

        let first = TcpListener::bind("127.0.0.2:0").await?;
        let port = first.local_addr()?.port();
        let second = TcpListener::bind(("127.0.0.5", port)).await?;

        let discovery = Discovery::new(SweepConfig {
            port,
            probe_timeout: Duration::from_millis(500),
            ..SweepConfig::default()
        });
        let hosts = (2u8..=9).map(|i| Ipv4Addr::new(127, 0, 0, i));
        let peers = discovery.sweep(hosts).await;

        let expected: PeerSet = vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::new(127, 0, 0, 5)]
            .into_iter()
            .collect();
        assert_eq!(peers, expected);

        drop((first, second));
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_with_no_candidates() {
        let discovery = Discovery::new(SweepConfig::default());
        let peers = discovery.sweep(std::iter::empty()).await;
        assert!(peers.is_empty());
    }
}
