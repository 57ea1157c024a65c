use crate::model::InterfaceV4;
use crate::DiscoveryError;
use if_addrs::IfAddr;

/// IPv4 addresses assigned to the local interfaces, loopback included.
pub fn list_ipv4_interfaces() -> Result<Vec<InterfaceV4>, DiscoveryError> {
    let ifs = if_addrs::get_if_addrs().map_err(DiscoveryError::NetworkUnavailable)?;

    let mut out: Vec<InterfaceV4> = ifs
        .into_iter()
        .filter_map(|ifa| match ifa.addr {
            IfAddr::V4(v4) => Some(InterfaceV4 {
                name: ifa.name,
                is_loopback: v4.ip.is_loopback(),
                ip: v4.ip,
                netmask: v4.netmask,
            }),
            IfAddr::V6(_) => None,
        })
        .collect();

    out.sort_by(|a, b| (&a.name, &a.ip).cmp(&(&b.name, &b.ip)));
    out.dedup_by(|a, b| a.name == b.name && a.ip == b.ip);
    Ok(out)
}
