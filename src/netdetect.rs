use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::lookup_host;

/// Detect the machine's primary non-loopback IPv4 address.
///
/// When several interfaces carry one, the numerically lowest is returned so the
/// default target is stable across runs. `Ok(None)` means only loopback exists.
pub fn detect_local_ip() -> Result<Option<Ipv4Addr>> {
    let mut candidates: Vec<Ipv4Addr> = get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(v4.ip),
            IfAddr::V6(_) => None,
        })
        .filter(is_scan_candidate)
        .collect();
    candidates.sort_unstable();
    Ok(candidates.into_iter().next())
}

fn is_scan_candidate(ip: &Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified() && !ip.is_link_local()
}

/// Resolve a host name or literal address to a single IP, preferring IPv4.
///
/// The scan connects to this address for every port, so resolution happens once.
pub async fn resolve_host(host: &str) -> io::Result<IpAddr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<IpAddr> = lookup_host((host, 0)).await?.map(|sa| sa.ip()).collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )
        })
}
