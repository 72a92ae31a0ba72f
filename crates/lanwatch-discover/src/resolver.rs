//! Subnet resolution: which address ranges a scan should cover.
//!
//! A concrete CIDR is used as given. Otherwise every usable IPv4 interface
//! network is collected from `ip -j addr`, or from the datalink layer where
//! iproute2 is missing (non-Linux hosts). When neither yields a usable
//! network the primary outbound address is widened to a /24 as a best guess.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lanwatch_core::SubnetSelector;
use pnet::ipnetwork::IpNetwork;
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::error::{DiscoverError, Result};
use crate::process::{find_binary, run_tool};

/// One IPv4 address assigned to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub ifname: String,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

/// The host's view of its own network configuration.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Every IPv4 interface address, or `None` when the table is unavailable.
    async fn interface_addrs(&self) -> Option<Vec<InterfaceAddr>>;

    /// The address outbound traffic would leave from.
    async fn primary_addr(&self) -> Option<Ipv4Addr>;
}

/// Reads the live host configuration through iproute2, falling back to
/// [`DatalinkNetwork`] when `ip` is missing or fails.
pub struct SystemNetwork {
    ip_path: String,
    timeout: Duration,
}

impl SystemNetwork {
    pub fn new(ip_path: &str) -> Self {
        Self {
            ip_path: ip_path.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    async fn iproute_addrs(&self) -> Option<Vec<InterfaceAddr>> {
        find_binary(&self.ip_path)?;

        let args = vec!["-j".to_string(), "addr".to_string()];
        let output = match run_tool(&self.ip_path, &args, self.timeout).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(error = %e, "Interface table unavailable");
                return None;
            }
        };

        match parse_ip_addr_json(&output.stdout) {
            Ok(addrs) => Some(addrs),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable interface table");
                None
            }
        }
    }
}

#[async_trait]
impl HostNetwork for SystemNetwork {
    async fn interface_addrs(&self) -> Option<Vec<InterfaceAddr>> {
        match self.iproute_addrs().await {
            Some(addrs) => Some(addrs),
            None => DatalinkNetwork.interface_addrs().await,
        }
    }

    async fn primary_addr(&self) -> Option<Ipv4Addr> {
        outbound_addr().await
    }
}

/// Reads interface addresses from the OS datalink layer through `pnet`.
pub struct DatalinkNetwork;

#[async_trait]
impl HostNetwork for DatalinkNetwork {
    async fn interface_addrs(&self) -> Option<Vec<InterfaceAddr>> {
        let interfaces = tokio::task::spawn_blocking(pnet::datalink::interfaces)
            .await
            .ok()?;
        let addrs: Vec<InterfaceAddr> = interfaces
            .iter()
            .flat_map(|iface| datalink_addrs(&iface.name, &iface.ips))
            .collect();
        tracing::debug!(interfaces = interfaces.len(), addrs = addrs.len(), "Read datalink interfaces");
        Some(addrs)
    }

    async fn primary_addr(&self) -> Option<Ipv4Addr> {
        outbound_addr().await
    }
}

/// IPv4 addresses among one interface's networks.
pub fn datalink_addrs(ifname: &str, ips: &[IpNetwork]) -> Vec<InterfaceAddr> {
    ips.iter()
        .filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(InterfaceAddr {
                ifname: ifname.to_string(),
                addr: v4.ip(),
                prefix_len: v4.prefix(),
            }),
            IpNetwork::V6(_) => None,
        })
        .collect()
}

/// The local address outbound traffic would leave from.
async fn outbound_addr() -> Option<Ipv4Addr> {
    // Connecting a UDP socket selects a route without sending anything.
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await.ok()?;
    socket
        .connect(SocketAddr::from(([192, 0, 2, 1], 9)))
        .await
        .ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(v4) if !v4.ip().is_unspecified() => Some(*v4.ip()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct IpLink {
    #[serde(default)]
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    local: Option<String>,
    prefixlen: Option<u8>,
}

/// Parse the output of `ip -j addr` into IPv4 interface addresses.
///
/// Entries that lack an address or prefix, or whose address does not parse,
/// are skipped.
pub fn parse_ip_addr_json(json: &str) -> Result<Vec<InterfaceAddr>> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).map_err(|e| DiscoverError::parse("ip -j addr output", e))?;

    Ok(links
        .into_iter()
        .flat_map(|link| {
            let ifname = link.ifname;
            link.addr_info.into_iter().filter_map(move |info| {
                if info.family != "inet" {
                    return None;
                }
                let addr = info.local?.parse().ok()?;
                Some(InterfaceAddr {
                    ifname: ifname.clone(),
                    addr,
                    prefix_len: info.prefixlen?,
                })
            })
        })
        .collect())
}

/// Networks worth scanning among the given interface addresses, deduplicated
/// and in discovery order.
///
/// Skips loopback interfaces and addresses, link-local space, networks more
/// specific than `max_prefix`, and huge (/8 or wider) networks outside
/// private space.
pub fn usable_subnets(addrs: &[InterfaceAddr], max_prefix: u8) -> Vec<Ipv4Net> {
    let mut subnets: Vec<Ipv4Net> = Vec::new();

    for entry in addrs {
        if entry.ifname.starts_with("lo") || entry.addr.is_loopback() || entry.addr.is_link_local()
        {
            continue;
        }
        if entry.prefix_len > max_prefix {
            continue;
        }
        if entry.prefix_len <= 8 && !entry.addr.is_private() {
            continue;
        }
        let Ok(net) = Ipv4Net::new(entry.addr, entry.prefix_len) else {
            continue;
        };
        let net = net.trunc();
        if !subnets.contains(&net) {
            subnets.push(net);
        }
    }

    subnets
}

/// Determines the candidate ranges for a scan.
pub struct SubnetResolver {
    network: Arc<dyn HostNetwork>,
    max_prefix: u8,
}

impl SubnetResolver {
    pub fn new(network: Arc<dyn HostNetwork>, max_prefix: u8) -> Self {
        Self {
            network,
            max_prefix,
        }
    }

    /// Resolve a request's subnet selector into an ordered, non-empty set of
    /// ranges.
    pub async fn resolve(&self, requested: &SubnetSelector) -> Result<Vec<Ipv4Net>> {
        match requested {
            SubnetSelector::Cidr(net) => Ok(vec![*net]),
            SubnetSelector::All => self.local_subnets().await,
        }
    }

    /// Every locally attached range, falling back to a /24 around the
    /// primary address.
    pub async fn local_subnets(&self) -> Result<Vec<Ipv4Net>> {
        if let Some(addrs) = self.network.interface_addrs().await {
            let subnets = usable_subnets(&addrs, self.max_prefix);
            if !subnets.is_empty() {
                tracing::debug!(subnets = ?subnets, "Resolved subnets from interface table");
                return Ok(subnets);
            }
            tracing::debug!("Interface table had no usable IPv4 networks");
        }

        let primary = self.network.primary_addr().await.ok_or_else(|| {
            DiscoverError::ResolutionFailure(
                "no interface networks and no primary address".to_string(),
            )
        })?;
        if primary.is_loopback() || primary.is_unspecified() {
            return Err(DiscoverError::ResolutionFailure(format!(
                "primary address {primary} is not routable"
            )));
        }

        let guess = Ipv4Net::new(primary, 24)
            .map_err(|e| DiscoverError::ResolutionFailure(e.to_string()))?
            .trunc();
        tracing::info!(primary = %primary, subnet = %guess, "Falling back to /24 around primary address");
        Ok(vec![guess])
    }
}
