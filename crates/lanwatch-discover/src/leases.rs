//! DHCP lease tables.
//!
//! Reads dnsmasq and ISC dhcpd lease files. Which format a file uses is
//! decided by its content, so either can be configured under any path.
//! Missing or unreadable files are skipped silently.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lanwatch_core::mac::normalize_mac;
use lanwatch_core::{Device, Source};

use crate::enrich::EnrichmentProbe;
use crate::error::Result;

/// One address assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
}

/// dnsmasq: `<expiry> <mac> <ip> <hostname> <client-id>`, `*` for no name.
pub fn parse_dnsmasq(content: &str) -> Vec<Lease> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let ip = parts.get(2).and_then(|raw| raw.parse::<Ipv4Addr>().ok());
            let (Some(ip), true) = (ip, parts.len() >= 4) else {
                tracing::warn!(line = n + 1, content = line, "Skipping malformed dnsmasq lease");
                return None;
            };
            Some(Lease {
                ip,
                mac: normalize_mac(parts[1]),
                hostname: (parts[3] != "*").then(|| parts[3].to_string()),
            })
        })
        .collect()
}

/// ISC dhcpd: `lease <ip> { ... hardware ethernet <mac>; client-hostname "<name>"; }`.
///
/// Later blocks for the same address supersede earlier ones, as dhcpd
/// appends renewals.
pub fn parse_dhcpd(content: &str) -> Vec<Lease> {
    let mut leases: Vec<Lease> = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("lease ") {
        let after = &rest[start + "lease ".len()..];
        let Some(open) = after.find('{') else {
            break;
        };
        let Some(close) = after[open..].find('}') else {
            break;
        };
        let body = &after[open + 1..open + close];
        rest = &after[open + close + 1..];

        let Ok(ip) = after[..open].trim().parse::<Ipv4Addr>() else {
            tracing::warn!(address = after[..open].trim(), "Skipping dhcpd lease with unparseable address");
            continue;
        };

        let mut lease = Lease {
            ip,
            mac: None,
            hostname: None,
        };
        for stmt in body.split(';').map(str::trim) {
            if let Some(mac) = stmt.strip_prefix("hardware ethernet") {
                lease.mac = normalize_mac(mac);
            } else if let Some(name) = stmt.strip_prefix("client-hostname") {
                let name = name.trim().trim_matches('"');
                lease.hostname = (!name.is_empty()).then(|| name.to_string());
            }
        }

        leases.retain(|l| l.ip != ip);
        leases.push(lease);
    }

    leases
}

/// Parse a lease file of either format.
pub fn parse_leases(content: &str) -> Vec<Lease> {
    if content.contains("lease ") && content.contains('{') {
        parse_dhcpd(content)
    } else {
        parse_dnsmasq(content)
    }
}

/// Name (and MAC) hints for known hosts from the configured lease files.
pub struct LeaseProbe {
    paths: Vec<PathBuf>,
}

impl LeaseProbe {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    async fn read_all(&self) -> Vec<Lease> {
        let mut leases = Vec::new();
        for path in &self.paths {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let parsed = parse_leases(&String::from_utf8_lossy(&bytes));
                    tracing::debug!(path = %path.display(), leases = parsed.len(), "Read lease file");
                    leases.extend(parsed);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Lease file not readable")
                }
            }
        }
        leases
    }
}

#[async_trait]
impl EnrichmentProbe for LeaseProbe {
    fn source(&self) -> Source {
        Source::Leases
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn observe(&self, known: &[Device]) -> Result<Vec<Device>> {
        Ok(match_leases(known, &self.read_all().await))
    }
}

/// Match leases to known hosts: by IP first, otherwise by MAC.
///
/// An IP match contributes the hostname and the lease's MAC; a MAC match
/// (the host has since moved address) only the hostname.
pub fn match_leases(known: &[Device], leases: &[Lease]) -> Vec<Device> {
    let by_ip: HashMap<Ipv4Addr, &Lease> = leases.iter().map(|l| (l.ip, l)).collect();
    let by_mac: HashMap<&str, &Lease> = leases
        .iter()
        .filter_map(|l| l.mac.as_deref().map(|m| (m, l)))
        .collect();

    known
        .iter()
        .filter_map(|device| {
            if let Some(lease) = by_ip.get(&device.ip) {
                let mut obs = Device::new(device.ip, device.status, Source::Leases);
                obs.mac = lease.mac.clone();
                obs.name = lease.hostname.clone();
                return (obs.mac.is_some() || obs.name.is_some()).then_some(obs);
            }
            let lease = by_mac.get(device.mac.as_deref()?)?;
            let name = lease.hostname.as_deref()?;
            Some(Device::new(device.ip, device.status, Source::Leases).with_name(name))
        })
        .collect()
}
