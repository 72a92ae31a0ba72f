//! Kernel neighbor (ARP cache) table via `ip neigh show`.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use lanwatch_core::{Device, Source};

use crate::enrich::EnrichmentProbe;
use crate::error::{DiscoverError, Result};
use crate::process::{find_binary, run_tool};

pub struct NeighborProbe {
    ip_path: String,
    timeout: Duration,
}

impl NeighborProbe {
    pub fn new(ip_path: &str, timeout: Duration) -> Self {
        Self {
            ip_path: ip_path.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl EnrichmentProbe for NeighborProbe {
    fn source(&self) -> Source {
        Source::Neighbors
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn observe(&self, _known: &[Device]) -> Result<Vec<Device>> {
        if find_binary(&self.ip_path).is_none() {
            return Err(DiscoverError::ToolFailed {
                tool: self.ip_path.clone(),
                code: -1,
                stderr: "not found".to_string(),
            });
        }
        let args = vec!["neigh".to_string(), "show".to_string()];
        let output = run_tool(&self.ip_path, &args, self.timeout).await?;
        Ok(parse_neighbors(&output.stdout))
    }
}

/// Parse `ip neigh show` lines:
///
/// ```text
/// 192.168.1.1 dev eth0 lladdr 00:11:22:33:44:55 REACHABLE
/// 192.168.1.7 dev eth0  FAILED
/// ```
///
/// Entries without a link-layer address, and IPv6 entries, are skipped.
pub fn parse_neighbors(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let ip: Ipv4Addr = tokens.next()?.parse().ok()?;
            let mac = tokens.skip_while(|t| *t != "lladdr").nth(1)?;
            let device = Device::online(ip, Source::Neighbors).with_mac(mac);
            device.mac.is_some().then_some(device)
        })
        .collect()
}
