//! L2 sweep backend wrapping `arp-scan`.
//!
//! Highest-fidelity backend: every reply carries the hardware address and,
//! usually, a vendor string decoded by arp-scan itself. Needs raw socket
//! privileges, so a present binary can still fail at runtime.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lanwatch_core::{Device, ScanMethod, Source};

use crate::backend::ProbeBackend;
use crate::error::Result;
use crate::process::{find_binary, run_tool};

pub struct ArpScanBackend {
    arp_scan_path: String,
    timeout: Duration,
}

impl ArpScanBackend {
    pub fn new(arp_scan_path: &str, timeout: Duration) -> Self {
        Self {
            arp_scan_path: arp_scan_path.to_string(),
            timeout,
        }
    }

    fn args(cidr: Ipv4Net) -> Vec<String> {
        vec![
            "--numeric".to_string(),
            "--ignoredups".to_string(),
            "--retry=1".to_string(),
            "--timeout=200".to_string(),
            cidr.trunc().to_string(),
        ]
    }
}

#[async_trait]
impl ProbeBackend for ArpScanBackend {
    fn method(&self) -> ScanMethod {
        ScanMethod::ArpScan
    }

    fn is_available(&self) -> bool {
        find_binary(&self.arp_scan_path).is_some()
    }

    async fn discover(&self, cidr: Ipv4Net, _include_offline: bool) -> Result<Vec<Device>> {
        tracing::info!(cidr = %cidr, "Starting arp-scan sweep");

        let output = run_tool(&self.arp_scan_path, &Self::args(cidr), self.timeout).await?;
        let devices = parse_arp_scan(&output.stdout);

        tracing::info!(
            cidr = %cidr,
            hosts_up = devices.len(),
            duration_ms = output.elapsed.as_millis(),
            "arp-scan sweep complete"
        );
        Ok(devices)
    }
}

/// Parse arp-scan's tab-separated reply lines:
///
/// ```text
/// 192.168.1.10	aa:bb:cc:dd:ee:ff	Apple, Inc.
/// ```
///
/// Banner lines and anything whose first column is not an IPv4 address
/// are ignored.
pub fn parse_arp_scan(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.trim().split('\t').map(str::trim);
            let ip: Ipv4Addr = cols.next()?.parse().ok()?;
            let mac = cols.next()?;
            let vendor = cols
                .next()
                .filter(|v| !v.starts_with("(Unknown"))
                .unwrap_or_default();

            Some(
                Device::online(ip, Source::ArpScan)
                    .with_mac(mac)
                    .with_vendor(vendor),
            )
        })
        .collect()
}
