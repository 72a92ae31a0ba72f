//! Host-discovery sweep backend wrapping nmap.
//!
//! Executes `nmap -sn` as a child process and parses the XML output into
//! device observations. Only responders are reported.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lanwatch_core::{Device, ScanMethod, Source};

use crate::backend::ProbeBackend;
use crate::error::Result;
use crate::nmap_xml::{self, NmapRun};
use crate::process::{find_binary, run_tool};

/// Wrapper around the nmap binary.
pub struct NmapBackend {
    nmap_path: String,
    timeout: Duration,
}

impl NmapBackend {
    pub fn new(nmap_path: &str, timeout: Duration) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ProbeBackend for NmapBackend {
    fn method(&self) -> ScanMethod {
        ScanMethod::Nmap
    }

    fn is_available(&self) -> bool {
        find_binary(&self.nmap_path).is_some()
    }

    /// Nmap is invoked with `-oX -` to write XML to stdout.
    async fn discover(&self, cidr: Ipv4Net, _include_offline: bool) -> Result<Vec<Device>> {
        tracing::info!(target_cidr = %cidr, "Starting nmap sweep");

        let args = vec![
            "-sn".to_string(),
            "-oX".to_string(),
            "-".to_string(),
            "--noninteractive".to_string(),
            cidr.trunc().to_string(),
        ];
        let output = run_tool(&self.nmap_path, &args, self.timeout).await?;
        let run = nmap_xml::parse_nmap_xml(output.stdout.as_bytes())?;
        let devices = devices_from_run(&run);

        tracing::info!(
            target_cidr = %cidr,
            hosts_up = devices.len(),
            duration_ms = output.elapsed.as_millis(),
            "Nmap sweep complete"
        );
        Ok(devices)
    }
}

/// Convert the `up` hosts of a run into observations.
pub fn devices_from_run(run: &NmapRun) -> Vec<Device> {
    run.hosts
        .iter()
        .filter(|h| h.is_up())
        .filter_map(|host| {
            let ip: Ipv4Addr = host.ipv4()?.parse().ok()?;
            let mut device = Device::online(ip, Source::Nmap);
            if let Some(mac) = host.mac() {
                device = device.with_mac(mac);
            }
            if let Some(vendor) = host.vendor() {
                device = device.with_vendor(vendor);
            }
            if let Some(name) = host.hostname() {
                device = device.with_name(name);
            }
            Some(device)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_up_hosts_become_devices() {
        let xml = r#"<nmaprun scanner="nmap">
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <address addr="00:11:32:AA:BB:CC" addrtype="mac" vendor="Synology"/>
    <hostnames><hostname name="nas.lan" type="PTR"/></hostnames>
  </host>
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="192.168.1.20" addrtype="ipv4"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="192.168.1.30" addrtype="ipv4"/>
  </host>
</nmaprun>"#;
        let run = nmap_xml::parse_nmap_xml(xml.as_bytes()).unwrap();
        let devices = devices_from_run(&run);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].mac.as_deref(), Some("00:11:32:aa:bb:cc"));
        assert_eq!(devices[0].vendor.as_deref(), Some("Synology"));
        assert_eq!(devices[0].name.as_deref(), Some("nas.lan"));
        assert_eq!(devices[0].source, Source::Nmap);
        assert_eq!(devices[1].ip, Ipv4Addr::new(192, 168, 1, 20));
        assert!(devices[1].mac.is_none());
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let backend = NmapBackend::new("/nonexistent/bin/nmap", Duration::from_secs(1));
        assert!(!backend.is_available());
        assert_eq!(backend.method(), ScanMethod::Nmap);
    }
}
