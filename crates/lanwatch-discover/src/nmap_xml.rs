//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag outputs structured XML to stdout. A host-discovery
//! sweep (`-sn`) only produces status, address and hostname elements, so
//! that is all this module models; unknown elements are ignored by serde.

use serde::Deserialize;

use crate::error::{DiscoverError, Result};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type")]
    pub hostname_type: Option<String>,
}

impl NmapHost {
    /// Extract the IPv4 address, if present.
    pub fn ipv4(&self) -> Option<&str> {
        self.address_of("ipv4").map(|a| a.addr.as_str())
    }

    /// Extract the MAC address, if present.
    pub fn mac(&self) -> Option<&str> {
        self.address_of("mac").map(|a| a.addr.as_str())
    }

    /// Vendor nmap attached to the MAC address.
    pub fn vendor(&self) -> Option<&str> {
        self.address_of("mac").and_then(|a| a.vendor.as_deref())
    }

    /// Extract the first hostname, if present.
    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    fn address_of(&self, addr_type: &str) -> Option<&Address> {
        self.addresses.iter().find(|a| a.addr_type == addr_type)
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| DiscoverError::parse("nmap XML", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn -oX - 10.0.1.0/24" startstr="Mon Feb 24 10:00:00 2026">
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:01" addrtype="mac" vendor="TestVendor"/>
    <hostnames>
      <hostname name="gateway.local" type="PTR"/>
    </hostnames>
  </host>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.1.10" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:10" addrtype="mac"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.1.99" addrtype="ipv4"/>
  </host>
  <runstats>
    <finished time="1740400000" elapsed="2.50"/>
    <hosts up="2" down="1" total="3"/>
  </runstats>
</nmaprun>"#;

    #[test]
    fn test_parse_sweep() {
        let result = parse_nmap_xml(SWEEP_XML.as_bytes()).unwrap();
        assert_eq!(result.hosts.len(), 3);
        assert_eq!(result.args.as_deref(), Some("nmap -sn -oX - 10.0.1.0/24"));

        let up_hosts: Vec<_> = result.hosts.iter().filter(|h| h.is_up()).collect();
        assert_eq!(up_hosts.len(), 2);

        let gateway = &result.hosts[0];
        assert_eq!(gateway.ipv4(), Some("10.0.1.1"));
        assert_eq!(gateway.mac(), Some("AA:BB:CC:DD:EE:01"));
        assert_eq!(gateway.vendor(), Some("TestVendor"));
        assert_eq!(gateway.hostname(), Some("gateway.local"));

        let second = &result.hosts[1];
        assert_eq!(second.vendor(), None);
        assert_eq!(second.hostname(), None);
    }

    #[test]
    fn test_parse_empty_scan() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn 192.168.99.0/24">
  <runstats>
    <finished elapsed="1.00"/>
    <hosts up="0" down="256" total="256"/>
  </runstats>
</nmaprun>"#;

        let result = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert_eq!(result.hosts.len(), 0);
    }

    #[test]
    fn test_truncated_output_is_parse_error() {
        let err = parse_nmap_xml(b"<nmaprun><host><status state=").unwrap_err();
        assert!(matches!(err, DiscoverError::Parse { .. }));
    }
}
