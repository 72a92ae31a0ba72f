//! SSDP (UPnP) discovery.
//!
//! Multicasts an `M-SEARCH` for `ssdp:all` and collects unicast replies
//! until the deadline. A reply names the host that sent it; the `SERVER`
//! header (or `ST`/`USN` when absent) becomes its name.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use lanwatch_core::{Device, Source};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::datagram::collect_until;
use crate::enrich::EnrichmentProbe;
use crate::error::Result;

const SSDP_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 2\r\n\
ST: ssdp:all\r\n\r\n";

pub struct SsdpProbe {
    timeout: Duration,
}

impl SsdpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl EnrichmentProbe for SsdpProbe {
    fn source(&self) -> Source {
        Source::Ssdp
    }

    /// Replies are collected for the full window; the extra second bounds
    /// socket setup.
    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(1)
    }

    async fn observe(&self, _known: &[Device]) -> Result<Vec<Device>> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        socket.set_multicast_ttl_v4(2)?;

        // Two probes, in case the first is lost.
        for _ in 0..2 {
            if let Err(e) = socket.send_to(M_SEARCH.as_bytes(), SSDP_GROUP).await {
                tracing::debug!(error = %e, "SSDP send failed");
            }
        }

        let deadline = Instant::now() + self.timeout;
        let mut found: HashMap<Ipv4Addr, Device> = HashMap::new();

        collect_until(&socket, deadline, 65535, |from, data| {
            let headers = parse_ssdp_response(data);
            if let Some(name) = ssdp_name(&headers) {
                found.insert(
                    from,
                    Device::online(from, Source::Ssdp)
                        .with_name(name)
                        .with_type("ssdp"),
                );
            }
        })
        .await;

        tracing::debug!(responders = found.len(), "SSDP window closed");
        Ok(found.into_values().collect())
    }
}

/// Parse an SSDP reply into upper-cased header names and trimmed values.
/// The status line is skipped.
pub fn parse_ssdp_response(data: &[u8]) -> HashMap<String, String> {
    String::from_utf8_lossy(data)
        .split("\r\n")
        .skip(1)
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_uppercase(), value.trim().to_string()))
        })
        .collect()
}

fn ssdp_name(headers: &HashMap<String, String>) -> Option<&str> {
    ["SERVER", "ST", "USN"]
        .iter()
        .filter_map(|k| headers.get(*k))
        .map(String::as_str)
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.1:49152/rootDesc.xml\r\n\
Server: Linux/5.4 UPnP/1.0 MiniUPnPd/2.2\r\n\
ST: upnp:rootdevice\r\n\
USN: uuid:1234::upnp:rootdevice\r\n\r\n";

    #[test]
    fn parses_headers_case_insensitively() {
        let headers = parse_ssdp_response(REPLY);
        assert_eq!(
            headers.get("LOCATION").map(String::as_str),
            Some("http://192.168.1.1:49152/rootDesc.xml")
        );
        assert_eq!(
            ssdp_name(&headers),
            Some("Linux/5.4 UPnP/1.0 MiniUPnPd/2.2")
        );
    }

    #[test]
    fn falls_back_to_st_then_usn() {
        let headers = parse_ssdp_response(b"HTTP/1.1 200 OK\r\nST: urn:dial-multiscreen-org:service:dial:1\r\n\r\n");
        assert_eq!(ssdp_name(&headers), Some("urn:dial-multiscreen-org:service:dial:1"));

        let headers = parse_ssdp_response(b"HTTP/1.1 200 OK\r\nSERVER:\r\nUSN: uuid:abcd\r\n\r\n");
        assert_eq!(ssdp_name(&headers), Some("uuid:abcd"));

        assert_eq!(ssdp_name(&parse_ssdp_response(b"garbage")), None);
    }
}
