//! mDNS / DNS-SD discovery.
//!
//! Sends PTR questions for common service types to the mDNS group with the
//! unicast-response bit set, so responders answer straight to our socket.
//! Answers are turned into `ip → name` pairs: the service instance name when
//! an SRV record ties it to an A record, otherwise the host name.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use dns_parser::{Builder, Packet, QueryClass, QueryType, RData};
use lanwatch_core::{Device, Source};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::datagram::collect_until;
use crate::enrich::EnrichmentProbe;
use crate::error::{DiscoverError, Result};

const MDNS_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353);

const SERVICE_TYPES: [&str; 2] = ["_http._tcp.local", "_services._dns-sd._udp.local"];

pub struct MdnsProbe {
    timeout: Duration,
}

impl MdnsProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl EnrichmentProbe for MdnsProbe {
    fn source(&self) -> Source {
        Source::Mdns
    }

    fn timeout(&self) -> Duration {
        self.timeout + Duration::from_secs(1)
    }

    async fn observe(&self, _known: &[Device]) -> Result<Vec<Device>> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        socket.set_multicast_ttl_v4(255)?;
        socket.send_to(&build_query()?, MDNS_GROUP).await?;

        let deadline = Instant::now() + self.timeout;
        let mut found: HashMap<Ipv4Addr, Device> = HashMap::new();

        collect_until(&socket, deadline, 9000, |from, data| match extract_names(data, from) {
            Ok(names) => {
                for (ip, name) in names {
                    found.insert(
                        ip,
                        Device::online(ip, Source::Mdns)
                            .with_name(&name)
                            .with_type("mdns"),
                    );
                }
            }
            Err(e) => tracing::debug!(from = %from, error = %e, "Skipping mDNS packet"),
        })
        .await;

        tracing::debug!(responders = found.len(), "mDNS window closed");
        Ok(found.into_values().collect())
    }
}

fn build_query() -> Result<Vec<u8>> {
    let mut builder = Builder::new_query(0, false);
    for service in SERVICE_TYPES {
        builder.add_question(service, true, QueryType::PTR, QueryClass::IN);
    }
    builder
        .build()
        .map_err(|_| DiscoverError::Internal("mDNS query truncated".to_string()))
}

/// Host names announced in one mDNS response.
///
/// Hosts are identified by their A records; a packet without any is
/// attributed to the address it came from.
pub fn extract_names(data: &[u8], from: Ipv4Addr) -> Result<Vec<(Ipv4Addr, String)>> {
    let packet = Packet::parse(data).map_err(|e| DiscoverError::parse("mDNS packet", e))?;

    let mut hosts: Vec<(String, Ipv4Addr)> = Vec::new();
    let mut instances: Vec<String> = Vec::new();
    let mut targets: HashMap<String, String> = HashMap::new();

    for record in packet.answers.iter().chain(packet.additional.iter()) {
        let owner = record.name.to_string();
        match &record.data {
            RData::A(a) => hosts.push((owner, a.0)),
            RData::PTR(ptr) => {
                let target = ptr.0.to_string();
                if target.ends_with(".arpa") {
                    continue;
                }
                if let Some(instance) = target.strip_suffix(&format!(".{owner}")) {
                    instances.push(instance.to_string());
                }
            }
            RData::SRV(srv) => {
                targets.insert(srv.target.to_string(), owner);
            }
            _ => {}
        }
    }

    let instance_of = |host: &str| -> Option<String> {
        let full = targets.get(host)?;
        instances
            .iter()
            .find(|i| full.starts_with(&format!("{i}.")))
            .cloned()
    };

    if hosts.is_empty() {
        return Ok(instances
            .first()
            .map(|name| vec![(from, name.clone())])
            .unwrap_or_default());
    }

    Ok(hosts
        .into_iter()
        .map(|(host, ip)| {
            let name = instance_of(&host)
                .unwrap_or_else(|| host.trim_end_matches(".local").to_string());
            (ip, name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(out: &mut Vec<u8>, dotted: &str) {
        for label in dotted.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    fn record(out: &mut Vec<u8>, owner: &str, rtype: u16, rdata: &[u8]) {
        name(out, owner);
        out.extend_from_slice(&rtype.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&120u32.to_be_bytes());
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(rdata);
    }

    fn response(records: &[(&str, u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![0, 0, 0x84, 0x00, 0, 0];
        out.extend_from_slice(&(records.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        for (owner, rtype, rdata) in records {
            record(&mut out, owner, *rtype, rdata);
        }
        out
    }

    fn encoded(dotted: &str) -> Vec<u8> {
        let mut out = Vec::new();
        name(&mut out, dotted);
        out
    }

    fn srv(target: &str) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 0, 0x1f, 0x90];
        name(&mut out, target);
        out
    }

    const PTR: u16 = 12;
    const A: u16 = 1;
    const SRV: u16 = 33;

    #[test]
    fn instance_name_wins_over_host_name() {
        let packet = response(&[
            ("_http._tcp.local", PTR, encoded("Office-Printer._http._tcp.local")),
            ("Office-Printer._http._tcp.local", SRV, srv("printer.local")),
            ("printer.local", A, vec![10, 0, 0, 5]),
        ]);

        let names = extract_names(&packet, Ipv4Addr::new(10, 0, 0, 5)).unwrap();
        assert_eq!(names, vec![(Ipv4Addr::new(10, 0, 0, 5), "Office-Printer".to_string())]);
    }

    #[test]
    fn bare_a_record_uses_host_name() {
        let packet = response(&[("nas.local", A, vec![10, 0, 0, 9])]);
        let names = extract_names(&packet, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        assert_eq!(names, vec![(Ipv4Addr::new(10, 0, 0, 9), "nas".to_string())]);
    }

    #[test]
    fn ptr_only_is_attributed_to_sender() {
        let packet = response(&[("_http._tcp.local", PTR, encoded("Camera._http._tcp.local"))]);
        let names = extract_names(&packet, Ipv4Addr::new(10, 0, 0, 33)).unwrap();
        assert_eq!(names, vec![(Ipv4Addr::new(10, 0, 0, 33), "Camera".to_string())]);
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(extract_names(&[1, 2, 3], Ipv4Addr::LOCALHOST).is_err());
    }

    #[test]
    fn query_asks_for_both_service_types() {
        let query = build_query().unwrap();
        let packet = Packet::parse(&query).unwrap();
        assert_eq!(packet.questions.len(), 2);
        assert_eq!(packet.questions[0].qname.to_string(), "_http._tcp.local");
        assert!(packet.questions[0].prefer_unicast);
    }
}
