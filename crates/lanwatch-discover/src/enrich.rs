//! Best-effort enrichment of an already discovered device set.
//!
//! Each probe runs as its own task under its own deadline. Probes never see
//! each other's output and a failing or slow probe only costs its own
//! contribution. Observations are restricted to hosts the backend already
//! found and may only fill fields those hosts are missing.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lanwatch_core::{Device, Source};
use tokio::task::JoinSet;

use crate::aggregate;
use crate::classify::classify_vendor;
use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};
use crate::leases::LeaseProbe;
use crate::mdns::MdnsProbe;
use crate::neighbors::NeighborProbe;
use crate::oui::OuiTable;
use crate::ssdp::SsdpProbe;

/// An auxiliary lookup that augments known hosts.
#[async_trait]
pub trait EnrichmentProbe: Send + Sync {
    fn source(&self) -> Source;

    /// Upper bound on one `observe` call.
    fn timeout(&self) -> Duration;

    /// Observations about `known` hosts. Anything about other addresses is
    /// discarded by the caller.
    async fn observe(&self, known: &[Device]) -> Result<Vec<Device>>;
}

pub struct Enricher {
    probes: Vec<Arc<dyn EnrichmentProbe>>,
    oui: OuiTable,
}

impl Enricher {
    pub fn new(probes: Vec<Arc<dyn EnrichmentProbe>>, oui: OuiTable) -> Self {
        Self { probes, oui }
    }

    /// Neighbor table, SSDP, mDNS and lease files, with the OUI table
    /// extended from `oui_path` when one is configured.
    pub fn system(config: &DiscoverConfig) -> Self {
        let oui = match &config.oui_path {
            Some(path) => OuiTable::load(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Using bundled OUI registry only");
                OuiTable::builtin()
            }),
            None => OuiTable::builtin(),
        };

        let probes: Vec<Arc<dyn EnrichmentProbe>> = vec![
            Arc::new(NeighborProbe::new(&config.ip_path, config.neighbor_timeout())),
            Arc::new(SsdpProbe::new(config.ssdp_timeout())),
            Arc::new(MdnsProbe::new(config.mdns_timeout())),
            Arc::new(LeaseProbe::new(config.lease_files.clone())),
        ];
        Self::new(probes, oui)
    }

    pub fn probe_sources(&self) -> Vec<Source> {
        self.probes.iter().map(|p| p.source()).collect()
    }

    /// Run every probe concurrently over `devices` and fold the results in.
    ///
    /// Never fails: the input set is returned unchanged, apart from OUI and
    /// classification, when every probe fails.
    pub async fn enrich(&self, devices: Vec<Device>) -> Vec<Device> {
        let known = Arc::new(devices);
        let mut tasks = JoinSet::new();

        for probe in &self.probes {
            let probe = probe.clone();
            let known = known.clone();
            tasks.spawn(async move {
                let source = probe.source();
                let limit = probe.timeout();
                let outcome = match tokio::time::timeout(limit, probe.observe(&known)).await {
                    Ok(result) => result,
                    Err(_) => Err(DiscoverError::ProbeTimeout {
                        probe: source.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                };
                (source, outcome)
            });
        }

        let by_ip: HashMap<Ipv4Addr, &Device> = known.iter().map(|d| (d.ip, d)).collect();
        let mut passes: Vec<Vec<Device>> = vec![known.to_vec()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(observed))) => {
                    let kept: Vec<Device> = observed
                        .into_iter()
                        .filter_map(|obs| by_ip.get(&obs.ip).map(|base| restrict(obs, base)))
                        .collect();
                    tracing::debug!(probe = %source, kept = kept.len(), "Enrichment probe finished");
                    passes.push(kept);
                }
                Ok((source, Err(e))) => {
                    tracing::warn!(probe = %source, error = %e, "Enrichment probe failed");
                }
                Err(e) => tracing::warn!(error = %e, "Enrichment task failed"),
            }
        }

        let merged = aggregate::merge(passes);
        let vendors = self.oui.observe(&merged);
        aggregate::merge([merged, vendors])
            .into_iter()
            .map(classify)
            .collect()
    }
}

/// Reduce an observation to the fields `base` lacks, keeping the base
/// host's liveness and timestamp.
fn restrict(obs: Device, base: &Device) -> Device {
    let mut out = Device::new(base.ip, base.status, obs.source).seen_at(base.last_seen);
    if base.mac.is_none() {
        out.mac = obs.mac;
    }
    if base.vendor.is_none() {
        out.vendor = obs.vendor;
    }
    if base.name.is_none() {
        out.name = obs.name;
    }
    if base.device_type.is_none() {
        out.device_type = obs.device_type;
    }
    out
}

fn classify(device: Device) -> Device {
    if device.device_type.is_some() {
        return device;
    }
    match device.vendor.as_deref().and_then(classify_vendor) {
        Some(class) => device.with_type(class),
        None => device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        source: Source,
        observations: Vec<Device>,
        delay: Duration,
        fails: bool,
    }

    impl Fixed {
        fn new(source: Source, observations: Vec<Device>) -> Arc<Self> {
            Arc::new(Self {
                source,
                observations,
                delay: Duration::ZERO,
                fails: false,
            })
        }
    }

    #[async_trait]
    impl EnrichmentProbe for Fixed {
        fn source(&self) -> Source {
            self.source
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }

        async fn observe(&self, _known: &[Device]) -> Result<Vec<Device>> {
            tokio::time::sleep(self.delay).await;
            if self.fails {
                return Err(DiscoverError::parse("lease file", "garbage"));
            }
            Ok(self.observations.clone())
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn enricher(probes: Vec<Arc<Fixed>>) -> Enricher {
        let probes: Vec<Arc<dyn EnrichmentProbe>> = probes
            .into_iter()
            .map(|p| p as Arc<dyn EnrichmentProbe>)
            .collect();
        let oui = OuiTable::from_json(
            r#"{"b8:27:eb": "Raspberry Pi Foundation", "00:0c:29": "VMware, Inc."}"#,
        )
        .unwrap();
        Enricher::new(probes, oui)
    }

    #[tokio::test]
    async fn independent_passes_are_combined() {
        let e = enricher(vec![
            Fixed::new(
                Source::Neighbors,
                vec![Device::online(ip("10.0.0.5"), Source::Neighbors).with_mac("aa:bb:cc:00:11:22")],
            ),
            Fixed::new(
                Source::Leases,
                vec![Device::online(ip("10.0.0.5"), Source::Leases).with_name("printer")],
            ),
        ]);

        let out = e
            .enrich(vec![Device::online(ip("10.0.0.5"), Source::Ping)])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mac.as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(out[0].name.as_deref(), Some("printer"));
    }

    #[tokio::test]
    async fn never_introduces_new_hosts_or_overwrites() {
        let e = enricher(vec![Fixed::new(
            Source::Ssdp,
            vec![
                Device::online(ip("10.0.0.5"), Source::Ssdp)
                    .with_name("Linux/5.x UPnP/1.0")
                    .with_type("ssdp"),
                Device::online(ip("10.0.0.99"), Source::Ssdp).with_name("stranger"),
            ],
        )]);

        let base = Device::offline(ip("10.0.0.5"), Source::Nmap).with_name("nas.lan");
        let out = e.enrich(vec![base]).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name.as_deref(), Some("nas.lan"));
        assert_eq!(out[0].device_type.as_deref(), Some("ssdp"));
        assert!(!out[0].is_online());
    }

    #[tokio::test]
    async fn failing_and_slow_probes_are_absorbed() {
        let slow = Arc::new(Fixed {
            source: Source::Mdns,
            observations: vec![Device::online(ip("10.0.0.5"), Source::Mdns).with_name("late")],
            delay: Duration::from_secs(5),
            fails: false,
        });
        let broken = Arc::new(Fixed {
            source: Source::Leases,
            observations: vec![],
            delay: Duration::ZERO,
            fails: true,
        });
        let good = Fixed::new(
            Source::Neighbors,
            vec![Device::online(ip("10.0.0.5"), Source::Neighbors).with_mac("b8:27:eb:00:00:01")],
        );
        let e = enricher(vec![slow, broken, good]);

        let out = e
            .enrich(vec![Device::online(ip("10.0.0.5"), Source::Ping)])
            .await;
        assert_eq!(out[0].name, None);
        assert_eq!(out[0].mac.as_deref(), Some("b8:27:eb:00:00:01"));
        assert_eq!(out[0].vendor.as_deref(), Some("Raspberry Pi Foundation"));
        assert_eq!(out[0].device_type.as_deref(), Some("iot"));
    }

    #[tokio::test]
    async fn no_probes_still_fills_vendor() {
        let e = enricher(vec![]);
        let out = e
            .enrich(vec![Device::online(ip("10.0.0.7"), Source::ArpScan).with_mac("00:0c:29:aa:bb:cc")])
            .await;
        assert_eq!(out[0].vendor.as_deref(), Some("VMware, Inc."));
        assert_eq!(out[0].device_type.as_deref(), Some("virtual-machine"));
    }

    #[test]
    fn system_enricher_runs_every_local_probe() {
        let e = Enricher::system(&DiscoverConfig::default());
        assert_eq!(
            e.probe_sources(),
            vec![Source::Neighbors, Source::Ssdp, Source::Mdns, Source::Leases]
        );
    }
}
