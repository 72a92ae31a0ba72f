//! The scan engine: resolve → probe per subnet → aggregate → name → enrich.
//!
//! Subnets of one scan run concurrently, bounded by a semaphore sized by
//! `max_concurrent_scans`. Backend selection happens once, before any
//! subnet work starts, so an explicit method that is unavailable fails the
//! scan without touching the network.

use std::sync::Arc;

use ipnet::Ipv4Net;
use lanwatch_core::{Device, ScanRequest};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::aggregate;
use crate::backend::BackendChain;
use crate::config::DiscoverConfig;
use crate::enrich::Enricher;
use crate::error::{DiscoverError, Result};
use crate::rdns::ReverseDnsNamer;
use crate::resolver::{SubnetResolver, SystemNetwork};

/// Progress reported once subnets are resolved.
const RESOLVED: u8 = 5;

pub struct ScanEngine {
    resolver: SubnetResolver,
    chain: BackendChain,
    enricher: Enricher,
    namer: Option<ReverseDnsNamer>,
    max_concurrent_scans: usize,
}

impl ScanEngine {
    pub fn new(resolver: SubnetResolver, chain: BackendChain, enricher: Enricher) -> Self {
        Self {
            resolver,
            chain,
            enricher,
            namer: None,
            max_concurrent_scans: 8,
        }
    }

    /// Engine wired to the live host: iproute2, the external scanners and
    /// the system enrichment probes.
    pub fn from_config(config: &DiscoverConfig) -> Self {
        let resolver = SubnetResolver::new(
            Arc::new(SystemNetwork::new(&config.ip_path)),
            config.max_prefix,
        );
        let engine = Self::new(
            resolver,
            BackendChain::system(config),
            Enricher::system(config),
        )
        .with_max_concurrent_scans(config.max_concurrent_scans);

        if config.reverse_dns {
            engine.with_namer(ReverseDnsNamer::system(
                config.reverse_dns_timeout(),
                config.reverse_dns_concurrency,
            ))
        } else {
            engine
        }
    }

    /// Name online hosts by reverse DNS after every sweep.
    pub fn with_namer(mut self, namer: ReverseDnsNamer) -> Self {
        self.namer = Some(namer);
        self
    }

    pub fn with_max_concurrent_scans(mut self, max: usize) -> Self {
        self.max_concurrent_scans = max.max(1);
        self
    }

    pub fn chain(&self) -> &BackendChain {
        &self.chain
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn names_hosts(&self) -> bool {
        self.namer.is_some()
    }

    /// Locally resolvable ranges.
    pub async fn subnets(&self) -> Result<Vec<Ipv4Net>> {
        self.resolver.local_subnets().await
    }

    /// Synchronous query: run a scan to completion and return the device set.
    pub async fn discover(&self, request: &ScanRequest) -> Result<Vec<Device>> {
        self.run(request, |_| {}).await
    }

    /// Run a scan, reporting progress (0–99) through `progress`.
    ///
    /// With several subnets, a subnet whose backend fails is logged and
    /// left out; the scan only fails when every subnet does. A single
    /// subnet's failure is the scan's failure.
    pub async fn run<F>(&self, request: &ScanRequest, mut progress: F) -> Result<Vec<Device>>
    where
        F: FnMut(u8),
    {
        let plan = self.chain.plan(request.method)?;
        let subnets = self.resolver.resolve(&request.subnet).await?;
        progress(RESOLVED);

        tracing::info!(
            subnets = ?subnets,
            method = %plan.method(),
            backends = ?plan.methods(),
            deep = request.deep,
            "Starting scan"
        );

        let scan_weight: u32 = if request.deep { 75 } else { 90 };
        let total = subnets.len() as u32;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_scans));
        let mut tasks = JoinSet::new();

        for cidr in subnets {
            let plan = plan.clone();
            let semaphore = semaphore.clone();
            let include_offline = request.include_offline;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| DiscoverError::Internal(e.to_string()))?;
                plan.discover(cidr, include_offline).await.map_err(|e| {
                    tracing::warn!(cidr = %cidr, error = %e, "Subnet scan failed");
                    e
                })
            });
        }

        let mut lists: Vec<Vec<Device>> = Vec::new();
        let mut last_err = None;
        let mut done = 0u32;

        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok(Ok(devices)) => lists.push(devices),
                Ok(Err(e)) => last_err = Some(e),
                Err(e) => last_err = Some(DiscoverError::Internal(format!("subnet task: {e}"))),
            }
            progress(RESOLVED + (scan_weight * done / total) as u8);
        }

        if lists.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                DiscoverError::ResolutionFailure("no subnet to scan".to_string())
            }));
        }

        let mut devices = aggregate::merge(lists);
        if let Some(namer) = &self.namer {
            devices = namer.name(devices).await;
        }
        if request.deep {
            devices = self.enricher.enrich(devices).await;
        }

        tracing::info!(
            devices = devices.len(),
            online = devices.iter().filter(|d| d.is_online()).count(),
            "Scan complete"
        );
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use lanwatch_core::{ScanMethod, Source, SubnetSelector};

    use crate::backend::ProbeBackend;
    use crate::oui::OuiTable;
    use crate::rdns::AddrResolver;
    use crate::resolver::{HostNetwork, InterfaceAddr};

    struct Net(Vec<InterfaceAddr>);

    #[async_trait]
    impl HostNetwork for Net {
        async fn interface_addrs(&self) -> Option<Vec<InterfaceAddr>> {
            Some(self.0.clone())
        }

        async fn primary_addr(&self) -> Option<Ipv4Addr> {
            None
        }
    }

    /// Reports the network address of every range as online; fails on
    /// ranges listed in `broken`.
    struct NetworkAddr {
        broken: Vec<Ipv4Net>,
    }

    #[async_trait]
    impl ProbeBackend for NetworkAddr {
        fn method(&self) -> ScanMethod {
            ScanMethod::Nmap
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn discover(&self, cidr: Ipv4Net, _include_offline: bool) -> Result<Vec<Device>> {
            if self.broken.contains(&cidr) {
                return Err(DiscoverError::ProbeTimeout {
                    probe: "nmap".to_string(),
                    timeout_ms: 10,
                });
            }
            Ok(vec![Device::online(cidr.network(), Source::Nmap)])
        }
    }

    struct Ptr;

    #[async_trait]
    impl AddrResolver for Ptr {
        async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
            Some(format!("host-{}.lan.", ip.octets()[1]))
        }
    }

    fn iface(addr: &str, prefix_len: u8) -> InterfaceAddr {
        InterfaceAddr {
            ifname: "eth0".to_string(),
            addr: addr.parse().unwrap(),
            prefix_len,
        }
    }

    fn engine(broken: &[&str]) -> ScanEngine {
        let net = Net(vec![
            iface("10.1.0.7", 24),
            iface("10.2.0.7", 24),
            iface("10.3.0.7", 24),
        ]);
        let backend: Arc<dyn ProbeBackend> = Arc::new(NetworkAddr {
            broken: broken.iter().map(|s| s.parse().unwrap()).collect(),
        });
        ScanEngine::new(
            SubnetResolver::new(Arc::new(net), 30),
            BackendChain::new(vec![backend]),
            Enricher::new(vec![], OuiTable::builtin()),
        )
        .with_max_concurrent_scans(2)
    }

    #[tokio::test]
    async fn all_merges_every_subnet_in_ip_order() {
        let devices = engine(&[]).discover(&ScanRequest::default()).await.unwrap();
        let ips: Vec<String> = devices.iter().map(|d| d.ip.to_string()).collect();
        assert_eq!(ips, vec!["10.1.0.0", "10.2.0.0", "10.3.0.0"]);
    }

    #[tokio::test]
    async fn one_failing_subnet_is_absorbed() {
        let devices = engine(&["10.2.0.0/24"])
            .discover(&ScanRequest::default())
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn single_subnet_failure_is_fatal() {
        let request = ScanRequest::new(
            SubnetSelector::Cidr("10.2.0.0/24".parse().unwrap()),
            ScanMethod::Auto,
        );
        let result = engine(&["10.2.0.0/24"]).discover(&request).await;
        assert!(matches!(result, Err(DiscoverError::ProbeTimeout { .. })));
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_below_100() {
        let seen = Mutex::new(Vec::new());
        engine(&[])
            .run(&ScanRequest::default(), |p| seen.lock().unwrap().push(p))
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&RESOLVED));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| *p < 100));
    }

    #[tokio::test]
    async fn unavailable_explicit_method_fails_before_resolving() {
        let request = ScanRequest::new(SubnetSelector::All, ScanMethod::ArpScan);
        let result = engine(&[]).discover(&request).await;
        assert!(matches!(
            result,
            Err(DiscoverError::BackendUnavailable { method: ScanMethod::ArpScan, .. })
        ));
    }

    #[tokio::test]
    async fn shallow_scan_names_hosts_by_reverse_dns() {
        let engine = engine(&[]).with_namer(ReverseDnsNamer::new(
            Arc::new(Ptr),
            std::time::Duration::from_millis(100),
            2,
        ));
        let devices = engine.discover(&ScanRequest::default()).await.unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_deref()).collect();
        assert_eq!(names, vec![Some("host-1.lan"), Some("host-2.lan"), Some("host-3.lan")]);
    }
}
