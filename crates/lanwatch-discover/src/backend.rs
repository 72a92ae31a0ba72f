//! Probe backends and the capability-ordered fallback chain.
//!
//! A backend turns one CIDR into a list of host observations. The chain
//! holds every backend in preference order (L2 sweep, host-discovery sweep,
//! reachability sweep) and is the only place that decides which of them a
//! request gets: `auto` walks the chain, an explicit method gets exactly
//! its backend or a `BackendUnavailable` error.

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lanwatch_core::{Device, ScanMethod};

use crate::arp_scan::ArpScanBackend;
use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};
use crate::nmap::NmapBackend;
use crate::ping::PingBackend;

/// A discovery mechanism producing raw host observations.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    /// The request method that selects this backend.
    fn method(&self) -> ScanMethod;

    /// Whether the mechanism can run on this host.
    fn is_available(&self) -> bool;

    /// Discover hosts in `cidr`. Bounded by the backend's own timeout.
    ///
    /// Backends that only see responders ignore `include_offline`.
    async fn discover(&self, cidr: Ipv4Net, include_offline: bool) -> Result<Vec<Device>>;
}

/// The backends a single scan will try, in order.
#[derive(Clone)]
pub struct ScanPlan {
    method: ScanMethod,
    backends: Vec<Arc<dyn ProbeBackend>>,
}

impl ScanPlan {
    pub fn method(&self) -> ScanMethod {
        self.method
    }

    /// Methods of the backends in this plan, in the order they are tried.
    pub fn methods(&self) -> Vec<ScanMethod> {
        self.backends.iter().map(|b| b.method()).collect()
    }

    /// Run the plan against one range.
    ///
    /// In `auto` mode a backend that fails at runtime hands over to the
    /// next one; the last backend's error is returned if all of them fail.
    /// An explicit plan has a single backend, so its failure is final.
    pub async fn discover(&self, cidr: Ipv4Net, include_offline: bool) -> Result<Vec<Device>> {
        let mut last_err = None;

        for backend in &self.backends {
            match backend.discover(cidr, include_offline).await {
                Ok(devices) => {
                    tracing::debug!(
                        cidr = %cidr,
                        backend = %backend.method(),
                        hosts = devices.len(),
                        "Backend finished"
                    );
                    return Ok(devices);
                }
                Err(e) => {
                    tracing::warn!(
                        cidr = %cidr,
                        backend = %backend.method(),
                        error = %e,
                        "Backend failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DiscoverError::BackendUnavailable {
            method: self.method,
            reason: "no backend in plan".to_string(),
        }))
    }
}

/// Ordered list of capability-checked backends.
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn ProbeBackend>>,
}

impl BackendChain {
    /// Backends in preference order.
    pub fn new(backends: Vec<Arc<dyn ProbeBackend>>) -> Self {
        Self { backends }
    }

    /// arp-scan, then nmap, then the ping sweep, configured from `config`.
    pub fn system(config: &DiscoverConfig) -> Self {
        let backends: Vec<Arc<dyn ProbeBackend>> = vec![
            Arc::new(ArpScanBackend::new(
                &config.arp_scan_path,
                config.arp_scan_timeout(),
            )),
            Arc::new(NmapBackend::new(&config.nmap_path, config.nmap_timeout())),
            Arc::new(PingBackend::system(
                &config.ping_path,
                config.ping_timeout(),
                config.ping_concurrency,
            )),
        ];
        Self::new(backends)
    }

    /// Availability of every backend, in chain order.
    pub fn availability(&self) -> Vec<(ScanMethod, bool)> {
        self.backends
            .iter()
            .map(|b| (b.method(), b.is_available()))
            .collect()
    }

    /// Choose the backends for `method`.
    pub fn plan(&self, method: ScanMethod) -> Result<ScanPlan> {
        let backends: Vec<Arc<dyn ProbeBackend>> = match method {
            ScanMethod::Auto => self
                .backends
                .iter()
                .filter(|b| b.is_available())
                .cloned()
                .collect(),
            explicit => {
                let backend = self
                    .backends
                    .iter()
                    .find(|b| b.method() == explicit)
                    .ok_or_else(|| DiscoverError::BackendUnavailable {
                        method: explicit,
                        reason: "not configured".to_string(),
                    })?;
                if !backend.is_available() {
                    return Err(DiscoverError::BackendUnavailable {
                        method: explicit,
                        reason: "tool not found".to_string(),
                    });
                }
                vec![backend.clone()]
            }
        };

        if backends.is_empty() {
            return Err(DiscoverError::BackendUnavailable {
                method,
                reason: "no discovery backend is available".to_string(),
            });
        }

        Ok(ScanPlan { method, backends })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_core::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        method: ScanMethod,
        available: bool,
        fails: bool,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(method: ScanMethod, available: bool, fails: bool) -> Arc<Self> {
            Arc::new(Self {
                method,
                available,
                fails,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProbeBackend for Stub {
        fn method(&self) -> ScanMethod {
            self.method
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn discover(&self, cidr: Ipv4Net, _include_offline: bool) -> Result<Vec<Device>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(DiscoverError::ToolFailed {
                    tool: self.method.to_string(),
                    code: 1,
                    stderr: "permission denied".to_string(),
                });
            }
            Ok(vec![Device::online(cidr.network(), Source::Ping)])
        }
    }

    fn chain(arp: Arc<Stub>, nmap: Arc<Stub>, ping: Arc<Stub>) -> BackendChain {
        let backends: Vec<Arc<dyn ProbeBackend>> = vec![arp, nmap, ping];
        BackendChain::new(backends)
    }

    #[test]
    fn auto_prefers_first_available() {
        let c = chain(
            Stub::new(ScanMethod::ArpScan, false, false),
            Stub::new(ScanMethod::Nmap, true, false),
            Stub::new(ScanMethod::Ping, true, false),
        );
        let plan = c.plan(ScanMethod::Auto).unwrap();
        assert_eq!(plan.methods(), vec![ScanMethod::Nmap, ScanMethod::Ping]);
    }

    #[test]
    fn explicit_method_never_substitutes() {
        let c = chain(
            Stub::new(ScanMethod::ArpScan, true, false),
            Stub::new(ScanMethod::Nmap, false, false),
            Stub::new(ScanMethod::Ping, true, false),
        );
        match c.plan(ScanMethod::Nmap) {
            Err(DiscoverError::BackendUnavailable { method, .. }) => {
                assert_eq!(method, ScanMethod::Nmap)
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(plan) => panic!("unexpected plan: {:?}", plan.methods()),
        }
        assert_eq!(c.plan(ScanMethod::Ping).unwrap().methods(), vec![ScanMethod::Ping]);
    }

    #[test]
    fn nothing_available_is_an_error() {
        let only: Arc<dyn ProbeBackend> = Stub::new(ScanMethod::Nmap, false, false);
        let c = BackendChain::new(vec![only]);
        assert!(matches!(
            c.plan(ScanMethod::Auto),
            Err(DiscoverError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn auto_falls_through_runtime_failures() {
        let arp = Stub::new(ScanMethod::ArpScan, true, true);
        let nmap = Stub::new(ScanMethod::Nmap, true, false);
        let ping = Stub::new(ScanMethod::Ping, true, false);
        let c = chain(arp.clone(), nmap.clone(), ping.clone());

        let devices = c
            .plan(ScanMethod::Auto)
            .unwrap()
            .discover("10.0.0.0/24".parse().unwrap(), false)
            .await
            .unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(arp.calls.load(Ordering::SeqCst), 1);
        assert_eq!(nmap.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ping.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn explicit_runtime_failure_is_final() {
        let arp = Stub::new(ScanMethod::ArpScan, true, true);
        let ping = Stub::new(ScanMethod::Ping, true, false);
        let c = chain(arp, Stub::new(ScanMethod::Nmap, true, false), ping.clone());

        let result = c
            .plan(ScanMethod::ArpScan)
            .unwrap()
            .discover("10.0.0.0/24".parse().unwrap(), false)
            .await;

        assert!(matches!(result, Err(DiscoverError::ToolFailed { .. })));
        assert_eq!(ping.calls.load(Ordering::SeqCst), 0);
    }
}
