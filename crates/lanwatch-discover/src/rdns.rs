//! Reverse-DNS naming of discovered hosts.
//!
//! Every online host without a name gets one PTR lookup, bounded by a
//! per-lookup timeout and a small concurrency limit. Runs after the backend
//! sweep on every scan, deep or not.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lanwatch_core::{Device, Source};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::aggregate;

/// Resolves an address to a host name.
#[async_trait]
pub trait AddrResolver: Send + Sync {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String>;
}

/// The system resolver (`getnameinfo`), run on the blocking pool.
pub struct SystemResolver;

#[async_trait]
impl AddrResolver for SystemResolver {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let addr = IpAddr::V4(ip);
        tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr).ok())
            .await
            .ok()
            .flatten()
    }
}

/// Turn a resolver answer into a usable host name.
///
/// Resolvers echo the numeric address back when there is no PTR record;
/// that, empty answers and `localhost` are discarded. A trailing root dot
/// is dropped.
pub fn clean_name(raw: &str) -> Option<String> {
    let name = raw.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() || name.eq_ignore_ascii_case("localhost") {
        return None;
    }
    Some(name.to_string())
}

pub struct ReverseDnsNamer {
    resolver: Arc<dyn AddrResolver>,
    timeout: Duration,
    concurrency: usize,
}

impl ReverseDnsNamer {
    pub fn new(resolver: Arc<dyn AddrResolver>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            resolver,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn system(timeout: Duration, concurrency: usize) -> Self {
        Self::new(Arc::new(SystemResolver), timeout, concurrency)
    }

    /// Fill `name` on online hosts that lack one. Lookups that fail or time
    /// out leave the host unchanged.
    pub async fn name(&self, devices: Vec<Device>) -> Vec<Device> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for device in devices.iter().filter(|d| d.is_online() && d.name.is_none()) {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let resolver = self.resolver.clone();
            let timeout = self.timeout;
            let (ip, status, seen) = (device.ip, device.status, device.last_seen);

            tasks.spawn(async move {
                let _permit = permit;
                let answer = tokio::time::timeout(timeout, resolver.lookup(ip)).await;
                match answer {
                    Ok(Some(raw)) => clean_name(&raw).map(|name| {
                        Device::new(ip, status, Source::ReverseDns)
                            .with_name(&name)
                            .seen_at(seen)
                    }),
                    Ok(None) => None,
                    Err(_) => {
                        tracing::debug!(ip = %ip, timeout_ms = timeout.as_millis() as u64, "Reverse lookup timed out");
                        None
                    }
                }
            });
        }

        let mut named = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(obs)) => named.push(obs),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Reverse lookup task failed"),
            }
        }

        tracing::debug!(named = named.len(), "Reverse DNS pass finished");
        aggregate::merge([devices, named])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Table {
        names: HashMap<Ipv4Addr, String>,
        stall: Option<Ipv4Addr>,
    }

    #[async_trait]
    impl AddrResolver for Table {
        async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
            if self.stall == Some(ip) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.names.get(&ip).cloned()
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn namer(names: &[(&str, &str)], stall: Option<&str>) -> ReverseDnsNamer {
        let table = Table {
            names: names.iter().map(|(a, n)| (ip(a), n.to_string())).collect(),
            stall: stall.map(ip),
        };
        ReverseDnsNamer::new(Arc::new(table), Duration::from_millis(50), 4)
    }

    #[test]
    fn numeric_and_empty_answers_are_not_names() {
        assert_eq!(clean_name("nas.lan."), Some("nas.lan".to_string()));
        assert_eq!(clean_name("192.168.1.10"), None);
        assert_eq!(clean_name(" "), None);
        assert_eq!(clean_name("localhost"), None);
    }

    #[tokio::test]
    async fn names_online_hosts_without_a_name() {
        let n = namer(
            &[
                ("192.168.1.1", "router.lan."),
                ("192.168.1.2", "192.168.1.2"),
                ("192.168.1.3", "ignored.lan"),
                ("192.168.1.4", "offline.lan"),
            ],
            None,
        );
        let devices = vec![
            Device::online(ip("192.168.1.1"), Source::Ping),
            Device::online(ip("192.168.1.2"), Source::Ping),
            Device::online(ip("192.168.1.3"), Source::Nmap).with_name("printer"),
            Device::offline(ip("192.168.1.4"), Source::Ping),
        ];

        let out = n.name(devices).await;

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].name.as_deref(), Some("router.lan"));
        assert_eq!(out[1].name, None);
        assert_eq!(out[2].name.as_deref(), Some("printer"));
        assert_eq!(out[3].name, None);
        assert!(!out[3].is_online());
    }

    #[tokio::test]
    async fn stalled_lookup_only_costs_its_own_host() {
        let n = namer(
            &[("10.0.0.1", "fast.lan"), ("10.0.0.2", "slow.lan")],
            Some("10.0.0.2"),
        );
        let devices = vec![
            Device::online(ip("10.0.0.1"), Source::ArpScan),
            Device::online(ip("10.0.0.2"), Source::ArpScan),
        ];

        let out = n.name(devices).await;

        assert_eq!(out[0].name.as_deref(), Some("fast.lan"));
        assert_eq!(out[1].name, None);
    }
}
