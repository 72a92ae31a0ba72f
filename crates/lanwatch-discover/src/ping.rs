//! Reachability sweep backend.
//!
//! Sends one echo request to every host address in the range. Probes run
//! concurrently but never more than `concurrency` at a time: a permit is
//! taken from the semaphore before a probe task is spawned, so a /16 does
//! not turn into 65k simultaneous child processes.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use lanwatch_core::{Device, ScanMethod, Source};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backend::ProbeBackend;
use crate::error::{DiscoverError, Result};
use crate::process::run_tool;

/// A single unicast liveness check.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Whether `ip` answered within `timeout`.
    async fn ping(&self, ip: Ipv4Addr, timeout: Duration) -> bool;
}

/// Pings through the system `ping` binary.
pub struct CommandPinger {
    ping_path: String,
}

impl CommandPinger {
    pub fn new(ping_path: &str) -> Self {
        Self {
            ping_path: ping_path.to_string(),
        }
    }

    #[cfg(target_os = "windows")]
    fn args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
        vec![
            "-n".to_string(),
            "1".to_string(),
            "-w".to_string(),
            timeout.as_millis().to_string(),
            ip.to_string(),
        ]
    }

    #[cfg(target_os = "macos")]
    fn args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            timeout.as_millis().to_string(),
            ip.to_string(),
        ]
    }

    // iputils takes whole seconds for -W.
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
        let secs = timeout.as_millis().div_ceil(1000).max(1);
        vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            secs.to_string(),
            ip.to_string(),
        ]
    }
}

#[async_trait]
impl Pinger for CommandPinger {
    async fn ping(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let args = Self::args(ip, timeout);
        // The child gets its own -W; this bound covers process start-up.
        let deadline = (timeout * 2).max(Duration::from_secs(1));
        match run_tool(&self.ping_path, &args, deadline).await {
            Ok(_) => true,
            Err(DiscoverError::ToolFailed { code, .. }) if code >= 0 => false,
            Err(e) => {
                tracing::debug!(ip = %ip, error = %e, "Ping probe failed");
                false
            }
        }
    }
}

pub struct PingBackend {
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
    concurrency: usize,
}

impl PingBackend {
    pub fn new(pinger: Arc<dyn Pinger>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            pinger,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Sweep with the system `ping` binary.
    pub fn system(ping_path: &str, timeout: Duration, concurrency: usize) -> Self {
        Self::new(Arc::new(CommandPinger::new(ping_path)), timeout, concurrency)
    }
}

#[async_trait]
impl ProbeBackend for PingBackend {
    fn method(&self) -> ScanMethod {
        ScanMethod::Ping
    }

    /// Pure network probing; treated as always present.
    fn is_available(&self) -> bool {
        true
    }

    async fn discover(&self, cidr: Ipv4Net, include_offline: bool) -> Result<Vec<Device>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        tracing::info!(
            cidr = %cidr,
            concurrency = self.concurrency,
            "Starting ping sweep"
        );

        for ip in cidr.hosts() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DiscoverError::Internal(e.to_string()))?;
            let pinger = self.pinger.clone();
            let timeout = self.timeout;

            tasks.spawn(async move {
                let alive = pinger.ping(ip, timeout).await;
                drop(permit);
                (ip, alive)
            });
        }

        let mut devices = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ip, true)) => devices.push(Device::online(ip, Source::Ping)),
                Ok((ip, false)) if include_offline => {
                    devices.push(Device::offline(ip, Source::Ping))
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Ping task failed"),
            }
        }
        devices.sort_by_key(|d| d.ip);

        tracing::info!(
            cidr = %cidr,
            online = devices.iter().filter(|d| d.is_online()).count(),
            reported = devices.len(),
            "Ping sweep complete"
        );
        Ok(devices)
    }
}
