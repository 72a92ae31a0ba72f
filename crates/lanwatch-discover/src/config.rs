//! Configuration for the lanwatch scan engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level discover configuration.
///
/// Loaded from `lanwatch.toml` `[discover]` section or
/// `LANWATCH_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Path to the arp-scan binary (default: "arp-scan").
    #[serde(default = "default_arp_scan_path")]
    pub arp_scan_path: String,

    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Path to the ping binary (default: "ping").
    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    /// Path to the iproute2 `ip` binary, used for interface and neighbor tables.
    #[serde(default = "default_ip_path")]
    pub ip_path: String,

    #[serde(default = "default_arp_scan_timeout")]
    pub arp_scan_timeout_secs: u64,

    #[serde(default = "default_nmap_timeout")]
    pub nmap_timeout_secs: u64,

    /// Per-host reachability probe timeout.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Maximum reachability probes in flight within one sweep.
    #[serde(default = "default_ping_concurrency")]
    pub ping_concurrency: usize,

    /// Maximum subnets scanned in parallel within one job.
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,

    /// Size of the job worker pool.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Interface networks more specific than this are not scanned.
    #[serde(default = "default_max_prefix")]
    pub max_prefix: u8,

    #[serde(default = "default_ssdp_timeout")]
    pub ssdp_timeout_ms: u64,

    #[serde(default = "default_mdns_timeout")]
    pub mdns_timeout_ms: u64,

    #[serde(default = "default_neighbor_timeout")]
    pub neighbor_timeout_secs: u64,

    /// Name online hosts by reverse DNS after every sweep.
    #[serde(default = "default_reverse_dns")]
    pub reverse_dns: bool,

    #[serde(default = "default_reverse_dns_timeout")]
    pub reverse_dns_timeout_ms: u64,

    /// Maximum reverse lookups in flight.
    #[serde(default = "default_reverse_dns_concurrency")]
    pub reverse_dns_concurrency: usize,

    /// DHCP lease files to consult during deep scans. Missing files are skipped.
    #[serde(default = "default_lease_files")]
    pub lease_files: Vec<PathBuf>,

    /// Optional JSON file of extra OUI prefixes (`{"00:50:56": "VMware, Inc."}`).
    #[serde(default)]
    pub oui_path: Option<PathBuf>,

    /// Append-only scan history file.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// How long terminal jobs stay queryable.
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,

    /// Upper bound on terminal jobs kept in memory (at least 1).
    #[serde(default = "default_max_retained_jobs")]
    pub max_retained_jobs: usize,

    /// Polling interval advised to status clients (at least 1 ms).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl DiscoverConfig {
    pub fn arp_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.arp_scan_timeout_secs)
    }

    pub fn nmap_timeout(&self) -> Duration {
        Duration::from_secs(self.nmap_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn ssdp_timeout(&self) -> Duration {
        Duration::from_millis(self.ssdp_timeout_ms)
    }

    pub fn mdns_timeout(&self) -> Duration {
        Duration::from_millis(self.mdns_timeout_ms)
    }

    pub fn neighbor_timeout(&self) -> Duration {
        Duration::from_secs(self.neighbor_timeout_secs)
    }

    pub fn reverse_dns_timeout(&self) -> Duration {
        Duration::from_millis(self.reverse_dns_timeout_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// The just-finished job must stay queryable until its client polls.
    pub fn max_retained_jobs(&self) -> usize {
        self.max_retained_jobs.max(1)
    }
}

fn default_arp_scan_path() -> String {
    "arp-scan".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_ping_path() -> String {
    "ping".to_string()
}

fn default_ip_path() -> String {
    "ip".to_string()
}

fn default_arp_scan_timeout() -> u64 {
    30
}

fn default_nmap_timeout() -> u64 {
    90
}

fn default_ping_timeout() -> u64 {
    800
}

fn default_ping_concurrency() -> usize {
    64
}

fn default_max_concurrent_scans() -> usize {
    8
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_prefix() -> u8 {
    30
}

fn default_ssdp_timeout() -> u64 {
    2000
}

fn default_mdns_timeout() -> u64 {
    3000
}

fn default_neighbor_timeout() -> u64 {
    5
}

fn default_reverse_dns() -> bool {
    true
}

fn default_reverse_dns_timeout() -> u64 {
    1000
}

fn default_reverse_dns_concurrency() -> usize {
    16
}

fn default_lease_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/lib/misc/dnsmasq.leases"),
        PathBuf::from("/var/lib/dhcp/dhcpd.leases"),
    ]
}

fn default_history_path() -> PathBuf {
    PathBuf::from("./data/scan_history.jsonl")
}

fn default_job_retention() -> u64 {
    3600
}

fn default_max_retained_jobs() -> usize {
    256
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            arp_scan_path: default_arp_scan_path(),
            nmap_path: default_nmap_path(),
            ping_path: default_ping_path(),
            ip_path: default_ip_path(),
            arp_scan_timeout_secs: default_arp_scan_timeout(),
            nmap_timeout_secs: default_nmap_timeout(),
            ping_timeout_ms: default_ping_timeout(),
            ping_concurrency: default_ping_concurrency(),
            max_concurrent_scans: default_max_concurrent_scans(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_prefix: default_max_prefix(),
            ssdp_timeout_ms: default_ssdp_timeout(),
            mdns_timeout_ms: default_mdns_timeout(),
            neighbor_timeout_secs: default_neighbor_timeout(),
            reverse_dns: default_reverse_dns(),
            reverse_dns_timeout_ms: default_reverse_dns_timeout(),
            reverse_dns_concurrency: default_reverse_dns_concurrency(),
            lease_files: default_lease_files(),
            oui_path: None,
            history_path: default_history_path(),
            job_retention_secs: default_job_retention(),
            max_retained_jobs: default_max_retained_jobs(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}
