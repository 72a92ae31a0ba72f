//! Core domain types for the lanwatch scan engine.
//!
//! A scan turns a `ScanRequest` into a set of `Device` records. Asynchronous
//! scans are tracked as `Job` values whose lifecycle is enforced here, so the
//! job manager cannot put a job into an impossible state.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::mac::normalize_mac;

// ── Device ────────────────────────────────────────────────────────

/// Liveness of a host as reported by the probes that saw it.
///
/// `Online` orders above `Offline` so that merging takes the maximum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Offline,
    Online,
}

/// The backend or enrichment probe that produced an observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    ArpScan,
    Nmap,
    Ping,
    Neighbors,
    Oui,
    Ssdp,
    Mdns,
    Leases,
    ReverseDns,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArpScan => "arp-scan",
            Self::Nmap => "nmap",
            Self::Ping => "ping",
            Self::Neighbors => "neighbors",
            Self::Oui => "oui",
            Self::Ssdp => "ssdp",
            Self::Mdns => "mdns",
            Self::Leases => "leases",
            Self::ReverseDns => "reverse-dns",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of the observation a field value was taken from: how many
/// optional fields that observation filled, then how recent it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Evidence {
    filled: u8,
    seen: DateTime<Utc>,
}

/// Per-field evidence carried through merges so that the outcome does not
/// depend on the order observations are folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Provenance {
    mac: Option<Evidence>,
    vendor: Option<Evidence>,
    name: Option<Evidence>,
    device_type: Option<Evidence>,
    source: Option<Evidence>,
}

/// One discovered host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    pub status: DeviceStatus,
    pub source: Source,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    provenance: Provenance,
}

impl Device {
    /// A bare observation of `ip`, seen now.
    pub fn new(ip: Ipv4Addr, status: DeviceStatus, source: Source) -> Self {
        Self {
            ip,
            mac: None,
            vendor: None,
            name: None,
            device_type: None,
            status,
            source,
            last_seen: Utc::now(),
            provenance: Provenance::default(),
        }
    }

    pub fn online(ip: Ipv4Addr, source: Source) -> Self {
        Self::new(ip, DeviceStatus::Online, source)
    }

    pub fn offline(ip: Ipv4Addr, source: Source) -> Self {
        Self::new(ip, DeviceStatus::Offline, source)
    }

    /// Set the MAC address. Unparseable addresses are dropped.
    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac = normalize_mac(mac);
        self
    }

    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = non_empty(vendor);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = non_empty(name);
        self
    }

    pub fn with_type(mut self, device_type: &str) -> Self {
        self.device_type = non_empty(device_type);
        self
    }

    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = at;
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Number of optional identity fields that carry a value.
    pub fn filled_fields(&self) -> u8 {
        [&self.mac, &self.vendor, &self.name, &self.device_type]
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !v.is_empty()))
            .count() as u8
    }

    fn own_evidence(&self) -> Evidence {
        Evidence {
            filled: self.filled_fields(),
            seen: self.last_seen,
        }
    }

    /// Pin the evidence of every set field that does not carry any yet.
    ///
    /// Fields assigned directly (rather than through `merge`) are judged by
    /// the record they currently sit in.
    pub fn settled(mut self) -> Self {
        let own = self.own_evidence();
        let p = &mut self.provenance;
        p.mac = self.mac.as_ref().map(|_| p.mac.unwrap_or(own));
        p.vendor = self.vendor.as_ref().map(|_| p.vendor.unwrap_or(own));
        p.name = self.name.as_ref().map(|_| p.name.unwrap_or(own));
        p.device_type = self.device_type.as_ref().map(|_| p.device_type.unwrap_or(own));
        p.source = Some(p.source.unwrap_or(own));
        self
    }

    /// Merge two observations of the same host.
    ///
    /// Each field takes the value from the observation with more non-empty
    /// fields, then the more recent one; exact ties fall back to comparing
    /// the values. `Online` wins over `Offline`. The rule is applied per
    /// field against the evidence of the observation the value came from,
    /// so merging is associative and commutative.
    pub fn merge(&self, other: &Device) -> Device {
        debug_assert_eq!(self.ip, other.ip, "merging observations of different hosts");

        let a = self.clone().settled();
        let b = other.clone().settled();

        let (mac, mac_ev) = pick(field(&a.mac, a.provenance.mac), field(&b.mac, b.provenance.mac));
        let (vendor, vendor_ev) = pick(
            field(&a.vendor, a.provenance.vendor),
            field(&b.vendor, b.provenance.vendor),
        );
        let (name, name_ev) = pick(
            field(&a.name, a.provenance.name),
            field(&b.name, b.provenance.name),
        );
        let (device_type, type_ev) = pick(
            field(&a.device_type, a.provenance.device_type),
            field(&b.device_type, b.provenance.device_type),
        );

        let a_src = (a.provenance.source.unwrap_or_else(|| a.own_evidence()), a.source);
        let b_src = (b.provenance.source.unwrap_or_else(|| b.own_evidence()), b.source);
        let (source_ev, source) = a_src.max(b_src);

        Device {
            ip: a.ip,
            mac,
            vendor,
            name,
            device_type,
            status: a.status.max(b.status),
            source,
            last_seen: a.last_seen.max(b.last_seen),
            provenance: Provenance {
                mac: mac_ev,
                vendor: vendor_ev,
                name: name_ev,
                device_type: type_ev,
                source: Some(source_ev),
            },
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn field(value: &Option<String>, evidence: Option<Evidence>) -> Option<(Evidence, &String)> {
    match (value, evidence) {
        (Some(v), Some(e)) => Some((e, v)),
        _ => None,
    }
}

fn pick(
    a: Option<(Evidence, &String)>,
    b: Option<(Evidence, &String)>,
) -> (Option<String>, Option<Evidence>) {
    match a.max(b) {
        Some((e, v)) => (Some(v.clone()), Some(e)),
        None => (None, None),
    }
}

// ── Scan Request ──────────────────────────────────────────────────

/// Which probe backend a scan should use.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanMethod {
    /// Best available backend, by capability.
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "arp-scan")]
    ArpScan,
    #[serde(rename = "nmap")]
    Nmap,
    #[serde(rename = "ping")]
    Ping,
}

impl ScanMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ArpScan => "arp-scan",
            Self::Nmap => "nmap",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "arp-scan" | "arpscan" | "arp" => Ok(Self::ArpScan),
            "nmap" => Ok(Self::Nmap),
            "ping" | "icmp" => Ok(Self::Ping),
            _ => Err(CoreError::InvalidMethod(s.to_string())),
        }
    }
}

/// The range a scan covers: one CIDR, or every locally attached range.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "Option<String>", into = "String")]
pub enum SubnetSelector {
    #[default]
    All,
    Cidr(Ipv4Net),
}

impl fmt::Display for SubnetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Cidr(net) => write!(f, "{net}"),
        }
    }
}

impl FromStr for SubnetSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<Ipv4Net>()
            .map(Self::Cidr)
            .map_err(|e| CoreError::InvalidSubnet {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl TryFrom<Option<String>> for SubnetSelector {
    type Error = CoreError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        value.as_deref().map_or(Ok(Self::All), str::parse)
    }
}

impl From<SubnetSelector> for String {
    fn from(value: SubnetSelector) -> Self {
        value.to_string()
    }
}

/// What to scan and how. Never mutated after construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanRequest {
    #[serde(default)]
    pub subnet: SubnetSelector,
    #[serde(default)]
    pub method: ScanMethod,
    /// Report non-responding hosts. Only the reachability sweep can.
    #[serde(default)]
    pub include_offline: bool,
    /// Run the enrichment probes after the backend finishes.
    #[serde(default)]
    pub deep: bool,
}

impl ScanRequest {
    pub fn new(subnet: SubnetSelector, method: ScanMethod) -> Self {
        Self {
            subnet,
            method,
            include_offline: false,
            deep: false,
        }
    }

    pub fn with_offline(mut self, include_offline: bool) -> Self {
        self.include_offline = include_offline;
        self
    }

    pub fn with_deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// Opaque identifier of an asynchronous scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoreError::InvalidJobId(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record of one asynchronous scan.
///
/// `queued → running → completed | failed`. A terminal job never changes
/// again; `progress` only moves forward and reads 100 exactly when the job
/// is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub request: ScanRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Device>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Job {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            progress: 0,
            request,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `queued → running`.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Raise progress while running. Never moves backwards and stays below
    /// 100 until the terminal transition.
    pub fn advance(&mut self, progress: u8) {
        if self.status == JobStatus::Running {
            self.progress = self.progress.max(progress.min(99));
        }
    }

    /// `running → completed`, attaching the merged device set.
    pub fn complete(&mut self, devices: Vec<Device>) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(devices);
        self.finish();
        Ok(())
    }

    /// `queued | running → failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.finish();
        Ok(())
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Queued | JobStatus::Running, JobStatus::Failed)
        );
        if !allowed {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.progress = 100;
        self.completed_at = Some(now);
        let began = self.started_at.unwrap_or(self.created_at);
        self.duration_ms = Some((now - began).num_milliseconds().max(0) as u64);
    }
}
