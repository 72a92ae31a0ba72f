//! lanwatch-discover: LAN host discovery and scan orchestration.
//!
//! Resolves the ranges to scan, sweeps them with the best available probe
//! backend (arp-scan, nmap or a ping sweep), names the hosts found by
//! reverse DNS, optionally enriches them (neighbor table, OUI vendors, SSDP,
//! mDNS, DHCP leases) and merges everything into one device per IP. Scans run either synchronously
//! through [`engine::ScanEngine`] or as tracked jobs through
//! [`jobs::JobManager`], which records every finished job in the history
//! store.

pub mod aggregate;
pub mod arp_scan;
pub mod backend;
pub mod classify;
pub mod config;
pub mod datagram;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod jobs;
pub mod leases;
pub mod mdns;
pub mod neighbors;
pub mod nmap;
pub mod nmap_xml;
pub mod oui;
pub mod ping;
pub mod process;
pub mod rdns;
pub mod resolver;
pub mod ssdp;
