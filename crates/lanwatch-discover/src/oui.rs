//! Vendor lookup by hardware address prefix.
//!
//! Backed by the IEEE registry bundled with `mac_oui`. Sites can extend or
//! override it with a JSON file mapping prefixes to vendor names.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use lanwatch_core::mac::{normalize_mac, oui_prefix};
use lanwatch_core::{Device, Source};
use mac_oui::Oui;

use crate::error::{DiscoverError, Result};

static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

/// The bundled IEEE registry, loaded on first use.
fn oui_db() -> Option<&'static Oui> {
    OUI_DB
        .get_or_init(|| match Oui::default() {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!(error = ?e, "Bundled OUI database unavailable");
                None
            }
        })
        .as_ref()
}

/// Normalize an OUI key written as `00:50:56`, `00-50-56` or `005056`.
fn normalize_prefix(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let lower = digits.to_ascii_lowercase();
    Some(format!("{}:{}:{}", &lower[0..2], &lower[2..4], &lower[4..6]))
}

/// Prefix-to-vendor table: the bundled registry plus any loaded overrides.
#[derive(Debug, Clone, Default)]
pub struct OuiTable {
    extra: HashMap<String, String>,
}

impl OuiTable {
    /// The bundled registry only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Bundled registry overridden by a JSON object of `prefix: vendor` pairs.
    /// Keys that are not a three-octet prefix are skipped.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, String> =
            serde_json::from_str(json).map_err(|e| DiscoverError::parse("OUI table", e))?;

        let mut extra = HashMap::with_capacity(raw.len());
        for (key, vendor) in raw {
            match normalize_prefix(&key) {
                Some(prefix) if !vendor.trim().is_empty() => {
                    extra.insert(prefix, vendor.trim().to_string());
                }
                _ => tracing::debug!(key = %key, "Skipping OUI entry"),
            }
        }
        Ok(Self { extra })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), entries = table.extra.len(), "Loaded OUI table");
        Ok(table)
    }

    /// Vendor for a MAC address in any common notation.
    pub fn lookup(&self, mac: &str) -> Option<String> {
        let mac = normalize_mac(mac)?;
        if let Some(vendor) = oui_prefix(&mac).and_then(|p| self.extra.get(&p)) {
            return Some(vendor.clone());
        }
        match oui_db()?.lookup_by_mac(&mac) {
            Ok(Some(entry)) => Some(entry.company_name.clone()),
            _ => None,
        }
    }

    /// Vendor observations for devices that have a MAC but no vendor yet.
    pub fn observe(&self, devices: &[Device]) -> Vec<Device> {
        devices
            .iter()
            .filter(|d| d.vendor.is_none())
            .filter_map(|d| {
                let vendor = self.lookup(d.mac.as_deref()?)?;
                Some(
                    Device::new(d.ip, d.status, Source::Oui)
                        .with_vendor(&vendor)
                        .seen_at(d.last_seen),
                )
            })
            .collect()
    }
}
