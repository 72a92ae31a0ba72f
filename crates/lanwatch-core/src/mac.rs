//! Hardware address normalization.
//!
//! Probes report MAC addresses in whatever shape their tool prints:
//! `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff`, `aabb.ccdd.eeff` or a bare
//! hex string. Everything inside lanwatch uses lowercase colon-separated form.

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Returns `None` unless the input contains exactly twelve hex digits
/// once separators are removed.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let lower = digits.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}

/// The vendor-identifying prefix (first three octets) of a MAC address.
pub fn oui_prefix(raw: &str) -> Option<String> {
    normalize_mac(raw).map(|mac| mac[..8].to_string())
}
