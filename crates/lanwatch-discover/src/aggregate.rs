//! Observation aggregation.
//!
//! Groups observations by IP and folds each group with `Device::merge`.
//! Because that merge is a per-field maximum, the fold is associative and
//! commutative: merging per subnet first and then across subnets gives the
//! same set as merging everything at once.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use lanwatch_core::Device;

/// Merge any number of observation lists into one device per IP, ordered
/// by IP.
pub fn merge<I>(lists: I) -> Vec<Device>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = Device>,
{
    let mut by_ip: BTreeMap<Ipv4Addr, Device> = BTreeMap::new();

    for device in lists.into_iter().flatten() {
        let folded = match by_ip.remove(&device.ip) {
            Some(existing) => existing.merge(&device),
            None => device.settled(),
        };
        by_ip.insert(folded.ip, folded);
    }

    by_ip.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use lanwatch_core::{DeviceStatus, Source};

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn sample() -> (Vec<Device>, Vec<Device>, Vec<Device>) {
        let t0 = Utc::now() - TimeDelta::seconds(120);
        let a = vec![
            Device::online(ip("10.0.0.5"), Source::ArpScan)
                .with_mac("aa:bb:cc:00:11:22")
                .with_vendor("Acme")
                .seen_at(t0),
            Device::offline(ip("10.0.0.9"), Source::Ping).seen_at(t0),
        ];
        let b = vec![
            Device::online(ip("10.0.0.5"), Source::Leases)
                .with_name("printer")
                .seen_at(t0 + TimeDelta::seconds(10)),
            Device::online(ip("10.0.0.9"), Source::Nmap)
                .with_name("nine.lan")
                .seen_at(t0 + TimeDelta::seconds(20)),
        ];
        let c = vec![
            Device::online(ip("10.0.0.5"), Source::Ssdp)
                .with_name("upnp")
                .with_type("ssdp")
                .seen_at(t0 + TimeDelta::seconds(30)),
            Device::online(ip("10.0.0.2"), Source::Mdns)
                .with_name("two.local")
                .seen_at(t0 + TimeDelta::seconds(40)),
        ];
        (a, b, c)
    }

    #[test]
    fn one_device_per_ip_in_ip_order() {
        let (a, b, c) = sample();
        let merged = merge([a, b, c]);
        let ips: Vec<_> = merged.iter().map(|d| d.ip).collect();
        assert_eq!(ips, vec![ip("10.0.0.2"), ip("10.0.0.5"), ip("10.0.0.9")]);
    }

    #[test]
    fn duplicates_inside_one_list_collapse() {
        let d = Device::online(ip("192.168.0.4"), Source::Ping);
        let merged = merge([vec![d.clone(), d.clone(), d]]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn merge_is_associative() {
        let (a, b, c) = sample();
        let left = merge([merge([a.clone(), b.clone()]), c.clone()]);
        let right = merge([a, merge([b, c])]);
        assert_eq!(left, right);
    }

    #[test]
    fn merge_is_commutative() {
        let (a, b, c) = sample();
        assert_eq!(merge([a.clone(), b.clone()]), merge([b.clone(), a.clone()]));
        assert_eq!(
            merge([a.clone(), b.clone(), c.clone()]),
            merge([c, a, b])
        );
    }

    #[test]
    fn status_and_fields_follow_merge_rule() {
        let (a, b, c) = sample();
        let merged = merge([a, b, c]);

        let five = &merged[1];
        assert_eq!(five.mac.as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(five.vendor.as_deref(), Some("Acme"));
        // Two-field ssdp observation beats the one-field lease observation.
        assert_eq!(five.name.as_deref(), Some("upnp"));
        assert_eq!(five.device_type.as_deref(), Some("ssdp"));

        let nine = &merged[2];
        assert_eq!(nine.status, DeviceStatus::Online);
        assert_eq!(nine.name.as_deref(), Some("nine.lan"));
    }

    #[test]
    fn empty_input() {
        assert!(merge(Vec::<Vec<Device>>::new()).is_empty());
    }
}
