//! Coarse device classification from the vendor string.

/// Guess a device class from a vendor name. `None` when the vendor says
/// nothing useful about what the host is.
pub fn classify_vendor(vendor: &str) -> Option<&'static str> {
    let v = vendor.to_lowercase();

    let class = match v.as_str() {
        v if v.contains("vmware")
            || v.contains("virtualbox")
            || v.contains("qemu")
            || v.contains("xensource")
            || v.contains("pcs systemtechnik")
            || v.contains("parallels") =>
        {
            "virtual-machine"
        }
        v if v.contains("raspberry pi")
            || v.contains("espressif")
            || v.contains("nest labs")
            || v.contains("philips lighting")
            || v.contains("tuya") =>
        {
            "iot"
        }
        v if v.contains("cisco")
            || v.contains("ubiquiti")
            || v.contains("tp-link")
            || v.contains("netgear")
            || v.contains("mikrotik")
            || v.contains("juniper")
            || v.contains("aruba") =>
        {
            "network"
        }
        v if v.contains("brother")
            || v.contains("epson")
            || v.contains("canon")
            || v.contains("lexmark")
            || v.contains("kyocera")
            || v.contains("xerox") =>
        {
            "printer"
        }
        v if v.contains("synology") || v.contains("qnap") => "nas",
        v if v.contains("apple") => "apple",
        _ => return None,
    };
    Some(class)
}
