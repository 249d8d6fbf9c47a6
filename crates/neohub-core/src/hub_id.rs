//! Hub identity derived from a network interface MAC address.

use std::path::Path;

use crate::config::hub::MAC_INTERFACES;
use crate::error::{Error, Result};

/// Convert a 48-bit MAC (`aa:bb:cc:dd:ee:ff`) into its EUI-64 form as
/// 16 uppercase hex digits, inserting `FFFE` between the OUI and NIC halves.
pub fn hub_id_from_mac(mac: &str) -> Result<String> {
    let octets: Vec<u8> = mac
        .trim()
        .split([':', '-'])
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Config(format!("invalid MAC address '{}': {}", mac.trim(), e)))?;
    if octets.len() != 6 {
        return Err(Error::Config(format!(
            "invalid MAC address '{}': expected 6 octets",
            mac.trim()
        )));
    }
    if octets.iter().all(|&b| b == 0) {
        return Err(Error::Config("MAC address is all zeroes".to_string()));
    }

    let eui64 = [
        octets[0], octets[1], octets[2], 0xFF, 0xFE, octets[3], octets[4], octets[5],
    ];
    Ok(eui64.iter().map(|b| format!("{:02X}", b)).collect())
}

/// Read the hub id from the first preferred interface that has a MAC.
pub fn local_hub_id() -> Result<String> {
    hub_id_from_sysfs(Path::new("/sys/class/net"))
}

/// Same as [`local_hub_id`] with an explicit sysfs network class root.
pub fn hub_id_from_sysfs(root: &Path) -> Result<String> {
    for iface in MAC_INTERFACES {
        let path = root.join(iface).join("address");
        let Ok(mac) = std::fs::read_to_string(&path) else {
            continue;
        };
        match hub_id_from_mac(&mac) {
            Ok(id) => {
                tracing::debug!(interface = iface, hub_id = %id, "Derived hub id");
                return Ok(id);
            }
            Err(e) => tracing::debug!(interface = iface, error = %e, "Skipping interface"),
        }
    }
    Err(Error::NotFound(format!(
        "no MAC address found on {}",
        MAC_INTERFACES.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui64_conversion() {
        assert_eq!(
            hub_id_from_mac("00:1a:2b:3c:4d:5e\n").unwrap(),
            "001A2BFFFE3C4D5E"
        );
        assert!(hub_id_from_mac("00:1a:2b").is_err());
        assert!(hub_id_from_mac("zz:1a:2b:3c:4d:5e").is_err());
        assert!(hub_id_from_mac("00:00:00:00:00:00").is_err());
    }

    #[test]
    fn test_sysfs_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        for (iface, mac) in [("wlan0", "aa:bb:cc:dd:ee:01"), ("eth1", "aa:bb:cc:dd:ee:02")] {
            std::fs::create_dir_all(dir.path().join(iface)).unwrap();
            std::fs::write(dir.path().join(iface).join("address"), mac).unwrap();
        }
        // eth1 comes before wlan0
        assert_eq!(hub_id_from_sysfs(dir.path()).unwrap(), "AABBCCFFFEDDEE02");
    }

    #[test]
    fn test_sysfs_without_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hub_id_from_sysfs(dir.path()).is_err());
    }
}
