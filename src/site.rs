//! Site descriptor and device registry.
//!
//! A site descriptor is a JSON document mapping physical addresses
//! (no-colon hex form) to the device's logical index and display title.
//! The registry is loaded once per analysis session and is read-only
//! afterwards. An address missing from the registry is not an error: it
//! still participates in topology inference, it just cannot be
//! index-filtered and is titled "UNIDENTIFIED".

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Deserialize;

/// Title used for addresses the site descriptor does not know.
pub const UNIDENTIFIED_TITLE: &str = "UNIDENTIFIED";

/// One device entry from the site descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    /// Logical index the device originates status traffic on.
    #[serde(rename = "deviceAddress")]
    pub device_address: u16,
    /// Human-readable display name.
    pub title: String,
    /// Secondary receive index, present on dual-channel devices.
    #[serde(default)]
    pub rx_index: Option<u16>,
}

/// Site descriptor document. Unknown fields (crypto material and other
/// transport concerns) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteDescriptor {
    pub devices: HashMap<String, DeviceEntry>,
}

/// Read-only physical-address -> device identity mapping for one site.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    /// Keyed by no-colon hex address, exactly as the descriptor stores it.
    devices: HashMap<String, DeviceEntry>,
}

impl DeviceRegistry {
    /// Load a site descriptor JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read site descriptor: {}", path.display()))?;
        let descriptor: SiteDescriptor = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse site descriptor: {}", path.display()))?;
        log::info!(
            "Loaded site descriptor {} ({} devices)",
            path.display(),
            descriptor.devices.len()
        );
        Ok(Self::from_descriptor(descriptor))
    }

    pub fn from_descriptor(descriptor: SiteDescriptor) -> Self {
        Self {
            devices: descriptor.devices,
        }
    }

    /// Look up a device by colon-form or bare hex address.
    pub fn device(&self, mac: &str) -> Option<&DeviceEntry> {
        self.devices.get(&mac.replace(':', ""))
    }

    /// Logical index the address originates traffic on, if known.
    pub fn device_address(&self, mac: &str) -> Option<u16> {
        self.device(mac).map(|d| d.device_address)
    }

    /// Display title for an address, falling back to "UNIDENTIFIED".
    pub fn title(&self, mac: &str) -> &str {
        self.device(mac)
            .map(|d| d.title.as_str())
            .unwrap_or(UNIDENTIFIED_TITLE)
    }

    /// Every index worth stimulating on this site: each device address
    /// plus any secondary receive index. Sorted and deduplicated so the
    /// poll schedule is stable.
    pub fn stimulation_indices(&self) -> Vec<u16> {
        let mut indices: Vec<u16> = self
            .devices
            .values()
            .flat_map(|d| std::iter::once(d.device_address).chain(d.rx_index))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> DeviceRegistry {
        let descriptor: SiteDescriptor = serde_json::from_str(
            r#"{
                "devices": {
                    "AABBCCDDEEFF00": { "deviceAddress": 3, "title": "Gateway" },
                    "112233445566FF": { "deviceAddress": 5, "title": "Sensor-1", "rx_index": 12 }
                },
                "cryptoKey": "00 11 22"
            }"#,
        )
        .unwrap();
        DeviceRegistry::from_descriptor(descriptor)
    }

    #[test]
    fn test_lookup_strips_colons() {
        let registry = test_registry();
        assert_eq!(registry.device_address("AA:BB:CC:DD:EE:FF:00"), Some(3));
        assert_eq!(registry.device_address("AABBCCDDEEFF00"), Some(3));
        assert_eq!(registry.title("11:22:33:44:55:66:FF"), "Sensor-1");
    }

    #[test]
    fn test_unknown_address_is_unidentified() {
        let registry = test_registry();
        assert_eq!(registry.device_address("00:00:00:00:00:00:00"), None);
        assert_eq!(registry.title("00:00:00:00:00:00:00"), UNIDENTIFIED_TITLE);
    }

    #[test]
    fn test_stimulation_indices_include_rx() {
        let registry = test_registry();
        assert_eq!(registry.stimulation_indices(), vec![3, 5, 12]);
    }
}
