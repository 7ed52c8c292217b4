//! Defines shared data structures for the Bluetooth module.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::capability::BlePeripheral;

/// A peripheral observed during a scan, together with its radio handle.
#[derive(Debug, Clone)]
pub struct Advertisement<P> {
    /// The radio handle used to connect and discover services
    pub peripheral: P,
    /// Platform identifier of the peripheral
    pub id: String,
    /// The advertised local name, if any
    pub name: Option<String>,
    /// The signal strength (RSSI) of the advertisement
    pub rssi: Option<i16>,
    /// Service UUIDs listed in the advertisement
    pub services: Vec<String>,
}

impl<P: BlePeripheral> Advertisement<P> {
    pub fn new(peripheral: P, name: Option<String>, rssi: Option<i16>, services: Vec<String>) -> Self {
        let id = peripheral.id();
        Self {
            peripheral,
            id,
            name,
            rssi,
            services,
        }
    }
}

impl<P> Advertisement<P> {
    /// Serialisable view of this advertisement, without the radio handle
    pub fn info(&self) -> PeripheralInfo {
        PeripheralInfo {
            uuid: self.id.clone(),
            name: self.name.clone(),
            address: extract_mac_address(&self.id),
            rssi: self.rssi,
            services: self.services.clone(),
        }
    }
}

/// Represents a discovered peripheral as delivered to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralInfo {
    /// Platform identifier, used as the connect target
    pub uuid: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The MAC address, when the platform identifier carries one
    pub address: Option<String>,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    /// Advertised service UUIDs
    pub services: Vec<String>,
}

/// Pulls a MAC address out of a platform device identifier
/// (BlueZ: "hci0/dev_AA_BB_...", Windows: "BluetoothLE#...-aa:bb:...").
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC: OnceLock<Regex> = OnceLock::new();
    let re = MAC.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("MAC address pattern is valid")
    });
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}
