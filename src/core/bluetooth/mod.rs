//! Bluetooth functionality for the adapter
//! This module defines what the adapter needs from a BLE stack, the timed
//! scanner built on it, and the radio implementations.

#[cfg(feature = "radio")]
mod bluest_radio;
pub mod capability;
pub mod constants;
pub mod memory;
pub mod scanner;
pub mod types;
pub mod uuid;

// Re-export types that should be publicly accessible
#[cfg(feature = "radio")]
pub use bluest_radio::{BluestCharacteristic, BluestPeripheral, BluestRadio, BluestService};
pub use capability::{AdvertisementStream, BleCharacteristic, BlePeripheral, BleRadio, BleService};
pub use memory::{MemoryPeripheral, MemoryRadio};
pub use scanner::{BluetoothScanner, DiscoveredSet};
pub use types::{Advertisement, PeripheralInfo};
