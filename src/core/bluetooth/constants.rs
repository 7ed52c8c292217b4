//! Constants used throughout the adapter
//! This module contains the constant values shared by the scanner, the
//! dispatcher and the radio backends, such as default timeouts and the
//! Bluetooth base UUID.

/// Scan duration in milliseconds when a request does not name one
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5000;

/// Capacity of the dispatcher inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 32;

/// Bluetooth base UUID; 16/32-bit shorthand UUIDs occupy its top 32 bits
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: &str = "180a";
pub const UUID_BATTERY_SERVICE: &str = "180f";

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_MANUFACTURER_NAME: &str = "2a29";
pub const UUID_BATTERY_LEVEL: &str = "2a19";
