//! BLE capability traits
//! The adapter never talks to a Bluetooth stack directly. Everything it
//! needs from the radio goes through these traits, so the same dispatcher
//! runs on bluest or on the in-memory radio.

use anyhow::Result;
use futures_util::stream::BoxStream;

use crate::core::bluetooth::types::Advertisement;

/// Stream of advertisements produced by one discovery pass.
/// Dropping the stream stops discovery.
pub type AdvertisementStream<P> = BoxStream<'static, Advertisement<P>>;

/// Radio able to discover advertising peripherals
#[async_trait::async_trait]
pub trait BleRadio: Send + Sync + 'static {
    type Peripheral: BlePeripheral;

    /// Rejects a service filter the stack cannot use, before discovery
    /// starts. Radios that never parse UUIDs accept everything.
    fn validate_filter(&self, services: &[String]) -> Result<()> {
        let _ = services;
        Ok(())
    }

    /// Start discovery. `services` is a hint for radios that filter in
    /// hardware; an empty slice asks for every advertiser.
    async fn start_scan(&self, services: &[String]) -> Result<AdvertisementStream<Self::Peripheral>>;
}

/// A discovered peripheral
#[async_trait::async_trait]
pub trait BlePeripheral: Clone + Send + Sync + 'static {
    type Service: BleService;

    /// Platform identifier, stable for the lifetime of the radio
    fn id(&self) -> String;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Discover services by UUID. An empty result means none matched.
    async fn discover_services(&self, uuids: &[String]) -> Result<Vec<Self::Service>>;
}

/// A GATT service on a connected peripheral
#[async_trait::async_trait]
pub trait BleService: Send + Sync + 'static {
    type Characteristic: BleCharacteristic;

    fn uuid(&self) -> String;

    /// Discover characteristics by UUID. An empty result means none matched.
    async fn discover_characteristics(&self, uuids: &[String]) -> Result<Vec<Self::Characteristic>>;
}

/// A GATT characteristic
#[async_trait::async_trait]
pub trait BleCharacteristic: Send + Sync + 'static {
    fn uuid(&self) -> String;

    async fn read(&self) -> Result<Vec<u8>>;

    async fn write(&self, value: &[u8], without_response: bool) -> Result<()>;
}
