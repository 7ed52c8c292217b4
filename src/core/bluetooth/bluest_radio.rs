//! bluest radio backend
//! This module adapts the platform Bluetooth stack, through bluest, to the
//! adapter's capability traits.

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, Device, Service, Uuid};
use futures_util::{stream, StreamExt};
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::capability::{
    AdvertisementStream, BleCharacteristic, BlePeripheral, BleRadio, BleService,
};
use crate::core::bluetooth::types::Advertisement;
use crate::core::bluetooth::uuid::parse_uuid;

/// Advertisements buffered between the scan task and the scanner
const ADVERTISEMENT_BUFFER: usize = 64;

fn parse_all(uuids: &[String]) -> Result<Vec<Uuid>> {
    uuids
        .iter()
        .map(|raw| parse_uuid(raw).ok_or_else(|| anyhow!("Invalid UUID: {}", raw)))
        .collect()
}

/// The default system Bluetooth adapter
#[derive(Clone)]
pub struct BluestRadio {
    adapter: Adapter,
}

impl BluestRadio {
    /// Opens the default adapter and waits until it is powered on.
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self { adapter })
    }
}

#[async_trait::async_trait]
impl BleRadio for BluestRadio {
    type Peripheral = BluestPeripheral;

    fn validate_filter(&self, services: &[String]) -> Result<()> {
        parse_all(services).map(drop)
    }

    async fn start_scan(&self, services: &[String]) -> Result<AdvertisementStream<BluestPeripheral>> {
        let services = parse_all(services)?;
        let adapter = self.adapter.clone();
        let (started_tx, started_rx) = oneshot::channel();
        let (found_tx, found_rx) = mpsc::channel(ADVERTISEMENT_BUFFER);

        // bluest's scan stream borrows the adapter, so it lives in its own
        // task; the task ends, and discovery stops, once the receiver is dropped.
        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(scan_stream) => {
                    let _ = started_tx.send(Ok(()));
                    scan_stream
                }
                Err(e) => {
                    let _ = started_tx.send(Err(anyhow!(e)));
                    return;
                }
            };

            while let Some(discovered_device) = scan_stream.next().await {
                let device = discovered_device.device;
                let name = discovered_device
                    .adv_data
                    .local_name
                    .or_else(|| device.name().ok());
                let advertised = discovered_device
                    .adv_data
                    .services
                    .iter()
                    .map(Uuid::to_string)
                    .collect();
                let peripheral = BluestPeripheral {
                    adapter: adapter.clone(),
                    device,
                };
                let advertisement =
                    Advertisement::new(peripheral, name, discovered_device.rssi, advertised);
                if found_tx.send(advertisement).await.is_err() {
                    break;
                }
            }
            info!("Bluetooth scan stopped.");
        });

        started_rx
            .await
            .map_err(|_| anyhow!("Scan task ended before discovery started"))??;

        let advertisements = stream::unfold(found_rx, |mut found_rx| async move {
            found_rx.recv().await.map(|advertisement| (advertisement, found_rx))
        });
        Ok(advertisements.boxed())
    }
}

#[derive(Clone)]
pub struct BluestPeripheral {
    adapter: Adapter,
    device: Device,
}

#[async_trait::async_trait]
impl BlePeripheral for BluestPeripheral {
    type Service = BluestService;

    fn id(&self) -> String {
        self.device.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        if self.device.is_connected().await {
            info!("Device {} already connected", self.device.id());
            return Ok(());
        }
        info!("Initiating connection to {}...", self.device.id());
        self.adapter.connect_device(&self.device).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }

    async fn discover_services(&self, uuids: &[String]) -> Result<Vec<BluestService>> {
        let mut services = Vec::new();
        if uuids.is_empty() {
            services = self.device.discover_services().await?;
        } else {
            for uuid in parse_all(uuids)? {
                services.extend(self.device.discover_services_with_uuid(uuid).await?);
            }
        }
        if services.is_empty() {
            for service in self.device.services().await.unwrap_or_default() {
                debug!("Available service: {}", service.uuid());
            }
        }
        Ok(services.into_iter().map(BluestService).collect())
    }
}

pub struct BluestService(Service);

#[async_trait::async_trait]
impl BleService for BluestService {
    type Characteristic = BluestCharacteristic;

    fn uuid(&self) -> String {
        self.0.uuid().to_string()
    }

    async fn discover_characteristics(&self, uuids: &[String]) -> Result<Vec<BluestCharacteristic>> {
        let mut characteristics = Vec::new();
        if uuids.is_empty() {
            characteristics = self.0.discover_characteristics().await?;
        } else {
            for uuid in parse_all(uuids)? {
                characteristics.extend(self.0.discover_characteristics_with_uuid(uuid).await?);
            }
        }
        Ok(characteristics.into_iter().map(BluestCharacteristic).collect())
    }
}

pub struct BluestCharacteristic(Characteristic);

#[async_trait::async_trait]
impl BleCharacteristic for BluestCharacteristic {
    fn uuid(&self) -> String {
        self.0.uuid().to_string()
    }

    async fn read(&self) -> Result<Vec<u8>> {
        let value = self.0.read().await?;
        debug!("Read {} byte(s) from {}", value.len(), self.0.uuid());
        Ok(value)
    }

    async fn write(&self, value: &[u8], without_response: bool) -> Result<()> {
        let result = if without_response {
            self.0.write_without_response(value).await
        } else {
            self.0.write(value).await
        };
        if let Err(e) = &result {
            error!("Write to {} failed: {}", self.0.uuid(), e);
        }
        Ok(result?)
    }
}
