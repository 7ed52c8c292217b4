use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info};
use tokio::time::{sleep_until, Instant};

use crate::core::bluetooth::capability::BleRadio;
use crate::core::bluetooth::types::{Advertisement, PeripheralInfo};
use crate::core::bluetooth::uuid::uuids_match;
use crate::core::error::AdapterError;

/// Peripherals found by one scan, in first-seen order, one entry per identifier.
#[derive(Debug)]
pub struct DiscoveredSet<P> {
    entries: Vec<Advertisement<P>>,
    index: HashMap<String, usize>,
}

impl<P> Default for DiscoveredSet<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<P> DiscoveredSet<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an advertisement. A repeat from a known peripheral refreshes
    /// its name and RSSI in place and returns false.
    pub fn insert(&mut self, advertisement: Advertisement<P>) -> bool {
        if let Some(&slot) = self.index.get(&advertisement.id) {
            let known = &mut self.entries[slot];
            if advertisement.name.is_some() {
                known.name = advertisement.name;
            }
            if advertisement.rssi.is_some() {
                known.rssi = advertisement.rssi;
            }
            return false;
        }
        self.index.insert(advertisement.id.clone(), self.entries.len());
        self.entries.push(advertisement);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Advertisement<P>> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advertisement<P>> {
        self.entries.iter()
    }

    /// Serialisable snapshot with the radio handles stripped
    pub fn infos(&self) -> Vec<PeripheralInfo> {
        self.entries.iter().map(Advertisement::info).collect()
    }
}

/// Timed discovery over a radio
pub struct BluetoothScanner<R> {
    radio: Arc<R>,
    min_rssi: Option<i16>,
}

impl<R: BleRadio> BluetoothScanner<R> {
    pub fn new(radio: Arc<R>, min_rssi: Option<i16>) -> Self {
        Self { radio, min_rssi }
    }

    /// Runs one discovery window of `timeout`, adding every advertiser that
    /// matches `filter` to `discovered`.
    ///
    /// Returns once the window has fully elapsed, even if the radio's stream
    /// ends early. Fails immediately if discovery cannot start.
    pub async fn scan(
        &self,
        timeout: Duration,
        filter: &[String],
        discovered: &mut DiscoveredSet<R::Peripheral>,
    ) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;

        info!("Starting bluetooth scan for {:?}, filter {:?}", timeout, filter);
        self.radio.validate_filter(filter)?;
        let mut scan_stream = self
            .radio
            .start_scan(filter)
            .await
            .map_err(AdapterError::radio_unavailable)?;

        let mut stream_open = true;
        loop {
            tokio::select! {
                result = scan_stream.next(), if stream_open => {
                    match result {
                        Some(advertisement) => {
                            debug!(
                                "Found device - ID: {}, Name: {:?}, RSSI: {:?}, Services: {:?}",
                                advertisement.id, advertisement.name, advertisement.rssi, advertisement.services
                            );
                            if self.accepts(&advertisement, filter) && discovered.insert(advertisement) {
                                debug!("Peripheral added, {} discovered so far", discovered.len());
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended, waiting out the scan window.");
                            stream_open = false;
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    break;
                }
            }
        }

        // Dropping the stream stops discovery on the radio.
        drop(scan_stream);
        info!("Bluetooth scan finished with {} peripheral(s)", discovered.len());
        Ok(())
    }

    fn accepts(&self, advertisement: &Advertisement<R::Peripheral>, filter: &[String]) -> bool {
        if let (Some(floor), Some(rssi)) = (self.min_rssi, advertisement.rssi) {
            if rssi < floor {
                return false;
            }
        }
        filter.is_empty()
            || advertisement
                .services
                .iter()
                .any(|service| filter.iter().any(|wanted| uuids_match(service, wanted)))
    }
}
