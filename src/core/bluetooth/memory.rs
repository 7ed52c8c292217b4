//! In-memory BLE radio
//! A radio that lives entirely in the process: peripherals are declared up
//! front with their advertisement timing and GATT table, characteristic
//! values echo writes back to reads, and every capability call is counted.
//! Used by the test suites and by hosts that want to exercise the adapter
//! without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures_util::{stream, StreamExt};
use log::debug;
use tokio::time::{sleep, sleep_until, Instant};

use crate::core::bluetooth::capability::{
    AdvertisementStream, BleCharacteristic, BlePeripheral, BleRadio, BleService,
};
use crate::core::bluetooth::types::Advertisement;
use crate::core::bluetooth::uuid::{parse_uuid, uuids_match};

/// Interval between repeated advertisements of one peripheral
pub const ADVERTISING_INTERVAL: Duration = Duration::from_millis(100);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct RadioState {
    powered_off: bool,
    advertise_once: bool,
    peripherals: Vec<MemoryPeripheral>,
}

/// Radio whose advertisers are declared in memory
#[derive(Clone, Default)]
pub struct MemoryRadio {
    state: Arc<Mutex<RadioState>>,
    scans: Arc<AtomicUsize>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each peripheral advertises exactly once and the scan stream then ends,
    /// instead of repeating every [`ADVERTISING_INTERVAL`] forever.
    pub fn with_finite_advertising(self) -> Self {
        lock(&self.state).advertise_once = true;
        self
    }

    pub fn add_peripheral(&self, peripheral: MemoryPeripheral) {
        lock(&self.state).peripherals.push(peripheral);
    }

    /// Removes every peripheral, as if they all went out of range
    pub fn clear_peripherals(&self) {
        lock(&self.state).peripherals.clear();
    }

    /// A powered-off radio refuses to start discovery
    pub fn set_powered(&self, powered: bool) {
        lock(&self.state).powered_off = !powered;
    }

    pub fn scans_started(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Total number of calls made into this radio and its peripherals
    pub fn capability_calls(&self) -> usize {
        let peripheral_calls: usize = lock(&self.state)
            .peripherals
            .iter()
            .map(|p| p.link.calls.load(Ordering::SeqCst))
            .sum();
        self.scans_started() + peripheral_calls
    }
}

#[async_trait::async_trait]
impl BleRadio for MemoryRadio {
    type Peripheral = MemoryPeripheral;

    fn validate_filter(&self, services: &[String]) -> Result<()> {
        match services.iter().find(|raw| parse_uuid(raw).is_none()) {
            Some(raw) => Err(anyhow!("Invalid UUID: {}", raw)),
            None => Ok(()),
        }
    }

    async fn start_scan(&self, services: &[String]) -> Result<AdvertisementStream<MemoryPeripheral>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let (advertisers, interval) = {
            let state = lock(&self.state);
            if state.powered_off {
                bail!("bluetooth adapter is powered off");
            }
            let interval = (!state.advertise_once).then_some(ADVERTISING_INTERVAL);
            (state.peripherals.clone(), interval)
        };
        debug!(
            "Memory radio scanning {} advertiser(s), requested filter {:?}",
            advertisers.len(),
            services
        );

        // Like passive scanning without controller-side filtering, every
        // advertiser is reported and the filter is left to the caller.
        let started = Instant::now();
        let pending: Vec<(MemoryPeripheral, Instant)> = advertisers
            .into_iter()
            .map(|p| {
                let first = started + p.advertise_after;
                (p, first)
            })
            .collect();

        let advertisements = stream::unfold(pending, move |mut pending| async move {
            let slot = pending
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(slot, _)| slot)?;
            let at = pending[slot].1;
            sleep_until(at).await;

            let peripheral = match interval {
                Some(interval) => {
                    pending[slot].1 = at + interval;
                    pending[slot].0.clone()
                }
                None => pending.swap_remove(slot).0,
            };
            Some((peripheral.advertisement(), pending))
        });
        Ok(advertisements.boxed())
    }
}

#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    calls: AtomicUsize,
    latency: Mutex<Duration>,
    last_write_without_response: Mutex<Option<bool>>,
}

/// A simulated peripheral and its GATT table
#[derive(Clone)]
pub struct MemoryPeripheral {
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    advertised: Vec<String>,
    advertise_after: Duration,
    refusal: Option<String>,
    services: Vec<MemoryService>,
    link: Arc<LinkState>,
}

impl MemoryPeripheral {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            advertised: Vec::new(),
            advertise_after: Duration::ZERO,
            refusal: None,
            services: Vec::new(),
            link: Arc::new(LinkState::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Service UUIDs carried in the advertisement
    pub fn advertising<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.advertised = services.into_iter().map(Into::into).collect();
        self
    }

    /// Delay between scan start and the first advertisement
    pub fn advertise_after(mut self, delay: Duration) -> Self {
        self.advertise_after = delay;
        self
    }

    /// Delay applied to every link and GATT round trip, disconnect included
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.link.latency) = latency;
        self
    }

    /// Makes every connection attempt fail with `reason`
    pub fn refuse_connections(mut self, reason: impl Into<String>) -> Self {
        self.refusal = Some(reason.into());
        self
    }

    /// Adds a service holding the given characteristics and initial values
    pub fn with_service<I, S>(mut self, uuid: impl Into<String>, characteristics: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<u8>)>,
        S: Into<String>,
    {
        let characteristics = characteristics
            .into_iter()
            .map(|(uuid, value)| MemoryCharacteristic {
                uuid: uuid.into(),
                value: Arc::new(Mutex::new(value)),
                link: self.link.clone(),
            })
            .collect();
        self.services.push(MemoryService {
            uuid: uuid.into(),
            characteristics,
            link: self.link.clone(),
        });
        self
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.link.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.link.disconnects.load(Ordering::SeqCst)
    }

    /// Write mode of the most recent write: `Some(true)` for without-response
    pub fn last_write_without_response(&self) -> Option<bool> {
        *lock(&self.link.last_write_without_response)
    }

    /// Current value of a characteristic, read without going over the air
    pub fn value(&self, service: &str, characteristic: &str) -> Option<Vec<u8>> {
        self.services
            .iter()
            .filter(|s| uuids_match(&s.uuid, service))
            .flat_map(|s| s.characteristics.iter())
            .find(|c| uuids_match(&c.uuid, characteristic))
            .map(|c| lock(&c.value).clone())
    }

    fn advertisement(&self) -> Advertisement<MemoryPeripheral> {
        Advertisement::new(self.clone(), self.name.clone(), self.rssi, self.advertised.clone())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(anyhow!("peripheral {} is not connected", self.id))
        }
    }
}

async fn round_trip(link: &LinkState) {
    link.calls.fetch_add(1, Ordering::SeqCst);
    let latency = *lock(&link.latency);
    if !latency.is_zero() {
        sleep(latency).await;
    }
}

#[async_trait::async_trait]
impl BlePeripheral for MemoryPeripheral {
    type Service = MemoryService;

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> Result<()> {
        round_trip(&self.link).await;
        if let Some(reason) = &self.refusal {
            bail!("{}", reason);
        }
        self.link.connects.fetch_add(1, Ordering::SeqCst);
        self.link.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        round_trip(&self.link).await;
        self.link.disconnects.fetch_add(1, Ordering::SeqCst);
        self.link.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_services(&self, uuids: &[String]) -> Result<Vec<MemoryService>> {
        round_trip(&self.link).await;
        self.ensure_connected()?;
        Ok(self
            .services
            .iter()
            .filter(|s| uuids.is_empty() || uuids.iter().any(|u| uuids_match(&s.uuid, u)))
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryService {
    uuid: String,
    characteristics: Vec<MemoryCharacteristic>,
    link: Arc<LinkState>,
}

#[async_trait::async_trait]
impl BleService for MemoryService {
    type Characteristic = MemoryCharacteristic;

    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn discover_characteristics(&self, uuids: &[String]) -> Result<Vec<MemoryCharacteristic>> {
        round_trip(&self.link).await;
        if !self.link.connected.load(Ordering::SeqCst) {
            bail!("service {} belongs to a disconnected peripheral", self.uuid);
        }
        Ok(self
            .characteristics
            .iter()
            .filter(|c| uuids.is_empty() || uuids.iter().any(|u| uuids_match(&c.uuid, u)))
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryCharacteristic {
    uuid: String,
    value: Arc<Mutex<Vec<u8>>>,
    link: Arc<LinkState>,
}

#[async_trait::async_trait]
impl BleCharacteristic for MemoryCharacteristic {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn read(&self) -> Result<Vec<u8>> {
        round_trip(&self.link).await;
        Ok(lock(&self.value).clone())
    }

    async fn write(&self, value: &[u8], without_response: bool) -> Result<()> {
        round_trip(&self.link).await;
        *lock(&self.value) = value.to_vec();
        *lock(&self.link.last_write_without_response) = Some(without_response);
        Ok(())
    }
}
