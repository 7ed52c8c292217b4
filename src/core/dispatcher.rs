//! Operation dispatcher
//! One task owns the discovered set and the connection slot. Requests reach
//! it through a bounded inbox and run strictly one batch at a time, so no
//! operation ever observes another's half-finished state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{AdapterConfig, ConnectPolicy};
use crate::core::bluetooth::capability::{BleCharacteristic, BlePeripheral, BleRadio, BleService};
use crate::core::bluetooth::scanner::{BluetoothScanner, DiscoveredSet};
use crate::core::error::AdapterError;
use crate::core::message::{
    ConnectRequest, Operation, OperationOutput, OperationRequest, OperationResult, ReadRequest,
    Response, ScanRequest, UuidFilter, WriteRequest,
};
use crate::state::{AdapterStatus, ConnectionStatus};

type ServiceOf<R> = <<R as BleRadio>::Peripheral as BlePeripheral>::Service;
type CharacteristicOf<R> = <ServiceOf<R> as BleService>::Characteristic;

/// A batch of operations and where their responses go
struct Job {
    operations: Vec<Operation>,
    replies: mpsc::UnboundedSender<Response>,
}

/// The connection slot
enum Connection<P> {
    Disconnected,
    Connecting(P),
    Connected(P),
}

pub struct Dispatcher<R: BleRadio> {
    scanner: BluetoothScanner<R>,
    config: AdapterConfig,
    discovered: DiscoveredSet<R::Peripheral>,
    connection: Connection<R::Peripheral>,
    status: watch::Sender<AdapterStatus>,
}

impl<R: BleRadio> Dispatcher<R> {
    /// Starts the dispatcher task on the current tokio runtime.
    pub fn spawn(radio: R, config: AdapterConfig) -> Result<DispatcherHandle, AdapterError> {
        config.validate()?;

        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (status_tx, status_rx) = watch::channel(AdapterStatus::default());
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            scanner: BluetoothScanner::new(Arc::new(radio), config.min_rssi),
            config,
            discovered: DiscoveredSet::new(),
            connection: Connection::Disconnected,
            status: status_tx,
        };
        tokio::spawn(dispatcher.run(inbox_rx, shutdown.clone()));
        info!("Dispatcher started.");

        Ok(DispatcherHandle {
            inbox: inbox_tx,
            status: status_rx,
            shutdown,
        })
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = inbox.recv() => match job {
                    Some(job) => job,
                    None => {
                        info!("Every dispatcher handle dropped.");
                        break;
                    }
                },
            };
            self.process(job, &shutdown).await;
        }
        self.teardown(&mut inbox).await;
    }

    async fn process(&mut self, job: Job, shutdown: &CancellationToken) {
        for operation in job.operations {
            let kind = operation.kind();
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!("{} interrupted by shutdown", kind.as_str());
                    Err(AdapterError::Shutdown)
                }
                result = self.execute(operation) => result,
            };
            match &result {
                Ok(_) => info!("{} completed", kind.as_str()),
                Err(e) => warn!("{} failed: {}", kind.as_str(), e),
            }
            // The submitter may have stopped listening; the operation still ran.
            let _ = job.replies.send(Response::new(kind, result));
        }
    }

    async fn execute(&mut self, operation: Operation) -> OperationResult {
        match operation {
            Operation::Scan(request) => self.handle_scan(request).await,
            Operation::Connect(request) => self.handle_connect(request).await,
            Operation::Read(request) => self.handle_read(request).await,
            Operation::Write(request) => self.handle_write(request).await,
        }
    }

    async fn handle_scan(&mut self, request: ScanRequest) -> OperationResult {
        let filter = request
            .service_uuids
            .map(UuidFilter::into_vec)
            .unwrap_or_default();
        let timeout = request
            .timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_scan_timeout());
        info!("Start scan: services {:?}, timeout {:?}", filter, timeout);

        self.rescan(timeout, &filter).await?;

        let peripherals = self.discovered.infos();
        info!("Finished scanning: {:?}", peripherals);
        Ok(OperationOutput::Scanned(peripherals))
    }

    async fn handle_connect(&mut self, request: ConnectRequest) -> OperationResult {
        if self.discovered.is_empty() {
            info!("Start scan for connect: {:?}", request);
            let timeout = request
                .timeout
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.config.default_scan_timeout());
            self.rescan(timeout, &[request.service_uuid.clone()]).await?;
        } else {
            info!("Checking already scanned peripherals: {:?}", request);
        }

        let peripheral = self
            .discovered
            .get(&request.uuid)
            .map(|advertisement| advertisement.peripheral.clone())
            .ok_or_else(|| AdapterError::PeripheralNotFound(request.uuid.clone()))?;
        info!("Matching peripheral found: {}", request.uuid);

        self.release_active(&request.uuid).await?;
        let previous = match &self.connection {
            Connection::Connected(active) if active.id() == request.uuid => Some(active.clone()),
            _ => None,
        };
        self.set_connection(Connection::Connecting(peripheral.clone()));

        let attempt = with_timeout(
            "connect",
            self.config.connect_timeout(),
            Self::open(&peripheral, &request.service_uuid),
        )
        .await;

        match attempt {
            Ok(()) => {
                self.set_connection(Connection::Connected(peripheral));
                info!("Connected to {}", request.uuid);
                Ok(OperationOutput::Connected { uuid: request.uuid })
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", request.uuid, e);
                if let Some(previous) = previous {
                    // The existing link was healthy before this attempt.
                    self.set_connection(Connection::Connected(previous));
                    return Err(e);
                }
                let disconnect = async { Ok::<_, AdapterError>(peripheral.disconnect().await?) };
                if let Err(disconnect_err) =
                    with_timeout("disconnect", self.config.connect_timeout(), disconnect).await
                {
                    warn!("Cleanup disconnect of {} failed: {}", request.uuid, disconnect_err);
                }
                self.set_connection(Connection::Disconnected);
                Err(e)
            }
        }
    }

    async fn handle_read(&self, request: ReadRequest) -> OperationResult {
        info!("Read requested: {:?}", request);
        let peripheral = self.active()?;

        let read = async {
            let characteristic = Self::find_characteristic(
                &peripheral,
                &request.service_uuid,
                &request.characteristic_uuid,
            )
            .await?;
            Ok::<_, AdapterError>(characteristic.read().await?)
        };
        let value = with_timeout("read", self.config.read_timeout(), read).await?;

        info!("Value read from {}: {:?}", request.characteristic_uuid, value);
        Ok(OperationOutput::Read(value))
    }

    async fn handle_write(&self, request: WriteRequest) -> OperationResult {
        info!("Write requested: {:?}", request);
        let peripheral = self.active()?;
        let without_response = request
            .without_response
            .unwrap_or(self.config.write_without_response);

        let write = async {
            let characteristic = Self::find_characteristic(
                &peripheral,
                &request.service_uuid,
                &request.characteristic_uuid,
            )
            .await?;
            Ok::<_, AdapterError>(characteristic.write(&request.value, without_response).await?)
        };
        with_timeout("write", self.config.write_timeout(), write).await?;

        info!("Wrote {} byte(s) to {}", request.value.len(), request.characteristic_uuid);
        Ok(OperationOutput::Written {
            characteristic_uuid: request.characteristic_uuid,
        })
    }

    /// Replaces the discovered set with the result of a fresh scan.
    async fn rescan(&mut self, timeout: Duration, filter: &[String]) -> Result<(), AdapterError> {
        self.discovered.clear();
        self.publish();
        let result = self.scanner.scan(timeout, filter, &mut self.discovered).await;
        self.publish();
        result
    }

    /// Applies the connect policy before connecting to `target`.
    async fn release_active(&mut self, target: &str) -> Result<(), AdapterError> {
        let active = match &self.connection {
            Connection::Connecting(p) | Connection::Connected(p) => p.clone(),
            Connection::Disconnected => return Ok(()),
        };
        if active.id() == target {
            return Ok(());
        }

        match self.config.connect_policy {
            ConnectPolicy::Reject => Err(AdapterError::AlreadyConnected(active.id())),
            ConnectPolicy::Replace => {
                info!("Disconnecting {} before connecting to {}", active.id(), target);
                if let Err(e) = active.disconnect().await {
                    warn!("Disconnect of {} failed: {:#}", active.id(), e);
                }
                self.set_connection(Connection::Disconnected);
                Ok(())
            }
        }
    }

    async fn open(peripheral: &R::Peripheral, service_uuid: &str) -> Result<(), AdapterError> {
        info!("Initiating connection to {}...", peripheral.id());
        peripheral.connect().await?;
        info!("Connection successful, discovering service {}...", service_uuid);
        Self::find_service(peripheral, service_uuid).await?;
        Ok(())
    }

    async fn find_service(
        peripheral: &R::Peripheral,
        service_uuid: &str,
    ) -> Result<ServiceOf<R>, AdapterError> {
        peripheral
            .discover_services(&[service_uuid.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::ServiceNotFound(service_uuid.to_string()))
    }

    async fn find_characteristic(
        peripheral: &R::Peripheral,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<CharacteristicOf<R>, AdapterError> {
        let service = Self::find_service(peripheral, service_uuid).await?;
        service
            .discover_characteristics(&[characteristic_uuid.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::CharacteristicNotFound(characteristic_uuid.to_string()))
    }

    fn active(&self) -> Result<R::Peripheral, AdapterError> {
        match &self.connection {
            Connection::Connected(peripheral) => Ok(peripheral.clone()),
            _ => Err(AdapterError::NotConnected),
        }
    }

    fn set_connection(&mut self, connection: Connection<R::Peripheral>) {
        self.connection = connection;
        self.publish();
    }

    fn publish(&self) {
        let connection = match &self.connection {
            Connection::Disconnected => ConnectionStatus::Disconnected,
            Connection::Connecting(p) => ConnectionStatus::Connecting { uuid: p.id() },
            Connection::Connected(p) => ConnectionStatus::Connected { uuid: p.id() },
        };
        self.status.send_replace(AdapterStatus {
            connection,
            discovered: self.discovered.len(),
            destroyed: false,
        });
    }

    async fn teardown(mut self, inbox: &mut mpsc::Receiver<Job>) {
        info!("Destroying adapter.");
        inbox.close();
        while let Some(job) = inbox.recv().await {
            for operation in job.operations {
                let _ = job
                    .replies
                    .send(Response::new(operation.kind(), Err(AdapterError::Shutdown)));
            }
        }

        match std::mem::replace(&mut self.connection, Connection::Disconnected) {
            Connection::Connecting(peripheral) | Connection::Connected(peripheral) => {
                info!("Disconnecting from {}", peripheral.id());
                let disconnect = async { Ok::<_, AdapterError>(peripheral.disconnect().await?) };
                if let Err(e) = with_timeout("disconnect", self.config.connect_timeout(), disconnect).await {
                    warn!("Disconnect during teardown failed: {}", e);
                }
            }
            Connection::Disconnected => {}
        }
        self.discovered.clear();

        self.status.send_replace(AdapterStatus {
            destroyed: true,
            ..AdapterStatus::default()
        });
        info!("Adapter destroyed.");
    }
}

async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Option<Duration>,
    future: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match limit {
        None => future.await,
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| AdapterError::Timeout { operation, timeout })?,
    }
}

/// Cloneable front door to a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    inbox: mpsc::Sender<Job>,
    status: watch::Receiver<AdapterStatus>,
    shutdown: CancellationToken,
}

impl DispatcherHandle {
    /// Queues a batch; one [`Response`] per operation arrives on the returned
    /// channel, in execution order, and the channel closes after the last.
    pub async fn submit(
        &self,
        operations: Vec<Operation>,
    ) -> Result<mpsc::UnboundedReceiver<Response>, AdapterError> {
        if self.shutdown.is_cancelled() {
            return Err(AdapterError::Shutdown);
        }
        let (replies, responses) = mpsc::unbounded_channel();
        self.inbox
            .send(Job { operations, replies })
            .await
            .map_err(|_| AdapterError::Shutdown)?;
        Ok(responses)
    }

    /// Queues every operation named by `request`.
    pub async fn dispatch(
        &self,
        request: OperationRequest,
    ) -> Result<mpsc::UnboundedReceiver<Response>, AdapterError> {
        self.submit(request.into_operations()).await
    }

    /// Runs a single operation and waits for its result.
    pub async fn execute(&self, operation: Operation) -> OperationResult {
        let mut responses = self.submit(vec![operation]).await?;
        match responses.recv().await {
            Some(response) => response.result,
            None => Err(AdapterError::Shutdown),
        }
    }

    /// Runs every operation named by `request` and collects the responses.
    pub async fn handle(&self, request: OperationRequest) -> Result<Vec<Response>, AdapterError> {
        let mut responses = self.dispatch(request).await?;
        let mut collected = Vec::new();
        while let Some(response) = responses.recv().await {
            collected.push(response);
        }
        Ok(collected)
    }

    /// Calls `on_complete` once per requested operation as each finishes.
    pub async fn on_message<F>(&self, request: OperationRequest, mut on_complete: F) -> Result<(), AdapterError>
    where
        F: FnMut(Response),
    {
        let mut responses = self.dispatch(request).await?;
        while let Some(response) = responses.recv().await {
            on_complete(response);
        }
        Ok(())
    }

    pub fn status(&self) -> AdapterStatus {
        self.status.borrow().clone()
    }

    /// Watch channel updated on every state transition
    pub fn subscribe(&self) -> watch::Receiver<AdapterStatus> {
        self.status.clone()
    }

    /// Cancels in-flight work, fails queued work, disconnects the active
    /// peripheral and waits for the dispatcher to finish. Idempotent.
    pub async fn destroy(&self) {
        info!("Destroy requested.");
        self.shutdown.cancel();
        let mut status = self.status.clone();
        // An error means the dispatcher task is already gone.
        let _ = status.wait_for(|status| status.destroyed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::memory::{MemoryPeripheral, MemoryRadio};
    use tokio::time::Instant;

    const DEVICE_INFO: &str = "180A";
    const MANUFACTURER: &str = "2A29";

    fn thermometer(id: &str) -> MemoryPeripheral {
        MemoryPeripheral::new(id)
            .with_name("Thermometer")
            .advertising([DEVICE_INFO])
            .advertise_after(Duration::from_millis(100))
            .with_service(DEVICE_INFO, [(MANUFACTURER, b"acme".to_vec())])
    }

    fn spawn(radio: &MemoryRadio, config: AdapterConfig) -> DispatcherHandle {
        Dispatcher::spawn(radio.clone(), config).unwrap()
    }

    async fn scan(handle: &DispatcherHandle) {
        handle
            .execute(Operation::scan(&[], Duration::from_millis(500)))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_uses_the_discovered_set() {
        let radio = MemoryRadio::new();
        let device = thermometer("dev-1");
        radio.add_peripheral(device.clone());
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        let result = handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await;

        assert_eq!(result.unwrap(), OperationOutput::Connected { uuid: "dev-1".into() });
        assert_eq!(radio.scans_started(), 1);
        assert!(device.is_connected());
        assert_eq!(handle.status().connection.connected_uuid(), Some("dev-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_scans_when_nothing_was_discovered() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1"));
        let handle = spawn(&radio, AdapterConfig::default());

        let started = Instant::now();
        let result = handle
            .execute(Operation::Connect(ConnectRequest {
                uuid: "dev-1".into(),
                service_uuid: DEVICE_INFO.into(),
                timeout: Some(800),
            }))
            .await;

        assert!(result.is_ok());
        assert_eq!(radio.scans_started(), 1);
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert_eq!(handle.status().discovered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_peripheral_is_an_explicit_error() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1"));
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        let known_set = handle.execute(Operation::connect("ghost", DEVICE_INFO)).await;
        assert!(matches!(known_set, Err(AdapterError::PeripheralNotFound(ref id)) if id == "ghost"));

        radio.clear_peripherals();
        scan(&handle).await;
        let fresh_scan = handle.execute(Operation::connect("ghost", DEVICE_INFO)).await;
        assert!(matches!(fresh_scan, Err(AdapterError::PeripheralNotFound(_))));
        assert_eq!(handle.status().connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_fails_connect_and_releases_the_link() {
        let radio = MemoryRadio::new();
        let device = thermometer("dev-1");
        radio.add_peripheral(device.clone());
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        let result = handle.execute(Operation::connect("dev-1", "180F")).await;

        assert!(matches!(result, Err(AdapterError::ServiceNotFound(ref s)) if s == "180F"));
        assert!(!device.is_connected());
        assert_eq!(handle.status().connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_passes_the_cause_through() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1").refuse_connections("connection rejected by peer"));
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        let err = handle
            .execute(Operation::connect("dev-1", DEVICE_INFO))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "connection rejected by peer");
    }

    #[tokio::test(start_paused = true)]
    async fn replace_policy_disconnects_the_previous_peripheral() {
        let radio = MemoryRadio::new();
        let first = thermometer("dev-1");
        let second = thermometer("dev-2");
        radio.add_peripheral(first.clone());
        radio.add_peripheral(second.clone());
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();
        handle.execute(Operation::connect("dev-2", DEVICE_INFO)).await.unwrap();

        assert!(!first.is_connected());
        assert_eq!(first.disconnect_count(), 1);
        assert!(second.is_connected());
        assert_eq!(handle.status().connection.connected_uuid(), Some("dev-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn reject_policy_keeps_the_active_peripheral() {
        let radio = MemoryRadio::new();
        let first = thermometer("dev-1");
        radio.add_peripheral(first.clone());
        radio.add_peripheral(thermometer("dev-2"));
        let config = AdapterConfig {
            connect_policy: ConnectPolicy::Reject,
            ..Default::default()
        };
        let handle = spawn(&radio, config);

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();
        let result = handle.execute(Operation::connect("dev-2", DEVICE_INFO)).await;

        assert!(matches!(result, Err(AdapterError::AlreadyConnected(ref id)) if id == "dev-1"));
        assert!(first.is_connected());

        // Reconnecting to the active peripheral is always allowed.
        let again = handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await;
        assert!(again.is_ok());
        assert_eq!(first.disconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_keeps_the_working_link() {
        let radio = MemoryRadio::new();
        let device = thermometer("dev-1");
        radio.add_peripheral(device.clone());
        let config = AdapterConfig {
            connect_policy: ConnectPolicy::Reject,
            ..Default::default()
        };
        let handle = spawn(&radio, config);

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();
        let bad = handle.execute(Operation::connect("dev-1", "180F")).await;

        assert!(matches!(bad, Err(AdapterError::ServiceNotFound(ref uuid)) if uuid == "180F"));
        assert!(device.is_connected());
        assert_eq!(device.disconnect_count(), 0);
        assert_eq!(handle.status().connection.connected_uuid(), Some("dev-1"));

        let value = handle.execute(Operation::read(DEVICE_INFO, MANUFACTURER)).await;
        assert_eq!(value.unwrap(), OperationOutput::Read(b"acme".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn read_resolves_service_then_characteristic() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1"));
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();

        let value = handle.execute(Operation::read(DEVICE_INFO, MANUFACTURER)).await;
        assert_eq!(value.unwrap(), OperationOutput::Read(b"acme".to_vec()));

        let missing = handle.execute(Operation::read(DEVICE_INFO, "2A24")).await;
        assert!(matches!(missing, Err(AdapterError::CharacteristicNotFound(_))));

        let wrong_service = handle.execute(Operation::read("180F", MANUFACTURER)).await;
        assert!(matches!(wrong_service, Err(AdapterError::ServiceNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn write_mode_follows_config_unless_overridden() {
        let radio = MemoryRadio::new();
        let device = thermometer("dev-1");
        radio.add_peripheral(device.clone());
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();

        handle
            .execute(Operation::write(DEVICE_INFO, MANUFACTURER, vec![1]))
            .await
            .unwrap();
        assert_eq!(device.last_write_without_response(), Some(true));

        let acknowledged = Operation::Write(WriteRequest {
            characteristic_uuid: MANUFACTURER.into(),
            service_uuid: DEVICE_INFO.into(),
            value: vec![2],
            without_response: Some(false),
        });
        handle.execute(acknowledged).await.unwrap();
        assert_eq!(device.last_write_without_response(), Some(false));
        assert_eq!(device.value(DEVICE_INFO, MANUFACTURER), Some(vec![2]));
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_is_enforced_when_configured() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1").with_latency(Duration::from_millis(400)));
        let config = AdapterConfig {
            read_timeout_ms: Some(500),
            ..Default::default()
        };
        let handle = spawn(&radio, config);

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();

        // Service discovery, characteristic discovery and the read each take 400ms.
        let result = handle.execute(Operation::read(DEVICE_INFO, MANUFACTURER)).await;
        assert!(matches!(
            result,
            Err(AdapterError::Timeout { operation: "read", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_reverts_to_disconnected() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1").with_latency(Duration::from_secs(30)));
        let config = AdapterConfig {
            connect_timeout_ms: Some(1000),
            ..Default::default()
        };
        let handle = spawn(&radio, config);

        scan(&handle).await;
        let started = Instant::now();
        let result = handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await;

        assert!(matches!(result, Err(AdapterError::Timeout { operation: "connect", .. })));
        assert_eq!(handle.status().connection, ConnectionStatus::Disconnected);
        // The cleanup disconnect is bounded by the same limit as the connect.
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_state_is_observable() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1").with_latency(Duration::from_millis(300)));
        let handle = spawn(&radio, AdapterConfig::default());
        scan(&handle).await;

        let mut status = handle.subscribe();
        let responses = handle
            .submit(vec![Operation::connect("dev-1", DEVICE_INFO)])
            .await
            .unwrap();

        let seen = status
            .wait_for(|s| matches!(s.connection, ConnectionStatus::Connecting { .. }))
            .await
            .map(|s| s.connection.clone())
            .unwrap();
        assert_eq!(seen, ConnectionStatus::Connecting { uuid: "dev-1".into() });

        drop(responses);
        status
            .wait_for(|s| s.connection.connected_uuid() == Some("dev-1"))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batch_runs_in_fixed_order_with_one_response_each() {
        let radio = MemoryRadio::new();
        radio.add_peripheral(thermometer("dev-1"));
        let handle = spawn(&radio, AdapterConfig::default());

        let request = OperationRequest::from_json(
            r#"{
                "read": {"serviceUuid":"180A","characteristicUuid":"2A29"},
                "write": {"serviceUuid":"180A","characteristicUuid":"2A29","value":[42]},
                "connect": {"uuid":"dev-1","serviceUuid":"180A"},
                "scan": {"serviceUuids":"180A","timeout":500}
            }"#,
        )
        .unwrap();
        let responses = handle.handle(request).await.unwrap();

        let kinds: Vec<_> = responses.iter().map(|r| r.operation.as_str()).collect();
        assert_eq!(kinds, ["scan", "connect", "read", "write"]);
        assert!(responses.iter().all(|r| r.result.is_ok()));
        assert_eq!(responses[2].result.as_ref().unwrap(), &OperationOutput::Read(b"acme".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn radio_failure_surfaces_on_scan() {
        let radio = MemoryRadio::new();
        radio.set_powered(false);
        let handle = spawn(&radio, AdapterConfig::default());

        let started = Instant::now();
        let result = handle.execute(Operation::scan(&[], Duration::from_secs(5))).await;

        assert!(matches!(result, Err(AdapterError::RadioUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_cancels_queued_work_and_disconnects() {
        let radio = MemoryRadio::new();
        let device = thermometer("dev-1");
        radio.add_peripheral(device.clone());
        let handle = spawn(&radio, AdapterConfig::default());

        scan(&handle).await;
        handle.execute(Operation::connect("dev-1", DEVICE_INFO)).await.unwrap();

        let mut long_scan = handle
            .submit(vec![Operation::scan(&[], Duration::from_secs(60))])
            .await
            .unwrap();
        let mut queued = handle
            .submit(vec![Operation::read(DEVICE_INFO, MANUFACTURER)])
            .await
            .unwrap();

        handle.destroy().await;

        assert!(matches!(long_scan.recv().await.unwrap().result, Err(AdapterError::Shutdown)));
        assert!(matches!(queued.recv().await.unwrap().result, Err(AdapterError::Shutdown)));
        assert!(!device.is_connected());

        let status = handle.status();
        assert!(status.destroyed);
        assert_eq!(status.connection, ConnectionStatus::Disconnected);
        assert_eq!(status.discovered, 0);

        let after = handle.execute(Operation::read(DEVICE_INFO, MANUFACTURER)).await;
        assert!(matches!(after, Err(AdapterError::Shutdown)));

        // Destroying twice is harmless.
        handle.destroy().await;
    }

    #[test]
    fn invalid_config_is_rejected_at_spawn() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = runtime.enter();
        let config = AdapterConfig {
            inbox_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            Dispatcher::spawn(MemoryRadio::new(), config),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
