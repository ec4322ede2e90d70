//! Bluetooth manager for the central role
//! This module provides the main interface for central operations. Commands and
//! radio callbacks are both queued to a single driver task, which owns the scan
//! session and the GATT session table and applies every transition in arrival
//! order.

use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::central_config::CentralConfig;
use crate::core::bluetooth::connection::{ConnectionManager, SessionTimeouts};
use crate::core::bluetooth::error::{BleError, Stage};
use crate::core::bluetooth::permission::RadioPermissionGate;
use crate::core::bluetooth::profile::TargetProfile;
use crate::core::bluetooth::radio::{
    CentralEvent, CentralEventSink, CentralRadio, GattStatus, ScanFilter,
};
use crate::core::bluetooth::registry::{DeviceRegistry, DeviceSet};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::sensor::{SensorSet, SensorValueStore};
use crate::core::bluetooth::timer::{Deadline, DeadlineScheduler};
use crate::core::bluetooth::types::{Device, DeviceAddress, ScanningState};
use crate::core::store::{Observer, Store};

type Reply = oneshot::Sender<Result<(), BleError>>;

pub(crate) enum CentralCommand {
    StartScan(Reply),
    StopScan(Reply),
    Connect(DeviceAddress, Reply),
    Disconnect(DeviceAddress, Reply),
    ReadValue(DeviceAddress, Reply),
    /// Answered once every message queued before it has been handled
    Settle(oneshot::Sender<()>),
}

/// Everything the central driver reacts to
pub(crate) enum CentralMessage {
    Command(CentralCommand),
    Radio(CentralEvent),
    Deadline(Deadline),
}

impl From<Deadline> for CentralMessage {
    fn from(deadline: Deadline) -> Self {
        CentralMessage::Deadline(deadline)
    }
}

/// Manages the central role: scanning, connecting and sensor subscriptions
pub struct BluetoothManager {
    inbox: mpsc::UnboundedSender<CentralMessage>,
    /// Known remote devices
    registry: DeviceRegistry,
    /// Last values received from connected peripherals
    sensors: SensorValueStore,
    scanning: Arc<Store<ScanningState>>,
    gate: RadioPermissionGate,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl BluetoothManager {
    /// Binds the radio to a fresh driver task and starts it
    pub async fn start(
        radio: Arc<dyn CentralRadio>,
        gate: RadioPermissionGate,
        config: &CentralConfig,
    ) -> Result<Self, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        radio
            .init(CentralEventSink::new(tx.clone()))
            .await
            .map_err(|e| {
                error!("Failed to initialize the central radio: {}", e);
                BleError::failed(Stage::Initialize, e)
            })?;
        info!("Central radio is available.");

        let target = TargetProfile::default();
        let registry = DeviceRegistry::new();
        let sensors = SensorValueStore::new();
        let scanning = Arc::new(Store::new(ScanningState::NotScanning));
        let scheduler = DeadlineScheduler::new(tx.clone());

        let scanner = BluetoothScanner::new(
            scanning.clone(),
            ScanFilter {
                service_uuid: target.service,
            },
            config.scan_period(),
            scheduler.clone(),
        );
        let connections = ConnectionManager::new(
            radio.clone(),
            gate.clone(),
            registry.clone(),
            sensors.clone(),
            target,
            scheduler,
            SessionTimeouts {
                connect: config.connect_timeout(),
                disconnect: config.disconnect_timeout(),
            },
        );

        let driver = CentralDriver {
            radio,
            gate: gate.clone(),
            registry: registry.clone(),
            scanner,
            connections,
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(driver.run(rx, shutdown.clone()));

        Ok(Self {
            inbox: tx,
            registry,
            sensors,
            scanning,
            gate,
            shutdown,
            driver: Mutex::new(Some(handle)),
        })
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn sensors(&self) -> &SensorValueStore {
        &self.sensors
    }

    pub fn permissions(&self) -> &RadioPermissionGate {
        &self.gate
    }

    pub fn devices(&self) -> Vec<Device> {
        self.registry.devices()
    }

    pub fn observe_devices(&self) -> Observer<DeviceSet> {
        self.registry.observe()
    }

    pub fn observe_sensors(&self) -> Observer<SensorSet> {
        self.sensors.observe()
    }

    pub fn scanning_state(&self) -> ScanningState {
        *self.scanning.snapshot()
    }

    pub fn observe_scanning(&self) -> Observer<ScanningState> {
        self.scanning.observe()
    }

    /// Starts a scan for devices advertising the playground service
    pub async fn start_scan(&self) -> Result<(), BleError> {
        self.request(CentralCommand::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), BleError> {
        self.request(CentralCommand::StopScan).await
    }

    /// Issues a connection to a scanned device. Returns once the request is out;
    /// progress shows up on the device stream.
    pub async fn connect(&self, address: &DeviceAddress) -> Result<(), BleError> {
        let address = address.clone();
        self.request(|reply| CentralCommand::Connect(address, reply))
            .await
    }

    pub async fn disconnect(&self, address: &DeviceAddress) -> Result<(), BleError> {
        let address = address.clone();
        self.request(|reply| CentralCommand::Disconnect(address, reply))
            .await
    }

    /// Requests a fresh read of the sensor characteristic from a connected device
    pub async fn read_value(&self, address: &DeviceAddress) -> Result<(), BleError> {
        let address = address.clone();
        self.request(|reply| CentralCommand::ReadValue(address, reply))
            .await
    }

    /// Waits until the driver has handled everything queued so far
    pub async fn settle(&self) -> Result<(), BleError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(CentralMessage::Command(CentralCommand::Settle(tx)))
            .map_err(|_| BleError::Closed)?;
        rx.await.map_err(|_| BleError::Closed)
    }

    /// Stops scanning, releases every session and the radio, then waits for the
    /// driver to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = match self.driver.lock() {
            Ok(mut driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Central driver ended abnormally: {}", e);
            }
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> CentralCommand,
    ) -> Result<(), BleError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(CentralMessage::Command(command(tx)))
            .map_err(|_| BleError::Closed)?;
        rx.await.map_err(|_| BleError::Closed)?
    }
}

impl Drop for BluetoothManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct CentralDriver {
    radio: Arc<dyn CentralRadio>,
    gate: RadioPermissionGate,
    registry: DeviceRegistry,
    scanner: BluetoothScanner,
    connections: ConnectionManager,
}

impl CentralDriver {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<CentralMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
            }
        }

        info!("Central driver shutting down.");
        self.scanner.teardown(&*self.radio).await;
        self.connections.shutdown().await;
        self.radio.shutdown().await;
    }

    async fn handle(&mut self, message: CentralMessage) {
        match message {
            CentralMessage::Command(command) => self.handle_command(command).await,
            CentralMessage::Radio(event) => self.handle_event(event).await,
            CentralMessage::Deadline(Deadline::ScanExpired { generation }) => {
                self.scanner.on_expired(&*self.radio, generation).await
            }
            CentralMessage::Deadline(deadline) => self.connections.on_deadline(deadline).await,
        }
    }

    async fn handle_command(&mut self, command: CentralCommand) {
        match command {
            CentralCommand::StartScan(reply) => {
                let result = self.scanner.start_scan(&*self.radio, &self.gate).await;
                let _ = reply.send(result);
            }
            CentralCommand::StopScan(reply) => {
                let result = self.scanner.stop_scan(&*self.radio, &self.gate).await;
                let _ = reply.send(result);
            }
            CentralCommand::Connect(address, reply) => {
                let result = self.connections.connect(&address).await;
                let _ = reply.send(result);
            }
            CentralCommand::Disconnect(address, reply) => {
                let result = self.connections.disconnect(&address).await;
                let _ = reply.send(result);
            }
            CentralCommand::ReadValue(address, reply) => {
                let result = self.connections.read_value(&address).await;
                let _ = reply.send(result);
            }
            CentralCommand::Settle(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::ScanResult { address, name } => {
                let device = self
                    .registry
                    .merge_scan_result(&address, name.as_deref().unwrap_or_default());
                debug!("Scan result: {} ({:?})", device.address, device.name);
            }
            CentralEvent::ScanFailed(failure) => self.scanner.on_scan_failed(failure),
            CentralEvent::ConnectionStateChanged {
                address,
                status,
                state,
            } => {
                self.connections
                    .on_connection_state_changed(&address, status, state)
                    .await
            }
            CentralEvent::ServicesDiscovered {
                address,
                status,
                services,
            } => {
                self.connections
                    .on_services_discovered(&address, status, &services)
                    .await
            }
            CentralEvent::CharacteristicChanged { address, callback } => {
                self.connections
                    .on_characteristic_value(&address, GattStatus::SUCCESS, callback)
                    .await
            }
            CentralEvent::CharacteristicRead {
                address,
                status,
                callback,
            } => {
                self.connections
                    .on_characteristic_value(&address, status, callback)
                    .await
            }
            CentralEvent::DescriptorWritten {
                address,
                descriptor,
                status,
            } => {
                self.connections
                    .on_descriptor_written(&address, descriptor, status)
                    .await
            }
        }
    }
}
