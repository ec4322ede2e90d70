//! GATT server for the peripheral role
//! Publishes the playground service, answers read and descriptor requests,
//! tracks which centrals subscribed and pushes value updates to them. Like the
//! central role, all work happens on one driver task.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::constants::{DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};
use super::error::{BleError, Stage};
use super::permission::{RadioOperation, RadioPermissionGate};
use super::profile::TargetProfile;
use super::radio::{
    AdvertiseData, AdvertiseSettings, GattStatus, LinkState, PeripheralRadio, ServerEvent,
    ServerEventSink,
};
use super::types::{AdvertisingState, DeviceAddress, SubscribedCentral};
use crate::config::peripheral_config::PeripheralConfig;
use crate::core::store::{Observer, Store};

/// Centrals with notifications enabled, keyed by address
pub type SubscriberSet = BTreeMap<DeviceAddress, SubscribedCentral>;

type Reply = oneshot::Sender<Result<(), BleError>>;

pub(crate) enum ServerCommand {
    StartAdvertising(Reply),
    StopAdvertising(Reply),
    UpdateData(String, Reply),
    Settle(oneshot::Sender<()>),
}

/// Everything the server driver reacts to
pub(crate) enum ServerMessage {
    Command(ServerCommand),
    Radio(ServerEvent),
}

/// Peripheral role: advertiser plus GATT server
pub struct PeripheralServer {
    inbox: mpsc::UnboundedSender<ServerMessage>,
    advertising: Arc<Store<AdvertisingState>>,
    subscribers: Arc<Store<SubscriberSet>>,
    value: Arc<Store<String>>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PeripheralServer {
    pub async fn start(
        radio: Arc<dyn PeripheralRadio>,
        gate: RadioPermissionGate,
        config: &PeripheralConfig,
    ) -> Result<Self, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        radio
            .init(ServerEventSink::new(tx.clone()))
            .await
            .map_err(|e| {
                error!("Failed to initialize the peripheral radio: {}", e);
                BleError::failed(Stage::Initialize, e)
            })?;
        info!("Peripheral radio is available.");

        let profile = TargetProfile::default();
        let advertising = Arc::new(Store::new(AdvertisingState::NotAdvertising));
        let subscribers = Arc::new(Store::new(SubscriberSet::new()));
        let value = Arc::new(Store::new(config.initial_value.clone()));

        let driver = ServerDriver {
            radio,
            gate,
            profile,
            settings: AdvertiseSettings {
                low_latency: true,
                high_tx_power: true,
                connectable: true,
            },
            data: AdvertiseData {
                include_device_name: config.include_device_name,
                include_tx_power_level: false,
                service_uuids: vec![profile.service],
            },
            advertising: advertising.clone(),
            subscribers: subscribers.clone(),
            value: value.clone(),
            server_open: false,
            start_pending: false,
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(driver.run(rx, shutdown.clone()));

        Ok(Self {
            inbox: tx,
            advertising,
            subscribers,
            value,
            shutdown,
            driver: Mutex::new(Some(handle)),
        })
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        *self.advertising.snapshot()
    }

    pub fn observe_advertising(&self) -> Observer<AdvertisingState> {
        self.advertising.observe()
    }

    pub fn subscribers(&self) -> Arc<SubscriberSet> {
        self.subscribers.snapshot()
    }

    pub fn observe_subscribers(&self) -> Observer<SubscriberSet> {
        self.subscribers.observe()
    }

    /// Value served to read requests and pushed to subscribers
    pub fn current_value(&self) -> String {
        self.value.snapshot().as_ref().clone()
    }

    /// Opens the GATT server (first call only) and issues the advertising
    /// request. The advertising state flips once the radio confirms.
    pub async fn start_advertising(&self) -> Result<(), BleError> {
        self.request(ServerCommand::StartAdvertising).await
    }

    pub async fn stop_advertising(&self) -> Result<(), BleError> {
        self.request(ServerCommand::StopAdvertising).await
    }

    /// Replaces the served value and notifies every subscriber
    pub async fn update_data(&self, value: impl Into<String>) -> Result<(), BleError> {
        let value = value.into();
        self.request(|reply| ServerCommand::UpdateData(value, reply))
            .await
    }

    /// Waits until the driver has handled everything queued so far
    pub async fn settle(&self) -> Result<(), BleError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ServerMessage::Command(ServerCommand::Settle(tx)))
            .map_err(|_| BleError::Closed)?;
        rx.await.map_err(|_| BleError::Closed)
    }

    /// Stops advertising, closes the GATT server and releases the radio
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = match self.driver.lock() {
            Ok(mut driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Server driver ended abnormally: {}", e);
            }
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> ServerCommand,
    ) -> Result<(), BleError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ServerMessage::Command(command(tx)))
            .map_err(|_| BleError::Closed)?;
        rx.await.map_err(|_| BleError::Closed)?
    }
}

impl Drop for PeripheralServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct ServerDriver {
    radio: Arc<dyn PeripheralRadio>,
    gate: RadioPermissionGate,
    profile: TargetProfile,
    settings: AdvertiseSettings,
    data: AdvertiseData,
    advertising: Arc<Store<AdvertisingState>>,
    subscribers: Arc<Store<SubscriberSet>>,
    value: Arc<Store<String>>,
    server_open: bool,
    /// A start request is out and the radio has not answered yet
    start_pending: bool,
}

impl ServerDriver {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(ServerMessage::Command(command)) => self.handle_command(command).await,
                    Some(ServerMessage::Radio(event)) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        info!("Server driver shutting down.");
        if self.start_pending || *self.advertising.snapshot() == AdvertisingState::Advertising {
            if let Err(e) = self.radio.stop_advertising().await {
                warn!("Failed to stop advertising during shutdown: {}", e);
            }
            self.start_pending = false;
            self.advertising.replace(AdvertisingState::NotAdvertising);
        }
        if self.server_open {
            self.radio.close_gatt_server().await;
            self.server_open = false;
        }
        self.subscribers.replace(SubscriberSet::new());
        self.radio.shutdown().await;
    }

    async fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::StartAdvertising(reply) => {
                let result = self.start_advertising().await;
                let _ = reply.send(result);
            }
            ServerCommand::StopAdvertising(reply) => {
                let result = self.stop_advertising().await;
                let _ = reply.send(result);
            }
            ServerCommand::UpdateData(value, reply) => {
                let result = self.update_data(value).await;
                let _ = reply.send(result);
            }
            ServerCommand::Settle(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn start_advertising(&mut self) -> Result<(), BleError> {
        self.gate.require(RadioOperation::Advertise)?;

        if self.start_pending || *self.advertising.snapshot() == AdvertisingState::Advertising {
            info!("Advertising already started, keeping the current advertisement.");
            return Ok(());
        }

        if !self.server_open {
            self.radio
                .open_gatt_server(&self.profile.service_definition())
                .await
                .map_err(|e| {
                    error!("Failed to open GATT server: {}", e);
                    BleError::failed(Stage::Advertise, e)
                })?;
            self.server_open = true;
            info!("GATT server open with service {}", self.profile.service);
        }

        self.radio
            .start_advertising(&self.settings, &self.data)
            .await
            .map_err(|e| {
                error!("Failed to start advertising: {}", e);
                BleError::failed(Stage::Advertise, e)
            })?;
        self.start_pending = true;
        debug!("Advertising requested for service {}", self.profile.service);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BleError> {
        self.gate.require(RadioOperation::Advertise)?;

        self.radio.stop_advertising().await.map_err(|e| {
            error!("Failed to stop advertising: {}", e);
            BleError::failed(Stage::Advertise, e)
        })?;
        self.start_pending = false;
        self.advertising.replace(AdvertisingState::NotAdvertising);
        info!("Advertising stopped");
        Ok(())
    }

    async fn update_data(&mut self, value: String) -> Result<(), BleError> {
        self.gate.require(RadioOperation::Advertise)?;

        let payload = value.clone().into_bytes();
        self.value.replace(value);

        let subscribers = self.subscribers.snapshot();
        for address in subscribers.keys() {
            if let Err(e) = self
                .radio
                .notify_characteristic_changed(
                    address,
                    self.profile.characteristic,
                    &payload,
                    false,
                )
                .await
            {
                warn!("Failed to notify {}: {}", address, e);
            }
        }
        debug!("Value updated, notified {} subscriber(s)", subscribers.len());
        Ok(())
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AdvertiseStarted => {
                if !self.start_pending {
                    debug!("Ignoring advertise confirmation without a pending start");
                    return;
                }
                self.start_pending = false;
                info!("Advertising started successfully");
                self.advertising.replace(AdvertisingState::Advertising);
            }
            ServerEvent::AdvertiseFailed(code) => {
                if !self.start_pending {
                    debug!("Ignoring advertise failure {} without a pending start", code);
                    return;
                }
                self.start_pending = false;
                error!("Advertising failed with error code {}", code);
            }
            ServerEvent::ConnectionStateChanged {
                device,
                status,
                state,
            } => {
                if status.is_success() && state == LinkState::Connected {
                    info!("Connected to {}", device);
                } else {
                    self.subscribers.update(|subscribers| {
                        subscribers.remove(&device);
                    });
                    info!("Disconnected from {}", device);
                }
            }
            ServerEvent::CharacteristicReadRequest {
                device,
                request_id,
                offset,
                characteristic,
            } => {
                debug!(
                    "Characteristic {} read request from {} at offset {}",
                    characteristic, device, offset
                );
                let payload = self.value.snapshot().as_bytes().to_vec();
                self.respond(&device, request_id, GattStatus::SUCCESS, Some(payload.as_slice()))
                    .await;
            }
            ServerEvent::CharacteristicWriteRequest {
                device,
                request_id,
                characteristic,
                response_needed,
                value,
                ..
            } => {
                info!(
                    "Characteristic {} write request from {} ({} bytes) ignored",
                    characteristic,
                    device,
                    value.len()
                );
                if response_needed {
                    self.respond(&device, request_id, GattStatus::FAILURE, None)
                        .await;
                }
            }
            ServerEvent::DescriptorWriteRequest {
                device,
                request_id,
                descriptor,
                response_needed,
                value,
                ..
            } => {
                let status = self.write_descriptor(&device, descriptor, &value);
                if response_needed {
                    self.respond(&device, request_id, status, None).await;
                }
            }
            ServerEvent::DescriptorReadRequest {
                device,
                request_id,
                descriptor,
                ..
            } => {
                if descriptor == self.profile.descriptor {
                    debug!("Config descriptor read by {}", device);
                    let value = if self.subscribers.snapshot().contains_key(&device) {
                        ENABLE_NOTIFICATION_VALUE
                    } else {
                        DISABLE_NOTIFICATION_VALUE
                    };
                    self.respond(&device, request_id, GattStatus::SUCCESS, Some(value.as_slice()))
                        .await;
                } else {
                    warn!("Unknown descriptor {} read request from {}", descriptor, device);
                    self.respond(&device, request_id, GattStatus::FAILURE, None)
                        .await;
                }
            }
            ServerEvent::NotificationSent { device, status } => {
                if status.is_success() {
                    debug!("Notification sent to {}", device);
                } else {
                    warn!("Notification to {} failed with status {:#06x}", device, status.0);
                }
            }
        }
    }

    /// Applies a descriptor write and returns the status to answer with
    fn write_descriptor(
        &self,
        device: &DeviceAddress,
        descriptor: Uuid,
        value: &[u8],
    ) -> GattStatus {
        if descriptor != self.profile.descriptor {
            warn!("Unknown descriptor {} write request from {}", descriptor, device);
            return GattStatus::FAILURE;
        }

        if value == ENABLE_NOTIFICATION_VALUE {
            info!("Subscribe {} to notifications", device);
            self.subscribers.update(|subscribers| {
                subscribers.insert(
                    device.clone(),
                    SubscribedCentral {
                        address: device.clone(),
                        notifications_enabled: true,
                    },
                );
            });
        } else if value == DISABLE_NOTIFICATION_VALUE {
            info!("Unsubscribe {} from notifications", device);
            self.subscribers.update(|subscribers| {
                subscribers.remove(device);
            });
        } else {
            debug!("Ignoring config descriptor value {:?} from {}", value, device);
        }
        GattStatus::SUCCESS
    }

    async fn respond(
        &self,
        device: &DeviceAddress,
        request_id: u32,
        status: GattStatus,
        value: Option<&[u8]>,
    ) {
        if let Err(e) = self
            .radio
            .send_response(device, request_id, status, 0, value)
            .await
        {
            warn!("Failed to answer request {} from {}: {}", request_id, device, e);
        }
    }
}
