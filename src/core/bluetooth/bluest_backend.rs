//! Desktop central radio on top of bluest
//! bluest exposes awaitable operations and streams rather than callbacks, so
//! each request runs on its own task and reports its outcome to the event sink
//! the way a platform callback would.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::constants::UUID_CLIENT_CONFIG_DESCRIPTOR;
use super::error::RadioError;
use super::notification::CharacteristicCallback;
use super::profile::{DiscoveredCharacteristic, DiscoveredService};
use super::radio::{
    CentralEvent, CentralEventSink, CentralRadio, GattClient, GattStatus, LinkState, ScanFailure,
    ScanFilter,
};
use super::types::DeviceAddress;

static MAC_IN_DEVICE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC address pattern")
});

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejected(e: bluest::Error) -> RadioError {
    RadioError::Rejected(e.to_string())
}

/// Uses the MAC address embedded in the platform device id when there is one
fn address_of(device: &Device) -> DeviceAddress {
    let id = device.id().to_string();
    MAC_IN_DEVICE_ID
        .find_iter(&id)
        .last()
        .map(|m| DeviceAddress::new(m.as_str().to_uppercase()))
        .unwrap_or_else(|| DeviceAddress::new(id))
}

#[derive(Default)]
struct BluestState {
    adapter: Option<Adapter>,
    sink: Option<CentralEventSink>,
    devices: HashMap<DeviceAddress, Device>,
    scan: Option<CancellationToken>,
}

/// Central radio backed by the host Bluetooth stack
#[derive(Clone, Default)]
pub struct BluestCentralRadio {
    state: Arc<Mutex<BluestState>>,
}

impl BluestCentralRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn adapter_and_sink(&self) -> Result<(Adapter, CentralEventSink), RadioError> {
        let state = lock(&self.state);
        match (&state.adapter, &state.sink) {
            (Some(adapter), Some(sink)) => Ok((adapter.clone(), sink.clone())),
            _ => Err(RadioError::AdapterUnavailable),
        }
    }
}

#[async_trait]
impl CentralRadio for BluestCentralRadio {
    async fn init(&self, events: CentralEventSink) -> Result<(), RadioError> {
        let adapter = Adapter::default()
            .await
            .ok_or(RadioError::AdapterUnavailable)?;
        adapter.wait_available().await.map_err(rejected)?;
        info!("Bluetooth adapter is available.");

        let mut state = lock(&self.state);
        state.adapter = Some(adapter);
        state.sink = Some(events);
        Ok(())
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<(), RadioError> {
        let (adapter, sink) = self.adapter_and_sink()?;
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.state).scan.replace(cancel.clone()) {
            previous.cancel();
        }
        let state = self.state.clone();

        tokio::spawn(async move {
            let services = [filter.service_uuid];
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start bluetooth scan: {}", e);
                    sink.deliver(CentralEvent::ScanFailed(ScanFailure::InternalError));
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = scan_stream.next() => match result {
                        Some(discovered) => {
                            let device = discovered.device;
                            let address = address_of(&device);
                            let name = discovered
                                .adv_data
                                .local_name
                                .or_else(|| device.name().ok());
                            debug!(
                                "Found device {} ({:?}), RSSI: {:?}",
                                address, name, discovered.rssi
                            );

                            lock(&state).devices.insert(address.clone(), device);
                            sink.deliver(CentralEvent::ScanResult { address, name });
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        if let Some(scan) = lock(&self.state).scan.take() {
            scan.cancel();
        }
        Ok(())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattClient>, RadioError> {
        let (adapter, sink) = self.adapter_and_sink()?;
        let device = lock(&self.state)
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| RadioError::InvalidAddress(address.to_string()))?;

        let link_adapter = adapter.clone();
        let link_device = device.clone();
        let link_sink = sink.clone();
        let link_address = address.clone();
        tokio::spawn(async move {
            let (status, state) = if link_device.is_connected().await {
                (GattStatus::SUCCESS, LinkState::Connected)
            } else {
                match link_adapter.connect_device(&link_device).await {
                    Ok(()) => (GattStatus::SUCCESS, LinkState::Connected),
                    Err(e) => {
                        error!("Failed to connect to {}: {}", link_address, e);
                        (GattStatus::FAILURE, LinkState::Disconnected)
                    }
                }
            };
            link_sink.deliver(CentralEvent::ConnectionStateChanged {
                address: link_address,
                status,
                state,
            });
        });

        Ok(Box::new(BluestGattClient {
            address: address.clone(),
            adapter,
            device,
            sink,
            notifications: Mutex::new(None),
        }))
    }

    async fn shutdown(&self) {
        let mut state = lock(&self.state);
        if let Some(scan) = state.scan.take() {
            scan.cancel();
        }
        state.devices.clear();
        state.sink = None;
        state.adapter = None;
    }
}

struct BluestGattClient {
    address: DeviceAddress,
    adapter: Adapter,
    device: Device,
    sink: CentralEventSink,
    notifications: Mutex<Option<CancellationToken>>,
}

impl BluestGattClient {
    async fn find_characteristic(
        device: &Device,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, RadioError> {
        let services = device.services().await.map_err(rejected)?;
        let service = services
            .iter()
            .find(|s| s.uuid() == service)
            .ok_or_else(|| RadioError::Rejected(format!("service {service} not found")))?;
        service
            .characteristics()
            .await
            .map_err(rejected)?
            .into_iter()
            .find(|c| c.uuid() == characteristic)
            .ok_or_else(|| {
                RadioError::Rejected(format!("characteristic {characteristic} not found"))
            })
    }

    async fn describe(device: &Device) -> Result<Vec<DiscoveredService>, bluest::Error> {
        let mut discovered = Vec::new();
        for service in device.discover_services().await? {
            let mut characteristics = Vec::new();
            for characteristic in service.characteristics().await? {
                let descriptors = characteristic
                    .descriptors()
                    .await?
                    .iter()
                    .map(|descriptor| descriptor.uuid())
                    .collect();
                characteristics.push(DiscoveredCharacteristic {
                    uuid: characteristic.uuid(),
                    descriptors,
                });
            }
            discovered.push(DiscoveredService {
                uuid: service.uuid(),
                characteristics,
            });
        }
        Ok(discovered)
    }
}

#[async_trait]
impl GattClient for BluestGattClient {
    async fn discover_services(&self) -> Result<(), RadioError> {
        let device = self.device.clone();
        let sink = self.sink.clone();
        let address = self.address.clone();
        tokio::spawn(async move {
            let (status, services) = match Self::describe(&device).await {
                Ok(services) => (GattStatus::SUCCESS, services),
                Err(e) => {
                    error!("Error discovering services on {}: {}", address, e);
                    (GattStatus::FAILURE, Vec::new())
                }
            };
            sink.deliver(CentralEvent::ServicesDiscovered {
                address,
                status,
                services,
            });
        });
        Ok(())
    }

    async fn set_characteristic_notification(
        &self,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), RadioError> {
        let previous = lock(&self.notifications).take();
        if let Some(previous) = previous {
            previous.cancel();
        }
        if !enable {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *lock(&self.notifications) = Some(cancel.clone());
        let device = self.device.clone();
        let sink = self.sink.clone();
        let address = self.address.clone();

        tokio::spawn(async move {
            let found = Self::find_characteristic(&device, service, characteristic).await;
            let notify_char = match found {
                Ok(found) => found,
                Err(e) => {
                    error!("Failed to subscribe to notifications on {}: {}", address, e);
                    return;
                }
            };
            let mut notification_stream = match notify_char.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to notifications on {}: {}", address, e);
                    return;
                }
            };
            info!("Listening for notifications from {}...", address);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = notification_stream.next() => match result {
                        Some(Ok(value)) => {
                            sink.deliver(CentralEvent::CharacteristicChanged {
                                address: address.clone(),
                                callback: CharacteristicCallback::Value { characteristic, value },
                            });
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            info!("Notification stream from {} ended", address);
        });
        Ok(())
    }

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let device = self.device.clone();
        let sink = self.sink.clone();
        let address = self.address.clone();
        let value = value.to_vec();

        tokio::spawn(async move {
            // The host stack writes the config descriptor itself when a notify
            // stream opens or closes.
            let status = if descriptor == UUID_CLIENT_CONFIG_DESCRIPTOR {
                GattStatus::SUCCESS
            } else {
                let written = async {
                    let owner = Self::find_characteristic(&device, service, characteristic).await?;
                    let target = owner
                        .descriptors()
                        .await
                        .map_err(rejected)?
                        .into_iter()
                        .find(|d| d.uuid() == descriptor)
                        .ok_or_else(|| {
                            RadioError::Rejected(format!("descriptor {descriptor} not found"))
                        })?;
                    target.write(&value).await.map_err(rejected)
                }
                .await;
                match written {
                    Ok(()) => GattStatus::SUCCESS,
                    Err(e) => {
                        warn!("Descriptor {} write on {} failed: {}", descriptor, address, e);
                        GattStatus::FAILURE
                    }
                }
            };
            sink.deliver(CentralEvent::DescriptorWritten {
                address,
                descriptor,
                status,
            });
        });
        Ok(())
    }

    async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        let device = self.device.clone();
        let sink = self.sink.clone();
        let address = self.address.clone();

        tokio::spawn(async move {
            let read = match Self::find_characteristic(&device, service, characteristic).await {
                Ok(found) => found.read().await.map_err(rejected),
                Err(e) => Err(e),
            };
            let (status, value) = match read {
                Ok(value) => (GattStatus::SUCCESS, value),
                Err(e) => {
                    error!("Failed to read {} from {}: {}", characteristic, address, e);
                    (GattStatus::FAILURE, Vec::new())
                }
            };
            sink.deliver(CentralEvent::CharacteristicRead {
                address,
                status,
                callback: CharacteristicCallback::Value {
                    characteristic,
                    value,
                },
            });
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        let adapter = self.adapter.clone();
        let device = self.device.clone();
        let sink = self.sink.clone();
        let address = self.address.clone();

        tokio::spawn(async move {
            if device.is_connected().await {
                info!("Disconnecting from device {}", address);
                if let Err(e) = adapter.disconnect_device(&device).await {
                    warn!("Platform disconnect of {} failed: {}", address, e);
                }
            }
            sink.deliver(CentralEvent::ConnectionStateChanged {
                address,
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            });
        });
        Ok(())
    }

    fn close(&self) {
        if let Some(notifications) = lock(&self.notifications).take() {
            notifications.cancel();
        }
    }
}
