//! In-memory radios
//! Both simulated radios record every platform call and let the caller inject
//! callbacks. With auto-respond on, the central radio also plays a cooperative
//! peer that serves the playground profile, and the peripheral radio confirms
//! advertising requests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use super::constants::ENABLE_NOTIFICATION_VALUE;
use super::error::RadioError;
use super::notification::CharacteristicCallback;
use super::profile::{DiscoveredService, ServiceDefinition, TargetProfile};
use super::radio::{
    AdvertiseData, AdvertiseSettings, CentralEvent, CentralEventSink, CentralRadio, GattClient,
    GattStatus, LinkState, PeripheralRadio, ScanFilter, ServerEvent, ServerEventSink,
};
use super::types::DeviceAddress;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A platform call made on the simulated central radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCall {
    Init,
    StartScan(ScanFilter),
    StopScan,
    Connect(DeviceAddress),
    DiscoverServices(DeviceAddress),
    SetNotification {
        address: DeviceAddress,
        characteristic: Uuid,
        enable: bool,
    },
    WriteDescriptor {
        address: DeviceAddress,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    ReadCharacteristic {
        address: DeviceAddress,
        characteristic: Uuid,
    },
    Disconnect(DeviceAddress),
    Close(DeviceAddress),
    Shutdown,
}

/// A remote device the simulated central can find
#[derive(Debug, Clone)]
struct SimulatedPeer {
    name: Option<String>,
    services: Vec<DiscoveredService>,
    value: Vec<u8>,
}

#[derive(Default)]
struct CentralInner {
    calls: Mutex<Vec<CentralCall>>,
    sink: Mutex<Option<CentralEventSink>>,
    peers: Mutex<BTreeMap<DeviceAddress, SimulatedPeer>>,
    invalid_addresses: Mutex<HashSet<DeviceAddress>>,
    next_connect_error: Mutex<Option<RadioError>>,
    fail_descriptor_writes: AtomicBool,
    auto_respond: AtomicBool,
}

impl CentralInner {
    fn record(&self, call: CentralCall) {
        debug!("Simulated central call: {:?}", call);
        lock(&self.calls).push(call);
    }

    fn emit(&self, event: CentralEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.deliver(event);
        }
    }

    fn auto(&self) -> bool {
        self.auto_respond.load(Ordering::SeqCst)
    }

    fn peer(&self, address: &DeviceAddress) -> Option<SimulatedPeer> {
        lock(&self.peers).get(address).cloned()
    }
}

/// Simulated central radio
#[derive(Clone, Default)]
pub struct SimulatedCentralRadio {
    inner: Arc<CentralInner>,
}

impl SimulatedCentralRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<CentralCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn count(&self, predicate: impl Fn(&CentralCall) -> bool) -> usize {
        lock(&self.inner.calls).iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    /// Injects a radio callback as if the platform delivered it. Returns false
    /// before `init` or after the driver is gone.
    pub fn deliver(&self, event: CentralEvent) -> bool {
        match lock(&self.inner.sink).as_ref() {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Registers a peer serving the playground profile. In auto-respond mode it
    /// shows up in every scan.
    pub fn add_peer(&self, address: impl Into<DeviceAddress>, name: Option<&str>, value: &str) {
        let services = vec![DiscoveredService::from(
            &TargetProfile::default().service_definition(),
        )];
        self.add_peer_with_services(address, name, services, value);
    }

    pub fn add_peer_with_services(
        &self,
        address: impl Into<DeviceAddress>,
        name: Option<&str>,
        services: Vec<DiscoveredService>,
        value: &str,
    ) {
        lock(&self.inner.peers).insert(
            address.into(),
            SimulatedPeer {
                name: name.map(str::to_string),
                services,
                value: value.as_bytes().to_vec(),
            },
        );
    }

    /// Makes connects to `address` fail as an invalid address
    pub fn reject_address(&self, address: impl Into<DeviceAddress>) {
        lock(&self.inner.invalid_addresses).insert(address.into());
    }

    /// The next connect request fails with `error`
    pub fn fail_next_connect(&self, error: RadioError) {
        *lock(&self.inner.next_connect_error) = Some(error);
    }

    pub fn fail_descriptor_writes(&self, fail: bool) {
        self.inner.fail_descriptor_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_auto_respond(&self, auto: bool) {
        self.inner.auto_respond.store(auto, Ordering::SeqCst);
    }
}

#[async_trait]
impl CentralRadio for SimulatedCentralRadio {
    async fn init(&self, events: CentralEventSink) -> Result<(), RadioError> {
        self.inner.record(CentralCall::Init);
        *lock(&self.inner.sink) = Some(events);
        Ok(())
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<(), RadioError> {
        self.inner.record(CentralCall::StartScan(filter));
        if self.inner.auto() {
            let peers = lock(&self.inner.peers).clone();
            for (address, peer) in peers {
                let advertised = peer
                    .services
                    .iter()
                    .any(|service| service.uuid == filter.service_uuid);
                if advertised {
                    self.inner.emit(CentralEvent::ScanResult {
                        address,
                        name: peer.name,
                    });
                }
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.inner.record(CentralCall::StopScan);
        Ok(())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattClient>, RadioError> {
        self.inner.record(CentralCall::Connect(address.clone()));
        if lock(&self.inner.invalid_addresses).contains(address) {
            return Err(RadioError::InvalidAddress(address.to_string()));
        }
        if let Some(error) = lock(&self.inner.next_connect_error).take() {
            return Err(error);
        }
        if self.inner.auto() && self.inner.peer(address).is_some() {
            self.inner.emit(CentralEvent::ConnectionStateChanged {
                address: address.clone(),
                status: GattStatus::SUCCESS,
                state: LinkState::Connected,
            });
        }
        Ok(Box::new(SimulatedGattClient {
            address: address.clone(),
            radio: self.inner.clone(),
        }))
    }

    async fn shutdown(&self) {
        self.inner.record(CentralCall::Shutdown);
        *lock(&self.inner.sink) = None;
    }
}

struct SimulatedGattClient {
    address: DeviceAddress,
    radio: Arc<CentralInner>,
}

#[async_trait]
impl GattClient for SimulatedGattClient {
    async fn discover_services(&self) -> Result<(), RadioError> {
        self.radio.record(CentralCall::DiscoverServices(self.address.clone()));
        if self.radio.auto() {
            if let Some(peer) = self.radio.peer(&self.address) {
                self.radio.emit(CentralEvent::ServicesDiscovered {
                    address: self.address.clone(),
                    status: GattStatus::SUCCESS,
                    services: peer.services,
                });
            }
        }
        Ok(())
    }

    async fn set_characteristic_notification(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), RadioError> {
        self.radio.record(CentralCall::SetNotification {
            address: self.address.clone(),
            characteristic,
            enable,
        });
        Ok(())
    }

    async fn write_descriptor(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        self.radio.record(CentralCall::WriteDescriptor {
            address: self.address.clone(),
            descriptor,
            value: value.to_vec(),
        });
        if self.radio.fail_descriptor_writes.load(Ordering::SeqCst) {
            return Err(RadioError::Gatt(GattStatus::WRITE_NOT_PERMITTED.0));
        }
        if self.radio.auto() {
            self.radio.emit(CentralEvent::DescriptorWritten {
                address: self.address.clone(),
                descriptor,
                status: GattStatus::SUCCESS,
            });
            if let Some(peer) = self.radio.peer(&self.address) {
                if value == ENABLE_NOTIFICATION_VALUE {
                    self.radio.emit(CentralEvent::CharacteristicChanged {
                        address: self.address.clone(),
                        callback: CharacteristicCallback::Value {
                            characteristic,
                            value: peer.value,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    async fn read_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        self.radio.record(CentralCall::ReadCharacteristic {
            address: self.address.clone(),
            characteristic,
        });
        if self.radio.auto() {
            if let Some(peer) = self.radio.peer(&self.address) {
                self.radio.emit(CentralEvent::CharacteristicRead {
                    address: self.address.clone(),
                    status: GattStatus::SUCCESS,
                    callback: CharacteristicCallback::Legacy {
                        characteristic,
                        value: Some(peer.value),
                    },
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.radio.record(CentralCall::Disconnect(self.address.clone()));
        if self.radio.auto() {
            self.radio.emit(CentralEvent::ConnectionStateChanged {
                address: self.address.clone(),
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            });
        }
        Ok(())
    }

    fn close(&self) {
        self.radio.record(CentralCall::Close(self.address.clone()));
    }
}

/// A platform call made on the simulated peripheral radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCall {
    Init,
    OpenGattServer(ServiceDefinition),
    CloseGattServer,
    StartAdvertising(AdvertiseSettings, AdvertiseData),
    StopAdvertising,
    SendResponse {
        device: DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<Vec<u8>>,
    },
    Notify {
        device: DeviceAddress,
        characteristic: Uuid,
        value: Vec<u8>,
        confirm: bool,
    },
    Shutdown,
}

#[derive(Default)]
struct PeripheralInner {
    calls: Mutex<Vec<PeripheralCall>>,
    sink: Mutex<Option<ServerEventSink>>,
    unreachable: Mutex<HashSet<DeviceAddress>>,
    auto_respond: AtomicBool,
}

impl PeripheralInner {
    fn record(&self, call: PeripheralCall) {
        debug!("Simulated peripheral call: {:?}", call);
        lock(&self.calls).push(call);
    }
}

/// Simulated peripheral radio
#[derive(Clone, Default)]
pub struct SimulatedPeripheralRadio {
    inner: Arc<PeripheralInner>,
}

impl SimulatedPeripheralRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PeripheralCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn count(&self, predicate: impl Fn(&PeripheralCall) -> bool) -> usize {
        lock(&self.inner.calls).iter().filter(|call| predicate(call)).count()
    }

    /// Responses sent so far
    pub fn responses(&self) -> Vec<PeripheralCall> {
        lock(&self.inner.calls)
            .iter()
            .filter(|call| matches!(call, PeripheralCall::SendResponse { .. }))
            .cloned()
            .collect()
    }

    /// Notifications pushed so far
    pub fn notifications(&self) -> Vec<PeripheralCall> {
        lock(&self.inner.calls)
            .iter()
            .filter(|call| matches!(call, PeripheralCall::Notify { .. }))
            .cloned()
            .collect()
    }

    pub fn deliver(&self, event: ServerEvent) -> bool {
        match lock(&self.inner.sink).as_ref() {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    /// Makes notifications to `device` fail
    pub fn make_unreachable(&self, device: impl Into<DeviceAddress>) {
        lock(&self.inner.unreachable).insert(device.into());
    }

    /// Confirms advertising requests right away
    pub fn set_auto_respond(&self, auto: bool) {
        self.inner.auto_respond.store(auto, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeripheralRadio for SimulatedPeripheralRadio {
    async fn init(&self, events: ServerEventSink) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::Init);
        *lock(&self.inner.sink) = Some(events);
        Ok(())
    }

    async fn open_gatt_server(&self, service: &ServiceDefinition) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::OpenGattServer(service.clone()));
        Ok(())
    }

    async fn close_gatt_server(&self) {
        self.inner.record(PeripheralCall::CloseGattServer);
    }

    async fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::StartAdvertising(*settings, data.clone()));
        if self.inner.auto_respond.load(Ordering::SeqCst) {
            self.deliver(ServerEvent::AdvertiseStarted);
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::StopAdvertising);
        Ok(())
    }

    async fn send_response(
        &self,
        device: &DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<&[u8]>,
    ) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::SendResponse {
            device: device.clone(),
            request_id,
            status,
            offset,
            value: value.map(<[u8]>::to_vec),
        });
        Ok(())
    }

    async fn notify_characteristic_changed(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), RadioError> {
        self.inner.record(PeripheralCall::Notify {
            device: device.clone(),
            characteristic,
            value: value.to_vec(),
            confirm,
        });
        if lock(&self.inner.unreachable).contains(device) {
            return Err(RadioError::Rejected(format!("{device} is out of range")));
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.record(PeripheralCall::Shutdown);
        *lock(&self.inner.sink) = None;
    }
}
