//! Platform radio seams
//! The central and peripheral roles talk to the radio only through the traits in
//! this module. Requests go out as trait calls; everything the radio reports back
//! arrives as an event pushed into the role's event sink, from whatever thread
//! the platform calls back on.

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::RadioError;
use super::manager::CentralMessage;
use super::notification::CharacteristicCallback;
use super::profile::{DiscoveredService, ServiceDefinition};
use super::server::ServerMessage;
use super::types::DeviceAddress;

/// Status code attached to GATT callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: Self = Self(0x0000);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x0003);
    pub const FAILURE: Self = Self(0x0101);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

/// Link state reported by connection callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Filter applied to a platform scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
}

/// Reasons a platform scan can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    AlreadyStarted,
    ApplicationRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    Other(i32),
}

impl ScanFailure {
    /// Maps a platform scan error code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::AlreadyStarted,
            2 => Self::ApplicationRegistrationFailed,
            3 => Self::InternalError,
            4 => Self::FeatureUnsupported,
            other => Self::Other(other),
        }
    }
}

/// Radio callbacks for the central role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralEvent {
    ScanResult {
        address: DeviceAddress,
        name: Option<String>,
    },
    ScanFailed(ScanFailure),
    ConnectionStateChanged {
        address: DeviceAddress,
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        address: DeviceAddress,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    },
    CharacteristicChanged {
        address: DeviceAddress,
        callback: CharacteristicCallback,
    },
    CharacteristicRead {
        address: DeviceAddress,
        status: GattStatus,
        callback: CharacteristicCallback,
    },
    DescriptorWritten {
        address: DeviceAddress,
        descriptor: Uuid,
        status: GattStatus,
    },
}

/// Where a central radio backend pushes its callbacks. Delivery never blocks.
#[derive(Clone)]
pub struct CentralEventSink {
    tx: mpsc::UnboundedSender<CentralMessage>,
}

impl CentralEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<CentralMessage>) -> Self {
        Self { tx }
    }

    /// Queues `event` for the central driver. Returns false once the driver is gone.
    pub fn deliver(&self, event: CentralEvent) -> bool {
        match self.tx.send(CentralMessage::Radio(event)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Central driver gone, dropping radio event");
                false
            }
        }
    }
}

/// Central-role platform adapter
#[async_trait]
pub trait CentralRadio: Send + Sync + 'static {
    /// Binds the adapter to the sink its callbacks are delivered to
    async fn init(&self, events: CentralEventSink) -> Result<(), RadioError>;

    async fn start_scan(&self, filter: ScanFilter) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Issues a connection request. The returned client is the session handle;
    /// the link comes up later through a connection state event.
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattClient>, RadioError>;

    /// Releases the adapter
    async fn shutdown(&self);
}

/// One GATT client session with a remote device
#[async_trait]
pub trait GattClient: Send + Sync {
    async fn discover_services(&self) -> Result<(), RadioError>;

    /// Turns local delivery of notifications for a characteristic on or off
    async fn set_characteristic_notification(
        &self,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), RadioError>;

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError>;

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid)
    -> Result<(), RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;

    /// Releases the underlying transport. Called exactly once per session.
    fn close(&self);
}

/// How the peripheral advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub low_latency: bool,
    pub high_tx_power: bool,
    pub connectable: bool,
}

/// What the peripheral advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseData {
    pub include_device_name: bool,
    pub include_tx_power_level: bool,
    pub service_uuids: Vec<Uuid>,
}

/// Radio callbacks for the server role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    AdvertiseStarted,
    AdvertiseFailed(i32),
    ConnectionStateChanged {
        device: DeviceAddress,
        status: GattStatus,
        state: LinkState,
    },
    CharacteristicReadRequest {
        device: DeviceAddress,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
    },
    CharacteristicWriteRequest {
        device: DeviceAddress,
        request_id: u32,
        characteristic: Uuid,
        response_needed: bool,
        offset: u16,
        value: Vec<u8>,
    },
    DescriptorReadRequest {
        device: DeviceAddress,
        request_id: u32,
        offset: u16,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        device: DeviceAddress,
        request_id: u32,
        descriptor: Uuid,
        response_needed: bool,
        offset: u16,
        value: Vec<u8>,
    },
    NotificationSent {
        device: DeviceAddress,
        status: GattStatus,
    },
}

/// Where a peripheral radio backend pushes its callbacks. Delivery never blocks.
#[derive(Clone)]
pub struct ServerEventSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { tx }
    }

    /// Queues `event` for the server driver. Returns false once the driver is gone.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.tx.send(ServerMessage::Radio(event)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Server driver gone, dropping radio event");
                false
            }
        }
    }
}

/// Peripheral-role platform adapter
#[async_trait]
pub trait PeripheralRadio: Send + Sync + 'static {
    async fn init(&self, events: ServerEventSink) -> Result<(), RadioError>;

    async fn open_gatt_server(&self, service: &ServiceDefinition) -> Result<(), RadioError>;

    async fn close_gatt_server(&self);

    /// Issues the advertising request; the outcome arrives as
    /// [`ServerEvent::AdvertiseStarted`] or [`ServerEvent::AdvertiseFailed`]
    async fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), RadioError>;

    async fn stop_advertising(&self) -> Result<(), RadioError>;

    async fn send_response(
        &self,
        device: &DeviceAddress,
        request_id: u32,
        status: GattStatus,
        offset: u16,
        value: Option<&[u8]>,
    ) -> Result<(), RadioError>;

    async fn notify_characteristic_changed(
        &self,
        device: &DeviceAddress,
        characteristic: Uuid,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), RadioError>;

    async fn shutdown(&self);
}
