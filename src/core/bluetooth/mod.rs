//! Bluetooth functionality for the playground
//! This module holds both roles: the central (scan, connect, subscribe to the
//! sensor characteristic) and the peripheral (advertise, serve, notify), plus
//! the radio seams they are driven through.

#[cfg(feature = "bluest")]
mod bluest_backend;
mod connection;
pub mod constants;
mod error;
mod manager;
mod notification;
mod permission;
mod profile;
mod radio;
mod registry;
mod scanner;
mod sensor;
mod server;
pub mod sim;
mod timer;
mod types;

// Re-export types that should be publicly accessible
#[cfg(feature = "bluest")]
pub use bluest_backend::BluestCentralRadio;
pub use error::{BleError, RadioError, Stage};
pub use manager::BluetoothManager;
pub use notification::CharacteristicCallback;
pub use permission::{GrantSet, GrantSource, Permission, RadioOperation, RadioPermissionGate};
pub use profile::{
    AttributePermissions, CharacteristicDefinition, CharacteristicProperties,
    DescriptorDefinition, DiscoveredCharacteristic, DiscoveredService, ServiceDefinition,
    TargetProfile, contains_target,
};
pub use radio::{
    AdvertiseData, AdvertiseSettings, CentralEvent, CentralEventSink, CentralRadio, GattClient,
    GattStatus, LinkState, PeripheralRadio, ScanFailure, ScanFilter, ServerEvent, ServerEventSink,
};
pub use registry::{DeviceRegistry, DeviceSet, TransitionRejected};
pub use sensor::{SensorSet, SensorValueStore};
pub use server::{PeripheralServer, SubscriberSet};
pub use types::{
    AdvertisingState, ConnectionState, Device, DeviceAddress, ScanningState, SensorReading,
    SensorValue, SubscribedCentral,
};
