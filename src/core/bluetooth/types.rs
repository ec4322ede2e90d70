//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable identifier of a remote device (a MAC address on most platforms,
/// a platform-specific id elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Connection lifecycle of a remote device as seen by the central role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A remote device known to the central role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// The address of the device
    pub address: DeviceAddress,
    /// The advertised name of the device, empty when none was advertised
    pub name: String,
    /// Where the device is in its connection lifecycle
    pub connection_state: ConnectionState,
}

impl Device {
    /// Creates a not-connected device
    pub fn new(address: impl Into<DeviceAddress>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            connection_state: ConnectionState::NotConnected,
        }
    }

    /// Returns a copy of this record in another connection state
    pub fn with_state(&self, connection_state: ConnectionState) -> Self {
        Self {
            connection_state,
            ..self.clone()
        }
    }
}

/// Scanner state. `expires_at` is the wall-clock time the scan stops on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanningState {
    #[default]
    NotScanning,
    Scanning { expires_at: DateTime<Utc> },
}

impl ScanningState {
    pub fn is_scanning(&self) -> bool {
        matches!(self, Self::Scanning { .. })
    }
}

/// Last known value of a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorValue {
    Available { data: String },
    NotAvailable,
}

/// A characteristic reading, keyed by characteristic id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub characteristic_id: Uuid,
    pub value: SensorValue,
}

impl SensorReading {
    pub fn available(characteristic_id: Uuid, data: impl Into<String>) -> Self {
        Self {
            characteristic_id,
            value: SensorValue::Available { data: data.into() },
        }
    }

    pub fn not_available(characteristic_id: Uuid) -> Self {
        Self {
            characteristic_id,
            value: SensorValue::NotAvailable,
        }
    }
}

/// Advertiser state of the peripheral role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisingState {
    #[default]
    NotAdvertising,
    Advertising,
}

/// A central that enabled notifications through the config descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedCentral {
    pub address: DeviceAddress,
    pub notifications_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_state_keeps_identity() {
        let device = Device::new("AA:BB", "Sensor1");
        let connecting = device.with_state(ConnectionState::Connecting);
        assert_eq!(connecting.address, device.address);
        assert_eq!(connecting.name, "Sensor1");
        assert_eq!(connecting.connection_state, ConnectionState::Connecting);
    }
}
