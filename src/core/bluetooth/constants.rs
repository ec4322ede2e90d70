//! Constants used throughout the Bluetooth core
//! This module contains the GATT profile identifiers, descriptor sentinels and
//! the default timing values.

use uuid::Uuid;

/// The UUID of the playground service (advertised and scanned for)
pub const UUID_PLAYGROUND_SERVICE: Uuid = Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb);

/// The UUID of the sensor value characteristic (read + notify)
pub const UUID_SENSOR_VALUE_CHAR: Uuid = Uuid::from_u128(0x00002a2b_0000_1000_8000_00805f9b34fb);

/// The standard Client Characteristic Configuration descriptor
pub const UUID_CLIENT_CONFIG_DESCRIPTOR: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCC value that turns notifications on
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCC value that turns notifications and indications off
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Platform API level from which explicit scan/connect/advertise grants replace
/// the location and legacy admin grants
pub const EXPLICIT_BLUETOOTH_GRANTS_API_LEVEL: u32 = 31;

/// How long a scan runs before it is stopped automatically, in seconds
pub const DEFAULT_SCAN_PERIOD_SECS: u64 = 60;

/// How long a connection attempt may stay unresolved, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// How long to wait for the radio to confirm a disconnect, in seconds
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 10;

/// Value served by the peripheral before the first update
pub const DEFAULT_PERIPHERAL_VALUE: &str = "22";
