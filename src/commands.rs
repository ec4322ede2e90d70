//! UI commands
//! This module defines the commands a frontend can invoke. Failures are mapped
//! to what the UI should do next: a missing grant becomes a permission request,
//! anything else a message to show.

use log::{error, warn};
use serde::Serialize;

use crate::core::bluetooth::{
    BleError, Device, DeviceAddress, Permission, ScanningState, SensorReading,
};
use crate::state::AppState;

/// Result of a UI command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum CommandOutcome {
    Done,
    /// The command needs this grant; the UI should ask for it and retry
    RequestPermission(Permission),
    Failed(String),
}

impl From<Result<(), BleError>> for CommandOutcome {
    fn from(result: Result<(), BleError>) -> Self {
        match result {
            Ok(()) => CommandOutcome::Done,
            Err(BleError::PermissionDenied { operation, missing }) => {
                warn!("{} needs the {} permission", operation, missing);
                CommandOutcome::RequestPermission(missing)
            }
            Err(e) => {
                error!("Command failed: {}", e);
                CommandOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Starts a scan; discovered devices appear on the device stream
pub async fn start_scan(app_state: &AppState) -> CommandOutcome {
    app_state.bluetooth_manager.start_scan().await.into()
}

pub async fn stop_scan(app_state: &AppState) -> CommandOutcome {
    app_state.bluetooth_manager.stop_scan().await.into()
}

/// Connects to a scanned device
///
/// # Arguments
/// * `device_id` - Address of the device as reported by the scan
/// * `app_state` - The application state
pub async fn connect_to_device(device_id: String, app_state: &AppState) -> CommandOutcome {
    let address = DeviceAddress::from(device_id);
    app_state.bluetooth_manager.connect(&address).await.into()
}

/// Disconnects from a device
pub async fn disconnect(device_id: String, app_state: &AppState) -> CommandOutcome {
    let address = DeviceAddress::from(device_id);
    app_state.bluetooth_manager.disconnect(&address).await.into()
}

/// Requests a fresh sensor value from a connected device
pub async fn read_sensor(device_id: String, app_state: &AppState) -> CommandOutcome {
    let address = DeviceAddress::from(device_id);
    app_state.bluetooth_manager.read_value(&address).await.into()
}

pub fn get_devices(app_state: &AppState) -> Vec<Device> {
    app_state.bluetooth_manager.devices()
}

pub fn get_scanning_state(app_state: &AppState) -> ScanningState {
    app_state.bluetooth_manager.scanning_state()
}

pub fn get_sensor_readings(app_state: &AppState) -> Vec<SensorReading> {
    app_state
        .bluetooth_manager
        .sensors()
        .snapshot()
        .values()
        .cloned()
        .collect()
}

pub async fn start_advertising(app_state: &AppState) -> CommandOutcome {
    app_state.peripheral_server.start_advertising().await.into()
}

pub async fn stop_advertising(app_state: &AppState) -> CommandOutcome {
    app_state.peripheral_server.stop_advertising().await.into()
}

/// Replaces the advertised sensor value and notifies subscribed centrals
pub async fn update_advertised_data(value: String, app_state: &AppState) -> CommandOutcome {
    app_state.peripheral_server.update_data(value).await.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::{RadioOperation, Stage};

    #[test]
    fn permission_denial_requests_the_missing_grant() {
        let outcome = CommandOutcome::from(Err(BleError::PermissionDenied {
            operation: RadioOperation::Scan,
            missing: Permission::AccessFineLocation,
        }));
        assert_eq!(
            outcome,
            CommandOutcome::RequestPermission(Permission::AccessFineLocation)
        );
    }

    #[test]
    fn other_failures_carry_a_message() {
        let outcome = CommandOutcome::from(Err(BleError::OperationFailed {
            stage: Stage::Connect,
            reason: "busy".to_string(),
        }));
        assert_eq!(outcome, CommandOutcome::Failed("connect failed: busy".to_string()));
        assert_eq!(CommandOutcome::from(Ok(())), CommandOutcome::Done);
    }

    #[test]
    fn serializes_for_the_frontend() {
        let json = serde_json::to_value(CommandOutcome::RequestPermission(
            Permission::BluetoothScan,
        ))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "RequestPermission", "detail": "BluetoothScan" })
        );
    }
}
