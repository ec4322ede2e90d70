//! Application state management
//! This module wires both Bluetooth roles to their radios and holds them for
//! the command layer.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::{
    BluetoothManager, CentralRadio, GrantSource, PeripheralRadio, PeripheralServer,
    RadioPermissionGate,
};

/// Global application state
pub struct AppState {
    /// Central role: scanning and sensor subscriptions
    pub bluetooth_manager: Arc<BluetoothManager>,
    /// Peripheral role: advertising and the GATT server
    pub peripheral_server: Arc<PeripheralServer>,
    pub config: AppConfig,
}

impl AppState {
    /// Starts both roles against the given radios
    pub async fn new(
        central_radio: Arc<dyn CentralRadio>,
        peripheral_radio: Arc<dyn PeripheralRadio>,
        grants: Arc<dyn GrantSource>,
        config: AppConfig,
    ) -> Result<Self> {
        let gate = RadioPermissionGate::new(config.platform.api_level, grants);

        info!("Initializing BluetoothManager...");
        let manager = BluetoothManager::start(central_radio, gate.clone(), &config.central)
            .await
            .context("failed to start the central role")?;

        info!("Initializing PeripheralServer...");
        let server = PeripheralServer::start(peripheral_radio, gate, &config.peripheral)
            .await
            .context("failed to start the peripheral role")?;

        Ok(Self {
            bluetooth_manager: Arc::new(manager),
            peripheral_server: Arc::new(server),
            config,
        })
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }

    /// Releases both radios
    pub async fn shutdown(&self) {
        self.bluetooth_manager.shutdown().await;
        self.peripheral_server.shutdown().await;
        info!("Bluetooth roles shut down.");
    }
}
