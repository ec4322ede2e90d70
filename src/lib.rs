//! BLE Playground library
//! Bluetooth Low Energy central and peripheral core: device registry, GATT
//! session state machine, scan session, sensor store and notification server.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::core::bluetooth;
