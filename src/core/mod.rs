//! Core functionality of the playground
//! The Bluetooth roles and the observable store their state lives in.

pub mod bluetooth;
pub mod store;

// Re-export commonly used types
pub use bluetooth::{BluetoothManager, PeripheralServer};
pub use store::{Observer, Store};
