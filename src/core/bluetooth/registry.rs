//! Device registry
//! The authoritative set of known remote devices, keyed by address. Every
//! mutation is a read-modify-write on the underlying [`Store`], so scan results
//! and connection callbacks for different devices can never tear a snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::types::{ConnectionState, Device, DeviceAddress};
use crate::core::store::{Observer, Store};

/// Snapshot of the registry
pub type DeviceSet = BTreeMap<DeviceAddress, Device>;

/// Why a state transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejected {
    UnknownDevice,
    WrongState(ConnectionState),
}

#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<Store<DeviceSet>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new(DeviceSet::new())),
        }
    }

    /// Inserts or replaces the record for `device.address`
    pub fn upsert(&self, device: Device) {
        self.store.update(|devices| {
            devices.insert(device.address.clone(), device);
        });
    }

    /// Removes a device; no-op if absent
    pub fn remove(&self, address: &DeviceAddress) -> Option<Device> {
        self.store.update(|devices| devices.remove(address))
    }

    pub fn snapshot(&self) -> Arc<DeviceSet> {
        self.store.snapshot()
    }

    pub fn observe(&self) -> Observer<DeviceSet> {
        self.store.observe()
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<Device> {
        self.store.snapshot().get(address).cloned()
    }

    /// Atomically rewrites one record. Returns the new record, or `None` if the
    /// device is unknown.
    pub fn update(&self, address: &DeviceAddress, f: impl FnOnce(&mut Device)) -> Option<Device> {
        self.store.update(|devices| {
            devices.get_mut(address).map(|device| {
                f(device);
                device.clone()
            })
        })
    }

    /// Sets the connection state of a known device
    pub fn set_state(&self, address: &DeviceAddress, state: ConnectionState) -> Option<Device> {
        self.update(address, |device| device.connection_state = state)
    }

    /// Moves a device to `to` only if it is currently in one of `from`
    pub fn try_transition(
        &self,
        address: &DeviceAddress,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<Device, TransitionRejected> {
        self.store.update(|devices| {
            let device = devices
                .get_mut(address)
                .ok_or(TransitionRejected::UnknownDevice)?;
            if !from.contains(&device.connection_state) {
                return Err(TransitionRejected::WrongState(device.connection_state));
            }
            device.connection_state = to;
            Ok(device.clone())
        })
    }

    /// Records a scan result. New devices start NotConnected; known devices keep
    /// their connection state and only refresh their name.
    pub fn merge_scan_result(&self, address: &DeviceAddress, name: &str) -> Device {
        self.store.update(|devices| {
            let device = devices
                .entry(address.clone())
                .and_modify(|known| {
                    if known.name != name {
                        debug!("Device {} renamed to {:?}", address, name);
                    }
                    known.name = name.to_string();
                })
                .or_insert_with(|| Device::new(address.clone(), name));
            device.clone()
        })
    }

    /// All devices ordered by address
    pub fn devices(&self) -> Vec<Device> {
        self.store.snapshot().values().cloned().collect()
    }
}
