//! Radio permission gate
//! Decides from the platform API level and the grants the process holds whether
//! a scan, connect or advertise request may touch the radio.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::constants::EXPLICIT_BLUETOOTH_GRANTS_API_LEVEL;
use super::error::BleError;

/// An access grant the platform may hold for this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    AccessFineLocation,
    AccessCoarseLocation,
    BluetoothAdmin,
    BluetoothScan,
    BluetoothConnect,
    BluetoothAdvertise,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AccessFineLocation => "fine location",
            Self::AccessCoarseLocation => "coarse location",
            Self::BluetoothAdmin => "bluetooth admin",
            Self::BluetoothScan => "bluetooth scan",
            Self::BluetoothConnect => "bluetooth connect",
            Self::BluetoothAdvertise => "bluetooth advertise",
        };
        f.write_str(name)
    }
}

/// Radio operations guarded by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioOperation {
    Scan,
    Connect,
    Advertise,
}

impl fmt::Display for RadioOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::Advertise => "advertise",
        };
        f.write_str(name)
    }
}

/// Source of truth for granted permissions (the platform permission manager)
pub trait GrantSource: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
}

/// In-memory grant set, used by the demo binary and the tests
#[derive(Debug, Default)]
pub struct GrantSet {
    granted: RwLock<HashSet<Permission>>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding every permission
    pub fn all() -> Self {
        let set = Self::new();
        for permission in [
            Permission::AccessFineLocation,
            Permission::AccessCoarseLocation,
            Permission::BluetoothAdmin,
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
            Permission::BluetoothAdvertise,
        ] {
            set.grant(permission);
        }
        set
    }

    pub fn grant(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.write() {
            granted.insert(permission);
        }
    }

    pub fn revoke(&self, permission: Permission) {
        if let Ok(mut granted) = self.granted.write() {
            granted.remove(&permission);
        }
    }
}

impl GrantSource for GrantSet {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted
            .read()
            .map(|granted| granted.contains(&permission))
            .unwrap_or(false)
    }
}

/// Pure predicate layer over a [`GrantSource`]
#[derive(Clone)]
pub struct RadioPermissionGate {
    api_level: u32,
    grants: Arc<dyn GrantSource>,
}

impl RadioPermissionGate {
    pub fn new(api_level: u32, grants: Arc<dyn GrantSource>) -> Self {
        Self { api_level, grants }
    }

    /// Grants needed for `operation`, in the order they are reported missing
    pub fn required(operation: RadioOperation, api_level: u32) -> &'static [Permission] {
        use Permission::*;

        let explicit = api_level >= EXPLICIT_BLUETOOTH_GRANTS_API_LEVEL;
        match (operation, explicit) {
            (RadioOperation::Scan, false) => {
                &[AccessFineLocation, AccessCoarseLocation, BluetoothAdmin]
            }
            (RadioOperation::Scan, true) => &[BluetoothScan],
            (RadioOperation::Connect, false) => &[BluetoothAdmin],
            (RadioOperation::Connect, true) => &[BluetoothConnect],
            (RadioOperation::Advertise, false) => &[BluetoothAdmin],
            (RadioOperation::Advertise, true) => &[BluetoothAdvertise, BluetoothConnect],
        }
    }

    /// First grant `operation` is missing, if any
    pub fn missing_for(&self, operation: RadioOperation) -> Option<Permission> {
        Self::required(operation, self.api_level)
            .iter()
            .copied()
            .find(|permission| !self.grants.is_granted(*permission))
    }

    pub fn check_scan(&self) -> bool {
        self.missing_for(RadioOperation::Scan).is_none()
    }

    pub fn check_connect(&self) -> bool {
        self.missing_for(RadioOperation::Connect).is_none()
    }

    pub fn check_advertise(&self) -> bool {
        self.missing_for(RadioOperation::Advertise).is_none()
    }

    /// Fails with [`BleError::PermissionDenied`] naming the first missing grant
    pub fn require(&self, operation: RadioOperation) -> Result<(), BleError> {
        match self.missing_for(operation) {
            Some(missing) => Err(BleError::PermissionDenied { operation, missing }),
            None => Ok(()),
        }
    }
}
