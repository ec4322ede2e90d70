//! Error types of the Bluetooth core

use std::fmt;

use thiserror::Error;

use super::permission::{Permission, RadioOperation};

/// Stage of a radio operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    Scan,
    Connect,
    Discover,
    Read,
    Write,
    Advertise,
    Disconnect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "adapter initialization",
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::Discover => "service discovery",
            Self::Read => "read",
            Self::Write => "write",
            Self::Advertise => "advertise",
            Self::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// Failures reported to the callers of core commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("{missing} permission is required to {operation}")]
    PermissionDenied {
        operation: RadioOperation,
        missing: Permission,
    },
    #[error("device not found")]
    DeviceNotFound,
    #[error("target service not found on the peer")]
    ServiceNotFound,
    #[error("{stage} failed: {reason}")]
    OperationFailed { stage: Stage, reason: String },
    #[error("bluetooth core has been shut down")]
    Closed,
}

impl BleError {
    pub(crate) fn failed(stage: Stage, reason: impl fmt::Display) -> Self {
        Self::OperationFailed {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Failures reported by a radio backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
    #[error("GATT operation failed with status {0:#06x}")]
    Gatt(u16),
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("request rejected by the radio: {0}")]
    Rejected(String),
}
