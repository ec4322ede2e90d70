use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DISCONNECT_TIMEOUT_SECS, DEFAULT_SCAN_PERIOD_SECS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// How long a scan runs before it is stopped automatically
    pub scan_period_secs: u64,

    /// How long a connection attempt may take to bring the link up and
    /// discover services before it is abandoned
    pub connect_timeout_secs: u64,

    /// How long to wait for the radio to confirm a disconnect before the
    /// session is released anyway
    pub disconnect_timeout_secs: u64,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            scan_period_secs: DEFAULT_SCAN_PERIOD_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            disconnect_timeout_secs: DEFAULT_DISCONNECT_TIMEOUT_SECS,
        }
    }
}

impl CentralConfig {
    pub fn scan_period(&self) -> Duration {
        Duration::from_secs(self.scan_period_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}
