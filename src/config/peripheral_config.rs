use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::DEFAULT_PERIPHERAL_VALUE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Value served before the first `update_data`
    pub initial_value: String,

    /// Whether advertisements carry the local device name
    pub include_device_name: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        PeripheralConfig {
            initial_value: DEFAULT_PERIPHERAL_VALUE.to_string(),
            include_device_name: true,
        }
    }
}
