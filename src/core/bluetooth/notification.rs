//! Notification handling for the sensor characteristic
//! Platforms report characteristic values in two shapes: older callbacks leave
//! the value on the characteristic object (possibly unset), newer ones pass it
//! as a parameter. Both are normalized here into one [`SensorReading`].

use uuid::Uuid;

use super::types::SensorReading;

/// A characteristic value callback as delivered by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharacteristicCallback {
    /// Value carried on the characteristic object; may be unset
    Legacy {
        characteristic: Uuid,
        value: Option<Vec<u8>>,
    },
    /// Value passed alongside the characteristic
    Value { characteristic: Uuid, value: Vec<u8> },
}

impl CharacteristicCallback {
    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::Legacy { characteristic, .. } | Self::Value { characteristic, .. } => {
                *characteristic
            }
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Legacy { value, .. } => value.as_deref(),
            Self::Value { value, .. } => Some(value.as_slice()),
        }
    }

    /// Converts the callback into the reading stored for its characteristic.
    /// An absent or empty value means the sensor has nothing to report.
    pub fn into_reading(self) -> SensorReading {
        let characteristic = self.characteristic();
        match self.bytes() {
            Some(bytes) if !bytes.is_empty() => {
                SensorReading::available(characteristic, String::from_utf8_lossy(bytes))
            }
            _ => SensorReading::not_available(characteristic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_SENSOR_VALUE_CHAR;
    use crate::core::bluetooth::types::SensorValue;

    #[test]
    fn both_shapes_normalize_to_the_same_reading() {
        let legacy = CharacteristicCallback::Legacy {
            characteristic: UUID_SENSOR_VALUE_CHAR,
            value: Some(b"21.5".to_vec()),
        };
        let modern = CharacteristicCallback::Value {
            characteristic: UUID_SENSOR_VALUE_CHAR,
            value: b"21.5".to_vec(),
        };
        assert_eq!(legacy.into_reading(), modern.into_reading());
    }

    #[test]
    fn unset_legacy_value_is_not_available() {
        let reading = CharacteristicCallback::Legacy {
            characteristic: UUID_SENSOR_VALUE_CHAR,
            value: None,
        }
        .into_reading();
        assert_eq!(reading.value, SensorValue::NotAvailable);
        assert_eq!(reading.characteristic_id, UUID_SENSOR_VALUE_CHAR);
    }

    #[test]
    fn empty_value_is_not_available() {
        let reading = CharacteristicCallback::Value {
            characteristic: UUID_SENSOR_VALUE_CHAR,
            value: Vec::new(),
        }
        .into_reading();
        assert_eq!(reading.value, SensorValue::NotAvailable);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let reading = CharacteristicCallback::Value {
            characteristic: UUID_SENSOR_VALUE_CHAR,
            value: vec![0x32, 0xff],
        }
        .into_reading();
        assert_eq!(
            reading.value,
            SensorValue::Available {
                data: "2\u{fffd}".to_string()
            }
        );
    }
}
