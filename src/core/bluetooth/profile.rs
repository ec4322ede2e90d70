//! The one GATT profile this core speaks: a primary service with a single
//! read + notify characteristic and its client configuration descriptor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::constants::{
    UUID_CLIENT_CONFIG_DESCRIPTOR, UUID_PLAYGROUND_SERVICE, UUID_SENSOR_VALUE_CHAR,
};

/// Characteristic capabilities exposed by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// Attribute access permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePermissions {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorDefinition {
    pub uuid: Uuid,
    pub permissions: AttributePermissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub descriptors: Vec<DescriptorDefinition>,
}

/// A service as published by a GATT server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDefinition>,
}

/// Identifiers of the service/characteristic/descriptor triple a central
/// subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetProfile {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub descriptor: Uuid,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            service: UUID_PLAYGROUND_SERVICE,
            characteristic: UUID_SENSOR_VALUE_CHAR,
            descriptor: UUID_CLIENT_CONFIG_DESCRIPTOR,
        }
    }
}

impl TargetProfile {
    /// Builds the server-side definition of this profile
    pub fn service_definition(&self) -> ServiceDefinition {
        let config_descriptor = DescriptorDefinition {
            uuid: self.descriptor,
            permissions: AttributePermissions {
                read: true,
                write: true,
            },
        };
        let value = CharacteristicDefinition {
            uuid: self.characteristic,
            properties: CharacteristicProperties {
                read: true,
                write: false,
                notify: true,
            },
            permissions: AttributePermissions {
                read: true,
                write: false,
            },
            descriptors: vec![config_descriptor],
        };
        ServiceDefinition {
            uuid: self.service,
            primary: true,
            characteristics: vec![value],
        }
    }
}

/// A characteristic found during service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A service found during service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl From<&ServiceDefinition> for DiscoveredService {
    fn from(service: &ServiceDefinition) -> Self {
        Self {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .iter()
                .map(|characteristic| DiscoveredCharacteristic {
                    uuid: characteristic.uuid,
                    descriptors: characteristic.descriptors.iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        }
    }
}

/// Returns true if `services` carry the target service, its characteristic and
/// the characteristic's configuration descriptor
pub fn contains_target(services: &[DiscoveredService], target: &TargetProfile) -> bool {
    services
        .iter()
        .filter(|service| service.uuid == target.service)
        .flat_map(|service| service.characteristics.iter())
        .any(|characteristic| {
            characteristic.uuid == target.characteristic
                && characteristic.descriptors.contains(&target.descriptor)
        })
}
