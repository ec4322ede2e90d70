//! Last known characteristic values, keyed by characteristic id

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use super::types::SensorReading;
use crate::core::store::{Observer, Store};

pub type SensorSet = BTreeMap<Uuid, SensorReading>;

#[derive(Clone)]
pub struct SensorValueStore {
    store: Arc<Store<SensorSet>>,
}

impl Default for SensorValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorValueStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new(SensorSet::new())),
        }
    }

    /// Replaces the reading for `reading.characteristic_id` wholesale
    pub fn update(&self, reading: SensorReading) {
        self.store.update(|readings| {
            readings.insert(reading.characteristic_id, reading);
        });
    }

    pub fn get(&self, characteristic_id: &Uuid) -> Option<SensorReading> {
        self.store.snapshot().get(characteristic_id).cloned()
    }

    pub fn snapshot(&self) -> Arc<SensorSet> {
        self.store.snapshot()
    }

    pub fn observe(&self) -> Observer<SensorSet> {
        self.store.observe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::SensorValue;

    #[test]
    fn update_replaces_without_merging() {
        let store = SensorValueStore::new();
        let id = Uuid::from_u128(0x2a2b);
        store.update(SensorReading::available(id, "21"));
        store.update(SensorReading::not_available(id));

        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.get(&id).unwrap().value, SensorValue::NotAvailable);
    }
}
