use std::sync::Arc;
use std::time::Duration;

use ble_playground_lib::bluetooth::sim::{CentralCall, SimulatedCentralRadio};
use ble_playground_lib::bluetooth::{
    BleError, BluetoothManager, CentralEvent, CharacteristicCallback, ConnectionState, Device,
    DeviceAddress, DiscoveredService, GattStatus, GrantSet, LinkState, RadioError,
    RadioPermissionGate, SensorValue, TargetProfile,
};
use ble_playground_lib::config::central_config::CentralConfig;
use tokio::time::timeout;

async fn start() -> (BluetoothManager, SimulatedCentralRadio) {
    let radio = SimulatedCentralRadio::new();
    let gate = RadioPermissionGate::new(31, Arc::new(GrantSet::all()));
    let manager = BluetoothManager::start(Arc::new(radio.clone()), gate, &CentralConfig::default())
        .await
        .unwrap();
    (manager, radio)
}

fn address(value: &str) -> DeviceAddress {
    DeviceAddress::from(value)
}

fn state_of(manager: &BluetoothManager, value: &str) -> Option<ConnectionState> {
    manager
        .registry()
        .get(&address(value))
        .map(|device| device.connection_state)
}

async fn deliver(manager: &BluetoothManager, radio: &SimulatedCentralRadio, event: CentralEvent) {
    assert!(radio.deliver(event));
    manager.settle().await.unwrap();
}

fn link(value: &str, state: LinkState) -> CentralEvent {
    CentralEvent::ConnectionStateChanged {
        address: address(value),
        status: GattStatus::SUCCESS,
        state,
    }
}

fn discovered(value: &str, services: Vec<DiscoveredService>) -> CentralEvent {
    CentralEvent::ServicesDiscovered {
        address: address(value),
        status: GattStatus::SUCCESS,
        services,
    }
}

fn target_services() -> Vec<DiscoveredService> {
    vec![DiscoveredService::from(
        &TargetProfile::default().service_definition(),
    )]
}

#[tokio::test]
async fn scan_connect_subscribe_disconnect() {
    let (manager, radio) = start().await;
    assert!(manager.devices().is_empty());

    deliver(
        &manager,
        &radio,
        CentralEvent::ScanResult {
            address: address("AA:BB"),
            name: Some("Sensor1".to_string()),
        },
    )
    .await;
    assert_eq!(manager.devices(), vec![Device::new("AA:BB", "Sensor1")]);

    manager.connect(&address("AA:BB")).await.unwrap();
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Connecting));

    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Connected));

    deliver(&manager, &radio, discovered("AA:BB", target_services())).await;
    let target = TargetProfile::default();
    assert!(radio.calls().contains(&CentralCall::WriteDescriptor {
        address: address("AA:BB"),
        descriptor: target.descriptor,
        value: vec![0x01, 0x00],
    }));

    manager.disconnect(&address("AA:BB")).await.unwrap();
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Disconnecting));

    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::Close(_))),
        1
    );
}

#[tokio::test]
async fn connect_to_unknown_address_leaves_registry_empty() {
    let (manager, radio) = start().await;

    assert_eq!(
        manager.connect(&address("unknown")).await,
        Err(BleError::DeviceNotFound)
    );
    assert!(manager.devices().is_empty());
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::Connect(_))),
        0
    );
}

#[tokio::test]
async fn invalid_address_removes_device() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("bogus", "Ghost"));
    radio.reject_address("bogus");

    assert_eq!(
        manager.connect(&address("bogus")).await,
        Err(BleError::DeviceNotFound)
    );
    assert!(manager.devices().is_empty());
}

#[tokio::test]
async fn radio_refusal_rolls_back_to_not_connected() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    radio.fail_next_connect(RadioError::AdapterUnavailable);

    let result = manager.connect(&address("AA:BB")).await;
    assert!(matches!(result, Err(BleError::OperationFailed { .. })));
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));
}

#[tokio::test]
async fn absent_characteristic_ends_not_connected() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    let other_service = vec![DiscoveredService {
        uuid: uuid::Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
        characteristics: Vec::new(),
    }];

    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    deliver(&manager, &radio, discovered("AA:BB", other_service)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Disconnecting));

    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));
}

#[tokio::test]
async fn disconnect_while_connecting_ends_not_connected() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));

    manager.connect(&address("AA:BB")).await.unwrap();
    manager.disconnect(&address("AA:BB")).await.unwrap();
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Disconnecting));
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::WriteDescriptor { .. })),
        0
    );

    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));

    manager.disconnect(&address("AA:BB")).await.unwrap();
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::Close(_))),
        1
    );
}

#[tokio::test]
async fn link_loss_from_any_state_ends_not_connected() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));

    // Connecting
    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));

    // Connected and subscribed
    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    deliver(&manager, &radio, discovered("AA:BB", target_services())).await;
    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));

    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::Close(_))),
        2
    );
}

#[tokio::test]
async fn notifications_update_sensor_store() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    let target = TargetProfile::default();

    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    deliver(&manager, &radio, discovered("AA:BB", target_services())).await;

    deliver(
        &manager,
        &radio,
        CentralEvent::CharacteristicChanged {
            address: address("AA:BB"),
            callback: CharacteristicCallback::Value {
                characteristic: target.characteristic,
                value: b"21".to_vec(),
            },
        },
    )
    .await;
    assert_eq!(
        manager.sensors().get(&target.characteristic).unwrap().value,
        SensorValue::Available {
            data: "21".to_string()
        }
    );

    deliver(
        &manager,
        &radio,
        CentralEvent::CharacteristicRead {
            address: address("AA:BB"),
            status: GattStatus::SUCCESS,
            callback: CharacteristicCallback::Legacy {
                characteristic: target.characteristic,
                value: None,
            },
        },
    )
    .await;
    assert_eq!(
        manager.sensors().get(&target.characteristic).unwrap().value,
        SensorValue::NotAvailable
    );
}

#[tokio::test]
async fn events_for_other_devices_do_not_interfere() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    manager.registry().upsert(Device::new("CC:DD", "Sensor2"));

    manager.connect(&address("AA:BB")).await.unwrap();
    manager.connect(&address("CC:DD")).await.unwrap();
    deliver(&manager, &radio, link("CC:DD", LinkState::Connected)).await;
    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;

    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));
    assert_eq!(state_of(&manager, "CC:DD"), Some(ConnectionState::Connected));
}

#[tokio::test]
async fn shutdown_releases_sessions_and_radio() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    manager.connect(&address("AA:BB")).await.unwrap();

    manager.shutdown().await;
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::NotConnected));
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::Close(_))),
        1
    );
    assert_eq!(radio.calls().last(), Some(&CentralCall::Shutdown));
    assert_eq!(manager.start_scan().await, Err(BleError::Closed));
}

#[tokio::test]
async fn notification_after_disconnect_is_ignored() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    let target = TargetProfile::default();

    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    deliver(&manager, &radio, discovered("AA:BB", target_services())).await;
    manager.disconnect(&address("AA:BB")).await.unwrap();

    deliver(
        &manager,
        &radio,
        CentralEvent::CharacteristicChanged {
            address: address("AA:BB"),
            callback: CharacteristicCallback::Value {
                characteristic: target.characteristic,
                value: b"99".to_vec(),
            },
        },
    )
    .await;

    assert!(manager.sensors().get(&target.characteristic).is_none());
    assert_eq!(state_of(&manager, "AA:BB"), Some(ConnectionState::Disconnecting));
}

#[tokio::test]
async fn observers_see_every_connection_state() {
    let (manager, radio) = start().await;
    manager.registry().upsert(Device::new("AA:BB", "Sensor1"));
    let mut devices = manager.observe_devices();

    manager.connect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Connected)).await;
    deliver(&manager, &radio, discovered("AA:BB", target_services())).await;
    manager.disconnect(&address("AA:BB")).await.unwrap();
    deliver(&manager, &radio, link("AA:BB", LinkState::Disconnected)).await;

    let mut seen = Vec::new();
    while let Ok(Some(snapshot)) = timeout(Duration::from_millis(50), devices.next()).await {
        if let Some(device) = snapshot.get(&address("AA:BB")) {
            seen.push(device.connection_state);
        }
    }

    assert_eq!(
        seen,
        vec![
            ConnectionState::NotConnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::NotConnected,
        ]
    );
}
