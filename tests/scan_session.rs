use std::sync::Arc;
use std::time::Duration;

use ble_playground_lib::bluetooth::sim::{CentralCall, SimulatedCentralRadio};
use ble_playground_lib::bluetooth::{
    BluetoothManager, CentralEvent, ConnectionState, Device, DeviceAddress, GrantSet,
    RadioPermissionGate, ScanFailure, ScanningState, TargetProfile,
};
use ble_playground_lib::config::central_config::CentralConfig;
use chrono::Utc;
use tokio::time::sleep;

async fn start() -> (BluetoothManager, SimulatedCentralRadio) {
    let radio = SimulatedCentralRadio::new();
    let gate = RadioPermissionGate::new(31, Arc::new(GrantSet::all()));
    let config = CentralConfig {
        scan_period_secs: 60,
        ..CentralConfig::default()
    };
    let manager = BluetoothManager::start(Arc::new(radio.clone()), gate, &config)
        .await
        .unwrap();
    (manager, radio)
}

fn stop_calls(radio: &SimulatedCentralRadio) -> usize {
    radio.count(|call| matches!(call, CentralCall::StopScan))
}

#[tokio::test(start_paused = true)]
async fn scan_expires_after_its_period() {
    let (manager, radio) = start().await;

    manager.start_scan().await.unwrap();
    match manager.scanning_state() {
        ScanningState::Scanning { expires_at } => {
            let remaining = expires_at - Utc::now();
            assert!(remaining <= chrono::Duration::seconds(60));
            assert!(remaining > chrono::Duration::seconds(55));
        }
        ScanningState::NotScanning => panic!("scan did not start"),
    }
    assert!(radio.calls().contains(&CentralCall::StartScan(
        ble_playground_lib::bluetooth::ScanFilter {
            service_uuid: TargetProfile::default().service,
        }
    )));

    sleep(Duration::from_secs(59)).await;
    manager.settle().await.unwrap();
    assert!(manager.scanning_state().is_scanning());

    sleep(Duration::from_secs(2)).await;
    manager.settle().await.unwrap();
    assert_eq!(manager.scanning_state(), ScanningState::NotScanning);
    assert_eq!(stop_calls(&radio), 1);

    sleep(Duration::from_secs(120)).await;
    manager.settle().await.unwrap();
    assert_eq!(stop_calls(&radio), 1);
}

#[tokio::test(start_paused = true)]
async fn second_start_keeps_the_running_scan() {
    let (manager, radio) = start().await;

    manager.start_scan().await.unwrap();
    let first = manager.scanning_state();
    sleep(Duration::from_secs(10)).await;
    manager.start_scan().await.unwrap();

    assert_eq!(manager.scanning_state(), first);
    assert_eq!(
        radio.count(|call| matches!(call, CentralCall::StartScan(_))),
        1
    );

    sleep(Duration::from_secs(51)).await;
    manager.settle().await.unwrap();
    assert_eq!(manager.scanning_state(), ScanningState::NotScanning);
    assert_eq!(stop_calls(&radio), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_the_expiry() {
    let (manager, radio) = start().await;

    manager.start_scan().await.unwrap();
    manager.stop_scan().await.unwrap();
    assert_eq!(manager.scanning_state(), ScanningState::NotScanning);

    sleep(Duration::from_secs(120)).await;
    manager.settle().await.unwrap();
    assert_eq!(stop_calls(&radio), 1);
}

#[tokio::test(start_paused = true)]
async fn restarted_scan_is_not_cut_short_by_the_old_timer() {
    let (manager, _radio) = start().await;

    manager.start_scan().await.unwrap();
    sleep(Duration::from_secs(30)).await;
    manager.stop_scan().await.unwrap();
    manager.start_scan().await.unwrap();

    sleep(Duration::from_secs(45)).await;
    manager.settle().await.unwrap();
    assert!(manager.scanning_state().is_scanning());
}

#[tokio::test(start_paused = true)]
async fn scan_failures() {
    let (manager, radio) = start().await;
    manager.start_scan().await.unwrap();

    radio.deliver(CentralEvent::ScanFailed(ScanFailure::AlreadyStarted));
    manager.settle().await.unwrap();
    assert!(manager.scanning_state().is_scanning());

    radio.deliver(CentralEvent::ScanFailed(ScanFailure::from_code(3)));
    manager.settle().await.unwrap();
    assert_eq!(manager.scanning_state(), ScanningState::NotScanning);

    sleep(Duration::from_secs(120)).await;
    manager.settle().await.unwrap();
    assert_eq!(stop_calls(&radio), 0);
}

#[tokio::test]
async fn scan_results_merge_into_registry() {
    let (manager, radio) = start().await;
    let address = DeviceAddress::from("AA:BB");
    manager
        .registry()
        .upsert(Device::new("AA:BB", "Sensor1").with_state(ConnectionState::Connected));

    radio.deliver(CentralEvent::ScanResult {
        address: address.clone(),
        name: Some("Sensor1-renamed".to_string()),
    });
    radio.deliver(CentralEvent::ScanResult {
        address: DeviceAddress::from("CC:DD"),
        name: None,
    });
    manager.settle().await.unwrap();

    let devices = manager.registry().snapshot();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[&address].connection_state, ConnectionState::Connected);
    assert_eq!(devices[&address].name, "Sensor1-renamed");
    assert_eq!(devices[&DeviceAddress::from("CC:DD")].name, "");
}

#[tokio::test]
async fn observers_see_scanning_transitions() {
    let (manager, _radio) = start().await;
    let mut scanning = manager.observe_scanning();
    assert_eq!(*scanning.next().await.unwrap(), ScanningState::NotScanning);

    manager.start_scan().await.unwrap();
    assert!(scanning.next().await.unwrap().is_scanning());

    manager.stop_scan().await.unwrap();
    assert_eq!(*scanning.next().await.unwrap(), ScanningState::NotScanning);
}
