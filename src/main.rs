use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ble_playground_lib::bluetooth::sim::{SimulatedCentralRadio, SimulatedPeripheralRadio};
use ble_playground_lib::bluetooth::{
    CentralRadio, ConnectionState, DeviceAddress, GrantSet, ServerEvent, TargetProfile,
};
use ble_playground_lib::commands::{self, CommandOutcome};
use ble_playground_lib::config::AppConfig;
use ble_playground_lib::logging;
use ble_playground_lib::state::AppState;
use log::{Level, info, warn};
use tokio::time::timeout;

const DEMO_PEER: &str = "AA:BB:CC:DD:EE:01";
const DEMO_SUBSCRIBER: &str = "11:22:33:44:55:66";
const WAIT: Duration = Duration::from_secs(5);

fn config_dir() -> PathBuf {
    std::env::var_os("BLE_PLAYGROUND_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("ble-playground"))
}

#[cfg(feature = "bluest")]
fn central_radio(simulated: &SimulatedCentralRadio) -> Arc<dyn CentralRadio> {
    if std::env::args().any(|arg| arg == "--bluest") {
        info!("Using the host Bluetooth adapter.");
        return Arc::new(ble_playground_lib::bluetooth::BluestCentralRadio::new());
    }
    Arc::new(simulated.clone())
}

#[cfg(not(feature = "bluest"))]
fn central_radio(simulated: &SimulatedCentralRadio) -> Arc<dyn CentralRadio> {
    Arc::new(simulated.clone())
}

fn expect_done(step: &str, outcome: CommandOutcome) -> Result<()> {
    match outcome {
        CommandOutcome::Done => Ok(()),
        CommandOutcome::RequestPermission(permission) => {
            Err(anyhow!("{step} needs the {permission} permission"))
        }
        CommandOutcome::Failed(message) => Err(anyhow!("{step} failed: {message}")),
    }
}

async fn run_central(state: &AppState) -> Result<()> {
    let manager = state.get_bluetooth_manager_arc();
    let address = DeviceAddress::from(DEMO_PEER);
    let mut devices = manager.observe_devices();
    let mut sensors = manager.observe_sensors();

    expect_done("scan", commands::start_scan(state).await)?;
    timeout(WAIT, async {
        while let Some(snapshot) = devices.next().await {
            if snapshot.contains_key(&address) {
                break;
            }
        }
    })
    .await
    .context("no device found while scanning")?;
    for device in commands::get_devices(state) {
        info!("Found device: {} ({:?}) {:?}", device.address, device.name, device.connection_state);
    }

    expect_done("connect", commands::connect_to_device(DEMO_PEER.to_string(), state).await)?;
    let characteristic = TargetProfile::default().characteristic;
    let reading = timeout(WAIT, async {
        while let Some(snapshot) = sensors.next().await {
            if let Some(reading) = snapshot.get(&characteristic) {
                return Some(reading.clone());
            }
        }
        None
    })
    .await
    .context("no sensor value received")?;
    info!("Sensor reading: {:?}", reading);

    expect_done("disconnect", commands::disconnect(DEMO_PEER.to_string(), state).await)?;
    timeout(WAIT, async {
        while let Some(snapshot) = devices.next().await {
            if snapshot.get(&address).map(|d| d.connection_state)
                == Some(ConnectionState::NotConnected)
            {
                break;
            }
        }
    })
    .await
    .context("device did not disconnect")?;

    expect_done("stop scan", commands::stop_scan(state).await)?;
    Ok(())
}

async fn run_peripheral(state: &AppState, radio: &SimulatedPeripheralRadio) -> Result<()> {
    let server = state.peripheral_server.clone();
    expect_done("advertise", commands::start_advertising(state).await)?;
    server.settle().await?;
    info!("Advertising state: {:?}", server.advertising_state());

    let subscriber = DeviceAddress::from(DEMO_SUBSCRIBER);
    radio.deliver(ServerEvent::DescriptorWriteRequest {
        device: subscriber,
        request_id: 1,
        descriptor: TargetProfile::default().descriptor,
        response_needed: true,
        offset: 0,
        value: vec![0x01, 0x00],
    });
    server.settle().await?;
    info!("Subscribers: {}", server.subscribers().len());

    expect_done(
        "update data",
        commands::update_advertised_data("23".to_string(), state).await,
    )?;
    info!(
        "Served value is now {:?}; {} notification(s) sent",
        server.current_value(),
        radio.notifications().len()
    );

    expect_done("stop advertising", commands::stop_advertising(state).await)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging(Level::Info);

    let config = AppConfig::load(&config_dir()).await?;

    let simulated_central = SimulatedCentralRadio::new();
    simulated_central.set_auto_respond(true);
    simulated_central.add_peer(DEMO_PEER, Some("Sensor1"), "21");
    let simulated_peripheral = SimulatedPeripheralRadio::new();
    simulated_peripheral.set_auto_respond(true);

    let state = AppState::new(
        central_radio(&simulated_central),
        Arc::new(simulated_peripheral.clone()),
        Arc::new(GrantSet::all()),
        config,
    )
    .await?;

    if let Err(e) = run_central(&state).await {
        warn!("Central demo stopped: {:#}", e);
    }
    if let Err(e) = run_peripheral(&state, &simulated_peripheral).await {
        warn!("Peripheral demo stopped: {:#}", e);
    }

    state.shutdown().await;
    Ok(())
}
