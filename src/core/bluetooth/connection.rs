//! Bluetooth connection handling for remote peripherals
//! This module runs the per-device GATT session lifecycle: connect, service
//! discovery, notification subscription and teardown. It is driven by the
//! central driver, one message at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::constants::{DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};
use super::error::{BleError, RadioError, Stage};
use super::manager::CentralMessage;
use super::notification::CharacteristicCallback;
use super::permission::{RadioOperation, RadioPermissionGate};
use super::profile::{DiscoveredService, TargetProfile, contains_target};
use super::radio::{CentralRadio, GattClient, GattStatus, LinkState};
use super::registry::DeviceRegistry;
use super::sensor::SensorValueStore;
use super::timer::{Deadline, DeadlineScheduler};
use super::types::{ConnectionState, DeviceAddress};

/// Where a session is in its setup or teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connection request issued, link not up yet
    AwaitingLink,
    /// Link up, service discovery in flight
    Discovering,
    /// Enable sentinel written, waiting for the descriptor write to complete
    Subscribing,
    /// Notifications flowing
    Ready,
    /// Disconnect issued, waiting for the radio to confirm
    Closing,
}

/// A live GATT client session; exclusively owned by the session table
struct GattSession {
    client: Box<dyn GattClient>,
    generation: u64,
    phase: SessionPhase,
    subscribed: bool,
    deadline: Option<CancellationToken>,
}

impl GattSession {
    fn arm(&mut self, token: CancellationToken) {
        self.disarm();
        self.deadline = Some(token);
    }

    fn disarm(&mut self) {
        if let Some(token) = self.deadline.take() {
            token.cancel();
        }
    }

    /// Closes the transport. Consumes the session so it can only happen once.
    fn release(mut self) {
        self.disarm();
        self.client.close();
    }
}

/// Timing of the session lifecycle
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub disconnect: Duration,
}

/// Connection manager for remote peripherals
pub struct ConnectionManager {
    radio: Arc<dyn CentralRadio>,
    gate: RadioPermissionGate,
    registry: DeviceRegistry,
    sensors: SensorValueStore,
    target: TargetProfile,
    scheduler: DeadlineScheduler<CentralMessage>,
    timeouts: SessionTimeouts,
    sessions: HashMap<DeviceAddress, GattSession>,
    next_generation: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        radio: Arc<dyn CentralRadio>,
        gate: RadioPermissionGate,
        registry: DeviceRegistry,
        sensors: SensorValueStore,
        target: TargetProfile,
        scheduler: DeadlineScheduler<CentralMessage>,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            radio,
            gate,
            registry,
            sensors,
            target,
            scheduler,
            timeouts,
            sessions: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Phase of the session with `address`, if one is open
    #[cfg(test)]
    pub fn session_phase(&self, address: &DeviceAddress) -> Option<SessionPhase> {
        self.sessions.get(address).map(|session| session.phase)
    }

    #[cfg(test)]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Issues a connection request to a known, not-connected device
    pub async fn connect(&mut self, address: &DeviceAddress) -> Result<(), BleError> {
        let device = self.registry.get(address).ok_or_else(|| {
            warn!("Connect requested for unknown device {}", address);
            BleError::DeviceNotFound
        })?;
        if device.connection_state != ConnectionState::NotConnected {
            warn!(
                "Device {} is {:?}, refusing a second connection attempt",
                address, device.connection_state
            );
            return Err(BleError::DeviceNotFound);
        }
        self.gate.require(RadioOperation::Connect)?;

        if let Some(stale) = self.sessions.remove(address) {
            warn!("Releasing stale session for not-connected device {}", address);
            stale.release();
        }

        self.registry
            .try_transition(
                address,
                &[ConnectionState::NotConnected],
                ConnectionState::Connecting,
            )
            .map_err(|rejected| {
                debug!("Connect to {} rejected by the registry: {:?}", address, rejected);
                BleError::DeviceNotFound
            })?;

        info!("Initiating connection to {} ({:?})...", address, device.name);
        match self.radio.connect(address).await {
            Ok(client) => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let deadline = self.scheduler.schedule(
                    self.timeouts.connect,
                    Deadline::Connect {
                        address: address.clone(),
                        generation,
                    },
                );
                self.sessions.insert(
                    address.clone(),
                    GattSession {
                        client,
                        generation,
                        phase: SessionPhase::AwaitingLink,
                        subscribed: false,
                        deadline: Some(deadline),
                    },
                );
                Ok(())
            }
            Err(RadioError::InvalidAddress(reason)) => {
                warn!("Removing device {} with invalid address: {}", address, reason);
                self.registry.remove(address);
                Err(BleError::DeviceNotFound)
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                self.registry.set_state(address, ConnectionState::NotConnected);
                Err(BleError::failed(Stage::Connect, e))
            }
        }
    }

    /// Tears down the session with a device. Ends in NotConnected once the radio
    /// confirms, or when the confirmation deadline passes.
    pub async fn disconnect(&mut self, address: &DeviceAddress) -> Result<(), BleError> {
        self.gate.require(RadioOperation::Connect)?;
        let device = self.registry.get(address).ok_or(BleError::DeviceNotFound)?;

        match device.connection_state {
            ConnectionState::NotConnected => {
                if self.sessions.contains_key(address) {
                    self.teardown(address, None);
                }
                info!("Device {} not connected", address);
            }
            ConnectionState::Disconnecting => {
                info!("Disconnect from {} already in progress", address);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                if self.sessions.contains_key(address) {
                    self.begin_disconnect(address, None).await;
                } else {
                    self.registry.set_state(address, ConnectionState::NotConnected);
                }
            }
        }
        Ok(())
    }

    /// Issues a read of the sensor characteristic; the value arrives as a
    /// characteristic read event
    pub async fn read_value(&mut self, address: &DeviceAddress) -> Result<(), BleError> {
        self.gate.require(RadioOperation::Connect)?;
        if self.registry.get(address).is_none() {
            return Err(BleError::DeviceNotFound);
        }
        let target = self.target;
        let session = self
            .sessions
            .get(address)
            .filter(|session| {
                matches!(session.phase, SessionPhase::Subscribing | SessionPhase::Ready)
            })
            .ok_or_else(|| {
                BleError::failed(Stage::Read, format!("device {address} is not connected"))
            })?;

        session
            .client
            .read_characteristic(target.service, target.characteristic)
            .await
            .map_err(|e| BleError::failed(Stage::Read, e))
    }

    pub async fn on_connection_state_changed(
        &mut self,
        address: &DeviceAddress,
        status: GattStatus,
        state: LinkState,
    ) {
        let Some(session) = self.sessions.get_mut(address) else {
            debug!("No session for {}, ignoring link state {:?}", address, state);
            return;
        };

        if !status.is_success() {
            error!("Connection callback from {} failed with status {:#06x}", address, status.0);
            self.teardown(
                address,
                Some(BleError::failed(Stage::Connect, format!("GATT status {:#06x}", status.0))),
            );
            return;
        }

        match state {
            LinkState::Connected => {
                if session.phase != SessionPhase::AwaitingLink {
                    debug!("Duplicate connected callback from {}", address);
                    return;
                }
                session.phase = SessionPhase::Discovering;
                if let Err(rejected) = self.registry.try_transition(
                    address,
                    &[ConnectionState::Connecting],
                    ConnectionState::Connected,
                ) {
                    warn!("Device {} connected from unexpected state: {:?}", address, rejected);
                    self.registry.set_state(address, ConnectionState::Connected);
                }
                info!("Connected to {}, discovering services...", address);

                let discovery = session.client.discover_services().await;
                if let Err(e) = discovery {
                    error!("Failed to start service discovery on {}: {}", address, e);
                    self.begin_disconnect(address, Some(BleError::failed(Stage::Discover, e)))
                        .await;
                }
            }
            LinkState::Disconnected => {
                if session.phase == SessionPhase::Closing {
                    info!("Disconnected from {}", address);
                } else {
                    warn!("Connection to {} lost", address);
                }
                self.teardown(address, None);
            }
        }
    }

    pub async fn on_services_discovered(
        &mut self,
        address: &DeviceAddress,
        status: GattStatus,
        services: &[DiscoveredService],
    ) {
        let target = self.target;
        let Some(session) = self.sessions.get_mut(address) else {
            debug!("No session for {}, ignoring discovered services", address);
            return;
        };
        if session.phase != SessionPhase::Discovering {
            debug!("Unexpected service discovery result from {}", address);
            return;
        }
        session.disarm();

        if !status.is_success() {
            error!("Error discovering services on {}: status {:#06x}", address, status.0);
            self.begin_disconnect(address, Some(BleError::ServiceNotFound))
                .await;
            return;
        }
        if !contains_target(services, &target) {
            for service in services {
                info!("Available service on {}: {}", address, service.uuid);
            }
            warn!("Sensor service {} not found on {}", target.service, address);
            self.begin_disconnect(address, Some(BleError::ServiceNotFound))
                .await;
            return;
        }

        info!(
            "Discovered characteristic {} on {}, subscribing...",
            target.characteristic, address
        );
        session.phase = SessionPhase::Subscribing;
        let failure = match session
            .client
            .set_characteristic_notification(target.service, target.characteristic, true)
            .await
        {
            Err(e) => {
                error!(
                    "Failed to request characteristic notification {}: {}",
                    target.characteristic, e
                );
                Some(BleError::failed(Stage::Write, e))
            }
            Ok(()) => match session
                .client
                .write_descriptor(
                    target.service,
                    target.characteristic,
                    target.descriptor,
                    &ENABLE_NOTIFICATION_VALUE,
                )
                .await
            {
                Err(e) => {
                    error!(
                        "Failed to write descriptor to enable notification {}: {}",
                        target.characteristic, e
                    );
                    Some(BleError::failed(Stage::Write, e))
                }
                Ok(()) => {
                    session.subscribed = true;
                    None
                }
            },
        };

        if let Some(failure) = failure {
            self.begin_disconnect(address, Some(failure)).await;
        }
    }

    pub async fn on_descriptor_written(
        &mut self,
        address: &DeviceAddress,
        descriptor: Uuid,
        status: GattStatus,
    ) {
        let target = self.target;
        let Some(session) = self.sessions.get_mut(address) else {
            debug!("No session for {}, ignoring descriptor write", address);
            return;
        };
        if descriptor != target.descriptor {
            debug!("Ignoring write confirmation for descriptor {} on {}", descriptor, address);
            return;
        }

        match session.phase {
            SessionPhase::Subscribing if status.is_success() => {
                session.phase = SessionPhase::Ready;
                info!("Notifications enabled for {} on {}", target.characteristic, address);
            }
            SessionPhase::Subscribing => {
                error!(
                    "Enabling notifications on {} failed with status {:#06x}",
                    address, status.0
                );
                self.begin_disconnect(
                    address,
                    Some(BleError::failed(Stage::Write, format!("GATT status {:#06x}", status.0))),
                )
                .await;
            }
            SessionPhase::Closing if !status.is_success() => {
                warn!("Failed to disable notifications on {}: status {:#06x}", address, status.0);
            }
            phase => {
                debug!("Descriptor write confirmed on {} in phase {:?}", address, phase);
            }
        }
    }

    /// Stores a notified or read characteristic value
    pub async fn on_characteristic_value(
        &mut self,
        address: &DeviceAddress,
        status: GattStatus,
        callback: CharacteristicCallback,
    ) {
        match self.sessions.get(address).map(|session| session.phase) {
            None => {
                debug!("Ignoring value from {} without a session", address);
                return;
            }
            Some(SessionPhase::Closing) => {
                debug!("Ignoring value from {} while disconnecting", address);
                return;
            }
            Some(_) => {}
        }
        if !status.is_success() {
            error!(
                "Reading {} from {} failed with status {:#06x}",
                callback.characteristic(),
                address,
                status.0
            );
            self.begin_disconnect(
                address,
                Some(BleError::failed(Stage::Read, format!("GATT status {:#06x}", status.0))),
            )
            .await;
            return;
        }

        let reading = callback.into_reading();
        debug!(
            "Received {:?} for {} from {}",
            reading.value, reading.characteristic_id, address
        );
        self.sensors.update(reading);
    }

    pub async fn on_deadline(&mut self, deadline: Deadline) {
        match deadline {
            Deadline::Connect {
                address,
                generation,
            } => {
                let Some(session) = self.sessions.get(&address) else {
                    return;
                };
                let pending = matches!(
                    session.phase,
                    SessionPhase::AwaitingLink | SessionPhase::Discovering
                );
                if session.generation != generation || !pending {
                    return;
                }
                warn!("Connection attempt to {} timed out", address);
                if let Err(e) = session.client.disconnect().await {
                    warn!("Failed to cancel connection to {}: {}", address, e);
                }
                self.teardown(
                    &address,
                    Some(BleError::failed(Stage::Connect, "timed out")),
                );
            }
            Deadline::Disconnect {
                address,
                generation,
            } => {
                let confirmed = self.sessions.get(&address).is_none_or(|session| {
                    session.generation != generation || session.phase != SessionPhase::Closing
                });
                if confirmed {
                    return;
                }
                warn!("No disconnect confirmation from {}, releasing session", address);
                self.teardown(
                    &address,
                    Some(BleError::failed(Stage::Disconnect, "confirmation timed out")),
                );
            }
            Deadline::ScanExpired { .. } => {}
        }
    }

    /// Disconnects and releases every session
    pub async fn shutdown(&mut self) {
        let addresses: Vec<DeviceAddress> = self.sessions.keys().cloned().collect();
        for address in addresses {
            if let Some(session) = self.sessions.get(&address) {
                if let Err(e) = session.client.disconnect().await {
                    warn!("Failed to disconnect {} during shutdown: {}", address, e);
                }
            }
            self.teardown(&address, None);
        }
    }

    /// Moves a live session into Closing: disables notifications (best effort),
    /// issues the platform disconnect and arms the confirmation deadline
    async fn begin_disconnect(&mut self, address: &DeviceAddress, reason: Option<BleError>) {
        let target = self.target;
        let Some(session) = self.sessions.get_mut(address) else {
            self.registry.set_state(address, ConnectionState::NotConnected);
            return;
        };
        if session.phase == SessionPhase::Closing {
            return;
        }
        match &reason {
            Some(reason) => warn!("Disconnecting from {}: {}", address, reason),
            None => info!("Disconnecting from device {}", address),
        }

        session.phase = SessionPhase::Closing;
        session.disarm();
        self.registry.set_state(address, ConnectionState::Disconnecting);

        if session.subscribed {
            session.subscribed = false;
            if let Err(e) = session
                .client
                .write_descriptor(
                    target.service,
                    target.characteristic,
                    target.descriptor,
                    &DISABLE_NOTIFICATION_VALUE,
                )
                .await
            {
                warn!("Failed to disable notifications on {}: {}", address, e);
            }
            if let Err(e) = session
                .client
                .set_characteristic_notification(target.service, target.characteristic, false)
                .await
            {
                warn!("Failed to stop local notifications for {}: {}", address, e);
            }
        }

        match session.client.disconnect().await {
            Ok(()) => {
                let token = self.scheduler.schedule(
                    self.timeouts.disconnect,
                    Deadline::Disconnect {
                        address: address.clone(),
                        generation: session.generation,
                    },
                );
                session.arm(token);
            }
            Err(e) => {
                error!("Failed to disconnect from {}: {}", address, e);
                self.teardown(address, reason.or(Some(BleError::failed(Stage::Disconnect, e))));
            }
        }
    }

    /// Releases the session (exactly once) and marks the device NotConnected
    fn teardown(&mut self, address: &DeviceAddress, reason: Option<BleError>) {
        if let Some(session) = self.sessions.remove(address) {
            session.release();
        }
        match reason {
            Some(reason) => warn!("Session with {} closed: {}", address, reason),
            None => info!("Session with {} closed", address),
        }
        self.registry.set_state(address, ConnectionState::NotConnected);
    }
}
