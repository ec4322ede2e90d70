//! Time-bounded scanning for the playground service

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use super::error::{BleError, Stage};
use super::manager::CentralMessage;
use super::permission::{RadioOperation, RadioPermissionGate};
use super::radio::{CentralRadio, ScanFailure, ScanFilter};
use super::timer::{Deadline, DeadlineScheduler};
use super::types::ScanningState;
use crate::core::store::Store;

pub struct BluetoothScanner {
    state: Arc<Store<ScanningState>>,
    filter: ScanFilter,
    period: Duration,
    scheduler: DeadlineScheduler<CentralMessage>,
    expiry: Option<CancellationToken>,
    generation: u64,
}

impl BluetoothScanner {
    pub(crate) fn new(
        state: Arc<Store<ScanningState>>,
        filter: ScanFilter,
        period: Duration,
        scheduler: DeadlineScheduler<CentralMessage>,
    ) -> Self {
        Self {
            state,
            filter,
            period,
            scheduler,
            expiry: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> ScanningState {
        *self.state.snapshot()
    }

    /// Starts a platform scan and arms the expiry timer. Starting while already
    /// scanning is tolerated and leaves the running scan untouched.
    pub async fn start_scan(
        &mut self,
        radio: &dyn CentralRadio,
        gate: &RadioPermissionGate,
    ) -> Result<(), BleError> {
        gate.require(RadioOperation::Scan)?;

        if self.state().is_scanning() {
            info!("Scan already started, keeping the current session.");
            return Ok(());
        }

        radio.start_scan(self.filter).await.map_err(|e| {
            error!("Failed to start bluetooth scan: {}", e);
            BleError::failed(Stage::Scan, e)
        })?;

        let expires_at = chrono::Duration::from_std(self.period)
            .ok()
            .and_then(|period| Utc::now().checked_add_signed(period))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.generation += 1;
        self.expiry = Some(self.scheduler.schedule(
            self.period,
            Deadline::ScanExpired {
                generation: self.generation,
            },
        ));
        self.state.replace(ScanningState::Scanning { expires_at });

        info!(
            "Device scan started for service {}, expires at {}.",
            self.filter.service_uuid, expires_at
        );
        Ok(())
    }

    /// Stops the platform scan
    pub async fn stop_scan(
        &mut self,
        radio: &dyn CentralRadio,
        gate: &RadioPermissionGate,
    ) -> Result<(), BleError> {
        gate.require(RadioOperation::Scan)?;
        self.teardown(radio).await;
        Ok(())
    }

    /// Handles an expiry deadline; stale deadlines from earlier scans are ignored
    pub async fn on_expired(&mut self, radio: &dyn CentralRadio, generation: u64) {
        if generation != self.generation || !self.state().is_scanning() {
            return;
        }
        info!("Scan period elapsed, stopping scan.");
        self.teardown(radio).await;
    }

    /// Handles a scan failure callback
    pub fn on_scan_failed(&mut self, failure: ScanFailure) {
        if failure == ScanFailure::AlreadyStarted {
            warn!("Platform reports the scan as already started, continuing.");
            return;
        }
        error!("Bluetooth scan failed: {:?}", failure);
        self.cancel_expiry();
        self.state.replace(ScanningState::NotScanning);
    }

    /// Cancels the timer and stops the platform scan without a permission check
    pub(crate) async fn teardown(&mut self, radio: &dyn CentralRadio) {
        self.cancel_expiry();
        if self.state().is_scanning() {
            info!("Stopping Bluetooth scan.");
            if let Err(e) = radio.stop_scan().await {
                error!("Failed to stop bluetooth scan: {}", e);
            }
        } else {
            info!("No active scan to stop.");
        }
        self.state.replace(ScanningState::NotScanning);
    }

    fn cancel_expiry(&mut self) {
        if let Some(token) = self.expiry.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::permission::{GrantSet, Permission};
    use crate::core::bluetooth::sim::{CentralCall, SimulatedCentralRadio};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn scanner(period: Duration) -> (BluetoothScanner, mpsc::UnboundedReceiver<CentralMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scanner = BluetoothScanner::new(
            Arc::new(Store::new(ScanningState::NotScanning)),
            ScanFilter {
                service_uuid: Uuid::from_u128(0x1805),
            },
            period,
            DeadlineScheduler::new(tx),
        );
        (scanner, rx)
    }

    fn gate() -> RadioPermissionGate {
        RadioPermissionGate::new(31, Arc::new(GrantSet::all()))
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_deadline_stops_the_scan_once() {
        let radio = SimulatedCentralRadio::new();
        let (mut scanner, mut rx) = scanner(Duration::from_secs(60));

        scanner.start_scan(&radio, &gate()).await.unwrap();
        assert!(scanner.state().is_scanning());

        let generation = match rx.recv().await {
            Some(CentralMessage::Deadline(Deadline::ScanExpired { generation })) => generation,
            _ => panic!("expected a scan expiry"),
        };
        scanner.on_expired(&radio, generation).await;
        scanner.on_expired(&radio, generation).await;

        assert_eq!(scanner.state(), ScanningState::NotScanning);
        assert_eq!(radio.count(|call| matches!(call, CentralCall::StopScan)), 1);
    }

    #[tokio::test]
    async fn stale_expiry_is_ignored() {
        let radio = SimulatedCentralRadio::new();
        let (mut scanner, _rx) = scanner(Duration::from_secs(60));

        scanner.start_scan(&radio, &gate()).await.unwrap();
        scanner.stop_scan(&radio, &gate()).await.unwrap();
        scanner.start_scan(&radio, &gate()).await.unwrap();
        scanner.on_expired(&radio, 1).await;

        assert!(scanner.state().is_scanning());
        assert_eq!(radio.count(|call| matches!(call, CentralCall::StopScan)), 1);
    }

    #[tokio::test]
    async fn denied_scan_leaves_radio_alone() {
        let radio = SimulatedCentralRadio::new();
        let (mut scanner, _rx) = scanner(Duration::from_secs(60));
        let grants = GrantSet::new();
        grants.grant(Permission::BluetoothConnect);
        let gate = RadioPermissionGate::new(31, Arc::new(grants));

        assert_eq!(
            scanner.start_scan(&radio, &gate).await,
            Err(BleError::PermissionDenied {
                operation: RadioOperation::Scan,
                missing: Permission::BluetoothScan,
            })
        );
        assert!(radio.calls().is_empty());
        assert_eq!(scanner.state(), ScanningState::NotScanning);
    }

    #[tokio::test]
    async fn failures_other_than_already_started_end_the_scan() {
        let radio = SimulatedCentralRadio::new();
        let (mut scanner, _rx) = scanner(Duration::from_secs(60));

        scanner.start_scan(&radio, &gate()).await.unwrap();
        scanner.on_scan_failed(ScanFailure::AlreadyStarted);
        assert!(scanner.state().is_scanning());

        scanner.on_scan_failed(ScanFailure::FeatureUnsupported);
        assert_eq!(scanner.state(), ScanningState::NotScanning);
    }
}
