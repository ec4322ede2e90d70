//! Deadlines for the role drivers
//! A deadline is a message the driver receives on its own inbox once a delay has
//! elapsed, unless the returned token was cancelled first.

use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::types::DeviceAddress;

/// Timeouts the central driver arms. `generation` ties a deadline to the
/// scan or session that armed it, so a late deadline for a finished one is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline {
    ScanExpired {
        generation: u64,
    },
    Connect {
        address: DeviceAddress,
        generation: u64,
    },
    Disconnect {
        address: DeviceAddress,
        generation: u64,
    },
}

/// Schedules deadlines onto a driver inbox
pub struct DeadlineScheduler<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for DeadlineScheduler<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> DeadlineScheduler<M>
where
    M: From<Deadline> + Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self { tx }
    }

    /// Delivers `deadline` after `after` unless the returned token is cancelled
    pub fn schedule(&self, after: Duration, deadline: Deadline) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Deadline {:?} cancelled", deadline);
                }
                _ = sleep(after) => {
                    let _ = tx.send(M::from(deadline));
                }
            }
        });

        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Deadline>();
        let scheduler = DeadlineScheduler::new(tx);
        let _token =
            scheduler.schedule(Duration::from_secs(5), Deadline::ScanExpired { generation: 1 });

        sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), Deadline::ScanExpired { generation: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Deadline>();
        let scheduler = DeadlineScheduler::new(tx);
        let token =
            scheduler.schedule(Duration::from_secs(5), Deadline::ScanExpired { generation: 1 });
        token.cancel();

        sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
