use crate::facade::Vigil;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Periodic driver: evaluates every owner, checkpoints the journal when it
/// has grown, and drops idle owner locks.
pub struct Ticker {
    vigil: Arc<Vigil>,
    period: Duration,
}

impl Ticker {
    pub fn new(vigil: Arc<Vigil>, period: Duration) -> Self {
        Self { vigil, period }
    }

    /// One tick.
    pub async fn run_once(&self) {
        let report = self.vigil.tick().await;
        if report.cycles_opened + report.cycles_closed + report.triggered + report.failed > 0 {
            info!(
                evaluated = report.evaluated,
                opened = report.cycles_opened,
                closed = report.cycles_closed,
                triggered = report.triggered,
                failed = report.failed,
                "tick"
            );
        } else {
            debug!(evaluated = report.evaluated, "tick");
        }

        if let Err(err) = self.vigil.checkpoint_if_needed().await {
            error!(error = %err, "checkpoint failed");
        }
        match self.vigil.locks().prune_idle() {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "idle owner locks dropped"),
            Err(err) => error!(error = %err, "owner lock table poisoned"),
        }
    }

    /// Ticks until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.period.as_secs(), "ticker started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.run_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("ticker stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VigilConfig;
    use crate::core::{LifecycleState, ManualClock, UserId};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn run_once_opens_overdue_cycles() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        let vigil = Arc::new(
            Vigil::builder(VigilConfig::new())
                .clock(clock.clone())
                .open()
                .await
                .unwrap(),
        );
        let owner = UserId::from("u");
        vigil.register_user(&owner, Some(7)).await.unwrap();
        clock.advance(chrono::Duration::days(8));

        Ticker::new(Arc::clone(&vigil), Duration::from_secs(1))
            .run_once()
            .await;

        assert_eq!(
            vigil.record(&owner).await.unwrap().state(),
            LifecycleState::PendingVerification
        );
        assert!(vigil.locks().is_empty().unwrap());
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let vigil = Arc::new(Vigil::in_memory().await.unwrap());
        let (tx, rx) = watch::channel(false);
        let handle = Ticker::new(vigil, Duration::from_millis(10)).spawn(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ticker must stop")
            .unwrap();
    }
}
