//! Release Authority: the single human gate between TRIGGERED and RELEASED.

use crate::beneficiary::BeneficiaryBook;
use crate::coordinator::OwnerLocks;
use crate::core::{AdminId, Clock, LifecycleState, Result, UserId, VigilError};
use crate::liveness::LivenessStore;
use crate::notify::{Notification, Outbox};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseReceipt {
    pub owner: UserId,
    pub released_at: DateTime<Utc>,
    pub released_by: AdminId,
    /// `false` when the owner was already RELEASED and this call changed nothing.
    pub first_release: bool,
}

pub struct ReleaseAuthority {
    liveness: Arc<LivenessStore>,
    beneficiaries: Arc<BeneficiaryBook>,
    locks: Arc<OwnerLocks>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

impl ReleaseAuthority {
    pub fn new(
        liveness: Arc<LivenessStore>,
        beneficiaries: Arc<BeneficiaryBook>,
        locks: Arc<OwnerLocks>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        Self {
            liveness,
            beneficiaries,
            locks,
            clock,
            outbox,
        }
    }

    /// `release(owner_id, admin_id)`
    ///
    /// TRIGGERED moves to RELEASED and the asset store is signalled once.
    /// Releasing an owner that is already RELEASED returns the original
    /// audit. Anything else is `NotEligible`.
    pub async fn release(&self, owner: &UserId, admin: &AdminId) -> Result<ReleaseReceipt> {
        let _guard = self.locks.lock(owner).await?;
        let record = self.liveness.get(owner).await?;

        match record.state() {
            LifecycleState::Triggered => {
                let now = self.clock.now();
                let (_, audit) = self
                    .liveness
                    .update(owner, |record| record.mark_released(admin.clone(), now))
                    .await?;
                info!(owner = %owner, admin = %admin, "assets released");

                let beneficiaries = self.beneficiaries.list_for_owner(owner).await;
                self.outbox.send(Notification::AssetsReleased {
                    owner: owner.clone(),
                    admin: admin.clone(),
                    released_at: audit.released_at,
                    beneficiaries,
                });

                Ok(ReleaseReceipt {
                    owner: owner.clone(),
                    released_at: audit.released_at,
                    released_by: audit.released_by,
                    first_release: true,
                })
            }
            LifecycleState::Released => {
                let audit = record.release().cloned().ok_or_else(|| {
                    VigilError::Storage(format!("owner '{}' is RELEASED without a release audit", owner))
                })?;
                Ok(ReleaseReceipt {
                    owner: owner.clone(),
                    released_at: audit.released_at,
                    released_by: audit.released_by,
                    first_release: false,
                })
            }
            state => Err(VigilError::NotEligible(format!(
                "owner '{}' is {}, release requires TRIGGERED",
                owner, state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::liveness::LivenessRecord;
    use chrono::{Duration, TimeZone};

    async fn setup() -> (Arc<ManualClock>, Arc<LivenessStore>, ReleaseAuthority, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let liveness = Arc::new(LivenessStore::new());
        let (outbox, rx) = Outbox::channel();
        let authority = ReleaseAuthority::new(
            Arc::clone(&liveness),
            Arc::new(BeneficiaryBook::new()),
            Arc::new(OwnerLocks::new()),
            clock.clone(),
            outbox,
        );
        (clock, liveness, authority, rx)
    }

    #[tokio::test]
    async fn active_owner_is_not_eligible() {
        let (clock, liveness, authority, _rx) = setup().await;
        let owner = UserId::from("o");
        liveness
            .register(LivenessRecord::new(owner.clone(), clock.now(), 30, 1))
            .await
            .unwrap();

        let err = authority.release(&owner, &AdminId::from("root")).await.unwrap_err();
        assert!(matches!(err, VigilError::NotEligible(_)));
    }

    #[tokio::test]
    async fn second_release_returns_first_audit() {
        let (clock, liveness, authority, mut rx) = setup().await;
        let owner = UserId::from("o");
        liveness
            .register(LivenessRecord::new(owner.clone(), clock.now(), 30, 1))
            .await
            .unwrap();
        let now = clock.now();
        liveness
            .update(&owner, |r| {
                r.open_cycle(now)?;
                r.mark_triggered(1, now)
            })
            .await
            .unwrap();

        let first = authority.release(&owner, &AdminId::from("alice")).await.unwrap();
        clock.advance(Duration::hours(1));
        let second = authority.release(&owner, &AdminId::from("bob")).await.unwrap();

        assert!(first.first_release);
        assert!(!second.first_release);
        assert_eq!(second.released_by, AdminId::from("alice"));
        assert_eq!(second.released_at, first.released_at);
        assert!(matches!(rx.try_recv(), Ok(Notification::AssetsReleased { .. })));
        assert!(rx.try_recv().is_err());
    }
}
