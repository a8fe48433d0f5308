//! Verification Coordinator: the lifecycle state machine.
//!
//! Every operation here takes the owner's critical section first, reads the
//! liveness record and trustee responses under it, and commits at most one
//! lifecycle transition before releasing it. Notifications go to the outbox
//! after the transition is committed.

pub mod locks;
pub mod machine;
pub mod scheduler;

pub use locks::{OwnerGuard, OwnerLocks};
pub use scheduler::Ticker;

use crate::core::{
    Clock, CycleId, LifecycleState, Result, TrusteeId, UserId, Verdict, VigilError,
};
use crate::liveness::{LivenessRecord, LivenessStore};
use crate::notify::{AlertKind, Notification, Outbox};
use crate::trustee::{QuorumTally, TrusteeRegistry, TrusteeRelationship};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one evaluation of an owner did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// Stable state; nothing to do.
    Unchanged { state: LifecycleState },
    /// ACTIVE -> PENDING_VERIFICATION
    CycleOpened {
        cycle_id: CycleId,
        trustees_notified: usize,
    },
    /// PENDING_VERIFICATION -> ACTIVE because a veto was found on evaluation.
    CycleClosed { cycle_id: CycleId },
    /// PENDING_VERIFICATION -> TRIGGERED
    Triggered { cycle_id: CycleId, confirmations: u32 },
}

/// Result of an explicit liveness confirmation.
#[derive(Debug, Clone)]
pub struct ActivityReceipt {
    pub record: LivenessRecord,
    pub closed_cycle: Option<CycleId>,
}

/// Result of a trustee's confirm/veto.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseReceipt {
    pub trustee_id: TrusteeId,
    pub cycle_id: CycleId,
    pub verdict: Verdict,
    pub tally: QuorumTally,
    pub required: u32,
    /// Owner state after the response was applied.
    pub state: LifecycleState,
}

/// Aggregate of one tick over all non-terminal owners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub evaluated: usize,
    pub cycles_opened: usize,
    pub cycles_closed: usize,
    pub triggered: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct VerificationCoordinator {
    liveness: Arc<LivenessStore>,
    trustees: Arc<TrusteeRegistry>,
    locks: Arc<OwnerLocks>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

impl VerificationCoordinator {
    pub fn new(
        liveness: Arc<LivenessStore>,
        trustees: Arc<TrusteeRegistry>,
        locks: Arc<OwnerLocks>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        Self {
            liveness,
            trustees,
            locks,
            clock,
            outbox,
        }
    }

    // ========================================================================
    // Activity ingestion
    // ========================================================================

    /// "Record liveness for user X now."
    pub async fn record_activity(&self, owner: &UserId) -> Result<ActivityReceipt> {
        let _guard = self.locks.lock(owner).await?;
        let now = self.clock.now();
        let outcome = self.liveness.record_activity(owner, now).await?;

        match outcome.closed_cycle {
            Some(cycle) => info!(owner = %owner, cycle = %cycle, "liveness confirmed, verification cycle closed"),
            None => debug!(owner = %owner, "liveness confirmed"),
        }

        Ok(ActivityReceipt {
            record: outcome.record,
            closed_cycle: outcome.closed_cycle,
        })
    }

    // ========================================================================
    // Trustee responses
    // ========================================================================

    /// A trustee confirms incapacitation or vetoes for `cycle_id`.
    ///
    /// A veto closes the cycle on the spot. A confirmation only records; the
    /// TRIGGERED transition happens on the next evaluation, which also sees
    /// any veto recorded in between.
    pub async fn record_cycle_response(
        &self,
        trustee_id: TrusteeId,
        cycle_id: CycleId,
        verdict: Verdict,
    ) -> Result<ResponseReceipt> {
        let owner = self.trustees.owner_of(trustee_id).await?;
        let _guard = self.locks.lock(&owner).await?;
        let now = self.clock.now();

        let record = self.liveness.get(&owner).await?;
        let trustee = self.trustees.get(trustee_id).await?;
        if !trustee.is_accepted() {
            return Err(reject(&owner, VigilError::NotAccepted(trustee_id.to_string())));
        }
        if record.open_cycle_id().is_none() && record.verification_cycle_id() == Some(cycle_id) {
            return Err(reject(
                &owner,
                VigilError::InvalidTransition(format!(
                    "cycle '{}' was already resolved; owner is {}",
                    cycle_id,
                    record.state()
                )),
            ));
        }

        self.trustees
            .record_cycle_response(trustee_id, cycle_id, record.open_cycle_id(), verdict, now)
            .await
            .map_err(|err| reject(&owner, err))?;

        let tally = self.trustees.tally(&owner, cycle_id).await;
        let mut state = record.state();

        if verdict == Verdict::Vetoed {
            let (record, _) = self
                .liveness
                .update(&owner, |record| record.close_cycle(now))
                .await?;
            state = record.state();
            info!(owner = %owner, cycle = %cycle_id, trustee = %trustee_id, "verification cycle vetoed");
            self.outbox.send(Notification::AdministratorAlert {
                owner: owner.clone(),
                cycle: cycle_id,
                kind: AlertKind::CycleVetoed,
            });
        } else {
            info!(
                owner = %owner,
                cycle = %cycle_id,
                trustee = %trustee_id,
                confirmations = tally.confirmations,
                required = record.required_confirmations(),
                "incapacitation confirmed by trustee"
            );
        }

        Ok(ResponseReceipt {
            trustee_id,
            cycle_id,
            verdict,
            tally,
            required: record.required_confirmations(),
            state,
        })
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluates one owner now.
    pub async fn evaluate(&self, owner: &UserId) -> Result<Evaluation> {
        let _guard = self.locks.lock(owner).await?;
        let now = self.clock.now();
        self.evaluate_locked(owner, now).await
    }

    async fn evaluate_locked(&self, owner: &UserId, now: DateTime<Utc>) -> Result<Evaluation> {
        let record = self.liveness.get(owner).await?;

        match record.state() {
            LifecycleState::Active if record.is_overdue(now) => self.open_cycle(owner, now).await,
            LifecycleState::PendingVerification => {
                let Some(cycle_id) = record.verification_cycle_id() else {
                    return Err(VigilError::InvalidTransition(format!(
                        "owner '{}' is pending without a cycle",
                        owner
                    )));
                };
                let tally = self.trustees.tally(owner, cycle_id).await;
                let required = record.required_confirmations();

                if tally.vetoed() {
                    self.liveness
                        .update(owner, |record| record.close_cycle(now))
                        .await?;
                    info!(owner = %owner, cycle = %cycle_id, "veto found on evaluation, cycle closed");
                    return Ok(Evaluation::CycleClosed { cycle_id });
                }

                if tally.meets(required) {
                    let (_, audit) = self
                        .liveness
                        .update(owner, |record| record.mark_triggered(tally.confirmations, now))
                        .await?;
                    info!(
                        owner = %owner,
                        cycle = %cycle_id,
                        confirmations = audit.confirmations,
                        required,
                        "quorum reached, owner TRIGGERED"
                    );
                    self.outbox.send(Notification::AdministratorAlert {
                        owner: owner.clone(),
                        cycle: cycle_id,
                        kind: AlertKind::QuorumReached,
                    });
                    return Ok(Evaluation::Triggered {
                        cycle_id,
                        confirmations: audit.confirmations,
                    });
                }

                Ok(Evaluation::Unchanged {
                    state: LifecycleState::PendingVerification,
                })
            }
            state => Ok(Evaluation::Unchanged { state }),
        }
    }

    async fn open_cycle(&self, owner: &UserId, now: DateTime<Utc>) -> Result<Evaluation> {
        let (record, cycle_id) = self
            .liveness
            .update(owner, |record| record.open_cycle(now))
            .await?;
        let accepted: Vec<TrusteeRelationship> = self.trustees.accepted_for(owner).await;

        if (accepted.len() as u32) < record.required_confirmations() {
            warn!(
                owner = %owner,
                cycle = %cycle_id,
                accepted = accepted.len(),
                required = record.required_confirmations(),
                "verification opened without enough accepted trustees to reach quorum"
            );
        }
        info!(owner = %owner, cycle = %cycle_id, trustees = accepted.len(), "owner overdue, verification cycle opened");

        for trustee in &accepted {
            self.outbox.send(Notification::VerificationRequested {
                owner: owner.clone(),
                trustee: trustee.trustee_id(),
                contact: trustee.contact().to_string(),
                cycle: cycle_id,
            });
        }
        self.outbox.send(Notification::AdministratorAlert {
            owner: owner.clone(),
            cycle: cycle_id,
            kind: AlertKind::CycleOpened,
        });

        Ok(Evaluation::CycleOpened {
            cycle_id,
            trustees_notified: accepted.len(),
        })
    }

    /// One pass over every non-terminal owner, evaluated concurrently.
    pub async fn tick(&self) -> TickReport {
        let owners = self.liveness.non_terminal_ids().await;
        let results = join_all(owners.iter().map(|owner| self.evaluate(owner))).await;

        let mut report = TickReport {
            evaluated: owners.len(),
            ..TickReport::default()
        };
        for (owner, result) in owners.iter().zip(results) {
            match result {
                Ok(Evaluation::Unchanged { .. }) => report.unchanged += 1,
                Ok(Evaluation::CycleOpened { .. }) => report.cycles_opened += 1,
                Ok(Evaluation::CycleClosed { .. }) => report.cycles_closed += 1,
                Ok(Evaluation::Triggered { .. }) => report.triggered += 1,
                // purged between listing and evaluation
                Err(VigilError::NotFound(_)) => report.unchanged += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(owner = %owner, error = %err, "evaluation failed");
                }
            }
        }
        report
    }
}

fn reject(owner: &UserId, err: VigilError) -> VigilError {
    debug!(owner = %owner, kind = err.kind(), error = %err, "trustee response rejected");
    err
}
