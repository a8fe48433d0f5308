use crate::coordinator::machine::ensure_transition;
use crate::core::{AdminId, CycleId, LifecycleState, Result, UserId, VigilError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Audit of the quorum observation that moved a record to `TRIGGERED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerAudit {
    pub cycle_id: CycleId,
    pub confirmations: u32,
    pub required: u32,
    pub triggered_at: DateTime<Utc>,
}

/// Audit of the terminal release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAudit {
    pub released_at: DateTime<Utc>,
    pub released_by: AdminId,
}

/// Per-owner liveness record
///
/// Holds the deadline inputs and the lifecycle state. State only changes
/// through the transition methods below, each of which is checked against
/// the lifecycle machine first and leaves the record untouched on error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    user_id: UserId,
    last_active_at: DateTime<Utc>,
    inactivity_threshold_days: u32,
    required_confirmations: u32,
    state: LifecycleState,
    verification_cycle_id: Option<CycleId>,
    cycle_opened_at: Option<DateTime<Utc>>,
    trigger: Option<TriggerAudit>,
    release: Option<ReleaseAudit>,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// When a veto or cancellation last closed a cycle. Restarts the
    /// deadline without counting as owner activity.
    #[serde(default)]
    cycle_closed_at: Option<DateTime<Utc>>,
}

impl LivenessRecord {
    pub fn new(
        user_id: UserId,
        now: DateTime<Utc>,
        inactivity_threshold_days: u32,
        required_confirmations: u32,
    ) -> Self {
        Self {
            user_id,
            last_active_at: now,
            inactivity_threshold_days,
            required_confirmations,
            state: LifecycleState::Active,
            verification_cycle_id: None,
            cycle_opened_at: None,
            trigger: None,
            release: None,
            registered_at: now,
            updated_at: now,
            cycle_closed_at: None,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn inactivity_threshold_days(&self) -> u32 {
        self.inactivity_threshold_days
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::days(i64::from(self.inactivity_threshold_days))
    }

    pub fn required_confirmations(&self) -> u32 {
        self.required_confirmations
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Cycle id of the open or most recently resolved-by-quorum cycle.
    ///
    /// `None` while ACTIVE: a veto or liveness confirmation closes the cycle
    /// and every response tagged with it becomes inert.
    pub fn verification_cycle_id(&self) -> Option<CycleId> {
        self.verification_cycle_id
    }

    /// The cycle trustees may currently respond to.
    pub fn open_cycle_id(&self) -> Option<CycleId> {
        match self.state {
            LifecycleState::PendingVerification => self.verification_cycle_id,
            _ => None,
        }
    }

    pub fn cycle_opened_at(&self) -> Option<DateTime<Utc>> {
        self.cycle_opened_at
    }

    pub fn trigger(&self) -> Option<&TriggerAudit> {
        self.trigger.as_ref()
    }

    pub fn release(&self) -> Option<&ReleaseAudit> {
        self.release.as_ref()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn cycle_closed_at(&self) -> Option<DateTime<Utc>> {
        self.cycle_closed_at
    }

    /// `last_active_at + inactivity_threshold`, counted from the last cycle
    /// closure instead when that is later.
    pub fn deadline(&self) -> DateTime<Utc> {
        let since = match self.cycle_closed_at {
            Some(closed) if closed > self.last_active_at => closed,
            _ => self.last_active_at,
        };
        since + self.inactivity_threshold()
    }

    /// Strictly past the deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline()
    }

    /// Time left before the deadline, zero once overdue.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.deadline() - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub(crate) fn set_inactivity_threshold_days(&mut self, days: u32, now: DateTime<Utc>) {
        self.inactivity_threshold_days = days;
        self.updated_at = now;
    }

    pub(crate) fn set_required_confirmations(&mut self, required: u32, now: DateTime<Utc>) {
        self.required_confirmations = required;
        self.updated_at = now;
    }

    /// Explicit liveness confirmation.
    ///
    /// Returns the cycle that was closed, if the record was awaiting
    /// verification.
    pub(crate) fn confirm_liveness(&mut self, now: DateTime<Utc>) -> Result<Option<CycleId>> {
        let closed = if self.state == LifecycleState::PendingVerification {
            self.close_cycle(now)?
        } else {
            None
        };
        self.last_active_at = now;
        self.updated_at = now;
        Ok(closed)
    }

    /// ACTIVE -> PENDING_VERIFICATION with a freshly allocated cycle.
    pub(crate) fn open_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleId> {
        ensure_transition(self.state, LifecycleState::PendingVerification)?;
        let cycle_id = CycleId::new();
        self.state = LifecycleState::PendingVerification;
        self.verification_cycle_id = Some(cycle_id);
        self.cycle_opened_at = Some(now);
        self.updated_at = now;
        Ok(cycle_id)
    }

    /// PENDING_VERIFICATION -> ACTIVE. The deadline restarts from `now`;
    /// `last_active_at` is left to owner confirmations.
    pub(crate) fn close_cycle(&mut self, now: DateTime<Utc>) -> Result<Option<CycleId>> {
        ensure_transition(self.state, LifecycleState::Active)?;
        let closed = self.verification_cycle_id.take();
        self.state = LifecycleState::Active;
        self.cycle_opened_at = None;
        self.cycle_closed_at = Some(now);
        self.updated_at = now;
        Ok(closed)
    }

    /// PENDING_VERIFICATION -> TRIGGERED, recording the quorum observed.
    pub(crate) fn mark_triggered(
        &mut self,
        confirmations: u32,
        now: DateTime<Utc>,
    ) -> Result<TriggerAudit> {
        ensure_transition(self.state, LifecycleState::Triggered)?;
        let Some(cycle_id) = self.verification_cycle_id else {
            return Err(VigilError::InvalidTransition(
                "pending record has no verification cycle".to_string(),
            ));
        };
        let audit = TriggerAudit {
            cycle_id,
            confirmations,
            required: self.required_confirmations,
            triggered_at: now,
        };
        self.state = LifecycleState::Triggered;
        self.trigger = Some(audit.clone());
        self.updated_at = now;
        Ok(audit)
    }

    /// TRIGGERED -> RELEASED, recording who released and when.
    pub(crate) fn mark_released(&mut self, admin: AdminId, now: DateTime<Utc>) -> Result<ReleaseAudit> {
        ensure_transition(self.state, LifecycleState::Released)?;
        let audit = ReleaseAudit {
            released_at: now,
            released_by: admin,
        };
        self.state = LifecycleState::Released;
        self.release = Some(audit.clone());
        self.updated_at = now;
        Ok(audit)
    }
}

/// `last_active_at + inactivity_threshold`, or from the last cycle closure
/// when a veto came later.
pub fn compute_deadline(record: &LivenessRecord) -> DateTime<Utc> {
    record.deadline()
}

/// Strictly past the deadline.
pub fn is_overdue(record: &LivenessRecord, now: DateTime<Utc>) -> bool {
    record.is_overdue(now)
}
