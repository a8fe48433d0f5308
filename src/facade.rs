//! `Vigil`: one handle over the stores, the coordinator and the release
//! authority. Everything outside the crate (HTTP, binaries, tests) goes
//! through here.

use crate::assets::{AssetDirectory, InMemoryAssetDirectory};
use crate::beneficiary::{Beneficiary, BeneficiaryBook};
use crate::config::VigilConfig;
use crate::coordinator::{
    ActivityReceipt, Evaluation, OwnerLocks, ResponseReceipt, TickReport, VerificationCoordinator,
};
use crate::core::{
    AdminId, BeneficiaryId, Clock, CycleId, EnrollmentState, InvitationDecision, LifecycleState,
    Result, SystemClock, TrusteeId, UserId, Verdict, VigilError,
};
use crate::liveness::{LivenessRecord, LivenessStore, ReleaseAudit, TriggerAudit};
use crate::notify::Outbox;
use crate::release::{ReleaseAuthority, ReleaseReceipt};
use crate::storage::{DurabilityMode, Journal, StateSnapshot};
use crate::trustee::{InviteOutcome, TrusteeRegistry, TrusteeRelationship, normalize_contact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrusteeCounts {
    pub invited: usize,
    pub accepted: usize,
    pub declined: usize,
}

/// What an owner sees about their own switch.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    pub user_id: UserId,
    pub state: LifecycleState,
    pub last_active_at: DateTime<Utc>,
    pub inactivity_threshold_days: u32,
    pub deadline: DateTime<Utc>,
    pub seconds_remaining: i64,
    pub overdue: bool,
    pub open_cycle_id: Option<CycleId>,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub trustees: TrusteeCounts,
    pub beneficiaries: usize,
    pub trigger: Option<TriggerAudit>,
    pub release: Option<ReleaseAudit>,
}

/// An invitation as the invited contact sees it.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationView {
    pub trustee_id: TrusteeId,
    pub owner_user_id: UserId,
    pub relation_label: String,
    pub enrollment_state: EnrollmentState,
    pub owner_state: Option<LifecycleState>,
    /// Set only while the owner awaits verification and this trustee is ACCEPTED.
    pub open_cycle_id: Option<CycleId>,
}

/// One row of the administrator console.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub user_id: UserId,
    pub state: LifecycleState,
    pub cycle_id: Option<CycleId>,
    pub cycle_opened_at: Option<DateTime<Utc>>,
    pub last_active_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub confirmations: u32,
    pub vetoes: u32,
    pub required_confirmations: u32,
    pub accepted_trustees: u32,
    pub asset_count: usize,
    pub ready_for_release: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub inactivity_threshold_days: Option<u32>,
    pub required_confirmations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub user_id: UserId,
    pub cancelled_cycle: Option<CycleId>,
    pub trustees_removed: usize,
    pub beneficiaries_removed: usize,
}

// ============================================================================
// Builder
// ============================================================================

pub struct VigilBuilder {
    config: VigilConfig,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
    assets: Arc<dyn AssetDirectory>,
}

impl VigilBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetDirectory>) -> Self {
        self.assets = assets;
        self
    }

    /// Validates the configuration, opens the data directory if any, and
    /// restores snapshot + journal into the stores.
    pub async fn open(self) -> Result<Vigil> {
        self.config.validate()?;

        let journal = match (&self.config.data_dir, self.config.durability) {
            (Some(dir), mode) if mode != DurabilityMode::None => {
                std::fs::create_dir_all(dir)?;
                Some(Arc::new(Journal::open(
                    dir,
                    mode,
                    self.config.checkpoint_entries,
                )?))
            }
            _ => None,
        };

        let (liveness, trustees, beneficiaries) = match &journal {
            Some(journal) => (
                LivenessStore::with_journal(Arc::clone(journal)),
                TrusteeRegistry::with_journal(Arc::clone(journal)),
                BeneficiaryBook::with_journal(Arc::clone(journal)),
            ),
            None => (
                LivenessStore::new(),
                TrusteeRegistry::new(),
                BeneficiaryBook::new(),
            ),
        };

        if let Some(journal) = &journal {
            let recovered = journal.recover().await?;
            info!(
                records = recovered.records.len(),
                trustees = recovered.trustees.len(),
                beneficiaries = recovered.beneficiaries.len(),
                replayed = recovered.replayed_entries,
                "state recovered"
            );
            liveness.restore(recovered.records).await;
            trustees.restore(recovered.trustees).await;
            beneficiaries.restore(recovered.beneficiaries).await;
        }

        let liveness = Arc::new(liveness);
        let trustees = Arc::new(trustees);
        let beneficiaries = Arc::new(beneficiaries);
        let locks = Arc::new(OwnerLocks::new());

        let coordinator = VerificationCoordinator::new(
            Arc::clone(&liveness),
            Arc::clone(&trustees),
            Arc::clone(&locks),
            Arc::clone(&self.clock),
            self.outbox.clone(),
        );
        let release = ReleaseAuthority::new(
            Arc::clone(&liveness),
            Arc::clone(&beneficiaries),
            Arc::clone(&locks),
            Arc::clone(&self.clock),
            self.outbox,
        );

        Ok(Vigil {
            config: self.config,
            clock: self.clock,
            liveness,
            trustees,
            beneficiaries,
            assets: self.assets,
            locks,
            coordinator,
            release,
            journal,
        })
    }
}

// ============================================================================
// Vigil
// ============================================================================

pub struct Vigil {
    config: VigilConfig,
    clock: Arc<dyn Clock>,
    liveness: Arc<LivenessStore>,
    trustees: Arc<TrusteeRegistry>,
    beneficiaries: Arc<BeneficiaryBook>,
    assets: Arc<dyn AssetDirectory>,
    locks: Arc<OwnerLocks>,
    coordinator: VerificationCoordinator,
    release: ReleaseAuthority,
    journal: Option<Arc<Journal>>,
}

impl Vigil {
    pub fn builder(config: VigilConfig) -> VigilBuilder {
        VigilBuilder {
            config,
            clock: Arc::new(SystemClock),
            outbox: Outbox::disconnected(),
            assets: Arc::new(InMemoryAssetDirectory::new()),
        }
    }

    /// Opens an instance with the default clock and no notification sink.
    ///
    /// ```no_run
    /// use vigil::{DurabilityMode, Vigil, VigilConfig};
    ///
    /// # tokio_test::block_on(async {
    /// let config = VigilConfig::new()
    ///     .data_dir("./data")
    ///     .durability(DurabilityMode::Sync);
    /// let vigil = Vigil::open(config).await.unwrap();
    /// # });
    /// ```
    pub async fn open(config: VigilConfig) -> Result<Self> {
        Self::builder(config).open().await
    }

    /// In-memory instance with default settings.
    pub async fn in_memory() -> Result<Self> {
        Self::open(VigilConfig::new()).await
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    // ------------------------------------------------------------------------
    // Owners
    // ------------------------------------------------------------------------

    /// Registers an owner, ACTIVE as of now.
    pub async fn register_user(
        &self,
        user_id: &UserId,
        inactivity_threshold_days: Option<u32>,
    ) -> Result<LivenessRecord> {
        if user_id.as_str().trim().is_empty() {
            return Err(VigilError::Validation("user id must not be empty".to_string()));
        }
        let days = inactivity_threshold_days.unwrap_or(self.config.default_threshold_days);
        self.config.check_threshold(days)?;

        let _guard = self.locks.lock(user_id).await?;
        let record = LivenessRecord::new(
            user_id.clone(),
            self.clock.now(),
            days,
            self.config.required_confirmations,
        );
        let record = self.liveness.register(record).await?;
        info!(owner = %user_id, threshold_days = days, "owner registered");
        Ok(record)
    }

    pub async fn record_activity(&self, user_id: &UserId) -> Result<ActivityReceipt> {
        self.coordinator.record_activity(user_id).await
    }

    /// Changes check-in frequency and/or quorum. Refused once TRIGGERED.
    pub async fn update_settings(
        &self,
        user_id: &UserId,
        update: &SettingsUpdate,
    ) -> Result<LivenessRecord> {
        if let Some(days) = update.inactivity_threshold_days {
            self.config.check_threshold(days)?;
        }
        let _guard = self.locks.lock(user_id).await?;
        let accepted = self.trustees.accepted_count(user_id).await;
        if let Some(required) = update.required_confirmations {
            if required == 0 {
                return Err(VigilError::Validation(
                    "required confirmations must be at least 1".to_string(),
                ));
            }
            if required > accepted {
                return Err(VigilError::Validation(format!(
                    "required confirmations {} exceeds {} accepted trustees",
                    required, accepted
                )));
            }
        }

        let now = self.clock.now();
        let (record, ()) = self
            .liveness
            .update(user_id, |record| {
                if matches!(record.state(), LifecycleState::Triggered | LifecycleState::Released) {
                    return Err(VigilError::InvalidTransition(format!(
                        "settings are frozen while {}",
                        record.state()
                    )));
                }
                if let Some(days) = update.inactivity_threshold_days {
                    record.set_inactivity_threshold_days(days, now);
                }
                if let Some(required) = update.required_confirmations {
                    record.set_required_confirmations(required, now);
                }
                Ok(())
            })
            .await?;
        info!(
            owner = %user_id,
            threshold_days = record.inactivity_threshold_days(),
            required = record.required_confirmations(),
            "settings updated"
        );
        Ok(record)
    }

    pub async fn record(&self, user_id: &UserId) -> Result<LivenessRecord> {
        self.liveness.get(user_id).await
    }

    pub async fn status(&self, user_id: &UserId) -> Result<UserStatus> {
        let record = self.liveness.get(user_id).await?;
        let now = self.clock.now();

        let mut trustees = TrusteeCounts::default();
        for trustee in self.trustees.list_for_owner(user_id).await {
            match trustee.enrollment_state() {
                EnrollmentState::Invited => trustees.invited += 1,
                EnrollmentState::Accepted => trustees.accepted += 1,
                EnrollmentState::Declined => trustees.declined += 1,
                EnrollmentState::Removed => {}
            }
        }
        let confirmations = match record.open_cycle_id() {
            Some(cycle) => self.trustees.quorum_count(user_id, cycle).await,
            None => 0,
        };

        Ok(UserStatus {
            user_id: user_id.clone(),
            state: record.state(),
            last_active_at: record.last_active_at(),
            inactivity_threshold_days: record.inactivity_threshold_days(),
            deadline: record.deadline(),
            seconds_remaining: record.time_remaining(now).num_seconds(),
            overdue: record.is_overdue(now),
            open_cycle_id: record.open_cycle_id(),
            confirmations,
            required_confirmations: record.required_confirmations(),
            trustees,
            beneficiaries: self.beneficiaries.list_for_owner(user_id).await.len(),
            trigger: record.trigger().cloned(),
            release: record.release().cloned(),
        })
    }

    /// Removes an owner with everything attached to them. An open
    /// verification cycle is cancelled first so no response can land on it.
    pub async fn purge_user(&self, user_id: &UserId) -> Result<PurgeReport> {
        let _guard = self.locks.lock(user_id).await?;
        let record = self.liveness.get(user_id).await?;
        let now = self.clock.now();

        let cancelled_cycle = match record.open_cycle_id() {
            Some(_) => {
                let (_, closed) = self
                    .liveness
                    .update(user_id, |record| record.close_cycle(now))
                    .await?;
                closed
            }
            None => None,
        };
        let trustees_removed = self.trustees.purge_owner(user_id).await?.len();
        let beneficiaries_removed = self.beneficiaries.purge_owner(user_id).await?;
        self.liveness.remove(user_id).await?;

        info!(
            owner = %user_id,
            trustees = trustees_removed,
            beneficiaries = beneficiaries_removed,
            "owner purged"
        );
        Ok(PurgeReport {
            user_id: user_id.clone(),
            cancelled_cycle,
            trustees_removed,
            beneficiaries_removed,
        })
    }

    // ------------------------------------------------------------------------
    // Trustee network
    // ------------------------------------------------------------------------

    pub async fn invite_trustee(
        &self,
        owner: &UserId,
        contact: &str,
        relation: &str,
    ) -> Result<(TrusteeRelationship, InviteOutcome)> {
        let _guard = self.locks.lock(owner).await?;
        self.liveness.get(owner).await?;
        let (trustee, outcome) = self
            .trustees
            .invite(owner, contact, relation, self.clock.now())
            .await?;
        info!(owner = %owner, trustee = %trustee.trustee_id(), outcome = ?outcome, "trustee invited");
        Ok((trustee, outcome))
    }

    pub async fn remove_trustee(
        &self,
        owner: &UserId,
        trustee_id: TrusteeId,
    ) -> Result<TrusteeRelationship> {
        let _guard = self.locks.lock(owner).await?;
        let trustee = self
            .trustees
            .remove(owner, trustee_id, self.clock.now())
            .await?;
        info!(owner = %owner, trustee = %trustee_id, "trustee removed");
        Ok(trustee)
    }

    pub async fn trustees_of(&self, owner: &UserId) -> Result<Vec<TrusteeRelationship>> {
        self.liveness.get(owner).await?;
        Ok(self.trustees.list_for_owner(owner).await)
    }

    /// Looks up a relationship on behalf of `contact`; somebody else's
    /// relationship is `Forbidden`.
    pub async fn trustee_for_contact(
        &self,
        contact: &str,
        trustee_id: TrusteeId,
    ) -> Result<TrusteeRelationship> {
        let contact = normalize_contact(contact)?;
        let trustee = self.trustees.get(trustee_id).await?;
        if trustee.contact() != contact {
            debug!(trustee = %trustee_id, "relationship belongs to another contact");
            return Err(VigilError::Forbidden(format!(
                "trustee '{}' is not addressed to this contact",
                trustee_id
            )));
        }
        Ok(trustee)
    }

    pub async fn invitations_for(&self, contact: &str) -> Result<Vec<InvitationView>> {
        let mut views = Vec::new();
        for trustee in self.trustees.invitations_for(contact).await? {
            let owner = self.liveness.get(trustee.owner_user_id()).await.ok();
            let open_cycle_id = match &owner {
                Some(record) if trustee.is_accepted() => record.open_cycle_id(),
                _ => None,
            };
            views.push(InvitationView {
                trustee_id: trustee.trustee_id(),
                owner_user_id: trustee.owner_user_id().clone(),
                relation_label: trustee.relation_label().to_string(),
                enrollment_state: trustee.enrollment_state(),
                owner_state: owner.map(|r| r.state()),
                open_cycle_id,
            });
        }
        Ok(views)
    }

    /// Invited contact accepts or declines.
    pub async fn respond_to_invitation(
        &self,
        contact: &str,
        trustee_id: TrusteeId,
        decision: InvitationDecision,
    ) -> Result<TrusteeRelationship> {
        let owner = self
            .trustee_for_contact(contact, trustee_id)
            .await?
            .owner_user_id()
            .clone();
        let _guard = self.locks.lock(&owner).await?;
        let trustee = self
            .trustees
            .respond(trustee_id, decision, self.clock.now())
            .await?;
        info!(
            owner = %owner,
            trustee = %trustee_id,
            state = %trustee.enrollment_state(),
            "invitation answered"
        );
        Ok(trustee)
    }

    /// Trustee confirms incapacitation or vetoes, identified by contact.
    pub async fn submit_cycle_response(
        &self,
        contact: &str,
        trustee_id: TrusteeId,
        cycle_id: CycleId,
        verdict: Verdict,
    ) -> Result<ResponseReceipt> {
        self.trustee_for_contact(contact, trustee_id).await?;
        self.record_cycle_response(trustee_id, cycle_id, verdict).await
    }

    pub async fn record_cycle_response(
        &self,
        trustee_id: TrusteeId,
        cycle_id: CycleId,
        verdict: Verdict,
    ) -> Result<ResponseReceipt> {
        self.coordinator
            .record_cycle_response(trustee_id, cycle_id, verdict)
            .await
    }

    pub async fn quorum_count(&self, owner: &UserId, cycle_id: CycleId) -> u32 {
        self.trustees.quorum_count(owner, cycle_id).await
    }

    // ------------------------------------------------------------------------
    // Beneficiaries
    // ------------------------------------------------------------------------

    pub async fn add_beneficiary(
        &self,
        owner: &UserId,
        name: &str,
        contact: &str,
        relation: &str,
    ) -> Result<Beneficiary> {
        let _guard = self.locks.lock(owner).await?;
        self.liveness.get(owner).await?;
        let beneficiary = self
            .beneficiaries
            .add(owner, name, contact, relation, self.clock.now())
            .await?;
        info!(owner = %owner, beneficiary = %beneficiary.id, "beneficiary saved");
        Ok(beneficiary)
    }

    pub async fn remove_beneficiary(&self, owner: &UserId, id: BeneficiaryId) -> Result<Beneficiary> {
        let _guard = self.locks.lock(owner).await?;
        let removed = self.beneficiaries.remove(owner, id).await?;
        info!(owner = %owner, beneficiary = %id, "beneficiary removed");
        Ok(removed)
    }

    pub async fn beneficiaries_of(&self, owner: &UserId) -> Result<Vec<Beneficiary>> {
        self.liveness.get(owner).await?;
        Ok(self.beneficiaries.list_for_owner(owner).await)
    }

    // ------------------------------------------------------------------------
    // Coordinator and release
    // ------------------------------------------------------------------------

    pub async fn evaluate(&self, owner: &UserId) -> Result<Evaluation> {
        self.coordinator.evaluate(owner).await
    }

    pub async fn tick(&self) -> TickReport {
        self.coordinator.tick().await
    }

    pub async fn release(&self, owner: &UserId, admin: &AdminId) -> Result<ReleaseReceipt> {
        self.release.release(owner, admin).await
    }

    /// Owners awaiting verification or release, oldest deadline first.
    pub async fn admin_console(&self) -> Vec<ConsoleEntry> {
        let records = self
            .liveness
            .list_in_states(&[LifecycleState::PendingVerification, LifecycleState::Triggered])
            .await;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let owner = record.user_id();
            let tally = match record.verification_cycle_id() {
                Some(cycle) => self.trustees.tally(owner, cycle).await,
                None => Default::default(),
            };
            // A triggered record keeps the count that triggered it.
            let confirmations = record
                .trigger()
                .map(|t| t.confirmations)
                .unwrap_or(tally.confirmations);
            entries.push(ConsoleEntry {
                user_id: owner.clone(),
                state: record.state(),
                cycle_id: record.verification_cycle_id(),
                cycle_opened_at: record.cycle_opened_at(),
                last_active_at: record.last_active_at(),
                deadline: record.deadline(),
                confirmations,
                vetoes: tally.vetoes,
                required_confirmations: record.required_confirmations(),
                accepted_trustees: self.trustees.accepted_count(owner).await,
                asset_count: self.assets.asset_count(owner).await,
                ready_for_release: record.state() == LifecycleState::Triggered,
            });
        }
        entries.sort_by_key(|e| (e.state != LifecycleState::Triggered, e.deadline));
        entries
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Writes a snapshot of every store and truncates the journal.
    /// Returns `false` when running without a data directory.
    ///
    /// ```no_run
    /// # use vigil::Vigil;
    /// # tokio_test::block_on(async {
    /// # let vigil = Vigil::in_memory().await.unwrap();
    /// vigil.checkpoint().await.unwrap();
    /// # });
    /// ```
    pub async fn checkpoint(&self) -> Result<bool> {
        let Some(journal) = &self.journal else {
            return Ok(false);
        };
        let mut manager = journal.lock().await;
        let snapshot = StateSnapshot::new(
            self.liveness.list().await,
            self.trustees.list_all().await,
            self.beneficiaries.list_all().await,
            self.clock.now(),
        );
        manager.checkpoint(&snapshot)?;
        info!(
            records = snapshot.metadata.record_count,
            trustees = snapshot.metadata.trustee_count,
            beneficiaries = snapshot.metadata.beneficiary_count,
            "checkpoint written"
        );
        Ok(true)
    }

    pub async fn checkpoint_if_needed(&self) -> Result<bool> {
        match &self.journal {
            Some(journal) if journal.needs_checkpoint().await => self.checkpoint().await,
            _ => Ok(false),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::{Duration, TimeZone};

    async fn vigil() -> (Arc<ManualClock>, Vigil) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()));
        let vigil = Vigil::builder(VigilConfig::new())
            .clock(clock.clone())
            .open()
            .await
            .unwrap();
        (clock, vigil)
    }

    #[tokio::test]
    async fn register_validates_threshold() {
        let (_, vigil) = vigil().await;
        let err = vigil
            .register_user(&UserId::from("u"), Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));

        let record = vigil.register_user(&UserId::from("u"), None).await.unwrap();
        assert_eq!(record.inactivity_threshold_days(), 90);
        assert!(matches!(
            vigil.register_user(&UserId::from("u"), None).await,
            Err(VigilError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn quorum_setting_is_bounded_by_accepted_trustees() {
        let (_, vigil) = vigil().await;
        let owner = UserId::from("u");
        vigil.register_user(&owner, None).await.unwrap();
        let (t, _) = vigil.invite_trustee(&owner, "a@example.com", "sister").await.unwrap();
        vigil
            .respond_to_invitation("a@example.com", t.trustee_id(), InvitationDecision::Accept)
            .await
            .unwrap();

        let too_many = SettingsUpdate {
            required_confirmations: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            vigil.update_settings(&owner, &too_many).await,
            Err(VigilError::Validation(_))
        ));

        let one = SettingsUpdate {
            required_confirmations: Some(1),
            inactivity_threshold_days: Some(30),
        };
        let record = vigil.update_settings(&owner, &one).await.unwrap();
        assert_eq!(record.required_confirmations(), 1);
        assert_eq!(record.inactivity_threshold_days(), 30);
    }

    #[tokio::test]
    async fn other_contacts_cannot_answer_an_invitation() {
        let (_, vigil) = vigil().await;
        let owner = UserId::from("u");
        vigil.register_user(&owner, None).await.unwrap();
        let (t, _) = vigil.invite_trustee(&owner, "a@example.com", "friend").await.unwrap();

        let err = vigil
            .respond_to_invitation("mallory@example.com", t.trustee_id(), InvitationDecision::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Forbidden(_)));
    }

    #[tokio::test]
    async fn status_reports_deadline_and_counts() {
        let (clock, vigil) = vigil().await;
        let owner = UserId::from("u");
        vigil.register_user(&owner, Some(10)).await.unwrap();
        vigil.invite_trustee(&owner, "a@example.com", "friend").await.unwrap();
        clock.advance(Duration::days(4));

        let status = vigil.status(&owner).await.unwrap();
        assert_eq!(status.state, LifecycleState::Active);
        assert_eq!(status.seconds_remaining, Duration::days(6).num_seconds());
        assert_eq!(status.trustees.invited, 1);
        assert!(!status.overdue);
    }

    #[tokio::test]
    async fn purge_cancels_open_cycle() {
        let (clock, vigil) = vigil().await;
        let owner = UserId::from("u");
        vigil.register_user(&owner, Some(7)).await.unwrap();
        let (t, _) = vigil.invite_trustee(&owner, "a@example.com", "friend").await.unwrap();
        vigil
            .respond_to_invitation("a@example.com", t.trustee_id(), InvitationDecision::Accept)
            .await
            .unwrap();
        clock.advance(Duration::days(8));
        let Evaluation::CycleOpened { cycle_id, .. } = vigil.evaluate(&owner).await.unwrap() else {
            panic!("expected a new cycle");
        };

        let report = vigil.purge_user(&owner).await.unwrap();
        assert_eq!(report.cancelled_cycle, Some(cycle_id));
        assert_eq!(report.trustees_removed, 1);
        assert!(matches!(
            vigil
                .record_cycle_response(t.trustee_id(), cycle_id, Verdict::ConfirmedIncapacitated)
                .await,
            Err(VigilError::NotFound(_))
        ));
        assert!(vigil.admin_console().await.is_empty());
    }
}
