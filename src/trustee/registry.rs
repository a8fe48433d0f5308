use super::relationship::{TrusteeRelationship, normalize_contact};
use crate::core::{
    CycleId, EnrollmentState, InvitationDecision, Result, TrusteeId, UserId, Verdict, VigilError,
};
use crate::storage::{Journal, JournalEntry, JournalHold, write_ahead};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What an `invite` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteOutcome {
    Created,
    /// Same contact already invited or accepted; relation label refreshed.
    Updated,
    /// Contact had declined or been removed and is invited again.
    Reinvited,
}

/// Responses of accepted trustees for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QuorumTally {
    pub confirmations: u32,
    pub vetoes: u32,
    pub accepted: u32,
}

impl QuorumTally {
    #[inline]
    pub fn vetoed(&self) -> bool {
        self.vetoes > 0
    }

    /// Quorum is met only with enough confirmations and no veto at all.
    pub fn meets(&self, required: u32) -> bool {
        !self.vetoed() && self.confirmations >= required
    }
}

#[derive(Default)]
struct RegistryState {
    trustees: HashMap<TrusteeId, TrusteeRelationship>,
    by_owner: HashMap<UserId, Vec<TrusteeId>>,
}

impl RegistryState {
    fn insert(&mut self, trustee: TrusteeRelationship) {
        let id = trustee.trustee_id();
        let ids = self.by_owner.entry(trustee.owner_user_id().clone()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.trustees.insert(id, trustee);
    }

    fn for_owner<'a>(&'a self, owner: &'a UserId) -> impl Iterator<Item = &'a TrusteeRelationship> {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| self.trustees.get(id))
    }
}

/// Durable per-owner trustee relationships
///
/// Changes are journaled before they are applied; callers serialize per
/// owner (see `OwnerLocks`).
pub struct TrusteeRegistry {
    state: RwLock<RegistryState>,
    journal: Option<Arc<Journal>>,
}

impl Default for TrusteeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TrusteeRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<Journal>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            journal: Some(journal),
        }
    }

    pub(crate) async fn restore(&self, trustees: HashMap<TrusteeId, TrusteeRelationship>) {
        let mut state = self.state.write().await;
        *state = RegistryState::default();
        let mut ordered: Vec<_> = trustees.into_values().collect();
        ordered.sort_by_key(|t| (t.invited_at(), t.trustee_id()));
        for trustee in ordered {
            state.insert(trustee);
        }
    }

    // ------------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------------

    /// `invite(owner_id, contact, relation)`
    ///
    /// Idempotent on (owner, contact): a repeated invite refreshes the
    /// relation label and keeps the same trustee id.
    pub async fn invite(
        &self,
        owner: &UserId,
        contact: &str,
        relation: &str,
        now: DateTime<Utc>,
    ) -> Result<(TrusteeRelationship, InviteOutcome)> {
        let contact = normalize_contact(contact)?;
        let relation = relation.trim().to_string();

        let existing = self
            .state
            .read()
            .await
            .for_owner(owner)
            .find(|t| t.contact() == contact)
            .cloned();

        let (trustee, outcome) = match existing {
            Some(mut trustee) => {
                let outcome = match trustee.enrollment_state() {
                    EnrollmentState::Invited | EnrollmentState::Accepted => InviteOutcome::Updated,
                    EnrollmentState::Declined | EnrollmentState::Removed => {
                        trustee.reinvite(now);
                        InviteOutcome::Reinvited
                    }
                };
                trustee.set_relation_label(relation, now);
                (trustee, outcome)
            }
            None => (
                TrusteeRelationship::invited(owner.clone(), contact, relation, now),
                InviteOutcome::Created,
            ),
        };

        let _hold = self.log(&[JournalEntry::Trustee(trustee.clone())]).await?;
        self.state.write().await.insert(trustee.clone());
        Ok((trustee, outcome))
    }

    /// `respond(trustee_id, accept|decline)`; only from INVITED.
    pub async fn respond(
        &self,
        trustee_id: TrusteeId,
        decision: InvitationDecision,
        now: DateTime<Utc>,
    ) -> Result<TrusteeRelationship> {
        self.update(trustee_id, |trustee| {
            if trustee.enrollment_state() != EnrollmentState::Invited {
                return Err(VigilError::InvalidTransition(format!(
                    "trustee '{}' is {}, not INVITED",
                    trustee_id,
                    trustee.enrollment_state()
                )));
            }
            let next = match decision {
                InvitationDecision::Accept => EnrollmentState::Accepted,
                InvitationDecision::Decline => EnrollmentState::Declined,
            };
            trustee.set_enrollment(next, now);
            Ok(())
        })
        .await
    }

    /// Owner withdraws a designation. Any state except REMOVED may move to
    /// REMOVED; the trustee stops counting immediately.
    pub async fn remove(
        &self,
        owner: &UserId,
        trustee_id: TrusteeId,
        now: DateTime<Utc>,
    ) -> Result<TrusteeRelationship> {
        self.update(trustee_id, |trustee| {
            if trustee.owner_user_id() != owner {
                return Err(not_found(trustee_id));
            }
            if trustee.enrollment_state() == EnrollmentState::Removed {
                return Err(VigilError::InvalidTransition(format!(
                    "trustee '{}' is already REMOVED",
                    trustee_id
                )));
            }
            trustee.set_enrollment(EnrollmentState::Removed, now);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Cycle responses
    // ------------------------------------------------------------------------

    /// Stores a trustee's verdict for `cycle_id`.
    ///
    /// `open_cycle` is the owner's current cycle as read by the caller under
    /// the owner's critical section; `None` when no cycle is open.
    pub async fn record_cycle_response(
        &self,
        trustee_id: TrusteeId,
        cycle_id: CycleId,
        open_cycle: Option<CycleId>,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Result<TrusteeRelationship> {
        self.update(trustee_id, |trustee| {
            if !trustee.is_accepted() {
                return Err(VigilError::NotAccepted(trustee_id.to_string()));
            }
            if open_cycle != Some(cycle_id) {
                return Err(VigilError::StaleCycle(cycle_id.to_string()));
            }
            trustee.set_response(cycle_id, verdict, now);
            Ok(())
        })
        .await
    }

    /// Confirmations for `cycle_id` from ACCEPTED trustees.
    pub async fn quorum_count(&self, owner: &UserId, cycle_id: CycleId) -> u32 {
        self.tally(owner, cycle_id).await.confirmations
    }

    /// Confirmations and vetoes of ACCEPTED trustees for `cycle_id`.
    pub async fn tally(&self, owner: &UserId, cycle_id: CycleId) -> QuorumTally {
        let state = self.state.read().await;
        state
            .for_owner(owner)
            .filter(|t| t.is_accepted())
            .fold(QuorumTally::default(), |mut tally, trustee| {
                tally.accepted += 1;
                match trustee.response_for(cycle_id) {
                    Some(Verdict::ConfirmedIncapacitated) => tally.confirmations += 1,
                    Some(Verdict::Vetoed) => tally.vetoes += 1,
                    None => {}
                }
                tally
            })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get(&self, trustee_id: TrusteeId) -> Result<TrusteeRelationship> {
        self.state
            .read()
            .await
            .trustees
            .get(&trustee_id)
            .cloned()
            .ok_or_else(|| not_found(trustee_id))
    }

    pub async fn owner_of(&self, trustee_id: TrusteeId) -> Result<UserId> {
        self.get(trustee_id).await.map(|t| t.owner_user_id().clone())
    }

    /// All relationships of an owner, in invitation order.
    pub async fn list_for_owner(&self, owner: &UserId) -> Vec<TrusteeRelationship> {
        self.state.read().await.for_owner(owner).cloned().collect()
    }

    pub async fn accepted_for(&self, owner: &UserId) -> Vec<TrusteeRelationship> {
        self.state
            .read()
            .await
            .for_owner(owner)
            .filter(|t| t.is_accepted())
            .cloned()
            .collect()
    }

    pub async fn accepted_count(&self, owner: &UserId) -> u32 {
        self.state
            .read()
            .await
            .for_owner(owner)
            .filter(|t| t.is_accepted())
            .count() as u32
    }

    /// Relationships naming `contact`, across owners. Removed ones are hidden.
    pub async fn invitations_for(&self, contact: &str) -> Result<Vec<TrusteeRelationship>> {
        let contact = normalize_contact(contact)?;
        let mut found: Vec<_> = self
            .state
            .read()
            .await
            .trustees
            .values()
            .filter(|t| t.contact() == contact && t.enrollment_state() != EnrollmentState::Removed)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.invited_at());
        Ok(found)
    }

    pub async fn list_all(&self) -> Vec<TrusteeRelationship> {
        self.state.read().await.trustees.values().cloned().collect()
    }

    /// Drops every relationship of `owner`.
    pub async fn purge_owner(&self, owner: &UserId) -> Result<Vec<TrusteeId>> {
        let ids = self
            .state
            .read()
            .await
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default();
        let entries: Vec<_> = ids.iter().copied().map(JournalEntry::TrusteePurged).collect();
        let _hold = self.log(&entries).await?;

        let mut state = self.state.write().await;
        state.by_owner.remove(owner);
        for id in &ids {
            state.trustees.remove(id);
        }
        Ok(ids)
    }

    async fn update<F>(&self, trustee_id: TrusteeId, f: F) -> Result<TrusteeRelationship>
    where
        F: FnOnce(&mut TrusteeRelationship) -> Result<()>,
    {
        let mut draft = self.get(trustee_id).await?;
        f(&mut draft)?;
        let _hold = self.log(&[JournalEntry::Trustee(draft.clone())]).await?;
        self.state.write().await.trustees.insert(trustee_id, draft.clone());
        Ok(draft)
    }

    async fn log(&self, entries: &[JournalEntry]) -> Result<Option<JournalHold<'_>>> {
        write_ahead(self.journal.as_deref(), entries).await
    }
}

fn not_found(trustee_id: TrusteeId) -> VigilError {
    VigilError::NotFound(format!("trustee '{}'", trustee_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> UserId {
        UserId::from("owner")
    }

    async fn accepted(registry: &TrusteeRegistry, contact: &str) -> TrusteeId {
        let now = Utc::now();
        let (trustee, _) = registry.invite(&owner(), contact, "friend", now).await.unwrap();
        registry
            .respond(trustee.trustee_id(), InvitationDecision::Accept, now)
            .await
            .unwrap();
        trustee.trustee_id()
    }

    #[tokio::test]
    async fn repeated_invite_updates_instead_of_duplicating() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();

        let (first, outcome) = registry
            .invite(&owner(), "ann@example.com", "sister", now)
            .await
            .unwrap();
        assert_eq!(outcome, InviteOutcome::Created);

        let (second, outcome) = registry
            .invite(&owner(), " ANN@example.com", "executor", now)
            .await
            .unwrap();
        assert_eq!(outcome, InviteOutcome::Updated);
        assert_eq!(first.trustee_id(), second.trustee_id());
        assert_eq!(second.relation_label(), "executor");
        assert_eq!(registry.list_for_owner(&owner()).await.len(), 1);
    }

    #[tokio::test]
    async fn declined_contact_can_be_reinvited() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();
        let (trustee, _) = registry
            .invite(&owner(), "bo@example.com", "friend", now)
            .await
            .unwrap();
        registry
            .respond(trustee.trustee_id(), InvitationDecision::Decline, now)
            .await
            .unwrap();

        let (again, outcome) = registry
            .invite(&owner(), "bo@example.com", "friend", now)
            .await
            .unwrap();

        assert_eq!(outcome, InviteOutcome::Reinvited);
        assert_eq!(again.trustee_id(), trustee.trustee_id());
        assert_eq!(again.enrollment_state(), EnrollmentState::Invited);
    }

    #[tokio::test]
    async fn respond_only_from_invited() {
        let registry = TrusteeRegistry::new();
        let id = accepted(&registry, "cy@example.com").await;

        let err = registry
            .respond(id, InvitationDecision::Decline, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, VigilError::InvalidTransition(_)));
        assert_eq!(
            registry.get(id).await.unwrap().enrollment_state(),
            EnrollmentState::Accepted
        );
    }

    #[tokio::test]
    async fn cycle_response_requires_acceptance_and_current_cycle() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();
        let cycle = CycleId::new();

        let (invited, _) = registry
            .invite(&owner(), "di@example.com", "friend", now)
            .await
            .unwrap();
        let err = registry
            .record_cycle_response(invited.trustee_id(), cycle, Some(cycle), Verdict::Vetoed, now)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotAccepted(_)));

        let id = accepted(&registry, "ed@example.com").await;
        let err = registry
            .record_cycle_response(id, CycleId::new(), Some(cycle), Verdict::ConfirmedIncapacitated, now)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::StaleCycle(_)));

        let err = registry
            .record_cycle_response(id, cycle, None, Verdict::ConfirmedIncapacitated, now)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::StaleCycle(_)));
    }

    #[tokio::test]
    async fn resubmission_overwrites() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();
        let cycle = CycleId::new();
        let id = accepted(&registry, "fay@example.com").await;

        for _ in 0..3 {
            registry
                .record_cycle_response(id, cycle, Some(cycle), Verdict::ConfirmedIncapacitated, now)
                .await
                .unwrap();
        }
        assert_eq!(registry.quorum_count(&owner(), cycle).await, 1);

        registry
            .record_cycle_response(id, cycle, Some(cycle), Verdict::Vetoed, now)
            .await
            .unwrap();
        let tally = registry.tally(&owner(), cycle).await;
        assert_eq!(tally.confirmations, 0);
        assert!(tally.vetoed());
    }

    #[tokio::test]
    async fn removed_trustees_stop_counting() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();
        let cycle = CycleId::new();
        let a = accepted(&registry, "a@example.com").await;
        let b = accepted(&registry, "b@example.com").await;
        for id in [a, b] {
            registry
                .record_cycle_response(id, cycle, Some(cycle), Verdict::ConfirmedIncapacitated, now)
                .await
                .unwrap();
        }
        assert!(registry.tally(&owner(), cycle).await.meets(2));

        registry.remove(&owner(), b, now).await.unwrap();

        assert_eq!(registry.quorum_count(&owner(), cycle).await, 1);
        assert_eq!(registry.accepted_count(&owner()).await, 1);
        assert!(matches!(
            registry.remove(&owner(), b, now).await,
            Err(VigilError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn other_owners_cannot_remove() {
        let registry = TrusteeRegistry::new();
        let id = accepted(&registry, "g@example.com").await;
        let err = registry
            .remove(&UserId::from("mallory"), id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn invitations_are_found_by_contact() {
        let registry = TrusteeRegistry::new();
        let now = Utc::now();
        registry.invite(&owner(), "h@example.com", "friend", now).await.unwrap();
        registry
            .invite(&UserId::from("other"), "H@example.com", "uncle", now)
            .await
            .unwrap();

        assert_eq!(registry.invitations_for("h@example.com").await.unwrap().len(), 2);
        assert!(registry.invitations_for("nobody@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_drops_everything_for_owner() {
        let registry = TrusteeRegistry::new();
        accepted(&registry, "i@example.com").await;
        accepted(&registry, "j@example.com").await;

        let removed = registry.purge_owner(&owner()).await.unwrap();

        assert_eq!(removed.len(), 2);
        assert!(registry.list_for_owner(&owner()).await.is_empty());
        assert!(registry.list_all().await.is_empty());
    }
}
