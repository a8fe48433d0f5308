use super::record::LivenessRecord;
use crate::core::{CycleId, LifecycleState, Result, UserId, VigilError};
use crate::storage::{Journal, JournalEntry, JournalHold, write_ahead};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of a liveness confirmation.
#[derive(Debug, Clone)]
pub struct ActivityOutcome {
    pub record: LivenessRecord,
    /// Cycle invalidated by this confirmation, if one was open.
    pub closed_cycle: Option<CycleId>,
}

/// Durable per-owner liveness records
///
/// Mutations run on a copy of the record. The copy is journaled first and
/// only then installed, so neither a rejected transition nor a failed
/// journal write leaves a half-applied record behind. Callers serialize per
/// owner (see `OwnerLocks`).
pub struct LivenessStore {
    records: RwLock<HashMap<UserId, LivenessRecord>>,
    journal: Option<Arc<Journal>>,
}

impl Default for LivenessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<Journal>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            journal: Some(journal),
        }
    }

    pub(crate) async fn restore(&self, records: HashMap<UserId, LivenessRecord>) {
        *self.records.write().await = records;
    }

    /// Creates the record at registration. Records are never created lazily.
    pub async fn register(&self, record: LivenessRecord) -> Result<LivenessRecord> {
        if self.contains(record.user_id()).await {
            return Err(VigilError::InvalidTransition(format!(
                "user '{}' is already registered",
                record.user_id()
            )));
        }
        let _hold = self.log(JournalEntry::Liveness(record.clone())).await?;
        self.records
            .write()
            .await
            .insert(record.user_id().clone(), record.clone());
        Ok(record)
    }

    pub async fn get(&self, user_id: &UserId) -> Result<LivenessRecord> {
        self.records
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found(user_id))
    }

    pub async fn contains(&self, user_id: &UserId) -> bool {
        self.records.read().await.contains_key(user_id)
    }

    /// Applies `f` to a copy of the record and commits it if `f` succeeds.
    pub async fn update<F, T>(&self, user_id: &UserId, f: F) -> Result<(LivenessRecord, T)>
    where
        F: FnOnce(&mut LivenessRecord) -> Result<T>,
    {
        let current = self.get(user_id).await?;
        let mut draft = current.clone();
        let value = f(&mut draft)?;
        if draft == current {
            return Ok((draft, value));
        }
        let _hold = self.log(JournalEntry::Liveness(draft.clone())).await?;
        self.records
            .write()
            .await
            .insert(user_id.clone(), draft.clone());
        Ok((draft, value))
    }

    /// Sets `last_active_at = now`. A record awaiting verification returns to
    /// ACTIVE and its cycle is closed for good.
    pub async fn record_activity(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<ActivityOutcome> {
        let (record, closed_cycle) = self
            .update(user_id, |record| record.confirm_liveness(now))
            .await?;
        Ok(ActivityOutcome {
            record,
            closed_cycle,
        })
    }

    pub async fn remove(&self, user_id: &UserId) -> Result<LivenessRecord> {
        self.get(user_id).await?;
        let _hold = self.log(JournalEntry::LivenessPurged(user_id.clone())).await?;
        self.records
            .write()
            .await
            .remove(user_id)
            .ok_or_else(|| not_found(user_id))
    }

    pub async fn list(&self) -> Vec<LivenessRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        records
    }

    pub async fn list_in_states(&self, states: &[LifecycleState]) -> Vec<LivenessRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| states.contains(&r.state()))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        records
    }

    /// Owners the coordinator still has work for.
    pub async fn non_terminal_ids(&self) -> Vec<UserId> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.state().is_terminal())
            .map(|r| r.user_id().clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn log(&self, entry: JournalEntry) -> Result<Option<JournalHold<'_>>> {
        write_ahead(self.journal.as_deref(), &[entry]).await
    }
}

fn not_found(user_id: &UserId) -> VigilError {
    VigilError::NotFound(format!("no liveness record for user '{}'", user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn owner() -> UserId {
        UserId::from("owner-1")
    }

    async fn store_with_owner(now: DateTime<Utc>) -> LivenessStore {
        let store = LivenessStore::new();
        store
            .register(LivenessRecord::new(owner(), now, 7, 2))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = LivenessStore::new();
        let err = store
            .record_activity(&UserId::from("ghost"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let now = Utc::now();
        let store = store_with_owner(now).await;
        let err = store
            .register(LivenessRecord::new(owner(), now, 30, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::InvalidTransition(_)));
        assert_eq!(store.get(&owner()).await.unwrap().inactivity_threshold_days(), 7);
    }

    #[tokio::test]
    async fn activity_moves_the_deadline() {
        let now = Utc::now();
        let store = store_with_owner(now).await;
        let later = now + Duration::days(5);

        let outcome = store.record_activity(&owner(), later).await.unwrap();

        assert_eq!(outcome.closed_cycle, None);
        assert_eq!(outcome.record.deadline(), later + Duration::days(7));
    }

    #[tokio::test]
    async fn failed_update_is_not_committed() {
        let now = Utc::now();
        let store = store_with_owner(now).await;

        let result = store
            .update(&owner(), |record| {
                record.set_inactivity_threshold_days(300, now);
                record.mark_triggered(2, now)
            })
            .await;

        assert!(matches!(result, Err(VigilError::InvalidTransition(_))));
        assert_eq!(store.get(&owner()).await.unwrap().inactivity_threshold_days(), 7);
    }

    #[tokio::test]
    async fn non_terminal_ids_skip_released() {
        let now = Utc::now();
        let store = store_with_owner(now).await;
        store
            .register(LivenessRecord::new(UserId::from("done"), now, 7, 2))
            .await
            .unwrap();
        store
            .update(&UserId::from("done"), |record| {
                record.open_cycle(now)?;
                record.mark_triggered(2, now)?;
                record.mark_released("root".into(), now)
            })
            .await
            .unwrap();

        assert_eq!(store.non_terminal_ids().await, vec![owner()]);
        assert_eq!(store.len().await, 2);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn journal_failure_leaves_records_untouched() {
        use crate::storage::DurabilityMode;
        use crate::storage::persistence::JOURNAL_FILE;

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/dev/full", dir.path().join(JOURNAL_FILE)).unwrap();
        let journal = Arc::new(Journal::open(dir.path(), DurabilityMode::Async, 1000).unwrap());
        let store = LivenessStore::with_journal(journal);

        let err = store
            .register(LivenessRecord::new(owner(), Utc::now(), 7, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, VigilError::Storage(_)));
        assert!(store.is_empty().await);
    }
}
