pub mod persistence;

pub use persistence::{
    DurabilityMode, JournalEntry, PersistenceManager, RecoveredState, SnapshotMetadata,
    StateSnapshot, recover_dir,
};

use crate::core::Result;
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

/// Journal lock held by a store between appending an entry and applying
/// the change it describes.
pub type JournalHold<'a> = MutexGuard<'a, PersistenceManager>;

/// Shared handle to the on-disk journal.
///
/// Stores write ahead: they append first and apply the change in memory
/// while still holding the journal lock, so a failed append leaves memory
/// untouched and a checkpoint never snapshots a state older than the
/// journal it truncates. Lock order is always journal, then store map.
/// Ordering of two entries for the same owner is guaranteed by the owner's
/// critical section.
pub struct Journal {
    inner: Mutex<PersistenceManager>,
}

impl Journal {
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        durability_mode: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> Result<Self> {
        let mut manager = PersistenceManager::new(data_dir, durability_mode)?;
        manager.journal_mut().set_checkpoint_threshold(checkpoint_threshold);
        Ok(Self {
            inner: Mutex::new(manager),
        })
    }

    /// Appends `entries` as one write and keeps the journal locked until the
    /// returned hold is dropped.
    pub async fn append_held(&self, entries: &[JournalEntry]) -> Result<JournalHold<'_>> {
        let mut manager = self.inner.lock().await;
        manager.log_batch(entries).inspect_err(|err| {
            tracing::error!(error = %err, "journal append failed");
        })?;
        Ok(manager)
    }

    pub async fn recover(&self) -> Result<RecoveredState> {
        self.inner.lock().await.recover()
    }

    pub async fn needs_checkpoint(&self) -> bool {
        self.inner.lock().await.needs_checkpoint()
    }

    /// Exclusive access for checkpointing.
    pub async fn lock(&self) -> JournalHold<'_> {
        self.inner.lock().await
    }
}

/// `Journal::append_held` for stores that may run without a journal.
pub async fn write_ahead<'a>(
    journal: Option<&'a Journal>,
    entries: &[JournalEntry],
) -> Result<Option<JournalHold<'a>>> {
    match journal {
        Some(journal) => journal.append_held(entries).await.map(Some),
        None => Ok(None),
    }
}
