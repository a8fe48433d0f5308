//! Write-ahead journal and snapshot persistence for the custody stores

use crate::beneficiary::Beneficiary;
use crate::core::{BeneficiaryId, Result, TrusteeId, UserId, VigilError};
use crate::liveness::LivenessRecord;
use crate::trustee::TrusteeRelationship;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const JOURNAL_FILE: &str = "journal.wal";
pub const SNAPSHOT_FILE: &str = "vigil.snapshot";

const SNAPSHOT_VERSION: u32 = 1;

/// Upper bound on one encoded entry. A length header above this is corrupt.
pub const MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// Journal Entry Types
// ============================================================================

/// One store mutation. Entries carry whole rows; replay is last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalEntry {
    Liveness(LivenessRecord),
    LivenessPurged(UserId),
    Trustee(TrusteeRelationship),
    TrusteePurged(TrusteeId),
    Beneficiary(Beneficiary),
    BeneficiaryRemoved(BeneficiaryId),
}

// ============================================================================
// State Snapshot
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub records: Vec<LivenessRecord>,
    pub trustees: Vec<TrusteeRelationship>,
    pub beneficiaries: Vec<Beneficiary>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub trustee_count: usize,
    pub beneficiary_count: usize,
}

impl StateSnapshot {
    pub fn new(
        records: Vec<LivenessRecord>,
        trustees: Vec<TrusteeRelationship>,
        beneficiaries: Vec<Beneficiary>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let metadata = SnapshotMetadata {
            created_at: Some(created_at),
            record_count: records.len(),
            trustee_count: trustees.len(),
            beneficiary_count: beneficiaries.len(),
        };
        Self {
            version: SNAPSHOT_VERSION,
            records,
            trustees,
            beneficiaries,
            metadata,
        }
    }
}

/// Store contents rebuilt from snapshot + journal.
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub records: HashMap<UserId, LivenessRecord>,
    pub trustees: HashMap<TrusteeId, TrusteeRelationship>,
    pub beneficiaries: HashMap<BeneficiaryId, Beneficiary>,
    pub replayed_entries: usize,
}

impl RecoveredState {
    fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            records: snapshot
                .records
                .into_iter()
                .map(|r| (r.user_id().clone(), r))
                .collect(),
            trustees: snapshot
                .trustees
                .into_iter()
                .map(|t| (t.trustee_id(), t))
                .collect(),
            beneficiaries: snapshot
                .beneficiaries
                .into_iter()
                .map(|b| (b.id, b))
                .collect(),
            replayed_entries: 0,
        }
    }

    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Liveness(record) => {
                self.records.insert(record.user_id().clone(), record);
            }
            JournalEntry::LivenessPurged(user_id) => {
                self.records.remove(&user_id);
            }
            JournalEntry::Trustee(trustee) => {
                self.trustees.insert(trustee.trustee_id(), trustee);
            }
            JournalEntry::TrusteePurged(trustee_id) => {
                self.trustees.remove(&trustee_id);
            }
            JournalEntry::Beneficiary(beneficiary) => {
                self.beneficiaries.insert(beneficiary.id, beneficiary);
            }
            JournalEntry::BeneficiaryRemoved(id) => {
                self.beneficiaries.remove(&id);
            }
        }
        self.replayed_entries += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.trustees.is_empty() && self.beneficiaries.is_empty()
    }

    pub fn into_snapshot(self, created_at: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot::new(
            self.records.into_values().collect(),
            self.trustees.into_values().collect(),
            self.beneficiaries.into_values().collect(),
            created_at,
        )
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every journal append
    Sync,
    /// flush to the OS after every append
    #[default]
    Async,
    /// keep nothing on disk
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" | "memory" => Ok(Self::None),
            other => Err(format!("unknown durability mode '{other}' (sync, async, none)")),
        }
    }
}

fn storage_err(action: &str, err: impl std::fmt::Display) -> VigilError {
    VigilError::Storage(format!("Failed to {action}: {err}"))
}

// ============================================================================
// Journal Writer
// ============================================================================

pub struct JournalWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    /// Bytes of complete entries on disk.
    len: u64,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl JournalWriter {
    pub fn new<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_err("create journal directory", e))?;
        }

        let mut len = 0;
        let file = if durability_mode != DurabilityMode::None {
            let (_, valid_len) = scan_journal(&path)?;
            len = valid_len;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| storage_err("open journal", e))?;
            let on_disk = file
                .metadata()
                .map_err(|e| storage_err("stat journal", e))?
                .len();
            if on_disk > valid_len {
                tracing::warn!(path = %path.display(), bytes = on_disk - valid_len, "truncating torn journal tail");
                file.set_len(valid_len)
                    .map_err(|e| storage_err("truncate torn journal tail", e))?;
            }
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            durability_mode,
            len,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Appends `entries` as one write. On failure nothing of the batch is
    /// left behind, so memory and journal stay in step.
    pub fn append_batch(&mut self, entries: &[JournalEntry]) -> Result<()> {
        if self.durability_mode == DurabilityMode::None || entries.is_empty() {
            return Ok(());
        }
        let mut frame = Vec::new();
        for entry in entries {
            let serialized =
                rmp_serde::to_vec(entry).map_err(|e| storage_err("serialize journal entry", e))?;
            if serialized.len() > MAX_ENTRY_BYTES {
                return Err(VigilError::Storage(format!(
                    "journal entry of {} bytes exceeds {}",
                    serialized.len(),
                    MAX_ENTRY_BYTES
                )));
            }
            frame.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
            frame.extend_from_slice(&serialized);
        }

        if let Err(err) = self.write_frame(&frame) {
            self.discard_unwritten();
            return Err(err);
        }
        self.len += frame.len() as u64;
        self.entries_since_checkpoint += entries.len();
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| VigilError::Storage("journal file not initialized".to_string()))?;
        file.write_all(frame)
            .map_err(|e| storage_err("write journal", e))?;
        file.flush().map_err(|e| storage_err("flush journal", e))?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| storage_err("sync journal", e))?;
        }
        Ok(())
    }

    /// Drops buffered bytes of a failed write and cuts the file back to the
    /// last complete entry.
    fn discard_unwritten(&mut self) {
        let Some(writer) = self.file.take() else {
            return;
        };
        let (file, _unwritten) = writer.into_parts();
        if let Err(err) = file.set_len(self.len) {
            tracing::warn!(path = %self.path.display(), error = %err, "could not trim failed journal append");
        }
        self.file = Some(BufWriter::new(file));
    }

    /// Reads every complete entry. A torn trailing entry (crash mid-append)
    /// is dropped.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        read_journal(&self.path)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.file = None;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| storage_err("truncate journal", e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| storage_err("open journal", e))?;
        self.file = Some(BufWriter::new(file));
        self.len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    scan_journal(path).map(|(entries, _)| entries)
}

/// Complete entries plus the byte length they occupy.
fn scan_journal(path: &Path) -> Result<(Vec<JournalEntry>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let file = File::open(path).map_err(|e| storage_err("open journal for reading", e))?;
    let file_len = file
        .metadata()
        .map_err(|e| storage_err("stat journal", e))?
        .len();
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();
    let mut valid_len = 0u64;
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(storage_err("read journal entry length", e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_ENTRY_BYTES || valid_len + 4 + len as u64 > file_len {
            tracing::warn!(path = %path.display(), len, "dropping journal tail with a bad length header");
            break;
        }
        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!(path = %path.display(), "dropping torn journal tail");
                break;
            }
            Err(e) => return Err(storage_err("read journal entry data", e)),
        }
        let entry: JournalEntry =
            rmp_serde::from_slice(&data).map_err(|e| storage_err("deserialize journal entry", e))?;
        entries.push(entry);
        valid_len += 4 + len as u64;
    }
    Ok((entries, valid_len))
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes to a temp file in the same directory, then renames over the
    /// previous snapshot.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let dir = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| storage_err("create snapshot directory", e))?;

        let serialized = rmp_serde::to_vec(snapshot).map_err(|e| storage_err("serialize snapshot", e))?;
        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| storage_err("create temp file", e))?;
        temp.write_all(&serialized)
            .map_err(|e| storage_err("write snapshot", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| storage_err("sync snapshot", e))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| storage_err("rename snapshot", e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path).map_err(|e| storage_err("open snapshot", e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| storage_err("read snapshot", e))?;
        let snapshot: StateSnapshot =
            rmp_serde::from_slice(&data).map_err(|e| storage_err("deserialize snapshot", e))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(VigilError::Storage(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    journal: JournalWriter,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let journal = JournalWriter::new(data_dir.join(JOURNAL_FILE), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        Ok(Self {
            journal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &JournalEntry) -> Result<()> {
        self.journal.append(entry)
    }

    pub fn log_batch(&mut self, entries: &[JournalEntry]) -> Result<()> {
        self.journal.append_batch(entries)
    }

    pub fn checkpoint(&mut self, snapshot: &StateSnapshot) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(snapshot)?;
        self.journal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.journal.needs_checkpoint()
    }

    pub fn recover(&self) -> Result<RecoveredState> {
        let mut state = match self.snapshot.load()? {
            Some(snapshot) => RecoveredState::from_snapshot(snapshot),
            None => RecoveredState::default(),
        };
        for entry in self.journal.read_all()? {
            state.apply(entry);
        }
        Ok(state)
    }

    pub fn journal(&self) -> &JournalWriter {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut JournalWriter {
        &mut self.journal
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

/// Offline recovery of a data directory, without opening it for writing.
pub fn recover_dir(data_dir: &Path) -> Result<(Option<SnapshotMetadata>, RecoveredState)> {
    let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE)).load()?;
    let metadata = snapshot.as_ref().map(|s| s.metadata.clone());
    let mut state = snapshot
        .map(RecoveredState::from_snapshot)
        .unwrap_or_default();
    for entry in read_journal(&data_dir.join(JOURNAL_FILE))? {
        state.apply(entry);
    }
    Ok((metadata, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LifecycleState;
    use tempfile::TempDir;

    fn record(id: &str) -> LivenessRecord {
        LivenessRecord::new(UserId::from(id), Utc::now(), 90, 2)
    }

    #[test]
    fn test_journal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let mut journal = JournalWriter::new(temp_dir.path().join("test.wal"), DurabilityMode::Sync).unwrap();
        journal.append(&JournalEntry::Liveness(record("alice"))).unwrap();
        journal.append(&JournalEntry::LivenessPurged(UserId::from("alice"))).unwrap();
        assert_eq!(journal.read_all().unwrap().len(), 2);
        assert_eq!(journal.entries_since_checkpoint(), 2);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut journal = JournalWriter::new(&path, DurabilityMode::Sync).unwrap();
        journal.append(&JournalEntry::Liveness(record("alice"))).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        assert_eq!(read_journal(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_length_header_is_not_trusted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut journal = JournalWriter::new(&path, DurabilityMode::Sync).unwrap();
        journal.append(&JournalEntry::Liveness(record("alice"))).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        file.write_all(&[0; 16]).unwrap();

        assert_eq!(read_journal(&path).unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_append_is_not_counted() {
        let mut journal = JournalWriter::new("/dev/full", DurabilityMode::Async).unwrap();
        let err = journal
            .append_batch(&[
                JournalEntry::Liveness(record("alice")),
                JournalEntry::LivenessPurged(UserId::from("bob")),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), "storage_error");
        assert_eq!(journal.entries_since_checkpoint(), 0);
    }

    #[test]
    fn test_checkpoint_clears_journal() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        persistence.log(&JournalEntry::Liveness(record("alice"))).unwrap();
        assert_eq!(persistence.journal().entries_since_checkpoint(), 1);

        let snapshot = StateSnapshot::new(vec![record("alice")], vec![], vec![], Utc::now());
        persistence.checkpoint(&snapshot).unwrap();

        assert_eq!(persistence.journal().entries_since_checkpoint(), 0);
        assert!(persistence.journal().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_recovery_replays_journal_over_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();

        let snapshot = StateSnapshot::new(vec![record("alice"), record("bob")], vec![], vec![], Utc::now());
        persistence.checkpoint(&snapshot).unwrap();

        let mut alice = record("alice");
        alice.open_cycle(Utc::now()).unwrap();
        persistence.log(&JournalEntry::Liveness(alice)).unwrap();
        persistence.log(&JournalEntry::LivenessPurged(UserId::from("bob"))).unwrap();

        let recovered = persistence.recover().unwrap();
        assert_eq!(recovered.replayed_entries, 2);
        assert_eq!(recovered.records.len(), 1);
        assert_eq!(
            recovered.records[&UserId::from("alice")].state(),
            LifecycleState::PendingVerification
        );
    }

    #[test]
    fn test_memory_mode_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence = PersistenceManager::new(temp_dir.path(), DurabilityMode::None).unwrap();
        persistence.log(&JournalEntry::Liveness(record("alice"))).unwrap();
        assert!(!temp_dir.path().join(JOURNAL_FILE).exists());
        assert!(persistence.recover().unwrap().is_empty());
    }

    #[test]
    fn test_durability_mode_parsing() {
        assert_eq!("SYNC".parse::<DurabilityMode>().unwrap(), DurabilityMode::Sync);
        assert_eq!("memory".parse::<DurabilityMode>().unwrap(), DurabilityMode::None);
        assert!("eventually".parse::<DurabilityMode>().is_err());
    }
}
