//! Beneficiary book: who receives access when an owner's assets are released.

use crate::core::{BeneficiaryId, Result, UserId, VigilError};
use crate::storage::{Journal, JournalEntry, JournalHold, write_ahead};
use crate::trustee::normalize_contact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: BeneficiaryId,
    pub owner_user_id: UserId,
    pub name: String,
    pub contact: String,
    pub relation_label: String,
    pub added_at: DateTime<Utc>,
}

/// Owners' beneficiaries, journaled ahead of every change.
pub struct BeneficiaryBook {
    entries: RwLock<HashMap<BeneficiaryId, Beneficiary>>,
    journal: Option<Arc<Journal>>,
}

impl Default for BeneficiaryBook {
    fn default() -> Self {
        Self::new()
    }
}

impl BeneficiaryBook {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<Journal>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            journal: Some(journal),
        }
    }

    pub(crate) async fn restore(&self, entries: HashMap<BeneficiaryId, Beneficiary>) {
        *self.entries.write().await = entries;
    }

    /// Adds a beneficiary, or updates name/relation when the owner already
    /// lists the same contact.
    pub async fn add(
        &self,
        owner: &UserId,
        name: &str,
        contact: &str,
        relation: &str,
        now: DateTime<Utc>,
    ) -> Result<Beneficiary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VigilError::Validation("beneficiary name must not be empty".to_string()));
        }
        let contact = normalize_contact(contact)?;

        let existing = self
            .entries
            .read()
            .await
            .values()
            .find(|b| &b.owner_user_id == owner && b.contact == contact)
            .cloned();
        let beneficiary = match existing {
            Some(mut b) => {
                b.name = name.to_string();
                b.relation_label = relation.trim().to_string();
                b
            }
            None => Beneficiary {
                id: BeneficiaryId::new(),
                owner_user_id: owner.clone(),
                name: name.to_string(),
                contact,
                relation_label: relation.trim().to_string(),
                added_at: now,
            },
        };

        let _hold = self.log(&[JournalEntry::Beneficiary(beneficiary.clone())]).await?;
        self.entries
            .write()
            .await
            .insert(beneficiary.id, beneficiary.clone());
        Ok(beneficiary)
    }

    pub async fn remove(&self, owner: &UserId, id: BeneficiaryId) -> Result<Beneficiary> {
        let not_found = || VigilError::NotFound(format!("beneficiary '{}'", id));
        let owned = matches!(
            self.entries.read().await.get(&id),
            Some(b) if &b.owner_user_id == owner
        );
        if !owned {
            return Err(not_found());
        }
        let _hold = self.log(&[JournalEntry::BeneficiaryRemoved(id)]).await?;
        self.entries.write().await.remove(&id).ok_or_else(not_found)
    }

    pub async fn list_for_owner(&self, owner: &UserId) -> Vec<Beneficiary> {
        let mut found: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|b| &b.owner_user_id == owner)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.added_at);
        found
    }

    pub async fn list_all(&self) -> Vec<Beneficiary> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn purge_owner(&self, owner: &UserId) -> Result<usize> {
        let ids: Vec<BeneficiaryId> = self
            .entries
            .read()
            .await
            .values()
            .filter(|b| &b.owner_user_id == owner)
            .map(|b| b.id)
            .collect();
        let removals: Vec<_> = ids.iter().copied().map(JournalEntry::BeneficiaryRemoved).collect();
        let _hold = self.log(&removals).await?;

        let mut entries = self.entries.write().await;
        for id in &ids {
            entries.remove(id);
        }
        Ok(ids.len())
    }

    async fn log(&self, entries: &[JournalEntry]) -> Result<Option<JournalHold<'_>>> {
        write_ahead(self.journal.as_deref(), entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_keyed_by_contact() {
        let book = BeneficiaryBook::new();
        let owner = UserId::from("owner");
        let now = Utc::now();

        let first = book.add(&owner, "Kim", "kim@example.com", "daughter", now).await.unwrap();
        let second = book.add(&owner, "Kim Lee", "KIM@example.com", "daughter", now).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(book.list_for_owner(&owner).await[0].name, "Kim Lee");
    }

    #[tokio::test]
    async fn remove_checks_owner() {
        let book = BeneficiaryBook::new();
        let owner = UserId::from("owner");
        let b = book.add(&owner, "Lu", "lu@example.com", "", Utc::now()).await.unwrap();

        assert!(matches!(
            book.remove(&UserId::from("other"), b.id).await,
            Err(VigilError::NotFound(_))
        ));
        book.remove(&owner, b.id).await.unwrap();
        assert!(book.list_for_owner(&owner).await.is_empty());
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let book = BeneficiaryBook::new();
        let err = book
            .add(&UserId::from("o"), "  ", "m@example.com", "", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
    }
}
