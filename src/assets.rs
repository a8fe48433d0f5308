//! Asset-store collaborator. The core only reads counts for display; the
//! release itself travels as `Notification::AssetsReleased`.

use crate::core::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait AssetDirectory: Send + Sync {
    /// Number of documents/assets stored for `owner`.
    async fn asset_count(&self, owner: &UserId) -> usize;
}

/// Counts kept in memory, fed by whoever ingests documents.
#[derive(Default)]
pub struct InMemoryAssetDirectory {
    counts: RwLock<HashMap<UserId, usize>>,
}

impl InMemoryAssetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_count(&self, owner: &UserId, count: usize) {
        self.counts.write().await.insert(owner.clone(), count);
    }
}

#[async_trait]
impl AssetDirectory for InMemoryAssetDirectory {
    async fn asset_count(&self, owner: &UserId) -> usize {
        self.counts.read().await.get(owner).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_owner_has_no_assets() {
        let dir = InMemoryAssetDirectory::new();
        let owner = UserId::from("o");
        assert_eq!(dir.asset_count(&owner).await, 0);
        dir.set_count(&owner, 4).await;
        assert_eq!(dir.asset_count(&owner).await, 4);
    }
}
