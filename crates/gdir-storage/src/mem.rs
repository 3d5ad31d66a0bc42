use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use gdir_types::{
    ActivationId, ClusterId, ConcurrencyToken, DeletePrecondition, DirectoryEntry,
    DirectoryError, DirectoryKey, GrainAddress, ProviderId, SiloAddress,
};

use crate::traits::{check_expected_token, DirectoryStore};
use crate::types::{InsertOutcome, ReplaceOutcome};

struct MemInner {
    rows: HashMap<DirectoryKey, DirectoryEntry>,
    next_token: u64,
}

impl MemInner {
    fn issue_token(&mut self) -> ConcurrencyToken {
        let token = ConcurrencyToken(self.next_token);
        self.next_token += 1;
        token
    }
}

/// In-memory `DirectoryStore` backed by a `HashMap`.
///
/// Each operation runs under one write-lock acquisition, which is what makes
/// insert-if-absent and compare-and-swap atomic here. Not persisted across
/// restarts.
#[derive(Clone)]
pub struct MemDirectoryStore {
    inner: Arc<RwLock<MemInner>>,
}

impl MemDirectoryStore {
    pub fn new() -> Self {
        MemDirectoryStore {
            inner: Arc::new(RwLock::new(MemInner {
                rows: HashMap::new(),
                next_token: 1,
            })),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemDirectoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryStore for MemDirectoryStore {
    async fn try_insert(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
    ) -> Result<InsertOutcome, DirectoryError> {
        let mut g = self.inner.write().await;
        if let Some(existing) = g.rows.get(key) {
            return Ok(InsertOutcome::Conflict(existing.clone()));
        }
        let token = g.issue_token();
        let entry = DirectoryEntry {
            cluster_id: key.cluster_id.clone(),
            provider_id: key.provider_id.clone(),
            address,
            token,
        };
        g.rows.insert(key.clone(), entry.clone());
        Ok(InsertOutcome::Inserted(entry))
    }

    async fn try_replace(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
        expected: ConcurrencyToken,
    ) -> Result<ReplaceOutcome, DirectoryError> {
        check_expected_token(expected)?;
        let mut g = self.inner.write().await;
        match g.rows.get(key) {
            None => return Ok(ReplaceOutcome::Conflict(None)),
            Some(current) if current.token != expected => {
                return Ok(ReplaceOutcome::Conflict(Some(current.clone())));
            }
            Some(_) => {}
        }
        let token = g.issue_token();
        let entry = DirectoryEntry {
            cluster_id: key.cluster_id.clone(),
            provider_id: key.provider_id.clone(),
            address,
            token,
        };
        g.rows.insert(key.clone(), entry.clone());
        Ok(ReplaceOutcome::Replaced(entry))
    }

    async fn try_delete(
        &self,
        key: &DirectoryKey,
        activation: ActivationId,
        precondition: &DeletePrecondition,
    ) -> Result<bool, DirectoryError> {
        let mut g = self.inner.write().await;
        let matches = g
            .rows
            .get(key)
            .map(|e| e.address.activation == activation && precondition.admits(e))
            .unwrap_or(false);
        if matches {
            g.rows.remove(key);
        }
        Ok(matches)
    }

    async fn bulk_delete_by_owners(
        &self,
        cluster_id: &ClusterId,
        provider_id: &ProviderId,
        silos: &[SiloAddress],
    ) -> Result<u64, DirectoryError> {
        let mut g = self.inner.write().await;
        let before = g.rows.len();
        g.rows.retain(|k, e| {
            !(k.cluster_id == *cluster_id
                && k.provider_id == *provider_id
                && silos.contains(&e.address.silo))
        });
        Ok((before - g.rows.len()) as u64)
    }

    async fn find(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        Ok(self.inner.read().await.rows.get(key).cloned())
    }
}
