use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use gdir_types::{ActivationId, GrainAddress, GrainId, MultiClusterStatus, SiloAddress};

/// Cross-cluster status of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub address: GrainAddress,
    pub status: MultiClusterStatus,
}

#[derive(Default)]
struct StatusInner {
    records: HashMap<GrainId, StatusRecord>,
    /// Grains awaiting the next reconciliation sweep.
    doubtful: BTreeSet<GrainId>,
}

/// In-memory overlay of [`MultiClusterStatus`] on top of the directory rows.
///
/// The store never sees these values. Every change is keyed by the
/// activation it was made for, so a record that has since been replaced by
/// another activation is left alone.
#[derive(Clone, Default)]
pub struct StatusTable {
    inner: Arc<RwLock<StatusInner>>,
}

fn allowed(from: MultiClusterStatus, to: MultiClusterStatus) -> bool {
    use MultiClusterStatus::*;
    matches!(
        (from, to),
        (RequestedOwnership, Owned)
            | (RequestedOwnership, Doubtful)
            | (RequestedOwnership, RaceLoser)
            | (Doubtful, Owned)
            | (Doubtful, RaceLoser)
    )
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, grain_id: &GrainId) -> Option<StatusRecord> {
        self.inner.read().await.records.get(grain_id).cloned()
    }

    /// Marks `address` as `RequestedOwnership`. Returns false when the same
    /// activation already has a live status, i.e. arbitration for it has
    /// started before. A withdrawn race loser may ask again.
    pub async fn begin_request(&self, address: &GrainAddress) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.records.get(&address.grain_id) {
            if existing.address.same_activation(address)
                && existing.status != MultiClusterStatus::RaceLoser
            {
                return false;
            }
        }
        inner.doubtful.remove(&address.grain_id);
        inner.records.insert(
            address.grain_id.clone(),
            StatusRecord {
                address: address.clone(),
                status: MultiClusterStatus::RequestedOwnership,
            },
        );
        true
    }

    /// Moves the record of `activation` from `from` to `to`. Fails (returns
    /// false) if the record is gone, belongs to another activation, is not in
    /// `from`, or the move is not a legal transition.
    pub async fn transition(
        &self,
        grain_id: &GrainId,
        activation: ActivationId,
        from: MultiClusterStatus,
        to: MultiClusterStatus,
    ) -> bool {
        if !allowed(from, to) {
            return false;
        }
        let mut inner = self.inner.write().await;
        let Some(record) = inner.records.get_mut(grain_id) else {
            return false;
        };
        if record.address.activation != activation || record.status != from {
            return false;
        }
        record.status = to;
        if to == MultiClusterStatus::Doubtful {
            inner.doubtful.insert(grain_id.clone());
        } else {
            inner.doubtful.remove(grain_id);
        }
        true
    }

    /// Records a pointer to another cluster's owner.
    pub async fn set_cached(&self, address: GrainAddress) {
        let mut inner = self.inner.write().await;
        inner.doubtful.remove(&address.grain_id);
        inner.records.insert(
            address.grain_id.clone(),
            StatusRecord { address, status: MultiClusterStatus::Cached },
        );
    }

    /// Drops the record if it still belongs to `activation`.
    pub async fn clear(&self, grain_id: &GrainId, activation: ActivationId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.records.get(grain_id) {
            Some(r) if r.address.activation == activation => {
                inner.records.remove(grain_id);
                inner.doubtful.remove(grain_id);
                true
            }
            _ => false,
        }
    }

    /// Drops every record whose activation lives on one of `silos`.
    pub async fn clear_silos(&self, silos: &[SiloAddress]) -> usize {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let before = inner.records.len();
        let doubtful = &mut inner.doubtful;
        inner.records.retain(|grain_id, r| {
            let keep = !silos.contains(&r.address.silo);
            if !keep {
                doubtful.remove(grain_id);
            }
            keep
        });
        before - inner.records.len()
    }

    /// Drains the doubtful set, returning the records still in `Doubtful`.
    pub async fn take_doubtful(&self) -> Vec<GrainAddress> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let ids = std::mem::take(&mut inner.doubtful);
        ids.into_iter()
            .filter_map(|id| inner.records.get(&id))
            .filter(|r| r.status == MultiClusterStatus::Doubtful)
            .map(|r| r.address.clone())
            .collect()
    }

    /// Puts a grain back on the sweep list if it is still doubtful.
    pub async fn track_doubtful(&self, grain_id: &GrainId, activation: ActivationId) {
        let mut inner = self.inner.write().await;
        let still_doubtful = matches!(
            inner.records.get(grain_id),
            Some(r) if r.address.activation == activation && r.status == MultiClusterStatus::Doubtful
        );
        if still_doubtful {
            inner.doubtful.insert(grain_id.clone());
        }
    }

    pub async fn doubtful_count(&self) -> usize {
        self.inner.read().await.doubtful.len()
    }
}
