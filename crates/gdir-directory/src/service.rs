use std::sync::Arc;

use gdir_storage::{DirectoryStore, InsertOutcome, ReplaceOutcome};
use gdir_types::{
    CausePolicy, ClusterId, DeletePrecondition, DirectoryEntry, DirectoryError, DirectoryKey,
    GrainAddress, GrainId, MultiClusterStatus, ProviderId, SiloAddress, UnregistrationCause,
};

use crate::arbitration::{best_claim, ArbitrationOutcome, ArbitrationSettings, Arbiter};
use crate::config::{DirectoryConfig, MultiClusterConfig, RetryConfig};
use crate::membership::ClusterMembership;
use crate::remote::{RemoteClusters, RemoteEntry, RemoteQuery};
use crate::retry::{with_retry, RetryPolicy};
use crate::status::{StatusRecord, StatusTable};
use crate::strategy::StrategyTable;

/// Construction parameters of a [`GrainDirectory`].
#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    pub cluster_id: ClusterId,
    pub provider_id: ProviderId,
    pub cause_policy: CausePolicy,
    pub retry: RetryPolicy,
    pub arbitration: ArbitrationSettings,
    pub cache_remote_winners: bool,
}

impl DirectoryOptions {
    pub fn new(cluster_id: ClusterId, provider_id: ProviderId) -> Self {
        DirectoryOptions {
            cluster_id,
            provider_id,
            cause_policy: CausePolicy::default(),
            retry: RetryPolicy::default(),
            arbitration: ArbitrationSettings::default(),
            cache_remote_winners: false,
        }
    }

    pub fn from_config(
        directory: &DirectoryConfig,
        retry: &RetryConfig,
        multi_cluster: &MultiClusterConfig,
    ) -> Self {
        DirectoryOptions {
            cluster_id: ClusterId::new(directory.cluster_id.clone()),
            provider_id: ProviderId::new(directory.provider_id.clone()),
            cause_policy: CausePolicy::new(directory.freshness_window),
            retry: retry.policy(),
            arbitration: multi_cluster.arbitration(),
            cache_remote_winners: directory.cache_remote_winners,
        }
    }
}

/// Result of one address in [`GrainDirectory::unregister_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisterOutcome {
    pub address: GrainAddress,
    pub result: Result<bool, DirectoryError>,
}

/// A registration discovered, after the fact, to have lost a cross-cluster
/// race. The activation behind `loser` must be deactivated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionNotice {
    pub loser: GrainAddress,
    pub winner: GrainAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: Vec<GrainAddress>,
    pub evicted: Vec<EvictionNotice>,
    pub still_doubtful: usize,
    /// Entries whose row vanished or changed hands since they turned doubtful.
    pub dropped: usize,
}

/// The grain directory of one `(cluster, provider)` scope.
///
/// All conflict resolution lives here; the store only has to provide atomic
/// insert-if-absent, compare-and-swap and conditional delete.
pub struct GrainDirectory<S, M, R> {
    cluster_id: ClusterId,
    provider_id: ProviderId,
    store: Arc<S>,
    membership: Arc<M>,
    strategies: StrategyTable,
    cause_policy: CausePolicy,
    retry: RetryPolicy,
    arbiter: Arbiter<R>,
    status: StatusTable,
    cache_remote_winners: bool,
}

impl<S, M, R> GrainDirectory<S, M, R>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    pub fn new(
        options: DirectoryOptions,
        strategies: StrategyTable,
        store: Arc<S>,
        membership: Arc<M>,
        remotes: Arc<R>,
    ) -> Self {
        GrainDirectory {
            arbiter: Arbiter::new(remotes, options.arbitration, options.cluster_id.clone()),
            cluster_id: options.cluster_id,
            provider_id: options.provider_id,
            store,
            membership,
            strategies,
            cause_policy: options.cause_policy,
            retry: options.retry,
            status: StatusTable::new(),
            cache_remote_winners: options.cache_remote_winners,
        }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    pub fn membership(&self) -> &Arc<M> {
        &self.membership
    }

    fn key(&self, grain_id: &GrainId) -> DirectoryKey {
        DirectoryKey {
            cluster_id: self.cluster_id.clone(),
            provider_id: self.provider_id.clone(),
            grain_id: grain_id.clone(),
        }
    }

    pub async fn lookup(&self, grain_id: &GrainId) -> Result<Option<GrainAddress>, DirectoryError> {
        Ok(self.lookup_entry(grain_id).await?.map(|e| e.address))
    }

    pub async fn lookup_entry(&self, grain_id: &GrainId) -> Result<Option<DirectoryEntry>, DirectoryError> {
        grain_id.validate()?;
        let key = self.key(grain_id);
        with_retry(&self.retry, "find", || self.store.find(&key)).await
    }

    /// Cross-cluster status currently held for `grain_id`, if any.
    pub async fn status(&self, grain_id: &GrainId) -> Option<StatusRecord> {
        self.status.get(grain_id).await
    }

    /// Registers `candidate` and returns the authoritative address.
    ///
    /// `previous` is the address the caller believes is registered now; pass
    /// it to move or refresh an existing registration. A returned address
    /// that is not `candidate`'s activation means the caller lost and must
    /// deactivate the candidate.
    pub async fn register(
        &self,
        candidate: GrainAddress,
        previous: Option<GrainAddress>,
    ) -> Result<GrainAddress, DirectoryError> {
        candidate.validate()?;
        if let Some(p) = &previous {
            p.validate()?;
            if p.grain_id != candidate.grain_id {
                return Err(DirectoryError::InvalidArgument(format!(
                    "previous address is for {}, candidate for {}",
                    p.grain_id, candidate.grain_id
                )));
            }
        }

        let key = self.key(&candidate.grain_id);
        let local = match &previous {
            None => self.register_first(&key, &candidate).await?,
            Some(p) => self.register_refresh(&key, &candidate, p).await?,
        };
        if !local.same_activation(&candidate) {
            tracing::debug!(grain = %candidate.grain_id, winner = %local, "registration lost locally");
            return Ok(local);
        }

        let strategy = self.strategies.for_type(&candidate.grain_id.grain_type);
        let remotes = strategy.remote_instances(&self.membership.topology(), &self.cluster_id);
        if remotes.is_empty() {
            return Ok(local);
        }
        self.arbitrate_registration(local, &remotes).await
    }

    async fn register_first(
        &self,
        key: &DirectoryKey,
        candidate: &GrainAddress,
    ) -> Result<GrainAddress, DirectoryError> {
        for _ in 0..2 {
            let outcome =
                with_retry(&self.retry, "try_insert", || self.store.try_insert(key, candidate.clone()))
                    .await?;
            let existing = match outcome {
                InsertOutcome::Inserted(entry) => return Ok(entry.address),
                InsertOutcome::Conflict(existing) => existing,
            };
            if existing.address.same_activation(candidate) || !self.owner_is_dead(&existing).await {
                return Ok(existing.address);
            }

            let replaced = with_retry(&self.retry, "try_replace", || {
                self.store.try_replace(key, candidate.clone(), existing.token)
            })
            .await?;
            if let ReplaceOutcome::Replaced(entry) = replaced {
                tracing::info!(
                    grain = %candidate.grain_id,
                    dead_silo = %existing.address.silo,
                    "took over registration from dead silo"
                );
                self.status.clear(&existing.address.grain_id, existing.address.activation).await;
                return Ok(entry.address);
            }
        }
        match with_retry(&self.retry, "find", || self.store.find(key)).await? {
            Some(entry) => Ok(entry.address),
            None => Err(DirectoryError::Conflict { grain_id: candidate.grain_id.to_string() }),
        }
    }

    /// A row owned by a silo that membership has declared dead can be
    /// replaced. Silos membership never listed are not presumed dead.
    /// Cached pointers name silos of other clusters and never qualify.
    async fn owner_is_dead(&self, entry: &DirectoryEntry) -> bool {
        if !self.membership.is_dead(&entry.address.silo) {
            return false;
        }
        let cached = matches!(
            self.status.get(&entry.address.grain_id).await,
            Some(r) if r.status == MultiClusterStatus::Cached && r.address.same_activation(&entry.address)
        );
        !cached
    }

    async fn register_refresh(
        &self,
        key: &DirectoryKey,
        candidate: &GrainAddress,
        previous: &GrainAddress,
    ) -> Result<GrainAddress, DirectoryError> {
        for round in 0..2 {
            let current = with_retry(&self.retry, "find", || self.store.find(key)).await?;
            let Some(current) = current else {
                return self.register_first(key, candidate).await;
            };
            if !current.address.same_activation(previous) {
                return Ok(current.address);
            }
            if current.address == *candidate
                || current.address.membership_version > candidate.membership_version
            {
                return Ok(current.address);
            }
            let outcome = with_retry(&self.retry, "try_replace", || {
                self.store.try_replace(key, candidate.clone(), current.token)
            })
            .await?;
            match outcome {
                ReplaceOutcome::Replaced(entry) => return Ok(entry.address),
                ReplaceOutcome::Conflict(_) => {
                    tracing::debug!(grain = %candidate.grain_id, round, "concurrency token moved; re-reading");
                }
            }
        }
        Err(DirectoryError::Conflict { grain_id: candidate.grain_id.to_string() })
    }

    async fn arbitrate_registration(
        &self,
        local: GrainAddress,
        remotes: &[ClusterId],
    ) -> Result<GrainAddress, DirectoryError> {
        if !self.status.begin_request(&local).await {
            return Ok(local);
        }
        let guard = PendingArbitration { status: self.status.clone(), address: Some(local.clone()) };
        let outcome = self.arbiter.arbitrate(&local, remotes).await;
        let result = self.apply_outcome(&local, MultiClusterStatus::RequestedOwnership, outcome).await;
        guard.disarm();
        result
    }

    async fn apply_outcome(
        &self,
        local: &GrainAddress,
        from: MultiClusterStatus,
        outcome: ArbitrationOutcome,
    ) -> Result<GrainAddress, DirectoryError> {
        match outcome {
            ArbitrationOutcome::Owned => {
                if self
                    .status
                    .transition(&local.grain_id, local.activation, from, MultiClusterStatus::Owned)
                    .await
                {
                    tracing::info!(grain = %local.grain_id, silo = %local.silo, "global ownership confirmed");
                }
                Ok(local.clone())
            }
            ArbitrationOutcome::Doubtful { unreachable } => {
                if from == MultiClusterStatus::Doubtful {
                    self.status.track_doubtful(&local.grain_id, local.activation).await;
                } else {
                    self.status
                        .transition(&local.grain_id, local.activation, from, MultiClusterStatus::Doubtful)
                        .await;
                }
                tracing::warn!(grain = %local.grain_id, ?unreachable, "ownership doubtful; clusters unreachable");
                Ok(local.clone())
            }
            ArbitrationOutcome::Lost { winner } => {
                self.status
                    .transition(&local.grain_id, local.activation, from, MultiClusterStatus::RaceLoser)
                    .await;
                tracing::debug!(
                    grain = %local.grain_id,
                    winner_cluster = %winner.cluster_id,
                    winner = %winner.address,
                    "lost cross-cluster race; withdrawing"
                );
                self.withdraw(local).await?;
                if self.cache_remote_winners {
                    self.cache(&winner.address).await?;
                }
                Ok(winner.address)
            }
        }
    }

    /// Removes the row of a race loser without touching its status.
    async fn withdraw(&self, address: &GrainAddress) -> Result<bool, DirectoryError> {
        let key = self.key(&address.grain_id);
        with_retry(&self.retry, "try_delete", || {
            self.store.try_delete(&key, address.activation, &DeletePrecondition::Always)
        })
        .await
    }

    /// Stores a pointer to another cluster's owner.
    async fn cache(&self, winner: &GrainAddress) -> Result<(), DirectoryError> {
        let key = self.key(&winner.grain_id);
        let outcome = with_retry(&self.retry, "try_insert", || self.store.try_insert(&key, winner.clone())).await?;
        match outcome {
            InsertOutcome::Inserted(entry) => self.status.set_cached(entry.address).await,
            InsertOutcome::Conflict(existing) if existing.address.same_activation(winner) => {
                self.status.set_cached(existing.address).await
            }
            InsertOutcome::Conflict(_) => {}
        }
        Ok(())
    }

    /// Removes `address` if `cause` permits it. `Ok(false)` means nothing
    /// matched.
    pub async fn unregister(
        &self,
        address: &GrainAddress,
        cause: UnregistrationCause,
    ) -> Result<bool, DirectoryError> {
        address.validate()?;
        let key = self.key(&address.grain_id);
        let snapshot = self.membership.current();
        let precondition = self.cause_policy.precondition(cause, snapshot.version, &snapshot.live_silos);
        let removed = with_retry(&self.retry, "try_delete", || {
            self.store.try_delete(&key, address.activation, &precondition)
        })
        .await?;
        if removed {
            self.status.clear(&address.grain_id, address.activation).await;
        }
        tracing::debug!(grain = %address.grain_id, ?cause, removed, "unregister");
        Ok(removed)
    }

    /// Unregisters each address independently. One failure does not stop
    /// the others.
    pub async fn unregister_many(
        &self,
        addresses: Vec<GrainAddress>,
        cause: UnregistrationCause,
    ) -> Vec<UnregisterOutcome> {
        let mut outcomes = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self.unregister(&address, cause).await;
            outcomes.push(UnregisterOutcome { address, result });
        }
        outcomes
    }

    /// Force-removes every registration owned by `silos`.
    pub async fn unregister_silos(&self, silos: &[SiloAddress]) -> Result<u64, DirectoryError> {
        if silos.is_empty() {
            return Ok(0);
        }
        let removed = with_retry(&self.retry, "bulk_delete_by_owners", || {
            self.store.bulk_delete_by_owners(&self.cluster_id, &self.provider_id, silos)
        })
        .await?;
        self.status.clear_silos(silos).await;
        tracing::info!(silos = silos.len(), removed, "unregistered silos");
        Ok(removed)
    }

    /// Drops a stale cached pointer and asks the peer clusters who owns the
    /// grain now. Returns the current owner, if anyone claims it.
    pub async fn refresh_cached(&self, stale: &GrainAddress) -> Result<Option<GrainAddress>, DirectoryError> {
        let removed = self.unregister(stale, UnregistrationCause::CacheInvalidation).await?;
        if !removed {
            if let Some(current) = self.lookup(&stale.grain_id).await? {
                return Ok(Some(current));
            }
        }

        let strategy = self.strategies.for_type(&stale.grain_id.grain_type);
        let remotes = strategy.remote_instances(&self.membership.topology(), &self.cluster_id);
        if remotes.is_empty() {
            return Ok(None);
        }
        let query = RemoteQuery {
            grain_id: stale.grain_id.clone(),
            requesting_cluster: self.cluster_id.clone(),
            membership_version: self.membership.version(),
        };
        let replies = self.arbiter.collect(&remotes, query).await;
        let Some(owner) = best_claim(replies.iter().map(|(_, r)| r)).map(|e| e.address.clone()) else {
            return Ok(None);
        };
        if self.cache_remote_winners {
            self.cache(&owner).await?;
        }
        Ok(Some(owner))
    }

    /// Serves a peer cluster's ownership query. Read-only.
    pub async fn answer_remote_query(&self, query: &RemoteQuery) -> Result<Option<RemoteEntry>, DirectoryError> {
        let Some(entry) = self.lookup_entry(&query.grain_id).await? else {
            return Ok(None);
        };
        let status = self
            .status
            .get(&query.grain_id)
            .await
            .filter(|r| r.address.same_activation(&entry.address))
            .map(|r| r.status);
        tracing::debug!(
            grain = %query.grain_id,
            from = %query.requesting_cluster,
            status = ?status,
            "answered ownership query"
        );
        Ok(Some(RemoteEntry { cluster_id: self.cluster_id.clone(), address: entry.address, status }))
    }

    /// Re-arbitrates every registration currently `Doubtful`.
    pub async fn reconcile_doubtful(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for address in self.status.take_doubtful().await {
            match self.lookup_entry(&address.grain_id).await {
                Ok(Some(entry)) if entry.address.same_activation(&address) => {}
                Ok(_) => {
                    self.status.clear(&address.grain_id, address.activation).await;
                    report.dropped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(grain = %address.grain_id, error = %e, "reconcile lookup failed");
                    self.status.track_doubtful(&address.grain_id, address.activation).await;
                    report.still_doubtful += 1;
                    continue;
                }
            }

            let strategy = self.strategies.for_type(&address.grain_id.grain_type);
            let remotes = strategy.remote_instances(&self.membership.topology(), &self.cluster_id);
            let outcome = if remotes.is_empty() {
                ArbitrationOutcome::Owned
            } else {
                self.arbiter.arbitrate(&address, &remotes).await
            };

            match outcome {
                ArbitrationOutcome::Owned => {
                    if let Ok(a) = self.apply_outcome(&address, MultiClusterStatus::Doubtful, outcome).await {
                        report.confirmed.push(a);
                    }
                }
                ArbitrationOutcome::Doubtful { .. } => {
                    let _ = self.apply_outcome(&address, MultiClusterStatus::Doubtful, outcome).await;
                    report.still_doubtful += 1;
                }
                ArbitrationOutcome::Lost { ref winner } => {
                    let notice = EvictionNotice { loser: address.clone(), winner: winner.address.clone() };
                    if let Err(e) = self.apply_outcome(&address, MultiClusterStatus::Doubtful, outcome).await {
                        tracing::warn!(grain = %address.grain_id, error = %e, "failed to withdraw race loser");
                    }
                    report.evicted.push(notice);
                }
            }
        }
        if !report.confirmed.is_empty() || !report.evicted.is_empty() {
            tracing::info!(
                confirmed = report.confirmed.len(),
                evicted = report.evicted.len(),
                still_doubtful = report.still_doubtful,
                "reconciled doubtful registrations"
            );
        }
        report
    }
}

/// Armed while a registration waits on remote clusters. If the waiting
/// future is dropped, the `RequestedOwnership` status is demoted to
/// `Doubtful` so the reconciler picks the registration up.
struct PendingArbitration {
    status: StatusTable,
    address: Option<GrainAddress>,
}

impl PendingArbitration {
    fn disarm(mut self) {
        self.address = None;
    }
}

impl Drop for PendingArbitration {
    fn drop(&mut self) {
        let Some(address) = self.address.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let status = self.status.clone();
        handle.spawn(async move {
            let demoted = status
                .transition(
                    &address.grain_id,
                    address.activation,
                    MultiClusterStatus::RequestedOwnership,
                    MultiClusterStatus::Doubtful,
                )
                .await;
            if demoted {
                tracing::debug!(grain = %address.grain_id, "arbitration cancelled; marked doubtful");
            }
        });
    }
}
