//! Fixtures shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;

use gdir_storage::{DirectoryStore, InsertOutcome, MemDirectoryStore, ReplaceOutcome};
use gdir_types::{
    ActivationId, ClusterId, ConcurrencyToken, DeletePrecondition, DirectoryEntry, DirectoryError,
    DirectoryKey, GrainAddress, GrainId, MembershipVersion, ProviderId, SiloAddress,
};

use crate::arbitration::ArbitrationSettings;
use crate::membership::{MembershipSnapshot, MultiClusterTopology, StaticMembership};
use crate::remote::{RemoteClusters, RemoteEntry, RemoteQuery};
use crate::retry::RetryPolicy;
use crate::service::{DirectoryOptions, GrainDirectory};
use crate::strategy::{RegistrationStrategy, StrategyTable};

pub(crate) fn silo(n: u8) -> SiloAddress {
    SiloAddress::new(SocketAddr::from(([10, 0, 0, n], 11111)), 1)
}

pub(crate) fn address(grain_type: &str, key: &str, silo: SiloAddress, act: u128, version: u64) -> GrainAddress {
    GrainAddress::new(
        GrainId::new(grain_type, key),
        silo,
        ActivationId::from_u128(act),
        MembershipVersion(version),
    )
}

pub(crate) fn membership(silos: &[SiloAddress], version: u64, clusters: &[&str]) -> Arc<StaticMembership> {
    Arc::new(StaticMembership::new(MembershipSnapshot {
        version: MembershipVersion(version),
        live_silos: silos.iter().copied().collect(),
        dead_silos: Default::default(),
        topology: MultiClusterTopology::new(clusters.iter().map(|c| ClusterId::new(*c))),
    }))
}

/// Options with millisecond-scale retries so failure tests stay quick.
pub(crate) fn fast_options(cluster: &str) -> DirectoryOptions {
    let mut options = DirectoryOptions::new(ClusterId::new(cluster), ProviderId::new("default"));
    options.retry = RetryPolicy::backoff(3, Duration::from_millis(1), Duration::from_millis(5));
    options.arbitration = ArbitrationSettings {
        query_timeout: Duration::from_millis(50),
        retry: RetryPolicy::backoff(1, Duration::from_millis(1), Duration::from_millis(2)),
    };
    options
}

pub(crate) type LoopbackDirectory = GrainDirectory<MemDirectoryStore, StaticMembership, LoopbackClusters>;

/// In-process transport between directories of different clusters, with
/// knobs for partitions and slow peers.
#[derive(Default)]
pub(crate) struct LoopbackClusters {
    peers: RwLock<HashMap<ClusterId, Arc<LoopbackDirectory>>>,
    partitioned: Mutex<HashSet<ClusterId>>,
    stalled: AtomicBool,
    delay: Mutex<Duration>,
}

impl LoopbackClusters {
    pub(crate) async fn connect(&self, directory: Arc<LoopbackDirectory>) {
        self.peers.write().await.insert(directory.cluster_id().clone(), directory);
    }

    pub(crate) fn partition(&self, cluster: &str) {
        self.partitioned.lock().unwrap().insert(ClusterId::new(cluster));
    }

    pub(crate) fn heal(&self) {
        self.partitioned.lock().unwrap().clear();
    }

    /// Queries started while stalled never complete.
    pub(crate) fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl RemoteClusters for LoopbackClusters {
    async fn query(&self, cluster: &ClusterId, query: RemoteQuery) -> Result<Option<RemoteEntry>, DirectoryError> {
        if self.partitioned.lock().unwrap().contains(cluster) {
            return Err(DirectoryError::Unavailable(format!("{cluster} partitioned")));
        }
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let peer = self.peers.read().await.get(cluster).cloned();
        match peer {
            Some(peer) => peer.answer_remote_query(&query).await,
            None => Err(DirectoryError::Unavailable(format!("unknown cluster {cluster}"))),
        }
    }
}

/// One directory per cluster name, all global-single-instance for
/// `account` grains and wired through one loopback transport per cluster.
pub(crate) struct MultiCluster {
    pub(crate) directories: Vec<Arc<LoopbackDirectory>>,
    pub(crate) stores: Vec<Arc<MemDirectoryStore>>,
    pub(crate) transports: Vec<Arc<LoopbackClusters>>,
    pub(crate) memberships: Vec<Arc<StaticMembership>>,
}

impl MultiCluster {
    pub(crate) async fn new(clusters: &[(&str, u64)], cache_remote_winners: bool) -> Self {
        let names: Vec<&str> = clusters.iter().map(|(c, _)| *c).collect();
        let mut mc = MultiCluster {
            directories: Vec::new(),
            stores: Vec::new(),
            transports: Vec::new(),
            memberships: Vec::new(),
        };
        for (i, (name, version)) in clusters.iter().enumerate() {
            let transport = Arc::new(LoopbackClusters::default());
            let m = membership(&[silo(i as u8 + 1)], *version, &names);
            let mut options = fast_options(name);
            options.cache_remote_winners = cache_remote_winners;
            let strategies = StrategyTable::new(RegistrationStrategy::ClusterLocal)
                .with(gdir_types::GrainType::new("account"), RegistrationStrategy::GlobalSingleInstance);
            let store = Arc::new(MemDirectoryStore::new());
            let dir = Arc::new(GrainDirectory::new(
                options,
                strategies,
                store.clone(),
                m.clone(),
                transport.clone(),
            ));
            mc.directories.push(dir);
            mc.stores.push(store);
            mc.transports.push(transport);
            mc.memberships.push(m);
        }
        for transport in &mc.transports {
            for dir in &mc.directories {
                transport.connect(dir.clone()).await;
            }
        }
        mc
    }

    /// Candidate for `key` hosted on cluster `i`'s silo, stamped with that
    /// cluster's membership version.
    pub(crate) fn candidate(&self, i: usize, key: &str, act: u128) -> GrainAddress {
        use crate::membership::ClusterMembership;
        let version = self.memberships[i].version().0;
        address("account", key, silo(i as u8 + 1), act, version)
    }

    /// Deletes cluster `i`'s row for `address` without going through the
    /// directory.
    pub(crate) async fn delete_row(&self, i: usize, address: &GrainAddress) -> bool {
        let key = DirectoryKey {
            cluster_id: self.directories[i].cluster_id().clone(),
            provider_id: self.directories[i].provider_id().clone(),
            grain_id: address.grain_id.clone(),
        };
        self.stores[i]
            .try_delete(&key, address.activation, &DeletePrecondition::Always)
            .await
            .unwrap()
    }
}

/// Fails the first `failures` calls with a transient storage error.
pub(crate) struct FlakyStore {
    inner: MemDirectoryStore,
    failures: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn new(failures: u32) -> Self {
        FlakyStore { inner: MemDirectoryStore::new(), failures: AtomicU32::new(failures) }
    }

    fn fail(&self) -> Result<(), DirectoryError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(DirectoryError::Storage("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl DirectoryStore for FlakyStore {
    async fn try_insert(&self, key: &DirectoryKey, address: GrainAddress) -> Result<InsertOutcome, DirectoryError> {
        self.fail()?;
        self.inner.try_insert(key, address).await
    }

    async fn try_replace(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
        expected: ConcurrencyToken,
    ) -> Result<ReplaceOutcome, DirectoryError> {
        self.fail()?;
        self.inner.try_replace(key, address, expected).await
    }

    async fn try_delete(
        &self,
        key: &DirectoryKey,
        activation: ActivationId,
        precondition: &DeletePrecondition,
    ) -> Result<bool, DirectoryError> {
        self.fail()?;
        self.inner.try_delete(key, activation, precondition).await
    }

    async fn bulk_delete_by_owners(
        &self,
        cluster_id: &ClusterId,
        provider_id: &ProviderId,
        silos: &[SiloAddress],
    ) -> Result<u64, DirectoryError> {
        self.fail()?;
        self.inner.bulk_delete_by_owners(cluster_id, provider_id, silos).await
    }

    async fn find(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.fail()?;
        self.inner.find(key).await
    }
}

/// Rewrites the row under the caller's feet before the first `races`
/// replaces, so the caller's token is always stale.
pub(crate) struct RacingStore {
    inner: MemDirectoryStore,
    races: AtomicU32,
}

impl RacingStore {
    pub(crate) fn new(races: u32) -> Self {
        RacingStore { inner: MemDirectoryStore::new(), races: AtomicU32::new(races) }
    }
}

impl DirectoryStore for RacingStore {
    async fn try_insert(&self, key: &DirectoryKey, address: GrainAddress) -> Result<InsertOutcome, DirectoryError> {
        self.inner.try_insert(key, address).await
    }

    async fn try_replace(
        &self,
        key: &DirectoryKey,
        address: GrainAddress,
        expected: ConcurrencyToken,
    ) -> Result<ReplaceOutcome, DirectoryError> {
        let race = self.races.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if race {
            if let Some(current) = self.inner.find(key).await? {
                self.inner.try_replace(key, current.address.clone(), current.token).await?;
            }
        }
        self.inner.try_replace(key, address, expected).await
    }

    async fn try_delete(
        &self,
        key: &DirectoryKey,
        activation: ActivationId,
        precondition: &DeletePrecondition,
    ) -> Result<bool, DirectoryError> {
        self.inner.try_delete(key, activation, precondition).await
    }

    async fn bulk_delete_by_owners(
        &self,
        cluster_id: &ClusterId,
        provider_id: &ProviderId,
        silos: &[SiloAddress],
    ) -> Result<u64, DirectoryError> {
        self.inner.bulk_delete_by_owners(cluster_id, provider_id, silos).await
    }

    async fn find(&self, key: &DirectoryKey) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.inner.find(key).await
    }
}
