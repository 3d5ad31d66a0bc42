use std::collections::BTreeSet;

use tokio::sync::watch;

use gdir_types::{ClusterId, MembershipVersion, SiloAddress};

/// Clusters taking part in multi-cluster registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiClusterTopology {
    pub clusters: Vec<ClusterId>,
}

impl MultiClusterTopology {
    pub fn new(clusters: impl IntoIterator<Item = ClusterId>) -> Self {
        MultiClusterTopology { clusters: clusters.into_iter().collect() }
    }

    pub fn contains(&self, cluster: &ClusterId) -> bool {
        self.clusters.contains(cluster)
    }
}

/// What the directory needs to know about its own cluster at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub version: MembershipVersion,
    /// Live silos of the local cluster.
    pub live_silos: BTreeSet<SiloAddress>,
    /// Silos membership has declared dead. An address never comes back.
    pub dead_silos: BTreeSet<SiloAddress>,
    pub topology: MultiClusterTopology,
}

/// Cluster membership as consumed by the directory. The directory only
/// reads it; failure detection and topology management live elsewhere.
pub trait ClusterMembership: Send + Sync + 'static {
    fn current(&self) -> MembershipSnapshot;

    fn subscribe(&self) -> watch::Receiver<MembershipSnapshot>;

    fn version(&self) -> MembershipVersion {
        self.current().version
    }

    fn is_live(&self, silo: &SiloAddress) -> bool {
        self.current().live_silos.contains(silo)
    }

    /// Declared dead, or replaced by a later generation on the same
    /// endpoint. A silo membership has never heard of is not dead.
    fn is_dead(&self, silo: &SiloAddress) -> bool {
        self.current().declares_dead(silo)
    }

    fn topology(&self) -> MultiClusterTopology {
        self.current().topology
    }
}

impl MembershipSnapshot {
    pub fn declares_dead(&self, silo: &SiloAddress) -> bool {
        self.dead_silos.contains(silo)
            || self
                .live_silos
                .iter()
                .any(|s| s.endpoint == silo.endpoint && s.generation > silo.generation)
    }
}

/// Membership view driven by explicit updates: the node binary feeds it from
/// configuration, tests drive it directly.
pub struct StaticMembership {
    tx: watch::Sender<MembershipSnapshot>,
}

impl StaticMembership {
    pub fn new(snapshot: MembershipSnapshot) -> Self {
        let (tx, _rx) = watch::channel(snapshot);
        StaticMembership { tx }
    }

    pub fn set_version(&self, version: MembershipVersion) {
        self.tx.send_modify(|s| s.version = version);
    }

    /// Adds a live silo and bumps the membership version.
    pub fn join(&self, silo: SiloAddress) {
        self.tx.send_modify(|s| {
            s.live_silos.insert(silo);
            s.version = MembershipVersion(s.version.0 + 1);
        });
    }

    /// Declares a silo dead and bumps the membership version.
    pub fn declare_dead(&self, silo: &SiloAddress) {
        self.tx.send_modify(|s| {
            s.live_silos.remove(silo);
            s.dead_silos.insert(*silo);
            s.version = MembershipVersion(s.version.0 + 1);
        });
    }

    pub fn set_topology(&self, topology: MultiClusterTopology) {
        self.tx.send_modify(|s| s.topology = topology);
    }
}

impl ClusterMembership for StaticMembership {
    fn current(&self) -> MembershipSnapshot {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<MembershipSnapshot> {
        self.tx.subscribe()
    }

    fn version(&self) -> MembershipVersion {
        self.tx.borrow().version
    }

    fn is_live(&self, silo: &SiloAddress) -> bool {
        self.tx.borrow().live_silos.contains(silo)
    }

    fn is_dead(&self, silo: &SiloAddress) -> bool {
        self.tx.borrow().declares_dead(silo)
    }

    fn topology(&self) -> MultiClusterTopology {
        self.tx.borrow().topology.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    #[tokio::test]
    async fn changes_are_published() {
        let silo = SiloAddress::new(SocketAddr::from(([127, 0, 0, 1], 11111)), 1);
        let membership = StaticMembership::new(MembershipSnapshot::default());
        let mut rx = membership.subscribe();

        membership.join(silo);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().live_silos.contains(&silo));
        assert_eq!(membership.version(), MembershipVersion(1));

        membership.declare_dead(&silo);
        rx.changed().await.unwrap();
        assert!(!membership.is_live(&silo));
        assert!(membership.is_dead(&silo));
        assert_eq!(membership.version(), MembershipVersion(2));
    }

    #[test]
    fn unknown_silos_are_not_dead() {
        let endpoint = SocketAddr::from(([127, 0, 0, 1], 11111));
        let membership = StaticMembership::new(MembershipSnapshot::default());
        let stranger = SiloAddress::new(endpoint, 1);
        assert!(!membership.is_live(&stranger));
        assert!(!membership.is_dead(&stranger));

        // A restart on the same endpoint supersedes the older generation.
        membership.join(SiloAddress::new(endpoint, 2));
        assert!(membership.is_dead(&stranger));
        assert!(!membership.is_dead(&SiloAddress::new(endpoint, 2)));
    }
}
