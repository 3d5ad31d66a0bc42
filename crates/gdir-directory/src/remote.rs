use std::future::Future;

use gdir_types::{ClusterId, DirectoryError, GrainAddress, GrainId, MembershipVersion, MultiClusterStatus};

/// Ownership question sent to a peer cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQuery {
    pub grain_id: GrainId,
    pub requesting_cluster: ClusterId,
    pub membership_version: MembershipVersion,
}

/// A peer cluster's answer: its current row for the grain and the status it
/// holds for that row, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub cluster_id: ClusterId,
    pub address: GrainAddress,
    pub status: Option<MultiClusterStatus>,
}

impl RemoteEntry {
    /// Whether the row competes for global ownership. Cached pointers and
    /// withdrawn race losers do not.
    pub fn is_owner_claim(&self) -> bool {
        !matches!(self.status, Some(MultiClusterStatus::Cached | MultiClusterStatus::RaceLoser))
    }

    /// Whether the peer has already confirmed this row as the global owner.
    pub fn is_established_owner(&self) -> bool {
        self.status == Some(MultiClusterStatus::Owned)
    }
}

/// Transport to peer clusters' directories.
pub trait RemoteClusters: Send + Sync + 'static {
    fn query(&self, cluster: &ClusterId, query: RemoteQuery)
        -> impl Future<Output = Result<Option<RemoteEntry>, DirectoryError>> + Send;
}

/// For single-cluster deployments: every peer is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteClusters;

impl RemoteClusters for NoRemoteClusters {
    async fn query(&self, cluster: &ClusterId, _query: RemoteQuery) -> Result<Option<RemoteEntry>, DirectoryError> {
        Err(DirectoryError::Unavailable(format!("no transport to cluster {cluster}")))
    }
}
