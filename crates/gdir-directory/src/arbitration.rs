use std::sync::Arc;
use std::time::Duration;

use gdir_types::{ClusterId, DirectoryError, GrainAddress};

use crate::remote::{RemoteClusters, RemoteEntry, RemoteQuery};
use crate::retry::RetryPolicy;

/// What one peer cluster said about a grain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    Absent,
    Claim(RemoteEntry),
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationOutcome {
    /// No contender outranks the local candidate and every peer answered.
    Owned,
    /// No known contender outranks the local candidate, but some peers did
    /// not answer.
    Doubtful { unreachable: Vec<ClusterId> },
    /// A peer already owns the grain, or holds a request that outranks the
    /// local candidate.
    Lost { winner: RemoteEntry },
}

/// Highest-ranked owner claim among `replies`. Established owners come
/// first, then `(version, cluster)`.
pub fn best_claim<'a>(replies: impl IntoIterator<Item = &'a RemoteReply>) -> Option<&'a RemoteEntry> {
    replies
        .into_iter()
        .filter_map(|r| match r {
            RemoteReply::Claim(e) if e.is_owner_claim() => Some(e),
            _ => None,
        })
        .max_by(|a, b| rank(a).cmp(&rank(b)))
}

fn rank(e: &RemoteEntry) -> (bool, gdir_types::MembershipVersion, &ClusterId) {
    (e.is_established_owner(), e.address.membership_version, &e.cluster_id)
}

/// Deterministic winner selection. The result depends only on the set of
/// replies, not on the order they arrived in.
///
/// A peer that already owns the grain wins regardless of versions; the
/// `(version, cluster)` rank only orders requests still in flight.
pub fn decide(
    local_cluster: &ClusterId,
    candidate: &GrainAddress,
    replies: &[(ClusterId, RemoteReply)],
) -> ArbitrationOutcome {
    let mine = (false, candidate.membership_version, local_cluster);
    let contender = best_claim(replies.iter().map(|(_, r)| r).filter(|r| match r {
        RemoteReply::Claim(e) => !e.address.same_activation(candidate),
        _ => true,
    }));
    if let Some(winner) = contender {
        if rank(winner) > mine {
            return ArbitrationOutcome::Lost { winner: winner.clone() };
        }
    }
    let mut unreachable: Vec<ClusterId> = replies
        .iter()
        .filter(|(_, r)| matches!(r, RemoteReply::Unreachable))
        .map(|(c, _)| c.clone())
        .collect();
    if unreachable.is_empty() {
        ArbitrationOutcome::Owned
    } else {
        unreachable.sort();
        ArbitrationOutcome::Doubtful { unreachable }
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrationSettings {
    /// Bound on a single remote attempt.
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        ArbitrationSettings {
            query_timeout: Duration::from_millis(500),
            retry: RetryPolicy::backoff(2, Duration::from_millis(50), Duration::from_millis(400)),
        }
    }
}

/// Runs the ownership query against every peer cluster in parallel.
pub struct Arbiter<R> {
    remotes: Arc<R>,
    settings: ArbitrationSettings,
    local_cluster: ClusterId,
}

impl<R: RemoteClusters> Arbiter<R> {
    pub fn new(remotes: Arc<R>, settings: ArbitrationSettings, local_cluster: ClusterId) -> Self {
        Arbiter { remotes, settings, local_cluster }
    }

    pub fn local_cluster(&self) -> &ClusterId {
        &self.local_cluster
    }

    /// Asks every cluster in `clusters` about `query.grain_id`. Each peer gets
    /// its own task; a peer that keeps failing past the retry budget is
    /// reported as `Unreachable`.
    pub async fn collect(&self, clusters: &[ClusterId], query: RemoteQuery) -> Vec<(ClusterId, RemoteReply)> {
        let mut tasks = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let remotes = self.remotes.clone();
            let settings = self.settings.clone();
            let cluster = cluster.clone();
            let query = query.clone();
            let handle = tokio::spawn(async move {
                let reply = ask(&*remotes, &settings, &cluster, query).await;
                (cluster, reply)
            });
            tasks.push(handle);
        }

        let mut replies = Vec::with_capacity(tasks.len());
        for (task, cluster) in tasks.into_iter().zip(clusters) {
            match task.await {
                Ok(pair) => replies.push(pair),
                Err(e) => {
                    tracing::warn!(%cluster, error = %e, "remote query task failed");
                    replies.push((cluster.clone(), RemoteReply::Unreachable));
                }
            }
        }
        replies
    }

    pub async fn arbitrate(&self, candidate: &GrainAddress, clusters: &[ClusterId]) -> ArbitrationOutcome {
        let query = RemoteQuery {
            grain_id: candidate.grain_id.clone(),
            requesting_cluster: self.local_cluster.clone(),
            membership_version: candidate.membership_version,
        };
        let replies = self.collect(clusters, query).await;
        decide(&self.local_cluster, candidate, &replies)
    }
}

async fn ask<R: RemoteClusters>(
    remotes: &R,
    settings: &ArbitrationSettings,
    cluster: &ClusterId,
    query: RemoteQuery,
) -> RemoteReply {
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(settings.query_timeout, remotes.query(cluster, query.clone())).await {
            Ok(r) => r,
            Err(_) => Err(DirectoryError::Timeout),
        };
        match result {
            Ok(Some(entry)) => return RemoteReply::Claim(entry),
            Ok(None) => return RemoteReply::Absent,
            Err(e) if attempt < settings.retry.max_retries() => {
                let delay = settings.retry.retry_delay(attempt);
                tracing::debug!(%cluster, attempt, error = %e, ?delay, "remote query failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(%cluster, grain = %query.grain_id, error = %e, "remote cluster unreachable");
                return RemoteReply::Unreachable;
            }
        }
    }
}
