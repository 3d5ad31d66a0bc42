use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use gdir_storage::DirectoryStore;

use crate::membership::ClusterMembership;
use crate::remote::RemoteClusters;
use crate::service::{EvictionNotice, GrainDirectory, ReconcileReport};

/// Periodically re-arbitrates `Doubtful` registrations and publishes the
/// ones that turned out to have lost through `evictions`.
///
/// A sweep runs every `interval`, whenever the membership view changes, and
/// whenever the prod handle is notified.
pub struct Reconciler<S, M, R> {
    directory: Arc<GrainDirectory<S, M, R>>,
    interval: Duration,
    prod: Arc<Notify>,
    evictions: mpsc::Sender<EvictionNotice>,
}

impl<S, M, R> Reconciler<S, M, R>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    pub fn new(
        directory: Arc<GrainDirectory<S, M, R>>,
        interval: Duration,
        evictions: mpsc::Sender<EvictionNotice>,
    ) -> Self {
        Reconciler { directory, interval, prod: Arc::new(Notify::new()), evictions }
    }

    /// Handle that triggers an immediate sweep.
    pub fn prod_handle(&self) -> Arc<Notify> {
        self.prod.clone()
    }

    /// One pass. Returns `None` once nobody listens for evictions anymore.
    pub async fn sweep(&self) -> Option<ReconcileReport> {
        let report = self.directory.reconcile_doubtful().await;
        for notice in &report.evicted {
            if self.evictions.send(notice.clone()).await.is_err() {
                return None;
            }
        }
        Some(report)
    }

    /// Run until the eviction receiver is dropped or the task is cancelled.
    pub async fn run(self) {
        let mut changes = self.directory.membership().subscribe();
        let mut watching = true;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.prod.notified() => {}
                changed = changes.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                }
            }
            if self.sweep().await.is_none() {
                tracing::debug!("eviction receiver dropped; reconciler stopping");
                break;
            }
        }
    }
}
