use std::collections::BTreeSet;
use std::sync::Arc;

use gdir_storage::DirectoryStore;
use gdir_types::SiloAddress;

use crate::membership::ClusterMembership;
use crate::remote::RemoteClusters;
use crate::service::GrainDirectory;

/// Removes the registrations of silos as soon as membership stops listing
/// them as live.
pub struct SiloDeathWatcher<S, M, R> {
    directory: Arc<GrainDirectory<S, M, R>>,
}

impl<S, M, R> SiloDeathWatcher<S, M, R>
where
    S: DirectoryStore,
    M: ClusterMembership,
    R: RemoteClusters,
{
    pub fn new(directory: Arc<GrainDirectory<S, M, R>>) -> Self {
        SiloDeathWatcher { directory }
    }

    /// Run until membership goes away or the task is cancelled.
    pub async fn run(self) {
        let mut changes = self.directory.membership().subscribe();
        let mut live: BTreeSet<SiloAddress> = changes.borrow_and_update().live_silos.clone();
        while changes.changed().await.is_ok() {
            let now = changes.borrow_and_update().live_silos.clone();
            let dead: Vec<SiloAddress> = live.difference(&now).copied().collect();
            live = now;
            if dead.is_empty() {
                continue;
            }
            for silo in &dead {
                tracing::info!(%silo, "silo left membership; removing its registrations");
            }
            if let Err(e) = self.directory.unregister_silos(&dead).await {
                tracing::warn!(error = %e, silos = dead.len(), "failed to unregister dead silos");
            }
        }
    }
}
