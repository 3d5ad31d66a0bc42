pub mod arbitration;
pub mod config;
pub mod membership;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod service;
pub mod silo_watch;
pub mod status;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use arbitration::{ArbitrationOutcome, ArbitrationSettings, Arbiter, RemoteReply};
pub use config::{DirectoryConfig, MultiClusterConfig, RetryConfig, StrategyConfig};
pub use membership::{ClusterMembership, MembershipSnapshot, MultiClusterTopology, StaticMembership};
pub use reconcile::Reconciler;
pub use remote::{NoRemoteClusters, RemoteClusters, RemoteEntry, RemoteQuery};
pub use retry::RetryPolicy;
pub use service::{
    DirectoryOptions, EvictionNotice, GrainDirectory, ReconcileReport, UnregisterOutcome,
};
pub use silo_watch::SiloDeathWatcher;
pub use status::{StatusRecord, StatusTable};
pub use strategy::{RegistrationStrategy, StrategyTable};
