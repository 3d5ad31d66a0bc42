use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::arbitration::ArbitrationSettings;
use crate::retry::RetryPolicy;
use crate::strategy::RegistrationStrategy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub cluster_id: String,
    pub provider_id: String,
    /// Membership versions during which a registration cannot be removed
    /// by a nonexistent-activation report.
    pub freshness_window: u64,
    /// Store the winner's address locally after losing a race.
    pub cache_remote_winners: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            cluster_id: "local".into(),
            provider_id: "default".into(),
            freshness_window: 1,
            cache_remote_winners: false,
        }
    }
}

/// Backoff for transient store failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig { max_retries: 3, base_delay_ms: 20, max_delay_ms: 500 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            return RetryPolicy::NoRetry;
        }
        RetryPolicy::backoff(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiClusterConfig {
    /// Every cluster of the topology, the local one included.
    pub clusters: Vec<String>,
    /// Cluster id → gRPC endpoint of its cluster directory service.
    pub peers: BTreeMap<String, String>,
    pub query_timeout_ms: u64,
    pub query_retries: u32,
    pub query_base_delay_ms: u64,
    pub query_max_delay_ms: u64,
    pub reconcile_interval_ms: u64,
}

impl Default for MultiClusterConfig {
    fn default() -> Self {
        MultiClusterConfig {
            clusters: Vec::new(),
            peers: BTreeMap::new(),
            query_timeout_ms: 500,
            query_retries: 2,
            query_base_delay_ms: 50,
            query_max_delay_ms: 400,
            reconcile_interval_ms: 5_000,
        }
    }
}

impl MultiClusterConfig {
    pub fn arbitration(&self) -> ArbitrationSettings {
        let retry = if self.query_retries == 0 {
            RetryPolicy::NoRetry
        } else {
            RetryPolicy::backoff(
                self.query_retries,
                Duration::from_millis(self.query_base_delay_ms),
                Duration::from_millis(self.query_max_delay_ms),
            )
        };
        ArbitrationSettings { query_timeout: Duration::from_millis(self.query_timeout_ms), retry }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub default: RegistrationStrategy,
    /// Grain type name → strategy.
    pub grain_types: BTreeMap<String, RegistrationStrategy>,
}
