use std::collections::HashMap;

use gdir_types::{ClusterId, GrainType};

use crate::config::StrategyConfig;
use crate::membership::MultiClusterTopology;

/// Registration policy for a grain type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStrategy {
    /// One activation per cluster; no cross-cluster coordination.
    #[default]
    ClusterLocal,
    /// One activation across every cluster of the topology.
    GlobalSingleInstance,
}

impl RegistrationStrategy {
    /// Clusters that must be consulted before a registration is final.
    pub fn remote_instances(
        &self,
        topology: &MultiClusterTopology,
        my_cluster: &ClusterId,
    ) -> Vec<ClusterId> {
        match self {
            RegistrationStrategy::ClusterLocal => Vec::new(),
            RegistrationStrategy::GlobalSingleInstance => topology
                .clusters
                .iter()
                .filter(|c| *c != my_cluster)
                .cloned()
                .collect(),
        }
    }
}

/// Grain type → strategy, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    by_type: HashMap<GrainType, RegistrationStrategy>,
    default: RegistrationStrategy,
}

impl StrategyTable {
    pub fn new(default: RegistrationStrategy) -> Self {
        StrategyTable { by_type: HashMap::new(), default }
    }

    pub fn with(mut self, grain_type: GrainType, strategy: RegistrationStrategy) -> Self {
        self.by_type.insert(grain_type, strategy);
        self
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        config
            .grain_types
            .iter()
            .fold(StrategyTable::new(config.default), |table, (name, strategy)| {
                table.with(GrainType::new(name.clone()), *strategy)
            })
    }

    pub fn for_type(&self, grain_type: &GrainType) -> RegistrationStrategy {
        self.by_type.get(grain_type).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn topology() -> MultiClusterTopology {
        MultiClusterTopology::new(["us", "eu", "ap"].map(ClusterId::new))
    }

    #[test]
    fn cluster_local_has_no_remotes() {
        let remotes =
            RegistrationStrategy::ClusterLocal.remote_instances(&topology(), &ClusterId::new("us"));
        assert!(remotes.is_empty());
    }

    #[test]
    fn global_single_instance_lists_every_other_cluster() {
        let remotes = RegistrationStrategy::GlobalSingleInstance
            .remote_instances(&topology(), &ClusterId::new("eu"));
        assert_eq!(remotes, vec![ClusterId::new("us"), ClusterId::new("ap")]);
    }

    #[test]
    fn table_falls_back_to_default() {
        let config = StrategyConfig {
            default: RegistrationStrategy::ClusterLocal,
            grain_types: BTreeMap::from([(
                "account".to_string(),
                RegistrationStrategy::GlobalSingleInstance,
            )]),
        };
        let table = StrategyTable::from_config(&config);
        assert_eq!(
            table.for_type(&GrainType::new("account")),
            RegistrationStrategy::GlobalSingleInstance
        );
        assert_eq!(table.for_type(&GrainType::new("session")), RegistrationStrategy::ClusterLocal);
    }
}
