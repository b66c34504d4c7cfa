//! Network Registry
//!
//! Per-cloud network identity needed by later stages, built once from configuration.

use std::collections::BTreeMap;

use crate::error::ConfigError;

use super::types::{CloudProvider, Network};

#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: BTreeMap<CloudProvider, Network>,
}

impl NetworkRegistry {
    /// Build the registry, rejecting networks whose CIDRs overlap
    pub fn new(networks: impl IntoIterator<Item = Network>) -> Result<Self, ConfigError> {
        let mut registry = BTreeMap::new();
        for network in networks {
            registry.insert(network.cloud, network);
        }

        let all: Vec<&Network> = registry.values().collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.cidr.contains(&b.cidr.network()) || b.cidr.contains(&a.cidr.network()) {
                    return Err(ConfigError::OverlappingCidrs {
                        first: a.cloud,
                        first_cidr: a.cidr,
                        second: b.cloud,
                        second_cidr: b.cidr,
                    });
                }
            }
        }

        Ok(Self { networks: registry })
    }

    pub fn get(&self, cloud: CloudProvider) -> Option<&Network> {
        self.networks.get(&cloud)
    }
}
