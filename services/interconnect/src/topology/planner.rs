//! Interconnect Planner
//!
//! Pure mapping from the enablement matrix and redundancy mode to the set of
//! interconnects that must exist. Same input, same output, always.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::types::{CloudPair, CloudProvider, Interconnect, RedundancyMode};

/// One independent switch per unordered cloud pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnablementMatrix {
    #[serde(default, alias = "ab")]
    pub aws_gcp: bool,
    #[serde(default, alias = "ac")]
    pub aws_azure: bool,
    #[serde(default, alias = "bc")]
    pub gcp_azure: bool,
}

impl EnablementMatrix {
    pub fn new(aws_gcp: bool, aws_azure: bool, gcp_azure: bool) -> Self {
        Self {
            aws_gcp,
            aws_azure,
            gcp_azure,
        }
    }

    /// Full mesh
    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn is_enabled(&self, pair: CloudPair) -> bool {
        match pair.ordinal() {
            0 => self.aws_gcp,
            1 => self.aws_azure,
            _ => self.gcp_azure,
        }
    }

    /// Enabled pairs in canonical order
    pub fn enabled_pairs(&self) -> impl Iterator<Item = CloudPair> + '_ {
        CloudPair::ALL.into_iter().filter(|pair| self.is_enabled(*pair))
    }
}

/// Plan the interconnects for one generation pass.
///
/// Disabled pairs produce nothing. Every enabled pair gets the same tunnel
/// count, since one mode governs all links.
pub fn plan_interconnects(links: &EnablementMatrix, mode: RedundancyMode) -> Vec<Interconnect> {
    links
        .enabled_pairs()
        .map(|pair| Interconnect {
            pair,
            enabled: true,
            tunnel_count: mode.tunnel_count(),
        })
        .collect()
}

/// Clouds that take part in at least one enabled interconnect.
///
/// Only these get a gateway; a cloud shared by two links appears once.
pub fn participating_clouds(interconnects: &[Interconnect]) -> BTreeSet<CloudProvider> {
    interconnects
        .iter()
        .filter(|ic| ic.enabled)
        .flat_map(|ic| ic.pair.sides())
        .collect()
}
