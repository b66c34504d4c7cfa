//! Topology configuration
//!
//! One explicit value object per generation pass, loaded from TOML. Nothing
//! downstream reads ambient state except the pre-shared key seed, which may
//! come from the environment.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use crate::error::ConfigError;
use crate::topology::planner::EnablementMatrix;
use crate::topology::registry::NetworkRegistry;
use crate::topology::types::{
    normalize_domain, CloudPair, CloudProvider, DomainEntry, Network, RedundancyMode,
};

/// Environment fallback for `tunnels.psk_seed`
pub const PSK_SEED_ENV: &str = "INTERCONNECT_PSK_SEED";

fn default_resource_prefix() -> String {
    "interconnect".to_string()
}

fn default_bgp_link_block() -> Ipv4Net {
    Ipv4Net::new(Ipv4Addr::new(169, 254, 21, 0), 24).unwrap_or_default()
}

fn default_ike_version() -> u8 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mode: RedundancyMode,

    /// Prefix for resource names produced by the reference provisioners
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,

    #[serde(default)]
    pub links: EnablementMatrix,

    #[serde(default)]
    pub networks: NetworksConfig,

    #[serde(default)]
    pub tunnels: TunnelConfig,

    #[serde(default)]
    pub dns: DnsConfig,
}

/// `[networks.aws]`, `[networks.gcp]`, `[networks.azure]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworksConfig {
    pub aws: Option<NetworkConfig>,
    pub gcp: Option<NetworkConfig>,
    pub azure: Option<NetworkConfig>,
}

impl NetworksConfig {
    pub fn get(&self, cloud: CloudProvider) -> Option<&NetworkConfig> {
        match cloud {
            CloudProvider::Aws => self.aws.as_ref(),
            CloudProvider::Gcp => self.gcp.as_ref(),
            CloudProvider::Azure => self.azure.as_ref(),
        }
    }

    /// Configured networks in canonical cloud order
    pub fn iter(&self) -> impl Iterator<Item = (CloudProvider, &NetworkConfig)> {
        CloudProvider::ALL
            .into_iter()
            .filter_map(move |cloud| self.get(cloud).map(|net| (cloud, net)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// VPC id, VNet name or VPC network name
    pub id: String,
    pub cidr: Ipv4Net,
    pub region: String,
    #[serde(default)]
    pub zones: Vec<String>,
    /// Defaults to the cloud's usual gateway ASN
    pub asn: Option<u32>,
    #[serde(default)]
    pub requires_bgp: bool,
    #[serde(default)]
    pub gateway_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub resolver_addresses: Vec<IpAddr>,
    /// AWS only: route tables that receive the VPN gateway's routes
    #[serde(default)]
    pub route_propagation_tables: Vec<String>,
}

impl NetworkConfig {
    fn to_network(&self, cloud: CloudProvider) -> Network {
        Network {
            cloud,
            id: self.id.clone(),
            cidr: self.cidr,
            region: self.region.clone(),
            zones: self.zones.clone(),
            asn: self.asn.unwrap_or_else(|| cloud.default_asn()),
            requires_bgp: self.requires_bgp,
            gateway_addresses: self.gateway_addresses.clone(),
            resolver_addresses: self.resolver_addresses.clone(),
            route_propagation_tables: self.route_propagation_tables.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Seed for derived pre-shared keys; falls back to `INTERCONNECT_PSK_SEED`
    pub psk_seed: Option<String>,

    /// /24 that BGP link-local /30s are carved from; HA also uses the next /24
    #[serde(default = "default_bgp_link_block")]
    pub bgp_link_block: Ipv4Net,

    #[serde(default = "default_ike_version")]
    pub ike_version: u8,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            psk_seed: None,
            bgp_link_block: default_bgp_link_block(),
            ike_version: default_ike_version(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub domains: Vec<DomainEntry>,
}

impl TopologyConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_toml_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn network(&self, cloud: CloudProvider) -> Option<Network> {
        self.networks.get(cloud).map(|net| net.to_network(cloud))
    }

    pub fn network_registry(&self) -> Result<NetworkRegistry, ConfigError> {
        NetworkRegistry::new(self.networks.iter().map(|(cloud, net)| net.to_network(cloud)))
    }

    /// Seed from the config file, else from the environment
    pub fn psk_seed(&self) -> Result<String, ConfigError> {
        self.psk_seed_from(env::var(PSK_SEED_ENV).ok())
    }

    fn psk_seed_from(&self, env_value: Option<String>) -> Result<String, ConfigError> {
        self.tunnels
            .psk_seed
            .clone()
            .or(env_value)
            .filter(|seed| !seed.trim().is_empty())
            .ok_or(ConfigError::MissingPskSeed {
                env_var: PSK_SEED_ENV,
            })
    }

    /// Everything that can be checked before a collaborator is called
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pair in self.links.enabled_pairs() {
            for cloud in pair.sides() {
                if self.networks.get(cloud).is_none() {
                    return Err(ConfigError::MissingNetwork { pair, cloud });
                }
            }
        }

        for (cloud, net) in self.networks.iter() {
            if net.asn == Some(0) {
                return Err(ConfigError::InvalidAsn { cloud, asn: 0 });
            }
            if !net.route_propagation_tables.is_empty() && !cloud.propagates_vpn_routes() {
                return Err(ConfigError::UnsupportedRoutePropagation { cloud });
            }
            if net.route_propagation_tables.iter().any(|t| t.trim().is_empty()) {
                return Err(ConfigError::EmptyRouteTable { cloud });
            }
        }

        self.network_registry()?;
        self.validate_link_block()?;
        self.validate_domains()?;
        self.psk_seed()?;

        Ok(())
    }

    fn validate_link_block(&self) -> Result<(), ConfigError> {
        let block = self.tunnels.bgp_link_block;
        let invalid = |reason: &str| ConfigError::InvalidLinkLocalBlock {
            block,
            reason: reason.to_string(),
        };

        if block.prefix_len() != 24 {
            return Err(invalid("must be a /24"));
        }
        if block.addr() != block.network() {
            return Err(invalid("host bits are set"));
        }
        let [a, b, third, _] = block.network().octets();
        if (a, b) != (169, 254) {
            return Err(invalid("must lie inside 169.254.0.0/16"));
        }
        let last_index = u16::from(self.mode.tunnel_count()) - 1;
        if u16::from(third) + last_index > 255 {
            return Err(invalid("no room for the second HA tunnel"));
        }
        Ok(())
    }

    fn validate_domains(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for entry in &self.dns.domains {
            let domain = normalize_domain(&entry.domain);
            if domain.is_empty() {
                return Err(ConfigError::EmptyDomain { home: entry.home });
            }
            for cloud in std::iter::once(entry.home).chain(entry.resolvers.iter().copied()) {
                if self.networks.get(cloud).is_none() {
                    return Err(ConfigError::UnknownDomainCloud {
                        domain: domain.clone(),
                        cloud,
                    });
                }
            }
            if !seen.insert(domain.clone()) {
                return Err(ConfigError::DuplicateDomain { domain });
            }
        }
        Ok(())
    }

    /// First enabled pair that names `cloud`, for error context
    pub(crate) fn pair_naming(&self, cloud: CloudProvider) -> Option<CloudPair> {
        self.links.enabled_pairs().find(|pair| pair.contains(cloud))
    }
}
