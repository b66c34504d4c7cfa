//! Error types for the interconnect resolver
//!
//! Every failure aborts the whole generation pass; nothing here is retried.

use thiserror::Error;

use crate::topology::types::{CloudPair, CloudProvider, RedundancyMode};

/// Configuration problems, caught before any provisioning call
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An enabled link names a cloud that has no network descriptor
    #[error("link {pair} is enabled but {cloud} has no network descriptor")]
    MissingNetwork { pair: CloudPair, cloud: CloudProvider },

    /// A participating cloud has no provisioner registered
    #[error("no provisioner registered for participating cloud {cloud}")]
    MissingProvider { cloud: CloudProvider },

    /// A DNS domain references a cloud that has no network descriptor
    #[error("domain '{domain}' references {cloud}, which has no network descriptor")]
    UnknownDomainCloud { domain: String, cloud: CloudProvider },

    #[error("domain '{domain}' is declared more than once")]
    DuplicateDomain { domain: String },

    #[error("empty domain name for home cloud {home}")]
    EmptyDomain { home: CloudProvider },

    #[error("network CIDRs overlap: {first} {first_cidr} and {second} {second_cidr}")]
    OverlappingCidrs {
        first: CloudProvider,
        first_cidr: ipnet::Ipv4Net,
        second: CloudProvider,
        second_cidr: ipnet::Ipv4Net,
    },

    #[error("invalid BGP link-local block {block}: {reason}")]
    InvalidLinkLocalBlock { block: ipnet::Ipv4Net, reason: String },

    #[error("invalid ASN {asn} for {cloud}")]
    InvalidAsn { cloud: CloudProvider, asn: u32 },

    /// Only gateways whose routes need explicit propagation accept route tables
    #[error("{cloud} does not take route_propagation_tables")]
    UnsupportedRoutePropagation { cloud: CloudProvider },

    #[error("empty route table name in {cloud} route_propagation_tables")]
    EmptyRouteTable { cloud: CloudProvider },

    /// Neither the config nor the environment supplied a pre-shared key seed
    #[error("no pre-shared key seed: set tunnels.psk_seed or {env_var}")]
    MissingPskSeed { env_var: &'static str },

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A gateway handle does not have the addressing shape the active mode requires
#[derive(Debug, Error)]
pub enum AddressingError {
    #[error("{cloud} gateway exposes {actual} external address(es); {mode} mode requires {expected}")]
    AddressCount {
        cloud: CloudProvider,
        mode: RedundancyMode,
        expected: usize,
        actual: usize,
    },

    #[error("{cloud} gateway was provisioned in {actual} mode but the pass runs in {expected} mode")]
    ModeMismatch {
        cloud: CloudProvider,
        expected: RedundancyMode,
        actual: RedundancyMode,
    },

    #[error("provisioner for {expected} returned a gateway for {actual}")]
    CloudMismatch {
        expected: CloudProvider,
        actual: CloudProvider,
    },

    #[error("gateway for {cloud} is not a side of interconnect {pair}")]
    ForeignGateway { pair: CloudPair, cloud: CloudProvider },

    #[error("link-local block {block} has no room for tunnel {index} of {pair}")]
    LinkLocalExhausted {
        block: ipnet::Ipv4Net,
        pair: CloudPair,
        index: u8,
    },
}

/// Phase-2 logic touched phase-1 output that does not exist yet.
///
/// This is a programming-contract violation; the orchestrator barrier makes
/// it unreachable in a correct build.
#[derive(Debug, Error)]
pub enum SequencingError {
    #[error("{consumer} read the {resource} of {cloud} before its phase-1 step completed")]
    NotReady {
        cloud: CloudProvider,
        resource: &'static str,
        consumer: &'static str,
    },

    #[error("{cloud} DNS state cannot move from {from} to {to}")]
    InvalidTransition {
        cloud: CloudProvider,
        from: &'static str,
        to: &'static str,
    },
}

/// Top-level error of a generation pass
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Addressing(#[from] AddressingError),

    #[error(transparent)]
    Sequencing(#[from] SequencingError),

    /// An external provisioning collaborator failed
    #[error("{operation} failed for {cloud}: {source}")]
    Collaborator {
        cloud: CloudProvider,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_pair_and_cloud() {
        let err = ConfigError::MissingNetwork {
            pair: CloudPair::GCP_AZURE,
            cloud: CloudProvider::Azure,
        };
        assert_eq!(
            err.to_string(),
            "link gcp-azure is enabled but azure has no network descriptor"
        );
    }

    #[test]
    fn test_topology_error_is_transparent() {
        let err: TopologyError = AddressingError::ModeMismatch {
            cloud: CloudProvider::Aws,
            expected: RedundancyMode::Ha,
            actual: RedundancyMode::Single,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "aws gateway was provisioned in single mode but the pass runs in ha mode"
        );
    }
}
