//! Interconnect Topology Types
//!
//! Core types for networks, gateways, tunnels and DNS forwarding across
//! AWS, GCP and Azure. Every value here is created once per generation pass
//! and never mutated afterwards.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::AddressingError;

/// Cloud provider identifier
///
/// Declaration order is the canonical network ordering: A = aws, B = gcp, C = azure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 3] =
        [CloudProvider::Aws, CloudProvider::Gcp, CloudProvider::Azure];

    /// Default BGP ASN for the cloud's VPN gateway
    pub fn default_asn(self) -> u32 {
        match self {
            CloudProvider::Aws => 64512,
            CloudProvider::Gcp => 65000,
            CloudProvider::Azure => 65515,
        }
    }

    /// Whether forwarding queries out of this cloud needs an outbound resolver endpoint.
    ///
    /// Cloud DNS forwards natively through forwarding zones; Route 53 and the
    /// Azure private resolver need a dedicated outbound endpoint.
    pub fn forwards_via_outbound_endpoint(self) -> bool {
        !matches!(self, CloudProvider::Gcp)
    }

    /// Whether routes learned by the VPN gateway must be propagated into
    /// route tables explicitly. Cloud Router and the Azure VNet gateway
    /// program their networks on their own.
    pub fn propagates_vpn_routes(self) -> bool {
        matches!(self, CloudProvider::Aws)
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Gcp => write!(f, "gcp"),
            CloudProvider::Azure => write!(f, "azure"),
        }
    }
}

/// Unordered pair of distinct clouds, stored in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CloudPair {
    first: CloudProvider,
    second: CloudProvider,
}

impl CloudPair {
    pub const AWS_GCP: CloudPair = CloudPair {
        first: CloudProvider::Aws,
        second: CloudProvider::Gcp,
    };
    pub const AWS_AZURE: CloudPair = CloudPair {
        first: CloudProvider::Aws,
        second: CloudProvider::Azure,
    };
    pub const GCP_AZURE: CloudPair = CloudPair {
        first: CloudProvider::Gcp,
        second: CloudProvider::Azure,
    };

    /// All pairs in ordinal order (AB, AC, BC)
    pub const ALL: [CloudPair; 3] = [Self::AWS_GCP, Self::AWS_AZURE, Self::GCP_AZURE];

    /// Build a pair from two clouds in any order. Returns `None` for a self-pair.
    pub fn new(a: CloudProvider, b: CloudProvider) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { first: a, second: b }),
            std::cmp::Ordering::Greater => Some(Self { first: b, second: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> CloudProvider {
        self.first
    }

    pub fn second(&self) -> CloudProvider {
        self.second
    }

    pub fn sides(&self) -> [CloudProvider; 2] {
        [self.first, self.second]
    }

    /// Position of the pair in [`CloudPair::ALL`]; feeds deterministic addressing.
    pub fn ordinal(&self) -> u8 {
        match (self.first, self.second) {
            (CloudProvider::Aws, CloudProvider::Gcp) => 0,
            (CloudProvider::Aws, CloudProvider::Azure) => 1,
            _ => 2,
        }
    }

    pub fn contains(&self, cloud: CloudProvider) -> bool {
        self.first == cloud || self.second == cloud
    }

    /// The other side of the pair, if `cloud` is one of its sides
    pub fn peer_of(&self, cloud: CloudProvider) -> Option<CloudProvider> {
        if cloud == self.first {
            Some(self.second)
        } else if cloud == self.second {
            Some(self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for CloudPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

/// Redundancy mode governing every link in one generation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyMode {
    /// One tunnel per enabled pair, static routing unless a side requires BGP
    #[default]
    #[serde(alias = "dev")]
    Single,
    /// Two tunnels per enabled pair over BGP-capable gateways
    #[serde(alias = "prod")]
    Ha,
}

impl RedundancyMode {
    pub fn tunnel_count(self) -> u8 {
        match self {
            RedundancyMode::Single => 1,
            RedundancyMode::Ha => 2,
        }
    }

    /// External addresses a gateway must expose in this mode
    pub fn addresses_per_gateway(self) -> usize {
        self.tunnel_count() as usize
    }
}

impl fmt::Display for RedundancyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedundancyMode::Single => write!(f, "single"),
            RedundancyMode::Ha => write!(f, "ha"),
        }
    }
}

/// A participating cloud network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub cloud: CloudProvider,
    /// Provider-assigned network id (VPC id, VNet name, ...)
    pub id: String,
    pub cidr: Ipv4Net,
    pub region: String,
    pub zones: Vec<String>,
    /// BGP ASN of the network's VPN gateway
    pub asn: u32,
    /// The gateway's native protocol needs BGP even for a single tunnel
    pub requires_bgp: bool,
    /// Literal gateway addresses, when known ahead of provisioning
    pub gateway_addresses: Vec<IpAddr>,
    /// Literal inbound resolver addresses, when known ahead of provisioning
    pub resolver_addresses: Vec<IpAddr>,
    /// Route tables that receive the VPN gateway's routes; empty means the
    /// network's main route table
    pub route_propagation_tables: Vec<String>,
}

/// Reference to an attribute of a resource that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource: String,
    pub attribute: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// An externally produced address: either known now or bound by the executor later
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Ip(IpAddr),
    Deferred(ResourceRef),
}

impl Address {
    pub fn deferred(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Address::Deferred(ResourceRef {
            resource: resource.into(),
            attribute: attribute.into(),
        })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Address::Deferred(_))
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address::Ip(ip)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(ip) => write!(f, "{}", ip),
            Address::Deferred(reference) => write!(f, "{}", reference),
        }
    }
}

/// Addressing and identity a cloud's VPN gateway exposes once created
///
/// The address count is checked against the mode at construction, so a
/// handle that exists is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GatewayHandleRepr")]
pub struct GatewayHandle {
    cloud: CloudProvider,
    mode: RedundancyMode,
    name: String,
    external_addresses: Vec<Address>,
    asn: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_router: Option<String>,
}

impl GatewayHandle {
    pub fn new(
        cloud: CloudProvider,
        mode: RedundancyMode,
        name: impl Into<String>,
        external_addresses: Vec<Address>,
        asn: u32,
    ) -> Result<Self, AddressingError> {
        let expected = mode.addresses_per_gateway();
        if external_addresses.len() != expected {
            return Err(AddressingError::AddressCount {
                cloud,
                mode,
                expected,
                actual: external_addresses.len(),
            });
        }

        Ok(Self {
            cloud,
            mode,
            name: name.into(),
            external_addresses,
            asn,
            cloud_router: None,
        })
    }

    /// Attach the BGP-capable router backing an HA gateway
    pub fn with_cloud_router(mut self, router: impl Into<String>) -> Self {
        self.cloud_router = Some(router.into());
        self
    }

    pub fn cloud(&self) -> CloudProvider {
        self.cloud
    }

    pub fn mode(&self) -> RedundancyMode {
        self.mode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn external_addresses(&self) -> &[Address] {
        &self.external_addresses
    }

    pub fn asn(&self) -> u32 {
        self.asn
    }

    pub fn cloud_router(&self) -> Option<&str> {
        self.cloud_router.as_deref()
    }
}

#[derive(Deserialize)]
struct GatewayHandleRepr {
    cloud: CloudProvider,
    mode: RedundancyMode,
    name: String,
    external_addresses: Vec<Address>,
    asn: u32,
    #[serde(default)]
    cloud_router: Option<String>,
}

impl TryFrom<GatewayHandleRepr> for GatewayHandle {
    type Error = AddressingError;

    fn try_from(repr: GatewayHandleRepr) -> Result<Self, Self::Error> {
        let handle = GatewayHandle::new(
            repr.cloud,
            repr.mode,
            repr.name,
            repr.external_addresses,
            repr.asn,
        )?;
        Ok(match repr.cloud_router {
            Some(router) => handle.with_cloud_router(router),
            None => handle,
        })
    }
}

/// A planned bidirectional link between two cloud networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interconnect {
    pub pair: CloudPair,
    pub enabled: bool,
    /// 1 in single mode, 2 in HA mode
    pub tunnel_count: u8,
}

/// IPsec pre-shared key; never printed by `Debug`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresharedKey(String);

impl PresharedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(<redacted>)")
    }
}

/// One side's record of a tunnel
///
/// Both sides of a tunnel get a record; `peer_addr` on one side equals
/// `local_addr` on the other, and likewise for the BGP addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    pub interconnect: CloudPair,
    pub index: u8,
    /// Cloud this record is configured on
    pub owner: CloudProvider,
    pub peer: CloudProvider,
    pub local_addr: Address,
    pub peer_addr: Address,
    pub preshared_key: PresharedKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_bgp_addr: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_bgp_addr: Option<Ipv4Addr>,
    /// The /30 both BGP addresses live in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_cidr: Option<Ipv4Net>,
    pub local_asn: u32,
    pub peer_asn: u32,
    /// Address space reachable through this tunnel
    pub peer_cidr: Ipv4Net,
    pub ike_version: u8,
}

impl Tunnel {
    pub fn name(&self) -> String {
        format!("{}-t{}-{}", self.interconnect, self.index, self.owner)
    }

    pub fn has_bgp(&self) -> bool {
        self.local_bgp_addr.is_some()
    }
}

/// Static route towards a peer network, used by single-mode tunnels without BGP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub cloud: CloudProvider,
    pub interconnect: CloudPair,
    pub tunnel_index: u8,
    pub destination: Ipv4Net,
}

impl StaticRoute {
    pub fn name(&self) -> String {
        format!("{}-t{}-{}-route", self.interconnect, self.tunnel_index, self.cloud)
    }
}

/// Route table targeted by a gateway route propagation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTableRef {
    /// The table associated with the network by default
    Main,
    Named(String),
}

impl fmt::Display for RouteTableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTableRef::Main => write!(f, "@main"),
            RouteTableRef::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Propagates the routes a VPN gateway learns into one route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePropagation {
    pub cloud: CloudProvider,
    pub gateway: String,
    pub route_table: RouteTableRef,
}

impl RoutePropagation {
    pub fn name(&self) -> String {
        match &self.route_table {
            RouteTableRef::Main => format!("{}-rp-main", self.gateway),
            RouteTableRef::Named(table) => format!("{}-rp-{}", self.gateway, table),
        }
    }
}

/// Direction of a DNS resolver endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointDirection {
    /// Receives cross-cloud queries
    Inbound,
    /// Originates forwarded queries
    Outbound,
}

impl fmt::Display for EndpointDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointDirection::Inbound => write!(f, "inbound"),
            EndpointDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// A cloud's DNS resolver ingress or egress point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverEndpoint {
    pub cloud: CloudProvider,
    pub direction: EndpointDirection,
    pub name: String,
    pub addresses: Vec<Address>,
}

/// Queries for `domain` issued in `owner_cloud` are forwarded to `target_cloud`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub name: String,
    pub owner_cloud: CloudProvider,
    pub domain: String,
    pub target_cloud: CloudProvider,
    pub target_addresses: Vec<Address>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// Zone in the domain's home cloud holding its records
    Authoritative,
    /// Locally owned, non-forwarding zone used when no peer resolver is reachable
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateZone {
    pub name: String,
    pub cloud: CloudProvider,
    pub domain: String,
    pub kind: ZoneKind,
}

/// An internal DNS domain: hosted by `home`, resolvable from `resolvers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub domain: String,
    pub home: CloudProvider,
    #[serde(default)]
    pub resolvers: Vec<CloudProvider>,
}

/// A domain that could not be forwarded and fell back to a local zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResolutionGap {
    pub cloud: CloudProvider,
    pub domain: String,
    pub intended_target: CloudProvider,
    pub reason: String,
}

/// Lowercase, trimmed, without the trailing root dot
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Domain rendered for use inside resource names
pub fn domain_slug(domain: &str) -> String {
    domain.replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_pair_is_unordered() {
        let ab = CloudPair::new(CloudProvider::Gcp, CloudProvider::Aws).unwrap();
        assert_eq!(ab, CloudPair::AWS_GCP);
        assert_eq!(ab.to_string(), "aws-gcp");
        assert!(CloudPair::new(CloudProvider::Azure, CloudProvider::Azure).is_none());
    }

    #[test]
    fn test_pair_ordinals_follow_canonical_order() {
        let ordinals: Vec<u8> = CloudPair::ALL.iter().map(|p| p.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);

        let mut sorted = CloudPair::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, CloudPair::ALL.to_vec());
    }

    #[test]
    fn test_peer_of() {
        let pair = CloudPair::GCP_AZURE;
        assert_eq!(pair.peer_of(CloudProvider::Gcp), Some(CloudProvider::Azure));
        assert_eq!(pair.peer_of(CloudProvider::Aws), None);
    }

    #[test]
    fn test_mode_aliases() {
        let dev: RedundancyMode = serde_json::from_str("\"dev\"").unwrap();
        let prod: RedundancyMode = serde_json::from_str("\"prod\"").unwrap();
        assert_eq!(dev, RedundancyMode::Single);
        assert_eq!(prod, RedundancyMode::Ha);
        assert_eq!(prod.tunnel_count(), 2);
    }

    #[test]
    fn test_gateway_handle_enforces_address_count() {
        let err = GatewayHandle::new(
            CloudProvider::Gcp,
            RedundancyMode::Ha,
            "gcp-vpn-gateway",
            vec![Address::deferred("google_compute_ha_vpn_gateway.gw", "interface0")],
            65000,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            AddressingError::AddressCount { expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn test_gateway_handle_deserialization_is_validated() {
        let json = r#"{
            "cloud": "aws",
            "mode": "single",
            "name": "aws-vgw",
            "external_addresses": ["203.0.113.1", "203.0.113.2"],
            "asn": 64512
        }"#;

        assert!(serde_json::from_str::<GatewayHandle>(json).is_err());
    }

    #[test]
    fn test_address_display() {
        let ip: Address = "203.0.113.7".parse::<IpAddr>().unwrap().into();
        assert_eq!(ip.to_string(), "203.0.113.7");

        let deferred = Address::deferred("aws_vpn_connection.gcp", "tunnel1_address");
        assert_eq!(deferred.to_string(), "${aws_vpn_connection.gcp.tunnel1_address}");
        assert!(deferred.is_deferred());
    }

    #[test]
    fn test_preshared_key_is_redacted() {
        let key = PresharedKey::new("super-secret");
        assert_eq!(format!("{:?}", key), "PresharedKey(<redacted>)");
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" AWS.Inner. "), "aws.inner");
        assert_eq!(domain_slug("google.inner"), "google-inner");
    }
}
