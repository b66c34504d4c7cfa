//! Cloud Provider Adapters
//!
//! Trait-based abstraction over the per-cloud provisioning collaborators that
//! create VPN gateways and DNS resolver endpoints across AWS, GCP and Azure.
//!
//! The reference adapters never call a cloud API. They emit literal
//! addresses when the network descriptor already carries them and deferred
//! resource references otherwise, which the executor binds at apply time.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ConfigError;

use super::types::{
    Address, CloudProvider, EndpointDirection, GatewayHandle, Network, RedundancyMode,
    ResolverEndpoint,
};

/// Provisioning collaborator for one cloud
#[async_trait]
pub trait CloudProviderAdapter: Send + Sync {
    /// Cloud this adapter provisions into
    fn cloud(&self) -> CloudProvider;

    /// Create (or describe) the VPN gateway of `network`
    async fn provision_gateway(
        &self,
        network: &Network,
        asn: u32,
        mode: RedundancyMode,
    ) -> Result<GatewayHandle>;

    /// Create (or describe) a DNS resolver endpoint in `network`
    async fn provision_resolver_endpoint(
        &self,
        network: &Network,
        direction: EndpointDirection,
    ) -> Result<ResolverEndpoint>;
}

/// Names depend on the resource prefix, the cloud and the direction only, so
/// reruns reproduce them
fn endpoint_name(prefix: &str, cloud: CloudProvider, direction: EndpointDirection) -> String {
    format!("{}-{}-resolver-{}", prefix, cloud, direction)
}

/// Literal addresses from the descriptor if any were given, otherwise one
/// deferred reference per slot
fn addresses_or_deferred(
    literal: &[std::net::IpAddr],
    count: usize,
    deferred: impl Fn(usize) -> Address,
) -> Vec<Address> {
    if literal.is_empty() {
        (0..count).map(deferred).collect()
    } else {
        literal.iter().copied().map(Address::from).collect()
    }
}

/// AWS - virtual private gateway plus Route 53 Resolver endpoints
pub struct AwsProvider {
    resource_prefix: String,
}

impl AwsProvider {
    pub fn new(resource_prefix: &str) -> Self {
        Self {
            resource_prefix: resource_prefix.to_string(),
        }
    }
}

#[async_trait]
impl CloudProviderAdapter for AwsProvider {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn provision_gateway(
        &self,
        network: &Network,
        asn: u32,
        mode: RedundancyMode,
    ) -> Result<GatewayHandle> {
        let name = format!("{}-aws-vgw", self.resource_prefix);
        let resource = format!("aws_vpn_gateway.{}", name);
        let addresses = addresses_or_deferred(
            &network.gateway_addresses,
            mode.addresses_per_gateway(),
            |i| Address::deferred(resource.clone(), format!("tunnel{}_address", i + 1)),
        );

        info!(network = %network.id, gateway = %name, "Planned AWS VPN gateway");
        Ok(GatewayHandle::new(CloudProvider::Aws, mode, name, addresses, asn)?)
    }

    async fn provision_resolver_endpoint(
        &self,
        network: &Network,
        direction: EndpointDirection,
    ) -> Result<ResolverEndpoint> {
        let name = endpoint_name(&self.resource_prefix, CloudProvider::Aws, direction);
        let resource = format!("aws_route53_resolver_endpoint.{}", name);

        // Route 53 Resolver endpoints always span two subnets
        let addresses = match direction {
            EndpointDirection::Inbound => {
                addresses_or_deferred(&network.resolver_addresses, 2, |i| {
                    Address::deferred(resource.clone(), format!("ip_address.{}.ip", i))
                })
            }
            EndpointDirection::Outbound => (0..2)
                .map(|i| Address::deferred(resource.clone(), format!("ip_address.{}.ip", i)))
                .collect(),
        };

        debug!(endpoint = %name, count = addresses.len(), "Planned Route 53 resolver endpoint");
        Ok(ResolverEndpoint {
            cloud: CloudProvider::Aws,
            direction,
            name,
            addresses,
        })
    }
}

/// GCP - Classic or HA VPN gateway plus a Cloud DNS inbound server policy
pub struct GcpProvider {
    resource_prefix: String,
}

impl GcpProvider {
    pub fn new(resource_prefix: &str) -> Self {
        Self {
            resource_prefix: resource_prefix.to_string(),
        }
    }
}

#[async_trait]
impl CloudProviderAdapter for GcpProvider {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    async fn provision_gateway(
        &self,
        network: &Network,
        asn: u32,
        mode: RedundancyMode,
    ) -> Result<GatewayHandle> {
        let count = mode.addresses_per_gateway();
        let handle = match mode {
            RedundancyMode::Single => {
                let name = format!("{}-gcp-vpn", self.resource_prefix);
                let resource = format!("google_compute_address.{}", name);
                let addresses = addresses_or_deferred(&network.gateway_addresses, count, |_| {
                    Address::deferred(resource.clone(), "address")
                });
                GatewayHandle::new(CloudProvider::Gcp, mode, name, addresses, asn)?
            }
            RedundancyMode::Ha => {
                let name = format!("{}-gcp-ha-vpn", self.resource_prefix);
                let resource = format!("google_compute_ha_vpn_gateway.{}", name);
                let addresses = addresses_or_deferred(&network.gateway_addresses, count, |i| {
                    Address::deferred(resource.clone(), format!("vpn_interfaces.{}.ip_address", i))
                });
                GatewayHandle::new(CloudProvider::Gcp, mode, name, addresses, asn)?
                    .with_cloud_router(format!("{}-gcp-router", self.resource_prefix))
            }
        };

        info!(network = %network.id, gateway = %handle.name(), "Planned GCP VPN gateway");
        Ok(handle)
    }

    async fn provision_resolver_endpoint(
        &self,
        network: &Network,
        direction: EndpointDirection,
    ) -> Result<ResolverEndpoint> {
        if direction == EndpointDirection::Outbound {
            bail!("Cloud DNS forwards through forwarding zones and has no outbound endpoint");
        }

        let name = endpoint_name(&self.resource_prefix, CloudProvider::Gcp, direction);
        // The inbound policy allocates one address per subnet; the list is read back as a whole
        let addresses = addresses_or_deferred(&network.resolver_addresses, 1, |_| {
            Address::deferred(format!("data.google_compute_addresses.{}", name), "addresses")
        });

        debug!(endpoint = %name, "Planned Cloud DNS inbound policy");
        Ok(ResolverEndpoint {
            cloud: CloudProvider::Gcp,
            direction,
            name,
            addresses,
        })
    }
}

/// Azure - virtual network gateway plus a DNS private resolver
pub struct AzureProvider {
    resource_prefix: String,
}

impl AzureProvider {
    pub fn new(resource_prefix: &str) -> Self {
        Self {
            resource_prefix: resource_prefix.to_string(),
        }
    }
}

#[async_trait]
impl CloudProviderAdapter for AzureProvider {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn provision_gateway(
        &self,
        network: &Network,
        asn: u32,
        mode: RedundancyMode,
    ) -> Result<GatewayHandle> {
        let name = format!("{}-azure-vng", self.resource_prefix);
        let prefix = self.resource_prefix.clone();
        let addresses = addresses_or_deferred(
            &network.gateway_addresses,
            mode.addresses_per_gateway(),
            |i| {
                Address::deferred(
                    format!("azurerm_public_ip.{}-vpn-pip{}", prefix, i),
                    "ip_address",
                )
            },
        );

        info!(
            network = %network.id,
            gateway = %name,
            active_active = mode == RedundancyMode::Ha,
            "Planned Azure virtual network gateway"
        );
        Ok(GatewayHandle::new(CloudProvider::Azure, mode, name, addresses, asn)?)
    }

    async fn provision_resolver_endpoint(
        &self,
        network: &Network,
        direction: EndpointDirection,
    ) -> Result<ResolverEndpoint> {
        let name = endpoint_name(&self.resource_prefix, CloudProvider::Azure, direction);
        let addresses = match direction {
            EndpointDirection::Inbound => {
                let resource = format!("azurerm_private_dns_resolver_inbound_endpoint.{}", name);
                addresses_or_deferred(&network.resolver_addresses, 1, |_| {
                    Address::deferred(resource.clone(), "ip_configurations.0.private_ip_address")
                })
            }
            // Outbound endpoints are bound to a subnet and expose no address
            EndpointDirection::Outbound => Vec::new(),
        };

        debug!(endpoint = %name, "Planned Azure private resolver endpoint");
        Ok(ResolverEndpoint {
            cloud: CloudProvider::Azure,
            direction,
            name,
            addresses,
        })
    }
}

/// Multi-cloud provider aggregator
pub struct MultiCloudProviders {
    providers: Vec<Box<dyn CloudProviderAdapter>>,
}

impl MultiCloudProviders {
    /// Empty set; register adapters with [`MultiCloudProviders::with`]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// All three reference adapters
    pub fn reference(resource_prefix: &str) -> Self {
        let providers = Self::new()
            .with(AwsProvider::new(resource_prefix))
            .with(GcpProvider::new(resource_prefix))
            .with(AzureProvider::new(resource_prefix));

        info!("Initialized {} cloud providers", providers.providers.len());
        providers
    }

    /// Register an adapter, replacing any previous one for the same cloud
    pub fn with(mut self, adapter: impl CloudProviderAdapter + 'static) -> Self {
        let cloud = adapter.cloud();
        self.providers.retain(|p| p.cloud() != cloud);
        self.providers.push(Box::new(adapter));
        self
    }

    pub fn adapter(&self, cloud: CloudProvider) -> Result<&dyn CloudProviderAdapter, ConfigError> {
        self.providers
            .iter()
            .find(|p| p.cloud() == cloud)
            .map(|p| p.as_ref())
            .ok_or(ConfigError::MissingProvider { cloud })
    }
}

impl Default for MultiCloudProviders {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AddressingError;
    use std::net::IpAddr;

    fn network(cloud: CloudProvider) -> Network {
        Network {
            cloud,
            id: format!("{}-net", cloud),
            cidr: "10.0.0.0/16".parse().unwrap(),
            region: "asia-northeast1".to_string(),
            zones: vec![],
            asn: cloud.default_asn(),
            requires_bgp: false,
            gateway_addresses: vec![],
            resolver_addresses: vec![],
            route_propagation_tables: vec![],
        }
    }

    #[tokio::test]
    async fn test_reference_gateways_match_mode() {
        let providers = MultiCloudProviders::reference("mc");
        for cloud in CloudProvider::ALL {
            let adapter = providers.adapter(cloud).unwrap();
            for mode in [RedundancyMode::Single, RedundancyMode::Ha] {
                let handle = adapter
                    .provision_gateway(&network(cloud), cloud.default_asn(), mode)
                    .await
                    .unwrap();
                assert_eq!(handle.cloud(), cloud);
                assert_eq!(handle.external_addresses().len(), mode.addresses_per_gateway());
                assert!(handle.external_addresses().iter().all(|a| a.is_deferred()));
            }
        }
    }

    #[tokio::test]
    async fn test_gcp_ha_gateway_has_cloud_router() {
        let handle = GcpProvider::new("mc")
            .provision_gateway(&network(CloudProvider::Gcp), 65000, RedundancyMode::Ha)
            .await
            .unwrap();
        assert_eq!(handle.cloud_router(), Some("mc-gcp-router"));
        assert_eq!(
            handle.external_addresses()[1].to_string(),
            "${google_compute_ha_vpn_gateway.mc-gcp-ha-vpn.vpn_interfaces.1.ip_address}"
        );
    }

    #[tokio::test]
    async fn test_literal_addresses_are_used_and_validated() {
        let mut net = network(CloudProvider::Aws);
        net.gateway_addresses = vec!["203.0.113.10".parse::<IpAddr>().unwrap()];

        let handle = AwsProvider::new("mc")
            .provision_gateway(&net, 64512, RedundancyMode::Single)
            .await
            .unwrap();
        assert_eq!(handle.external_addresses()[0].to_string(), "203.0.113.10");

        let err = AwsProvider::new("mc")
            .provision_gateway(&net, 64512, RedundancyMode::Ha)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<AddressingError>().is_some());
    }

    #[tokio::test]
    async fn test_aws_inbound_endpoint_has_two_addresses() {
        let endpoint = AwsProvider::new("mc")
            .provision_resolver_endpoint(&network(CloudProvider::Aws), EndpointDirection::Inbound)
            .await
            .unwrap();
        assert_eq!(endpoint.name, "mc-aws-resolver-inbound");
        assert_eq!(
            endpoint.addresses[1].to_string(),
            "${aws_route53_resolver_endpoint.mc-aws-resolver-inbound.ip_address.1.ip}"
        );
        assert_eq!(endpoint.addresses.len(), 2);
    }

    #[tokio::test]
    async fn test_gcp_has_no_outbound_endpoint() {
        let result = GcpProvider::new("mc")
            .provision_resolver_endpoint(&network(CloudProvider::Gcp), EndpointDirection::Outbound)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_adapter_is_a_config_error() {
        let providers = MultiCloudProviders::new().with(AwsProvider::new("mc"));
        assert!(providers.adapter(CloudProvider::Aws).is_ok());
        assert!(matches!(
            providers.adapter(CloudProvider::Azure),
            Err(ConfigError::MissingProvider { cloud: CloudProvider::Azure })
        ));
    }
}
