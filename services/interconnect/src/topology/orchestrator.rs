//! Topology Orchestrator
//!
//! Sequences one generation pass behind a strict two-phase barrier:
//!
//! 1. **gateways-ready**: every gateway and resolver endpoint is requested
//!    from its cloud's provider, concurrently. No phase-1 call reads another
//!    cloud's output.
//! 2. **links-bound**: tunnels, static routes, route propagations, zones and
//!    forwarding rules are derived from phase-1 output only, through
//!    [`GatewaysReady`].
//!
//! Either a complete plan comes out or an error does; nothing partial.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::config::TopologyConfig;
use crate::error::{AddressingError, ConfigError, Result, SequencingError, TopologyError};

use super::dns::{DnsForwardingPlanner, EndpointRequest};
use super::plan::{PlanStep, ProvisioningPlan, StepAction};
use super::planner::{participating_clouds, plan_interconnects};
use super::providers::MultiCloudProviders;
use super::registry::NetworkRegistry;
use super::tunnel::{route_propagations, static_routes, LinkSide, TunnelBinder};
use super::types::{
    CloudProvider, EndpointDirection, GatewayHandle, Network, RedundancyMode, ResolverEndpoint,
};

/// Phase-1 output. Only the orchestrator can build one, and only after
/// every phase-1 call has returned.
pub struct GatewaysReady {
    gateways: BTreeMap<CloudProvider, GatewayHandle>,
    endpoints: BTreeMap<EndpointRequest, ResolverEndpoint>,
}

impl GatewaysReady {
    pub fn gateway(
        &self,
        cloud: CloudProvider,
    ) -> std::result::Result<&GatewayHandle, SequencingError> {
        self.gateways.get(&cloud).ok_or(SequencingError::NotReady {
            cloud,
            resource: "gateway",
            consumer: "tunnel binding",
        })
    }

    pub fn endpoint(
        &self,
        cloud: CloudProvider,
        direction: EndpointDirection,
    ) -> Option<&ResolverEndpoint> {
        self.endpoints.get(&EndpointRequest { cloud, direction })
    }
}

/// Attach cloud and operation context to a collaborator failure, keeping a
/// contract violation typed
fn collaborator_error(
    cloud: CloudProvider,
    operation: &'static str,
    err: anyhow::Error,
) -> TopologyError {
    match err.downcast::<AddressingError>() {
        Ok(addressing) => TopologyError::Addressing(addressing),
        Err(source) => TopologyError::Collaborator {
            cloud,
            operation,
            source,
        },
    }
}

pub struct TopologyOrchestrator {
    config: TopologyConfig,
    providers: MultiCloudProviders,
}

impl TopologyOrchestrator {
    pub fn new(config: TopologyConfig, providers: MultiCloudProviders) -> Self {
        Self { config, providers }
    }

    /// Run one generation pass.
    ///
    /// Re-running on an unchanged configuration yields an equal plan.
    pub async fn resolve(&self) -> Result<ProvisioningPlan> {
        let config = &self.config;
        config.validate()?;

        let mode = config.mode;
        let registry = config.network_registry()?;
        let interconnects = plan_interconnects(&config.links, mode);
        let participating = participating_clouds(&interconnects);
        let mut dns = DnsForwardingPlanner::new(&config.dns.domains, config.links, &participating);

        info!(
            mode = %mode,
            interconnects = interconnects.len(),
            clouds = participating.len(),
            "Resolving interconnect topology"
        );

        let dns_clouds: BTreeSet<CloudProvider> = dns.clouds().collect();
        for cloud in participating.union(&dns_clouds) {
            self.providers.adapter(*cloud)?;
        }

        let ready = self
            .gateways_ready(&registry, mode, &participating, &dns.endpoint_requests())
            .await?;

        // links-bound
        let binder = TunnelBinder::new(
            mode,
            config.psk_seed()?,
            config.tunnels.bgp_link_block,
            config.tunnels.ike_version,
        );

        let mut tunnels = Vec::new();
        for interconnect in &interconnects {
            let pair = interconnect.pair;
            let [first, second] = pair.sides();
            let bound = binder.bind(
                interconnect,
                LinkSide {
                    gateway: ready.gateway(first)?,
                    network: self.network(&registry, first)?,
                },
                LinkSide {
                    gateway: ready.gateway(second)?,
                    network: self.network(&registry, second)?,
                },
            )?;
            tunnels.extend(bound);
        }
        let routes = static_routes(&tunnels);

        let mut propagations = Vec::new();
        for (cloud, gateway) in &ready.gateways {
            propagations.extend(route_propagations(gateway, self.network(&registry, *cloud)?));
        }

        for cloud in &dns_clouds {
            let inbound = ready
                .endpoint(*cloud, EndpointDirection::Inbound)
                .cloned()
                .ok_or(SequencingError::NotReady {
                    cloud: *cloud,
                    resource: "inbound resolver endpoint",
                    consumer: "dns planner",
                })?;
            let outbound = ready.endpoint(*cloud, EndpointDirection::Outbound).cloned();
            dns.record_endpoints(*cloud, inbound, outbound)?;
        }
        let dns_plan = dns.bind_rules()?;

        let steps: Vec<PlanStep> = ready
            .gateways
            .into_values()
            .map(StepAction::Gateway)
            .chain(dns_plan.endpoints.into_iter().map(StepAction::ResolverEndpoint))
            .chain(tunnels.into_iter().map(StepAction::Tunnel))
            .chain(routes.into_iter().map(StepAction::StaticRoute))
            .chain(propagations.into_iter().map(StepAction::RoutePropagation))
            .chain(dns_plan.zones.into_iter().map(StepAction::PrivateZone))
            .chain(dns_plan.rules.into_iter().map(StepAction::ForwardingRule))
            .map(PlanStep::new)
            .collect();

        info!(
            steps = steps.len(),
            gaps = dns_plan.gaps.len(),
            "Provisioning plan resolved"
        );

        Ok(ProvisioningPlan {
            mode,
            links: config.links,
            interconnects,
            steps,
            gaps: dns_plan.gaps,
        })
    }

    /// Phase 1: all gateways and resolver endpoints, joined before returning
    async fn gateways_ready(
        &self,
        registry: &NetworkRegistry,
        mode: RedundancyMode,
        participating: &BTreeSet<CloudProvider>,
        endpoint_requests: &[EndpointRequest],
    ) -> Result<GatewaysReady> {
        let gateway_calls = participating.iter().map(|&cloud| async move {
            let network = self.network(registry, cloud)?;
            let adapter = self.providers.adapter(cloud)?;
            let handle = adapter
                .provision_gateway(network, network.asn, mode)
                .await
                .map_err(|e| collaborator_error(cloud, "provision_gateway", e))?;

            if handle.cloud() != cloud {
                return Err(AddressingError::CloudMismatch {
                    expected: cloud,
                    actual: handle.cloud(),
                }
                .into());
            }
            if handle.mode() != mode {
                return Err(AddressingError::ModeMismatch {
                    cloud,
                    expected: mode,
                    actual: handle.mode(),
                }
                .into());
            }

            debug!(cloud = %cloud, gateway = %handle.name(), "Gateway ready");
            Ok::<_, TopologyError>((cloud, handle))
        });

        let endpoint_calls = endpoint_requests.iter().map(|&request| async move {
            let network = self.network(registry, request.cloud)?;
            let adapter = self.providers.adapter(request.cloud)?;
            let endpoint = adapter
                .provision_resolver_endpoint(network, request.direction)
                .await
                .map_err(|e| collaborator_error(request.cloud, "provision_resolver_endpoint", e))?;

            if endpoint.cloud != request.cloud {
                return Err(AddressingError::CloudMismatch {
                    expected: request.cloud,
                    actual: endpoint.cloud,
                }
                .into());
            }

            debug!(cloud = %request.cloud, endpoint = %endpoint.name, "Resolver endpoint ready");
            Ok::<_, TopologyError>((request, endpoint))
        });

        let (gateways, endpoints) =
            futures::try_join!(try_join_all(gateway_calls), try_join_all(endpoint_calls))?;

        info!(
            gateways = gateways.len(),
            endpoints = endpoints.len(),
            "Phase gateways-ready complete"
        );

        Ok(GatewaysReady {
            gateways: gateways.into_iter().collect(),
            endpoints: endpoints.into_iter().collect(),
        })
    }

    fn network<'r>(
        &self,
        registry: &'r NetworkRegistry,
        cloud: CloudProvider,
    ) -> std::result::Result<&'r Network, ConfigError> {
        registry.get(cloud).ok_or_else(|| match self.config.pair_naming(cloud) {
            Some(pair) => ConfigError::MissingNetwork { pair, cloud },
            None => ConfigError::UnknownDomainCloud {
                domain: self
                    .config
                    .dns
                    .domains
                    .iter()
                    .find(|d| d.home == cloud || d.resolvers.contains(&cloud))
                    .map(|d| d.domain.clone())
                    .unwrap_or_default(),
                cloud,
            },
        })
    }
}
