//! DNS Forwarding Planner
//!
//! Two-phase state machine, one state per cloud:
//!
//! ```text
//! Unprovisioned --record_endpoints--> EndpointsCreated --bind_rules--> RulesBound
//! ```
//!
//! Phase 1 asks for resolver endpoints ([`DnsForwardingPlanner::endpoint_requests`]),
//! the orchestrator creates them and hands the results back. Phase 2 emits
//! forwarding rules that target the harvested inbound addresses, or a local
//! fallback zone when no peer resolver is reachable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SequencingError;

use super::planner::EnablementMatrix;
use super::types::{
    domain_slug, normalize_domain, Address, CloudPair, CloudProvider, DomainEntry,
    DomainResolutionGap, EndpointDirection, ForwardingRule, PrivateZone, ResolverEndpoint,
    ZoneKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum DnsState {
    Unprovisioned,
    EndpointsCreated {
        inbound: ResolverEndpoint,
        outbound: Option<ResolverEndpoint>,
    },
    RulesBound,
}

impl DnsState {
    fn label(&self) -> &'static str {
        match self {
            DnsState::Unprovisioned => "unprovisioned",
            DnsState::EndpointsCreated { .. } => "endpoints_created",
            DnsState::RulesBound => "rules_bound",
        }
    }
}

/// One resolver endpoint phase 1 must create
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointRequest {
    pub cloud: CloudProvider,
    pub direction: EndpointDirection,
}

/// DNS section of a provisioning plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsPlan {
    pub endpoints: Vec<ResolverEndpoint>,
    pub zones: Vec<PrivateZone>,
    pub rules: Vec<ForwardingRule>,
    pub gaps: Vec<DomainResolutionGap>,
}

pub struct DnsForwardingPlanner {
    domains: Vec<DomainEntry>,
    links: EnablementMatrix,
    states: BTreeMap<CloudProvider, DnsState>,
}

impl DnsForwardingPlanner {
    /// Clouds taking part in an enabled interconnect, or hosting a domain,
    /// start out `Unprovisioned`. Every other cloud never gets endpoints.
    pub fn new(
        domains: &[DomainEntry],
        links: EnablementMatrix,
        participating: &BTreeSet<CloudProvider>,
    ) -> Self {
        let mut domains: Vec<DomainEntry> = domains
            .iter()
            .map(|entry| {
                let resolvers: BTreeSet<CloudProvider> = entry
                    .resolvers
                    .iter()
                    .copied()
                    .filter(|cloud| *cloud != entry.home)
                    .collect();
                DomainEntry {
                    domain: normalize_domain(&entry.domain),
                    home: entry.home,
                    resolvers: resolvers.into_iter().collect(),
                }
            })
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));

        let states = participating
            .iter()
            .copied()
            .chain(domains.iter().map(|d| d.home))
            .map(|cloud| (cloud, DnsState::Unprovisioned))
            .collect();

        Self {
            domains,
            links,
            states,
        }
    }

    /// Clouds the planner tracks, in canonical order
    pub fn clouds(&self) -> impl Iterator<Item = CloudProvider> + '_ {
        self.states.keys().copied()
    }

    /// Phase-1 work: one inbound endpoint per tracked cloud, plus an outbound
    /// endpoint where the cloud forwards through one and has a linked rule to emit
    pub fn endpoint_requests(&self) -> Vec<EndpointRequest> {
        let mut requests = Vec::new();
        for cloud in self.clouds() {
            requests.push(EndpointRequest {
                cloud,
                direction: EndpointDirection::Inbound,
            });
            if cloud.forwards_via_outbound_endpoint() && self.forwards_outward(cloud) {
                requests.push(EndpointRequest {
                    cloud,
                    direction: EndpointDirection::Outbound,
                });
            }
        }
        requests
    }

    fn forwards_outward(&self, cloud: CloudProvider) -> bool {
        self.domains.iter().any(|entry| {
            entry.resolvers.contains(&cloud)
                && CloudPair::new(cloud, entry.home)
                    .map(|pair| self.links.is_enabled(pair))
                    .unwrap_or(false)
        })
    }

    /// `Unprovisioned -> EndpointsCreated`
    pub fn record_endpoints(
        &mut self,
        cloud: CloudProvider,
        inbound: ResolverEndpoint,
        outbound: Option<ResolverEndpoint>,
    ) -> Result<(), SequencingError> {
        let state = self
            .states
            .get_mut(&cloud)
            .ok_or(SequencingError::InvalidTransition {
                cloud,
                from: "untracked",
                to: "endpoints_created",
            })?;

        if *state != DnsState::Unprovisioned {
            return Err(SequencingError::InvalidTransition {
                cloud,
                from: state.label(),
                to: "endpoints_created",
            });
        }

        debug!(
            cloud = %cloud,
            inbound = inbound.addresses.len(),
            outbound = outbound.is_some(),
            "Recorded resolver endpoints"
        );
        *state = DnsState::EndpointsCreated { inbound, outbound };
        Ok(())
    }

    fn inbound_of(&self, cloud: CloudProvider) -> Option<&ResolverEndpoint> {
        match self.states.get(&cloud) {
            Some(DnsState::EndpointsCreated { inbound, .. }) => Some(inbound),
            _ => None,
        }
    }

    /// `EndpointsCreated -> RulesBound` for every tracked cloud.
    ///
    /// Fails with [`SequencingError::NotReady`] if any tracked cloud has not
    /// completed phase 1; a domain that cannot be forwarded is not an error.
    pub fn bind_rules(&mut self) -> Result<DnsPlan, SequencingError> {
        let mut plan = DnsPlan::default();

        for (cloud, state) in &self.states {
            match state {
                DnsState::Unprovisioned => {
                    return Err(SequencingError::NotReady {
                        cloud: *cloud,
                        resource: "inbound resolver endpoint",
                        consumer: "forwarding rule binding",
                    })
                }
                DnsState::RulesBound => {
                    return Err(SequencingError::InvalidTransition {
                        cloud: *cloud,
                        from: state.label(),
                        to: "rules_bound",
                    })
                }
                DnsState::EndpointsCreated { inbound, outbound } => {
                    plan.endpoints.push(inbound.clone());
                    plan.endpoints.extend(outbound.iter().cloned());
                }
            }
        }

        for entry in &self.domains {
            let slug = domain_slug(&entry.domain);
            plan.zones.push(PrivateZone {
                name: format!("{}-zone-{}", entry.home, slug),
                cloud: entry.home,
                domain: entry.domain.clone(),
                kind: ZoneKind::Authoritative,
            });

            for &owner in &entry.resolvers {
                match self.forwarding_target(owner, entry.home)? {
                    Ok(target_addresses) => plan.rules.push(ForwardingRule {
                        name: format!("fwd-{}-to-{}-{}", owner, entry.home, slug),
                        owner_cloud: owner,
                        domain: entry.domain.clone(),
                        target_cloud: entry.home,
                        target_addresses,
                        enabled: true,
                    }),
                    Err(reason) => {
                        info!(
                            cloud = %owner,
                            domain = %entry.domain,
                            target = %entry.home,
                            reason = %reason,
                            "Domain falls back to a local zone"
                        );
                        plan.zones.push(PrivateZone {
                            name: format!("{}-local-{}", owner, slug),
                            cloud: owner,
                            domain: entry.domain.clone(),
                            kind: ZoneKind::LocalFallback,
                        });
                        plan.gaps.push(DomainResolutionGap {
                            cloud: owner,
                            domain: entry.domain.clone(),
                            intended_target: entry.home,
                            reason,
                        });
                    }
                }
            }
        }

        for state in self.states.values_mut() {
            *state = DnsState::RulesBound;
        }

        info!(
            endpoints = plan.endpoints.len(),
            rules = plan.rules.len(),
            zones = plan.zones.len(),
            gaps = plan.gaps.len(),
            "Bound DNS forwarding rules"
        );
        Ok(plan)
    }

    /// Inbound addresses of `home` as seen from `owner`, or the reason the
    /// domain cannot be forwarded
    fn forwarding_target(
        &self,
        owner: CloudProvider,
        home: CloudProvider,
    ) -> Result<Result<Vec<Address>, String>, SequencingError> {
        let Some(pair) = CloudPair::new(owner, home) else {
            return Ok(Err(format!("{} cannot forward to itself", owner)));
        };
        if !self.links.is_enabled(pair) {
            return Ok(Err(format!("link {} is disabled", pair)));
        }

        if owner.forwards_via_outbound_endpoint() {
            match self.states.get(&owner) {
                Some(DnsState::EndpointsCreated { outbound: Some(_), .. }) => {}
                _ => {
                    return Err(SequencingError::NotReady {
                        cloud: owner,
                        resource: "outbound resolver endpoint",
                        consumer: "forwarding rule binding",
                    })
                }
            }
        }

        match self.inbound_of(home) {
            Some(inbound) if !inbound.addresses.is_empty() => Ok(Ok(inbound.addresses.clone())),
            Some(_) => Ok(Err(format!("{} inbound resolver exposes no addresses", home))),
            None => Err(SequencingError::NotReady {
                cloud: home,
                resource: "inbound resolver endpoint",
                consumer: "forwarding rule binding",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(
        cloud: CloudProvider,
        direction: EndpointDirection,
        count: usize,
    ) -> ResolverEndpoint {
        ResolverEndpoint {
            cloud,
            direction,
            name: format!("{}-resolver-{}", cloud, direction),
            addresses: (0..count)
                .map(|i| Address::deferred(format!("{}_resolver", cloud), format!("ip.{}", i)))
                .collect(),
        }
    }

    fn domain(name: &str, home: CloudProvider, resolvers: &[CloudProvider]) -> DomainEntry {
        DomainEntry {
            domain: name.to_string(),
            home,
            resolvers: resolvers.to_vec(),
        }
    }

    /// Satisfy every phase-1 request the planner makes
    fn provision_all(planner: &mut DnsForwardingPlanner) {
        let requests = planner.endpoint_requests();
        let clouds: BTreeSet<CloudProvider> = requests.iter().map(|r| r.cloud).collect();
        for cloud in clouds {
            let outbound = requests
                .iter()
                .any(|r| r.cloud == cloud && r.direction == EndpointDirection::Outbound)
                .then(|| endpoint(cloud, EndpointDirection::Outbound, 2));
            planner
                .record_endpoints(cloud, endpoint(cloud, EndpointDirection::Inbound, 2), outbound)
                .unwrap();
        }
    }

    fn participating(clouds: &[CloudProvider]) -> BTreeSet<CloudProvider> {
        clouds.iter().copied().collect()
    }

    #[test]
    fn test_rule_targets_home_inbound_addresses() {
        let domains = vec![domain("aws.inner", CloudProvider::Aws, &[CloudProvider::Gcp])];
        let mut planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );
        provision_all(&mut planner);

        let plan = planner.bind_rules().unwrap();
        assert_eq!(plan.rules.len(), 1);
        let rule = &plan.rules[0];
        assert_eq!(rule.name, "fwd-gcp-to-aws-aws-inner");
        assert_eq!(rule.owner_cloud, CloudProvider::Gcp);
        assert_eq!(rule.target_cloud, CloudProvider::Aws);
        assert_eq!(rule.target_addresses.len(), 2);
        assert!(plan.gaps.is_empty());
        assert_eq!(plan.zones.len(), 1);
        assert_eq!(plan.zones[0].kind, ZoneKind::Authoritative);
    }

    #[test]
    fn test_outbound_requested_only_where_needed() {
        let domains = vec![
            domain("google.inner", CloudProvider::Gcp, &[CloudProvider::Aws, CloudProvider::Azure]),
            domain("aws.inner", CloudProvider::Aws, &[CloudProvider::Gcp]),
        ];
        let planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );

        let requests = planner.endpoint_requests();
        assert_eq!(
            requests,
            vec![
                EndpointRequest {
                    cloud: CloudProvider::Aws,
                    direction: EndpointDirection::Inbound,
                },
                EndpointRequest {
                    cloud: CloudProvider::Aws,
                    direction: EndpointDirection::Outbound,
                },
                EndpointRequest {
                    cloud: CloudProvider::Gcp,
                    direction: EndpointDirection::Inbound,
                },
            ]
        );
    }

    #[test]
    fn test_disabled_link_falls_back_to_local_zone() {
        let domains = vec![domain("azure.inner", CloudProvider::Azure, &[CloudProvider::Gcp])];
        let mut planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(true, true, false),
            &participating(&CloudProvider::ALL),
        );
        provision_all(&mut planner);

        let plan = planner.bind_rules().unwrap();
        assert!(plan.rules.is_empty());
        assert_eq!(plan.gaps.len(), 1);
        assert_eq!(plan.gaps[0].cloud, CloudProvider::Gcp);
        assert_eq!(plan.gaps[0].intended_target, CloudProvider::Azure);
        assert!(plan
            .zones
            .iter()
            .any(|z| z.cloud == CloudProvider::Gcp && z.kind == ZoneKind::LocalFallback));
    }

    #[test]
    fn test_empty_inbound_never_produces_dangling_rule() {
        let domains = vec![domain("azure.inner", CloudProvider::Azure, &[CloudProvider::Gcp])];
        let mut planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(false, false, true),
            &participating(&[CloudProvider::Gcp, CloudProvider::Azure]),
        );
        planner
            .record_endpoints(
                CloudProvider::Gcp,
                endpoint(CloudProvider::Gcp, EndpointDirection::Inbound, 1),
                None,
            )
            .unwrap();
        planner
            .record_endpoints(
                CloudProvider::Azure,
                endpoint(CloudProvider::Azure, EndpointDirection::Inbound, 0),
                None,
            )
            .unwrap();

        let plan = planner.bind_rules().unwrap();
        assert!(plan.rules.is_empty());
        assert_eq!(plan.gaps.len(), 1);
    }

    #[test]
    fn test_binding_before_endpoints_is_a_sequencing_error() {
        let domains = vec![domain("aws.inner", CloudProvider::Aws, &[CloudProvider::Gcp])];
        let mut planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );
        planner
            .record_endpoints(
                CloudProvider::Aws,
                endpoint(CloudProvider::Aws, EndpointDirection::Inbound, 2),
                None,
            )
            .unwrap();

        assert!(matches!(
            planner.bind_rules(),
            Err(SequencingError::NotReady { cloud: CloudProvider::Gcp, .. })
        ));
    }

    #[test]
    fn test_transitions_are_one_way() {
        let mut planner = DnsForwardingPlanner::new(
            &[],
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );
        provision_all(&mut planner);

        let again = planner.record_endpoints(
            CloudProvider::Aws,
            endpoint(CloudProvider::Aws, EndpointDirection::Inbound, 2),
            None,
        );
        assert!(matches!(
            again,
            Err(SequencingError::InvalidTransition { from: "endpoints_created", .. })
        ));

        planner.bind_rules().unwrap();
        assert!(matches!(
            planner.bind_rules(),
            Err(SequencingError::InvalidTransition { from: "rules_bound", .. })
        ));
    }

    #[test]
    fn test_untracked_cloud_gets_no_endpoints() {
        let planner = DnsForwardingPlanner::new(
            &[],
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );
        assert!(planner
            .endpoint_requests()
            .iter()
            .all(|r| r.cloud != CloudProvider::Azure));
    }

    #[test]
    fn test_domains_are_normalized_and_ordered() {
        let domains = vec![
            domain("Google.Inner.", CloudProvider::Gcp, &[CloudProvider::Aws, CloudProvider::Aws]),
            domain("aws.inner", CloudProvider::Aws, &[CloudProvider::Gcp, CloudProvider::Aws]),
        ];
        let mut planner = DnsForwardingPlanner::new(
            &domains,
            EnablementMatrix::new(true, false, false),
            &participating(&[CloudProvider::Aws, CloudProvider::Gcp]),
        );
        provision_all(&mut planner);

        let plan = planner.bind_rules().unwrap();
        let names: Vec<&str> = plan.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fwd-gcp-to-aws-aws-inner", "fwd-aws-to-gcp-google-inner"]);
    }
}
