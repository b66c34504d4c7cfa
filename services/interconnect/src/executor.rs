//! Plan Executor
//!
//! Applies the links-bound half of a [`ProvisioningPlan`] through a
//! [`ProvisioningExecutor`]. Gateways and resolver endpoints were already
//! produced by the providers during resolution, so they are not re-applied.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::topology::plan::{Phase, ProvisioningPlan, StepAction};
use crate::topology::types::{ForwardingRule, PrivateZone, RoutePropagation, StaticRoute, Tunnel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHandle {
    pub name: String,
    /// false when the tunnel already existed under the same key
    pub created: bool,
}

/// Static route or route-table propagation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHandle {
    pub name: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHandle {
    pub name: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneHandle {
    pub name: String,
    pub created: bool,
}

/// Downstream resource-creation collaborator
///
/// Every call is idempotent by the step's key: applying the same step twice
/// creates it once.
#[async_trait]
pub trait ProvisioningExecutor: Send + Sync {
    async fn provision_tunnel(&self, tunnel: &Tunnel) -> Result<TunnelHandle>;

    async fn provision_static_route(&self, route: &StaticRoute) -> Result<RouteHandle>;

    async fn provision_route_propagation(
        &self,
        propagation: &RoutePropagation,
    ) -> Result<RouteHandle>;

    async fn provision_private_zone(&self, zone: &PrivateZone) -> Result<ZoneHandle>;

    async fn provision_forwarding_rule(&self, rule: &ForwardingRule) -> Result<RuleHandle>;
}

/// Counts of what one `apply_plan` call did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub tunnels: usize,
    pub static_routes: usize,
    pub route_propagations: usize,
    pub zones: usize,
    pub rules: usize,
    /// Steps the executor reported as already present
    pub unchanged: usize,
}

/// Apply links-bound steps in plan order, stopping at the first failure.
pub async fn apply_plan(
    executor: &dyn ProvisioningExecutor,
    plan: &ProvisioningPlan,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    for step in plan.steps_in(Phase::LinksBound) {
        let created = match &step.action {
            StepAction::Tunnel(tunnel) => {
                report.tunnels += 1;
                executor
                    .provision_tunnel(tunnel)
                    .await
                    .with_context(|| format!("Failed to apply {}", step.key))?
                    .created
            }
            StepAction::StaticRoute(route) => {
                report.static_routes += 1;
                executor
                    .provision_static_route(route)
                    .await
                    .with_context(|| format!("Failed to apply {}", step.key))?
                    .created
            }
            StepAction::RoutePropagation(propagation) => {
                report.route_propagations += 1;
                executor
                    .provision_route_propagation(propagation)
                    .await
                    .with_context(|| format!("Failed to apply {}", step.key))?
                    .created
            }
            StepAction::PrivateZone(zone) => {
                report.zones += 1;
                executor
                    .provision_private_zone(zone)
                    .await
                    .with_context(|| format!("Failed to apply {}", step.key))?
                    .created
            }
            StepAction::ForwardingRule(rule) => {
                report.rules += 1;
                executor
                    .provision_forwarding_rule(rule)
                    .await
                    .with_context(|| format!("Failed to apply {}", step.key))?
                    .created
            }
            StepAction::Gateway(_) | StepAction::ResolverEndpoint(_) => {
                warn!(step = %step.key, "Phase-1 step found in links-bound phase, skipping");
                continue;
            }
        };

        if !created {
            report.unchanged += 1;
        }
    }

    info!(
        tunnels = report.tunnels,
        static_routes = report.static_routes,
        route_propagations = report.route_propagations,
        zones = report.zones,
        rules = report.rules,
        unchanged = report.unchanged,
        "Plan applied"
    );
    Ok(report)
}

/// Logs every step instead of creating anything
#[derive(Default)]
pub struct DryRunExecutor {
    applied: Mutex<BTreeSet<String>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`; false if it was already applied
    async fn record(&self, key: String) -> bool {
        let fresh = self.applied.lock().await.insert(key.clone());
        if !fresh {
            info!("{} already applied, skipping", key);
        }
        fresh
    }

    pub async fn applied(&self) -> Vec<String> {
        self.applied.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl ProvisioningExecutor for DryRunExecutor {
    async fn provision_tunnel(&self, tunnel: &Tunnel) -> Result<TunnelHandle> {
        let name = tunnel.name();
        let created = self
            .record(format!("tunnel/{}/{}/{}", tunnel.interconnect, tunnel.index, tunnel.owner))
            .await;
        if created {
            info!(
                tunnel = %name,
                local = %tunnel.local_addr,
                peer = %tunnel.peer_addr,
                bgp = tunnel.has_bgp(),
                "DRY RUN - would provision tunnel"
            );
        }
        Ok(TunnelHandle { name, created })
    }

    async fn provision_static_route(&self, route: &StaticRoute) -> Result<RouteHandle> {
        let key = format!("route/{}/{}/{}", route.interconnect, route.tunnel_index, route.cloud);
        let created = self.record(key).await;
        if created {
            info!(
                cloud = %route.cloud,
                destination = %route.destination,
                "DRY RUN - would provision static route"
            );
        }
        Ok(RouteHandle {
            name: route.name(),
            created,
        })
    }

    async fn provision_route_propagation(
        &self,
        propagation: &RoutePropagation,
    ) -> Result<RouteHandle> {
        let key = format!("propagation/{}/{}", propagation.cloud, propagation.route_table);
        let created = self.record(key).await;
        if created {
            info!(
                gateway = %propagation.gateway,
                route_table = %propagation.route_table,
                "DRY RUN - would propagate gateway routes"
            );
        }
        Ok(RouteHandle {
            name: propagation.name(),
            created,
        })
    }

    async fn provision_private_zone(&self, zone: &PrivateZone) -> Result<ZoneHandle> {
        let created = self.record(format!("zone/{}/{}", zone.cloud, zone.domain)).await;
        if created {
            info!(
                zone = %zone.name,
                cloud = %zone.cloud,
                kind = ?zone.kind,
                "DRY RUN - would provision private zone"
            );
        }
        Ok(ZoneHandle {
            name: zone.name.clone(),
            created,
        })
    }

    async fn provision_forwarding_rule(&self, rule: &ForwardingRule) -> Result<RuleHandle> {
        let created = self
            .record(format!("rule/{}/{}", rule.owner_cloud, rule.domain))
            .await;
        if created {
            info!(
                rule = %rule.name,
                target = %rule.target_cloud,
                addresses = rule.target_addresses.len(),
                "DRY RUN - would provision forwarding rule"
            );
        }
        Ok(RuleHandle {
            name: rule.name.clone(),
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::plan::PlanStep;
    use crate::topology::planner::EnablementMatrix;
    use crate::topology::types::{
        Address, CloudPair, CloudProvider, PresharedKey, RedundancyMode, RouteTableRef, ZoneKind,
    };

    fn tunnel(owner: CloudProvider, peer: CloudProvider) -> Tunnel {
        Tunnel {
            interconnect: CloudPair::AWS_GCP,
            index: 0,
            owner,
            peer,
            local_addr: Address::deferred("local", "ip"),
            peer_addr: Address::deferred("peer", "ip"),
            preshared_key: PresharedKey::new("k0"),
            local_bgp_addr: None,
            peer_bgp_addr: None,
            inside_cidr: None,
            local_asn: owner.default_asn(),
            peer_asn: peer.default_asn(),
            peer_cidr: "10.1.0.0/16".parse().unwrap(),
            ike_version: 2,
        }
    }

    fn plan() -> ProvisioningPlan {
        let steps = vec![
            StepAction::Tunnel(tunnel(CloudProvider::Aws, CloudProvider::Gcp)),
            StepAction::Tunnel(tunnel(CloudProvider::Gcp, CloudProvider::Aws)),
            StepAction::StaticRoute(StaticRoute {
                cloud: CloudProvider::Aws,
                interconnect: CloudPair::AWS_GCP,
                tunnel_index: 0,
                destination: "10.1.0.0/16".parse().unwrap(),
            }),
            StepAction::RoutePropagation(RoutePropagation {
                cloud: CloudProvider::Aws,
                gateway: "interconnect-aws-vgw".to_string(),
                route_table: RouteTableRef::Named("private-rt".to_string()),
            }),
            StepAction::PrivateZone(PrivateZone {
                name: "aws-zone-aws-inner".to_string(),
                cloud: CloudProvider::Aws,
                domain: "aws.inner".to_string(),
                kind: ZoneKind::Authoritative,
            }),
            StepAction::ForwardingRule(ForwardingRule {
                name: "fwd-gcp-to-aws-aws-inner".to_string(),
                owner_cloud: CloudProvider::Gcp,
                domain: "aws.inner".to_string(),
                target_cloud: CloudProvider::Aws,
                target_addresses: vec![Address::deferred("inbound", "ip")],
                enabled: true,
            }),
        ];

        ProvisioningPlan {
            mode: RedundancyMode::Single,
            links: EnablementMatrix::new(true, false, false),
            interconnects: vec![],
            steps: steps.into_iter().map(PlanStep::new).collect(),
            gaps: vec![],
        }
    }

    #[tokio::test]
    async fn test_dry_run_applies_every_step() {
        let executor = DryRunExecutor::new();
        let report = apply_plan(&executor, &plan()).await.unwrap();

        assert_eq!(report.tunnels, 2);
        assert_eq!(report.static_routes, 1);
        assert_eq!(report.route_propagations, 1);
        assert_eq!(report.zones, 1);
        assert_eq!(report.rules, 1);
        assert_eq!(report.unchanged, 0);
        assert_eq!(executor.applied().await.len(), 6);
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let executor = DryRunExecutor::new();
        let plan = plan();
        apply_plan(&executor, &plan).await.unwrap();
        let second = apply_plan(&executor, &plan).await.unwrap();

        assert_eq!(second.unchanged, 6);
        assert_eq!(executor.applied().await.len(), 6);

        // Keys line up with the plan's own step keys
        let keys: Vec<String> = plan.steps.iter().map(|s| s.key.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(executor.applied().await, sorted);
    }

    struct FailingExecutor;

    #[async_trait]
    impl ProvisioningExecutor for FailingExecutor {
        async fn provision_tunnel(&self, _tunnel: &Tunnel) -> Result<TunnelHandle> {
            anyhow::bail!("VPN quota exceeded")
        }

        async fn provision_static_route(&self, route: &StaticRoute) -> Result<RouteHandle> {
            Ok(RouteHandle {
                name: route.name(),
                created: true,
            })
        }

        async fn provision_route_propagation(
            &self,
            propagation: &RoutePropagation,
        ) -> Result<RouteHandle> {
            Ok(RouteHandle {
                name: propagation.name(),
                created: true,
            })
        }

        async fn provision_private_zone(&self, zone: &PrivateZone) -> Result<ZoneHandle> {
            Ok(ZoneHandle {
                name: zone.name.clone(),
                created: true,
            })
        }

        async fn provision_forwarding_rule(&self, rule: &ForwardingRule) -> Result<RuleHandle> {
            Ok(RuleHandle {
                name: rule.name.clone(),
                created: true,
            })
        }
    }

    #[tokio::test]
    async fn test_reapplied_static_route_is_unchanged() {
        let route = StaticRoute {
            cloud: CloudProvider::Gcp,
            interconnect: CloudPair::AWS_GCP,
            tunnel_index: 0,
            destination: "10.0.0.0/16".parse().unwrap(),
        };
        let plan = ProvisioningPlan {
            steps: vec![PlanStep::new(StepAction::StaticRoute(route.clone()))],
            ..plan()
        };

        let executor = DryRunExecutor::new();
        let first = apply_plan(&executor, &plan).await.unwrap();
        let second = apply_plan(&executor, &plan).await.unwrap();
        assert_eq!(first.unchanged, 0);
        assert_eq!(second.static_routes, 1);
        assert_eq!(second.unchanged, 1);

        let handle = executor.provision_static_route(&route).await.unwrap();
        assert!(!handle.created);
        assert_eq!(handle.name, "aws-gcp-t0-gcp-route");
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let err = apply_plan(&FailingExecutor, &plan()).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to apply tunnel/aws-gcp/0/aws");
    }
}
