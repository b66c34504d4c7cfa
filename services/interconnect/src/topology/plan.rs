//! Provisioning Plan
//!
//! Ordered, side-effect-free list of typed steps handed to a downstream
//! executor. Plans are serializable so two runs can be diffed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::planner::EnablementMatrix;
use super::types::{
    CloudProvider, DomainResolutionGap, ForwardingRule, GatewayHandle, Interconnect, PrivateZone,
    RedundancyMode, ResolverEndpoint, RoutePropagation, StaticRoute, Tunnel,
};

/// Barrier phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Gateways and resolver endpoints; no step reads another cloud's output
    GatewaysReady,
    /// Tunnels, routes, zones and rules; reads phase-1 output only
    LinksBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum StepAction {
    Gateway(GatewayHandle),
    ResolverEndpoint(ResolverEndpoint),
    Tunnel(Tunnel),
    StaticRoute(StaticRoute),
    RoutePropagation(RoutePropagation),
    PrivateZone(PrivateZone),
    ForwardingRule(ForwardingRule),
}

impl StepAction {
    /// Stable identity of the step across runs
    pub fn key(&self) -> String {
        match self {
            StepAction::Gateway(gw) => format!("gateway/{}", gw.cloud()),
            StepAction::ResolverEndpoint(ep) => format!("resolver/{}/{}", ep.cloud, ep.direction),
            StepAction::Tunnel(t) => format!("tunnel/{}/{}/{}", t.interconnect, t.index, t.owner),
            StepAction::StaticRoute(r) => {
                format!("route/{}/{}/{}", r.interconnect, r.tunnel_index, r.cloud)
            }
            StepAction::RoutePropagation(p) => {
                format!("propagation/{}/{}", p.cloud, p.route_table)
            }
            StepAction::PrivateZone(z) => format!("zone/{}/{}", z.cloud, z.domain),
            StepAction::ForwardingRule(r) => format!("rule/{}/{}", r.owner_cloud, r.domain),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            StepAction::Gateway(_) | StepAction::ResolverEndpoint(_) => Phase::GatewaysReady,
            _ => Phase::LinksBound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: Uuid,
    pub key: String,
    pub phase: Phase,
    pub action: StepAction,
}

impl PlanStep {
    pub fn new(action: StepAction) -> Self {
        let key = action.key();
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()),
            key,
            phase: action.phase(),
            action,
        }
    }
}

/// Complete output of one generation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub mode: RedundancyMode,
    pub links: EnablementMatrix,
    pub interconnects: Vec<Interconnect>,
    pub steps: Vec<PlanStep>,
    /// Domains that fell back to a local zone
    #[serde(default)]
    pub gaps: Vec<DomainResolutionGap>,
}

impl ProvisioningPlan {
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }

    pub fn gateways(&self) -> impl Iterator<Item = &GatewayHandle> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::Gateway(gw) => Some(gw),
            _ => None,
        })
    }

    pub fn gateway(&self, cloud: CloudProvider) -> Option<&GatewayHandle> {
        self.gateways().find(|gw| gw.cloud() == cloud)
    }

    pub fn resolver_endpoints(&self) -> impl Iterator<Item = &ResolverEndpoint> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::ResolverEndpoint(ep) => Some(ep),
            _ => None,
        })
    }

    pub fn tunnels(&self) -> impl Iterator<Item = &Tunnel> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::Tunnel(t) => Some(t),
            _ => None,
        })
    }

    pub fn static_routes(&self) -> impl Iterator<Item = &StaticRoute> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::StaticRoute(r) => Some(r),
            _ => None,
        })
    }

    pub fn route_propagations(&self) -> impl Iterator<Item = &RoutePropagation> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::RoutePropagation(p) => Some(p),
            _ => None,
        })
    }

    pub fn private_zones(&self) -> impl Iterator<Item = &PrivateZone> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::PrivateZone(z) => Some(z),
            _ => None,
        })
    }

    pub fn forwarding_rules(&self) -> impl Iterator<Item = &ForwardingRule> {
        self.steps.iter().filter_map(|s| match &s.action {
            StepAction::ForwardingRule(r) => Some(r),
            _ => None,
        })
    }

    /// Hex sha256 of the plan's JSON form
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Step-level difference against a previous run's plan
    pub fn diff(&self, previous: &ProvisioningPlan) -> PlanDiff {
        let current: BTreeMap<&str, &StepAction> =
            self.steps.iter().map(|s| (s.key.as_str(), &s.action)).collect();
        let before: BTreeMap<&str, &StepAction> =
            previous.steps.iter().map(|s| (s.key.as_str(), &s.action)).collect();

        let mut diff = PlanDiff::default();
        for (key, action) in &current {
            match before.get(key) {
                None => diff.added.push(key.to_string()),
                Some(old) if old != action => diff.changed.push(key.to_string()),
                Some(_) => {}
            }
        }
        diff.removed = before
            .keys()
            .filter(|key| !current.contains_key(*key))
            .map(|key| key.to_string())
            .collect();
        diff
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl PlanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// What `interconnect-plan plan` writes. Equality ignores the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub generated_at: DateTime<Utc>,
    pub fingerprint: String,
    pub plan: ProvisioningPlan,
}

impl PlanDocument {
    pub fn new(plan: ProvisioningPlan) -> Result<Self, serde_json::Error> {
        Ok(Self {
            generated_at: Utc::now(),
            fingerprint: plan.fingerprint()?,
            plan,
        })
    }
}

impl PartialEq for PlanDocument {
    fn eq(&self, other: &Self) -> bool {
        self.plan == other.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::types::{CloudPair, RouteTableRef, ZoneKind};

    fn zone(cloud: CloudProvider, domain: &str, kind: ZoneKind) -> PlanStep {
        PlanStep::new(StepAction::PrivateZone(PrivateZone {
            name: format!("{}-zone", cloud),
            cloud,
            domain: domain.to_string(),
            kind,
        }))
    }

    fn route(cloud: CloudProvider) -> PlanStep {
        PlanStep::new(StepAction::StaticRoute(StaticRoute {
            cloud,
            interconnect: CloudPair::AWS_GCP,
            tunnel_index: 0,
            destination: "10.1.0.0/16".parse().unwrap(),
        }))
    }

    fn plan(steps: Vec<PlanStep>) -> ProvisioningPlan {
        ProvisioningPlan {
            mode: RedundancyMode::Single,
            links: EnablementMatrix::new(true, false, false),
            interconnects: vec![],
            steps,
            gaps: vec![],
        }
    }

    #[test]
    fn test_step_ids_are_stable() {
        let a = route(CloudProvider::Aws);
        let b = route(CloudProvider::Aws);
        assert_eq!(a.key, "route/aws-gcp/0/aws");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, route(CloudProvider::Gcp).id);
        assert_eq!(a.phase, Phase::LinksBound);
    }

    #[test]
    fn test_propagation_keys() {
        let propagation = |route_table| {
            PlanStep::new(StepAction::RoutePropagation(RoutePropagation {
                cloud: CloudProvider::Aws,
                gateway: "interconnect-aws-vgw".to_string(),
                route_table,
            }))
        };

        let main = propagation(RouteTableRef::Main);
        let named = propagation(RouteTableRef::Named("private-rt".to_string()));
        assert_eq!(main.key, "propagation/aws/@main");
        assert_eq!(named.key, "propagation/aws/private-rt");
        assert_eq!(named.phase, Phase::LinksBound);

        let json = serde_json::to_value(&named.action).unwrap();
        assert_eq!(json["type"], "route_propagation");
        assert_eq!(json["params"]["route_table"]["named"], "private-rt");
        assert_eq!(serde_json::to_value(&main.action).unwrap()["params"]["route_table"], "main");
    }

    #[test]
    fn test_diff_reports_added_removed_changed() {
        let previous = plan(vec![
            route(CloudProvider::Aws),
            zone(CloudProvider::Gcp, "azure.inner", ZoneKind::LocalFallback),
        ]);
        let current = plan(vec![
            route(CloudProvider::Gcp),
            zone(CloudProvider::Gcp, "azure.inner", ZoneKind::Authoritative),
        ]);

        let diff = current.diff(&previous);
        assert_eq!(diff.added, vec!["route/aws-gcp/0/gcp"]);
        assert_eq!(diff.removed, vec!["route/aws-gcp/0/aws"]);
        assert_eq!(diff.changed, vec!["zone/gcp/azure.inner"]);
        assert!(current.diff(&current).is_empty());
    }

    #[test]
    fn test_document_equality_ignores_timestamp() {
        let p = plan(vec![route(CloudProvider::Aws)]);
        let a = PlanDocument::new(p.clone()).unwrap();
        let mut b = PlanDocument::new(p).unwrap();
        b.generated_at = a.generated_at - chrono::Duration::hours(1);

        assert_eq!(a, b);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_document_reads_back() {
        let doc = PlanDocument::new(plan(vec![
            route(CloudProvider::Aws),
            zone(CloudProvider::Azure, "azure.inner", ZoneKind::Authoritative),
        ]))
        .unwrap();

        let json = serde_json::to_string_pretty(&doc).unwrap();
        assert!(json.contains("\"type\": \"static_route\""));

        let parsed: PlanDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.plan.private_zones().count(), 1);
    }
}
