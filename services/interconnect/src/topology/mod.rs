//! Interconnect Topology Resolver
//!
//! Computes a VPN tunnel mesh plus a DNS forwarding mesh across AWS, GCP
//! and Azure, from an enablement matrix and a redundancy mode.
//!
//! ## Architecture
//!
//! - **Planner**: enablement x mode -> interconnects (pure)
//! - **Providers**: per-cloud gateway and resolver endpoint collaborators
//! - **Tunnel Binder**: symmetric tunnel records, BGP link-local addressing, shared keys
//! - **DNS Planner**: resolver endpoint state machine, forwarding rules, fallback zones
//! - **Orchestrator**: gateways-ready / links-bound barrier, emits the plan

pub mod dns;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod providers;
pub mod registry;
pub mod tunnel;
pub mod types;

pub use dns::{DnsForwardingPlanner, DnsPlan, EndpointRequest};
pub use orchestrator::{GatewaysReady, TopologyOrchestrator};
pub use plan::{Phase, PlanDiff, PlanDocument, PlanStep, ProvisioningPlan, StepAction};
pub use planner::{participating_clouds, plan_interconnects, EnablementMatrix};
pub use providers::{
    AwsProvider, AzureProvider, CloudProviderAdapter, GcpProvider, MultiCloudProviders,
};
pub use registry::NetworkRegistry;
pub use tunnel::{route_propagations, static_routes, LinkSide, TunnelBinder};
pub use types::*;
