//! Interconnect Engine Library
//!
//! Plans cross-cloud VPN and DNS interconnects and applies the plan through
//! pluggable provisioning executors.

pub mod config;
pub mod error;
pub mod executor;
pub mod topology;

pub use config::TopologyConfig;
pub use error::{AddressingError, ConfigError, SequencingError, TopologyError};
pub use executor::{apply_plan, DryRunExecutor, ProvisioningExecutor};
pub use topology::{MultiCloudProviders, ProvisioningPlan, TopologyOrchestrator};
