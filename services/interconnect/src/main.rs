//! Interconnect Planner CLI
//!
//! Resolves the cross-cloud interconnect topology described by a TOML file
//! and prints or applies the resulting provisioning plan.
//!
//! # Usage
//! ```bash
//! # Check the configuration only
//! interconnect-plan --config interconnect.toml validate
//!
//! # Write the plan document
//! interconnect-plan --config interconnect.toml plan --output plan.json
//!
//! # Compare against a previous run
//! interconnect-plan --config interconnect.toml diff --previous plan.json --fail-on-change
//!
//! # Walk the plan through the dry-run executor
//! interconnect-plan --config interconnect.toml dry-run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use interconnect_engine::topology::PlanDocument;
use interconnect_engine::{
    apply_plan, DryRunExecutor, MultiCloudProviders, ProvisioningPlan, TopologyConfig,
    TopologyOrchestrator,
};

#[derive(Parser)]
#[command(name = "interconnect-plan")]
#[command(about = "Cross-cloud VPN and DNS interconnect planner", long_about = None)]
#[command(version)]
struct Cli {
    /// Topology configuration file
    #[arg(long, short, env = "INTERCONNECT_CONFIG", default_value = "interconnect.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration without resolving
    Validate,

    /// Resolve the topology and emit the plan document
    Plan {
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Resolve and compare against a previous plan document
    Diff {
        #[arg(long)]
        previous: PathBuf,

        /// Exit with an error if any step was added, removed or changed
        #[arg(long, default_value = "false")]
        fail_on_change: bool,
    },

    /// Resolve and walk the plan through the dry-run executor
    DryRun,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .json()
        .init();

    let config = TopologyConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    info!(
        config = %cli.config.display(),
        mode = %config.mode,
        "Starting interconnect planner"
    );

    match cli.command {
        Commands::Validate => {
            info!("Configuration is valid");
        }

        Commands::Plan { output } => {
            let plan = resolve(config).await?;
            let document = PlanDocument::new(plan)?;
            let json = serde_json::to_string_pretty(&document)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(
                        path = %path.display(),
                        fingerprint = %document.fingerprint,
                        "Plan written"
                    );
                }
                None => println!("{}", json),
            }
        }

        Commands::Diff {
            previous,
            fail_on_change,
        } => {
            let contents = std::fs::read_to_string(&previous)
                .with_context(|| format!("Failed to read {}", previous.display()))?;
            let before: PlanDocument = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse plan document {}", previous.display()))?;

            let plan = resolve(config).await?;
            let diff = plan.diff(&before.plan);
            println!("{}", serde_json::to_string_pretty(&diff)?);

            if diff.is_empty() {
                info!("Plan unchanged");
            } else {
                warn!(
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "Plan differs from previous run"
                );
                if fail_on_change {
                    anyhow::bail!("plan changed since {}", previous.display());
                }
            }
        }

        Commands::DryRun => {
            let plan = resolve(config).await?;
            let executor = DryRunExecutor::new();
            let report = apply_plan(&executor, &plan).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn resolve(config: TopologyConfig) -> Result<ProvisioningPlan> {
    let providers = MultiCloudProviders::reference(&config.resource_prefix);
    let orchestrator = TopologyOrchestrator::new(config, providers);
    let plan = orchestrator
        .resolve()
        .await
        .context("Failed to resolve interconnect topology")?;

    if !plan.gaps.is_empty() {
        warn!(gaps = plan.gaps.len(), "Some domains fall back to local zones");
    }
    Ok(plan)
}
