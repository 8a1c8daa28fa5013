//! Interconnect Agent - Standalone Binary
//!
//! Creates, inspects and deletes site-to-site VPN connections between
//! AWS, Azure and GCP through Crossplane claims.
//!
//! ## Usage
//!
//! ```bash
//! # Create (or resume) a connection from a JSON spec
//! interconnect-agent --aws-provider-config aws-default \
//!     --gcp-provider-config gcp-default --gcp-project net-prod \
//!     create --spec link.json
//!
//! # Refresh and print a connection
//! interconnect-agent get prod-link
//!
//! # Tear it down
//! interconnect-agent delete prod-link
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use interconnect_engine::interconnect::providers::{AwsCredentials, AzureCredentials, GcpCredentials};
use interconnect_engine::interconnect::{
    ConnectionOrchestrator, EngineConfig, FileStateStore, ProviderRegistry, VpnConnection,
    VpnConnectionSpec,
};

/// Interconnect Agent - Multi-cloud site-to-site VPN orchestration
#[derive(Parser, Debug)]
#[command(name = "interconnect-agent", version, about)]
struct Args {
    /// Directory holding connection records and locks
    #[arg(long, default_value = "/var/lib/interconnect", env = "INTERCONNECT_STATE_DIR")]
    state_dir: PathBuf,

    /// Crossplane ProviderConfig for AWS claims
    #[arg(long, env = "AWS_PROVIDER_CONFIG")]
    aws_provider_config: Option<String>,

    /// Crossplane ProviderConfig for Azure claims
    #[arg(long, env = "AZURE_PROVIDER_CONFIG", requires = "azure_resource_group")]
    azure_provider_config: Option<String>,

    /// Resource group for Azure gateways
    #[arg(long, env = "AZURE_RESOURCE_GROUP")]
    azure_resource_group: Option<String>,

    /// Azure gateway SKU
    #[arg(long, default_value = "VpnGw1", env = "AZURE_GATEWAY_SKU")]
    azure_sku: String,

    /// Crossplane ProviderConfig for GCP claims
    #[arg(long, env = "GCP_PROVIDER_CONFIG", requires = "gcp_project")]
    gcp_provider_config: Option<String>,

    /// GCP project hosting the HA VPN gateways
    #[arg(long, env = "GCP_PROJECT_ID")]
    gcp_project: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a connection, resuming any unfinished attempt with the same name
    Create {
        /// Path to a JSON connection spec
        #[arg(long)]
        spec: PathBuf,
    },
    /// Refresh and print a connection
    Get {
        /// Connection name or id
        name: String,
    },
    /// Delete a connection and every resource it created
    Delete {
        /// Connection name or id
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    info!(
        namespace = %config.namespace,
        state_dir = %args.state_dir.display(),
        "Starting Interconnect Agent"
    );

    let k8s_client = Client::try_default()
        .await
        .context("Failed to create K8s client")?;
    let registry = build_registry(&args, &config, k8s_client);
    if registry.is_empty() {
        anyhow::bail!("No provider configured");
    }

    let store = FileStateStore::open(&args.state_dir, config.lock_stale_after)
        .await
        .context("Failed to open state directory")?;
    let orchestrator = ConnectionOrchestrator::new(registry, Arc::new(store), config);

    match args.command {
        Command::Create { spec } => {
            let raw = tokio::fs::read_to_string(&spec)
                .await
                .with_context(|| format!("Failed to read {}", spec.display()))?;
            let spec: VpnConnectionSpec =
                serde_json::from_str(&raw).context("Failed to parse connection spec")?;

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, rolling back");
                    trigger.cancel();
                }
            });

            let conn = orchestrator
                .create_vpn_connection_with_cancel(&spec, &cancel)
                .await
                .with_context(|| format!("Failed to create connection {}", spec.name))?;
            print_connection(&conn)?;
        }
        Command::Get { name } => {
            let conn = orchestrator
                .get_vpn_connection(&name)
                .await
                .with_context(|| format!("Failed to get connection {}", name))?;
            print_connection(&conn)?;
        }
        Command::Delete { name } => {
            orchestrator
                .delete_vpn_connection(&name)
                .await
                .with_context(|| format!("Failed to delete connection {}", name))?;
            info!(connection = %name, "Delete complete");
        }
    }

    Ok(())
}

/// Register a client for every provider whose settings are present
fn build_registry(args: &Args, config: &EngineConfig, client: Client) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let namespace = config.namespace.as_str();

    match &args.aws_provider_config {
        Some(provider_config) => registry.register(Arc::new(
            AwsCredentials::new(provider_config)
                .client(client.clone(), namespace)
                .with_retry(config.client_retry.clone()),
        )),
        None => warn!("AWS provider config not set, AWS disabled"),
    }

    match (&args.azure_provider_config, &args.azure_resource_group) {
        (Some(provider_config), Some(resource_group)) => registry.register(Arc::new(
            AzureCredentials::new(provider_config, resource_group)
                .with_sku(&args.azure_sku)
                .client(client.clone(), namespace)
                .with_retry(config.client_retry.clone()),
        )),
        _ => warn!("Azure provider config not set, Azure disabled"),
    }

    match (&args.gcp_provider_config, &args.gcp_project) {
        (Some(provider_config), Some(project)) => registry.register(Arc::new(
            GcpCredentials::new(provider_config, project)
                .client(client, namespace)
                .with_retry(config.client_retry.clone()),
        )),
        _ => warn!("GCP provider config not set, GCP disabled"),
    }

    registry
}

/// Print a connection as JSON with pre-shared keys masked
fn print_connection(conn: &VpnConnection) -> Result<()> {
    let mut value = serde_json::to_value(conn).context("Failed to serialize connection")?;
    if let Some(tunnels) = value.get_mut("tunnels").and_then(Value::as_array_mut) {
        for tunnel in tunnels {
            tunnel["preshared_key"] = Value::String("[REDACTED]".to_string());
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
