use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

pub mod discovery;
pub mod envoy;
pub mod model;
pub mod registry;
pub mod rules;

use discovery::{DiscoveryService, Environment};
use model::MeshConfig;
use registry::{
    config::{ConfigStoreView, MemoryConfigStore},
    memory::MemoryServiceDiscovery,
    ServiceAccounts, ServiceDiscovery,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
#[command(name = "meshward", about = "Service mesh control plane discovery service")]
pub struct Args {
    /// Address the discovery API listens on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub discovery_addr: SocketAddr,
    /// Mesh configuration YAML; built-in defaults apply when omitted.
    #[arg(long)]
    pub mesh_config: Option<PathBuf>,
    /// Registry snapshot YAML seeding the in-memory registry backend.
    #[arg(long)]
    pub registry_snapshot: Option<PathBuf>,
    /// Rule set YAML seeding the in-memory config store.
    #[arg(long)]
    pub rule_set: Option<PathBuf>,
    /// Write the proxy bootstrap configuration to this path and exit.
    #[arg(long)]
    pub write_bootstrap: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("discovery address must not be empty")]
    DiscoveryAddress,
    #[error("proxy listen port and proxy http port must differ")]
    ProxyPortConflict,
}

fn validate(mesh: &MeshConfig) -> Result<()> {
    if mesh.discovery_address.is_empty() {
        return Err(ConfigurationError::DiscoveryAddress.into());
    }
    if mesh.proxy_listen_port != 0 && mesh.proxy_listen_port == mesh.proxy_http_port {
        return Err(ConfigurationError::ProxyPortConflict.into());
    }
    Ok(())
}

/// Rules accepted by the `--rule-set` seed file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RuleSet {
    route_rules: Vec<model::rules::RouteRule>,
    destination_policies: Vec<model::rules::DestinationPolicy>,
    egress_rules: Vec<model::rules::EgressRule>,
    ingress_rules: Vec<model::rules::IngressRule>,
}

fn load_config_store(args: &Args) -> Result<MemoryConfigStore> {
    let store = MemoryConfigStore::new();
    if let Some(path) = &args.rule_set {
        let rule_set: RuleSet = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        for rule in rule_set.route_rules {
            store.add_route_rule(rule);
        }
        for policy in rule_set.destination_policies {
            store.add_destination_policy(policy);
        }
        for rule in rule_set.egress_rules {
            store.add_egress_rule(rule);
        }
        for rule in rule_set.ingress_rules {
            store.add_ingress_rule(rule);
        }
    }
    Ok(store)
}

pub async fn start(args: Args) -> Result<()> {
    info!("Meshward started");

    let mesh = match &args.mesh_config {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
        None => MeshConfig::default(),
    };
    validate(&mesh)?;

    if let Some(path) = &args.write_bootstrap {
        envoy::bootstrap::build_config(&mesh, &[]).write_file(path)?;
        return Ok(());
    }

    let registry = Arc::new(match &args.registry_snapshot {
        Some(path) => MemoryServiceDiscovery::from_snapshot(serde_yaml::from_str(&std::fs::read_to_string(path)?)?),
        None => MemoryServiceDiscovery::new(),
    });
    let discovery: Arc<dyn ServiceDiscovery> = registry.clone();
    let accounts: Arc<dyn ServiceAccounts> = registry;
    let config: Arc<dyn ConfigStoreView> = Arc::new(load_config_store(&args)?);

    let environment = Environment::builder()
        .discovery(discovery)
        .accounts(accounts)
        .config(config)
        .mesh(mesh)
        .build();
    let service = Arc::new(DiscoveryService::new(environment));

    let listener = TcpListener::bind(args.discovery_addr).await?;
    info!(address = %listener.local_addr()?, "discovery API listening");
    axum::serve(listener, service.router()).await?;

    info!("Meshward stopped");
    Ok(())
}
