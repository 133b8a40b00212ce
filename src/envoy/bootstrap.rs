//! Static bootstrap configuration handed to a proxy at startup: admin
//! surface, the discovery-service clusters it will poll, and optional
//! tracing and statsd sinks.

use std::{io::Write, path::Path};

use serde::Serialize;
use tracing::info;

use super::{
    clusters::{build_cluster, build_cluster_ssl_context},
    resources::{Cluster, Listener, UpstreamSslContext},
    CDS_NAME, DEFAULT_ACCESS_LOG, LDS_NAME, LOCALHOST_ADDRESS, RDS_NAME, SDS_NAME, ZIPKIN_COLLECTOR_CLUSTER,
    ZIPKIN_COLLECTOR_ENDPOINT,
};
use crate::model::{MeshAuthPolicy, MeshConfig};

#[derive(Debug, Clone, Serialize)]
pub struct Admin {
    pub access_log_path: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryCluster {
    pub cluster: Cluster,
    pub refresh_delay_ms: u64,
}

/// The LDS block references its cluster by name rather than inline.
#[derive(Debug, Clone, Serialize)]
pub struct LdsConfig {
    pub cluster: String,
    pub refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterManager {
    pub clusters: Vec<Cluster>,
    pub sds: DiscoveryCluster,
    pub cds: DiscoveryCluster,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZipkinDriverConfig {
    pub collector_cluster: String,
    pub collector_endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TracingDriver {
    #[serde(rename = "type")]
    pub driver_type: String,
    pub config: ZipkinDriverConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct TracingHttp {
    pub driver: TracingDriver,
}

#[derive(Debug, Clone, Serialize)]
pub struct TracingConfig {
    pub http: TracingHttp,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapConfig {
    pub listeners: Vec<Listener>,
    pub lds: LdsConfig,
    pub admin: Admin,
    pub cluster_manager: ClusterManager,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub statsd_udp_ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingConfig>,
}

fn build_zipkin_tracing() -> TracingConfig {
    TracingConfig {
        http: TracingHttp {
            driver: TracingDriver {
                driver_type: "zipkin".to_owned(),
                config: ZipkinDriverConfig {
                    collector_cluster: ZIPKIN_COLLECTOR_CLUSTER.to_owned(),
                    collector_endpoint: ZIPKIN_COLLECTOR_ENDPOINT.to_owned(),
                },
            },
        },
    }
}

/// Builds the proxy bootstrap. `control_plane_san` lists the identities the
/// proxy should verify on the discovery service when the control plane
/// enforces mutual TLS.
pub fn build_config(mesh: &MeshConfig, control_plane_san: &[String]) -> BootstrapConfig {
    let mut cluster_rds = build_cluster(&mesh.discovery_address, RDS_NAME, mesh.connect_timeout_ms);
    let mut cluster_lds = build_cluster(&mesh.discovery_address, LDS_NAME, mesh.connect_timeout_ms);
    let mut cluster_sds = build_cluster(&mesh.discovery_address, SDS_NAME, mesh.connect_timeout_ms);
    let mut cluster_cds = build_cluster(&mesh.discovery_address, CDS_NAME, mesh.connect_timeout_ms);

    if mesh.control_plane_auth_policy == MeshAuthPolicy::MutualTls {
        let ssl_context = UpstreamSslContext::Mesh(build_cluster_ssl_context(control_plane_san.to_vec()));
        for cluster in [&mut cluster_rds, &mut cluster_lds, &mut cluster_sds, &mut cluster_cds] {
            cluster.ssl_context = Some(ssl_context.clone());
        }
    }

    let mut clusters = vec![cluster_rds, cluster_lds];
    let mut tracing = None;
    if !mesh.zipkin_address.is_empty() {
        clusters.push(build_cluster(&mesh.zipkin_address, ZIPKIN_COLLECTOR_CLUSTER, mesh.connect_timeout_ms));
        tracing = Some(build_zipkin_tracing());
    }

    BootstrapConfig {
        listeners: vec![],
        lds: LdsConfig {
            cluster: LDS_NAME.to_owned(),
            refresh_delay_ms: mesh.discovery_refresh_delay_ms,
        },
        admin: Admin {
            access_log_path: DEFAULT_ACCESS_LOG.to_owned(),
            address: format!("tcp://{LOCALHOST_ADDRESS}:{}", mesh.proxy_admin_port),
        },
        cluster_manager: ClusterManager {
            clusters,
            sds: DiscoveryCluster { cluster: cluster_sds, refresh_delay_ms: mesh.discovery_refresh_delay_ms },
            cds: DiscoveryCluster { cluster: cluster_cds, refresh_delay_ms: mesh.discovery_refresh_delay_ms },
        },
        statsd_udp_ip_address: mesh.statsd_udp_address.clone(),
        tracing,
    }
}

impl BootstrapConfig {
    pub fn write(&self, writer: &mut dyn Write) -> crate::Result<()> {
        let rendered = serde_json::to_vec_pretty(self)?;
        writer.write_all(&rendered)?;
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> crate::Result<()> {
        info!(path = %path.display(), "writing proxy bootstrap configuration");
        let mut file = std::fs::File::create(path)?;
        self.write(&mut file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_contains_discovery_clusters() {
        let mesh = MeshConfig::default();
        let config = build_config(&mesh, &[]);
        assert_eq!(config.cluster_manager.clusters.len(), 2);
        assert_eq!(config.cluster_manager.clusters[0].name, RDS_NAME);
        assert_eq!(config.cluster_manager.sds.cluster.name, SDS_NAME);
        assert!(config.tracing.is_none());
        assert_eq!(config.admin.address, "tcp://127.0.0.1:15000");
    }

    #[test]
    fn zipkin_address_adds_collector_cluster_and_tracer() {
        let mut mesh = MeshConfig::default();
        mesh.zipkin_address = "zipkin.tracing:9411".to_owned();
        let config = build_config(&mesh, &[]);
        assert!(config.cluster_manager.clusters.iter().any(|c| c.name == ZIPKIN_COLLECTOR_CLUSTER));
        let tracing = config.tracing.expect("tracing config");
        assert_eq!(tracing.http.driver.driver_type, "zipkin");
    }

    #[test]
    fn control_plane_mutual_tls_attaches_ssl_contexts() {
        let mut mesh = MeshConfig::default();
        mesh.control_plane_auth_policy = MeshAuthPolicy::MutualTls;
        let san = vec!["spiffe://cluster.local/ns/mesh/sa/discovery".to_owned()];
        let config = build_config(&mesh, &san);
        for cluster in &config.cluster_manager.clusters {
            assert!(cluster.ssl_context.is_some(), "{} missing ssl context", cluster.name);
        }
        assert!(config.cluster_manager.sds.cluster.ssl_context.is_some());
        assert!(config.cluster_manager.cds.cluster.ssl_context.is_some());
    }
}
