//! Cluster construction and the policy pass layered on top of it.

use sha1::{Digest, Sha1};
use tracing::debug;

use super::{
    resources::{
        CircuitBreakerPriority, CircuitBreakers, Cluster, ClusterMeta, ClusterSslContext, ClusterType,
        ExternalSslContext, Host, LbType, ListenerSslContext, OutlierDetection, UpstreamSslContext,
    },
    tcp_address, AUTH_CERTS_PATH, CERT_CHAIN_FILENAME, KEY_FILENAME, LOCALHOST_ADDRESS, ROOT_CERT_FILENAME,
};
use crate::{
    model::{
        rules::LoadBalancing, ConsolidatedAuthPolicy, Labels, MeshConfig, Port, Protocol, Service, ServiceInstance,
    },
    registry::{config::ConfigStoreView, ServiceAccounts},
};

pub const OUTBOUND_CLUSTER_PREFIX: &str = "out.";
pub const INBOUND_CLUSTER_PREFIX: &str = "in.";
pub const ORIGINAL_DST_TCP_CLUSTER: &str = "orig-dst-cluster-tcp";

/// The proxy rejects cluster identifiers longer than this.
pub const MAX_CLUSTER_NAME_LENGTH: usize = 189;

const SHA1_HEX_LENGTH: usize = 40;

/// Truncates an over-long cluster name, replacing the tail with the SHA-1 of
/// the full name so distinct inputs keep distinct identifiers.
pub fn truncate_cluster_name(name: &str) -> String {
    if name.len() <= MAX_CLUSTER_NAME_LENGTH {
        return name.to_owned();
    }
    let keep = MAX_CLUSTER_NAME_LENGTH - SHA1_HEX_LENGTH;
    let boundary = (0..=keep).rev().find(|&i| name.is_char_boundary(i)).unwrap_or(0);
    let digest = Sha1::digest(name.as_bytes());
    format!("{}{}", &name[..boundary], hex::encode(digest))
}

/// Client certificates presented by proxies under mutual TLS.
pub fn build_cluster_ssl_context(verify_subject_alt_name: Vec<String>) -> ClusterSslContext {
    ClusterSslContext {
        cert_chain_file: format!("{AUTH_CERTS_PATH}{CERT_CHAIN_FILENAME}"),
        private_key_file: format!("{AUTH_CERTS_PATH}{KEY_FILENAME}"),
        ca_cert_file: format!("{AUTH_CERTS_PATH}{ROOT_CERT_FILENAME}"),
        verify_subject_alt_name,
    }
}

/// Server-side context for inbound listeners under mutual TLS.
pub fn build_listener_ssl_context() -> ListenerSslContext {
    ListenerSslContext {
        cert_chain_file: format!("{AUTH_CERTS_PATH}{CERT_CHAIN_FILENAME}"),
        private_key_file: format!("{AUTH_CERTS_PATH}{KEY_FILENAME}"),
        ca_cert_file: format!("{AUTH_CERTS_PATH}{ROOT_CERT_FILENAME}"),
        require_client_certificate: true,
    }
}

/// Cluster for outbound traffic to one (service, port, label-subset),
/// resolved through endpoint discovery. Connect timeout and policies are
/// layered on by [`apply_cluster_policy`].
pub fn build_outbound_cluster(service: &Service, port: &Port, labels: Option<&Labels>) -> Cluster {
    let key = service.key(port, labels);
    Cluster {
        name: truncate_cluster_name(&format!("{OUTBOUND_CLUSTER_PREFIX}{key}")),
        service_name: Some(key),
        connect_timeout_ms: 0,
        cluster_type: ClusterType::Sds,
        lb_type: LbType::RoundRobin,
        max_requests_per_connection: None,
        hosts: vec![],
        ssl_context: None,
        features: port.protocol.is_http2().then(|| "http2".to_owned()),
        circuit_breakers: None,
        outlier_detection: None,
        meta: ClusterMeta {
            hostname: service.hostname.clone(),
            port: Some(port.clone()),
            labels: labels.cloned().unwrap_or_default(),
            outbound: true,
            external: service.external(),
        },
    }
}

/// Static cluster for one co-located endpoint port.
pub fn build_inbound_cluster(endpoint_port: u16, protocol: Protocol, connect_timeout_ms: u64) -> Cluster {
    Cluster {
        name: format!("{INBOUND_CLUSTER_PREFIX}{endpoint_port}"),
        service_name: None,
        connect_timeout_ms,
        cluster_type: ClusterType::Static,
        lb_type: LbType::RoundRobin,
        max_requests_per_connection: None,
        hosts: vec![Host { url: tcp_address(LOCALHOST_ADDRESS, endpoint_port) }],
        ssl_context: None,
        features: protocol.is_http2().then(|| "http2".to_owned()),
        circuit_breakers: None,
        outlier_detection: None,
        meta: ClusterMeta::default(),
    }
}

/// Passthrough cluster forwarding to the connection's original destination.
pub fn build_original_dst_cluster(name: &str, connect_timeout_ms: u64) -> Cluster {
    Cluster {
        name: truncate_cluster_name(name),
        service_name: None,
        connect_timeout_ms,
        cluster_type: ClusterType::OriginalDst,
        lb_type: LbType::OriginalDstLb,
        max_requests_per_connection: None,
        hosts: vec![],
        ssl_context: None,
        features: None,
        circuit_breakers: None,
        outlier_detection: None,
        meta: ClusterMeta::default(),
    }
}

/// Strict-DNS cluster addressing a fixed `host:port` endpoint, used for the
/// control-plane, mixer and tracing collectors.
pub fn build_cluster(address: &str, name: &str, connect_timeout_ms: u64) -> Cluster {
    Cluster {
        name: name.to_owned(),
        service_name: None,
        connect_timeout_ms,
        cluster_type: ClusterType::StrictDns,
        lb_type: LbType::RoundRobin,
        max_requests_per_connection: None,
        hosts: vec![Host { url: format!("tcp://{address}") }],
        ssl_context: None,
        features: None,
        circuit_breakers: None,
        outlier_detection: None,
        meta: ClusterMeta::default(),
    }
}

/// Mixer telemetry/policy backend; spoken over gRPC.
pub fn build_mixer_cluster(mesh: &MeshConfig) -> Cluster {
    let mut cluster = build_cluster(&mesh.mixer_address, super::MIXER_CLUSTER, mesh.connect_timeout_ms);
    cluster.features = Some("http2".to_owned());
    cluster
}

/// Layers destination policy, connect timeout and client TLS over a cluster
/// produced by the route pass. Only outbound clusters are eligible;
/// original-destination clusters accept resilience knobs but never a
/// load-balancer override or an SSL context.
pub async fn apply_cluster_policy(
    cluster: &mut Cluster,
    instances: &[ServiceInstance],
    config: &dyn ConfigStoreView,
    mesh: &MeshConfig,
    accounts: &dyn ServiceAccounts,
) {
    if cluster.meta.hostname.is_empty() {
        return;
    }

    if cluster.meta.outbound && cluster.cluster_type == ClusterType::Sds {
        cluster.connect_timeout_ms = mesh.connect_timeout_ms;

        if let Some(port) = &cluster.meta.port {
            // workload certificates only exist for in-mesh destinations
            if !cluster.meta.external
                && mesh.auth_policy.consolidate(port.authentication_policy) == ConsolidatedAuthPolicy::MutualTls
            {
                let ports = vec![port.name.clone()];
                let accounts = accounts.service_accounts(&cluster.meta.hostname, &ports).await;
                cluster.ssl_context = Some(UpstreamSslContext::Mesh(build_cluster_ssl_context(accounts)));
            }
        }
    }

    let Some(policy) = config.policy(instances, &cluster.meta.hostname, &cluster.meta.labels) else {
        return;
    };
    debug!(cluster = %cluster.name, policy = %policy.name, "applying destination policy");

    if cluster.cluster_type == ClusterType::Sds {
        if let Some(lb) = policy.load_balancing {
            cluster.lb_type = match lb {
                LoadBalancing::RoundRobin => LbType::RoundRobin,
                LoadBalancing::LeastConn => LbType::LeastRequest,
                LoadBalancing::Random => LbType::Random,
            };
        }
    }

    if let Some(breaker) = &policy.circuit_breaker {
        cluster.max_requests_per_connection = breaker.http_max_requests_per_connection;
        cluster.circuit_breakers = Some(CircuitBreakers {
            default: CircuitBreakerPriority {
                max_connections: breaker.max_connections,
                max_pending_requests: breaker.http_max_pending_requests,
                max_requests: breaker.http_max_requests,
                max_retries: breaker.http_max_retries,
            },
        });
        if breaker.http_consecutive_errors.is_some() || breaker.http_detection_interval_ms.is_some() {
            cluster.outlier_detection = Some(OutlierDetection {
                consecutive_5xx: breaker.http_consecutive_errors,
                interval_ms: breaker.http_detection_interval_ms,
                base_ejection_time_ms: breaker.sleep_window_ms,
                max_ejection_percent: breaker.http_max_ejection_percent,
            });
        }
    }
}

/// Marks an external destination for TLS origination.
pub fn attach_external_ssl_context(cluster: &mut Cluster) {
    cluster.ssl_context = Some(UpstreamSslContext::External(ExternalSslContext::default()));
}
